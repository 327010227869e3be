//! The page being resolved and the host surfaces around it
//!
//! - [`PageContext`]: URL plus head and section metadata, as scanned by the host
//! - [`Document`]: the DOM operations the engine performs
//! - [`ContentSource`]: retrieval of manifests and variant markup
//! - [`PageLifetime`]: torn down when the visitor navigates away

use crate::error::{EngineResult, FetchError};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use pex_manifest::Metadata;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

/// Page URL and the metadata declared on it
#[derive(Debug, Clone, PartialEq)]
pub struct PageContext {
    /// Current page URL, including the query string
    pub url: Url,
    /// Page-level metadata
    pub head: Metadata,
    /// Section metadata blocks in DOM order
    pub sections: Vec<Metadata>,
}

impl PageContext {
    /// Create context for a page URL with no metadata
    ///
    /// # Errors
    /// `EngineError::InvalidPageUrl` when `url` does not parse
    pub fn parse(url: &str) -> EngineResult<Self> {
        Ok(Self::new(Url::parse(url)?))
    }

    /// Create context for a parsed URL
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            head: Metadata::new(),
            sections: Vec::new(),
        }
    }

    /// With page-level metadata
    #[inline]
    #[must_use]
    pub fn with_head(mut self, head: Metadata) -> Self {
        self.head = head;
        self
    }

    /// With one more section
    #[inline]
    #[must_use]
    pub fn with_section(mut self, section: Metadata) -> Self {
        self.sections.push(section);
        self
    }

    /// Page thumbnail from `og:image`
    #[must_use]
    pub fn thumbnail(&self) -> Option<&str> {
        self.head.get("og:image")
    }

    /// Path of the page
    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// A DOM element the engine touches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementRef {
    /// Document body, receives page-scope classes
    Body,
    /// Main content container, receives page-scope content
    Main,
    /// N-th section container
    Section(usize),
    /// Fragment mount point matched by a selector
    Fragment(String),
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body => f.write_str("body"),
            Self::Main => f.write_str("main"),
            Self::Section(i) => write!(f, "section:{i}"),
            Self::Fragment(selector) => write!(f, "fragment:{selector}"),
        }
    }
}

impl Serialize for ElementRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// DOM operations used by the engine
pub trait Document: Send + Sync {
    /// Whether the element exists
    fn has_element(&self, element: &ElementRef) -> bool;

    /// Add classes to an element; `false` when it does not exist
    fn add_classes(&self, element: &ElementRef, classes: &[String]) -> bool;

    /// Replace an element's content; `false` when it does not exist
    fn replace_content(&self, element: &ElementRef, markup: &str) -> bool;

    /// Navigate the browser to `path`
    fn navigate(&self, path: &str);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    markup: String,
    classes: Vec<String>,
}

impl Node {
    fn new(markup: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            classes: Vec::new(),
        }
    }

    fn add_classes(&mut self, classes: &[String]) {
        for class in classes {
            if !self.classes.contains(class) {
                self.classes.push(class.clone());
            }
        }
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    body: Node,
    main: Node,
    sections: Vec<Node>,
    fragments: IndexMap<String, Node>,
    location: Option<String>,
}

impl DocumentState {
    fn node(&self, element: &ElementRef) -> Option<&Node> {
        match element {
            ElementRef::Body => Some(&self.body),
            ElementRef::Main => Some(&self.main),
            ElementRef::Section(i) => self.sections.get(*i),
            ElementRef::Fragment(selector) => self.fragments.get(selector),
        }
    }

    fn node_mut(&mut self, element: &ElementRef) -> Option<&mut Node> {
        match element {
            ElementRef::Body => Some(&mut self.body),
            ElementRef::Main => Some(&mut self.main),
            ElementRef::Section(i) => self.sections.get_mut(*i),
            ElementRef::Fragment(selector) => self.fragments.get_mut(selector),
        }
    }
}

/// In-memory document
///
/// Body and main always exist; sections and fragment mount points exist once
/// added.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: RwLock<DocumentState>,
}

impl MemoryDocument {
    /// Create document with empty body and main
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With main content
    #[must_use]
    pub fn with_main(self, markup: impl Into<String>) -> Self {
        self.state.write().main = Node::new(markup);
        self
    }

    /// With one more section
    #[must_use]
    pub fn with_section(self, markup: impl Into<String>) -> Self {
        self.state.write().sections.push(Node::new(markup));
        self
    }

    /// With a fragment mount point
    #[must_use]
    pub fn with_fragment(self, selector: impl Into<String>, markup: impl Into<String>) -> Self {
        self.state
            .write()
            .fragments
            .insert(selector.into(), Node::new(markup));
        self
    }

    /// Classes of an element, empty when missing
    #[must_use]
    pub fn classes(&self, element: &ElementRef) -> Vec<String> {
        self.state
            .read()
            .node(element)
            .map(|n| n.classes.clone())
            .unwrap_or_default()
    }

    /// Content of an element
    #[must_use]
    pub fn content(&self, element: &ElementRef) -> Option<String> {
        self.state.read().node(element).map(|n| n.markup.clone())
    }

    /// Path navigated to, if any
    #[must_use]
    pub fn location(&self) -> Option<String> {
        self.state.read().location.clone()
    }

    /// Number of sections
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.state.read().sections.len()
    }

    /// Fragment selectors in insertion order
    #[must_use]
    pub fn fragment_selectors(&self) -> Vec<String> {
        self.state.read().fragments.keys().cloned().collect()
    }
}

impl Document for MemoryDocument {
    fn has_element(&self, element: &ElementRef) -> bool {
        self.state.read().node(element).is_some()
    }

    fn add_classes(&self, element: &ElementRef, classes: &[String]) -> bool {
        match self.state.write().node_mut(element) {
            Some(node) => {
                node.add_classes(classes);
                true
            }
            None => false,
        }
    }

    fn replace_content(&self, element: &ElementRef, markup: &str) -> bool {
        match self.state.write().node_mut(element) {
            Some(node) => {
                node.markup = markup.to_string();
                true
            }
            None => false,
        }
    }

    fn navigate(&self, path: &str) {
        self.state.write().location = Some(path.to_string());
    }
}

impl<T: Document + ?Sized> Document for Arc<T> {
    fn has_element(&self, element: &ElementRef) -> bool {
        (**self).has_element(element)
    }

    fn add_classes(&self, element: &ElementRef, classes: &[String]) -> bool {
        (**self).add_classes(element, classes)
    }

    fn replace_content(&self, element: &ElementRef, markup: &str) -> bool {
        (**self).replace_content(element, markup)
    }

    fn navigate(&self, path: &str) {
        (**self).navigate(path);
    }
}

/// A fetched document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Response body
    pub body: String,
    /// Whether the response came from following a redirect
    pub redirected: bool,
}

impl Fetched {
    /// Direct response
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            redirected: false,
        }
    }

    /// Response reached through a redirect
    #[must_use]
    pub fn redirected(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            redirected: true,
        }
    }
}

/// Retrieval of site content by path
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the resource at `path`
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError>;
}

#[async_trait]
impl<T: ContentSource + ?Sized> ContentSource for Arc<T> {
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError> {
        (**self).fetch(path).await
    }
}

/// Source with nothing published
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

#[async_trait]
impl ContentSource for EmptySource {
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError> {
        Err(FetchError::NotFound(path.to_string()))
    }
}

/// Shared signal that the page context is gone
#[derive(Debug, Clone, Default)]
pub struct PageLifetime {
    torn_down: Arc<AtomicBool>,
}

impl PageLifetime {
    /// Create live page
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tear the page down
    pub fn cancel(&self) {
        self.torn_down.store(true, Ordering::Release);
    }

    /// Whether the page is gone
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}
