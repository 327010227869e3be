//! A site published as a directory tree
//!
//! ```text
//! site/
//!   blog/post.page.json          page description: head, main, sections, fragments
//!   blog/post-v1.plain.html      variant markup
//!   blog/manifest.json           sheet manifest
//!   blog/old.plain.html.redirect alias: served, but flagged as redirected
//! ```

use anyhow::Context;
use async_trait::async_trait;
use indexmap::IndexMap;
use pex_core::{ContentSource, FetchError, Fetched, MemoryDocument, PageContext};
use pex_manifest::Metadata;
use serde::Deserialize;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Suffix of page description files
pub const PAGE_SUFFIX: &str = ".page.json";

/// Suffix marking a path as a redirecting alias
pub const REDIRECT_SUFFIX: &str = ".redirect";

/// [`ContentSource`] reading files under a site root
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    /// Serve files under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File backing a site path, `None` when it escapes the root
    #[must_use]
    pub fn file_for(&self, path: &str) -> Option<PathBuf> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

async fn read(file: &Path, path: &str) -> Result<Option<String>, FetchError> {
    match tokio::fs::read_to_string(file).await {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FetchError::Transport(format!("{path}: {e}"))),
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn fetch(&self, path: &str) -> Result<Fetched, FetchError> {
        let Some(file) = self.file_for(path) else {
            return Err(FetchError::Transport(format!("{path}: outside the site root")));
        };
        tracing::debug!(path, file = %file.display(), "reading site file");

        let mut alias = file.clone().into_os_string();
        alias.push(REDIRECT_SUFFIX);
        if let Some(body) = read(Path::new(&alias), path).await? {
            return Ok(Fetched::redirected(body));
        }
        match read(&file, path).await? {
            Some(body) => Ok(Fetched::ok(body)),
            None => Err(FetchError::NotFound(path.to_string())),
        }
    }
}

/// One page section as described on disk
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SectionFile {
    /// Section metadata block
    pub metadata: Metadata,
    /// Section markup
    pub content: String,
}

/// Page description: what the server would have rendered
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageFile {
    /// Head metadata
    pub head: Metadata,
    /// Markup of the main container
    pub main: String,
    /// Sections in document order
    pub sections: Vec<SectionFile>,
    /// Fragment mount points by selector
    pub fragments: IndexMap<String, String>,
}

impl PageFile {
    /// Load `<site>/<path>.page.json`
    ///
    /// # Errors
    /// When the file is missing, unreadable, or not a page description
    pub async fn load(site: &Path, path: &str) -> anyhow::Result<Self> {
        let trimmed = path.trim_matches('/');
        let name = if trimmed.is_empty() { "index" } else { trimmed };
        let file = site.join(format!("{name}{PAGE_SUFFIX}"));
        let raw = tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("reading page {}", file.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing page {}", file.display()))
    }

    /// In-memory document holding the page's containers
    #[must_use]
    pub fn document(&self) -> MemoryDocument {
        let doc = self
            .sections
            .iter()
            .fold(MemoryDocument::new().with_main(self.main.clone()), |doc, s| {
                doc.with_section(s.content.clone())
            });
        self.fragments
            .iter()
            .fold(doc, |doc, (selector, markup)| {
                doc.with_fragment(selector.clone(), markup.clone())
            })
    }

    /// Page context for a request to `url`
    #[must_use]
    pub fn context(&self, url: Url) -> PageContext {
        self.sections.iter().fold(
            PageContext::new(url).with_head(self.head.clone()),
            |page, s| page.with_section(s.metadata.clone()),
        )
    }
}
