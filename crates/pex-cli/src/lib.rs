//! # PEX command line host
//!
//! Runs the experiment engine outside a browser:
//! - `resolve`: one page load against a site directory, with visitor state in
//!   a JSON file so stickiness carries across invocations
//! - `simulate`: many first-time visitors against one split, to check the
//!   distribution
//!
//! The binary in `main.rs` is a thin clap layer over this library.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod resolve;
pub mod simulate;
pub mod site;
pub mod store;

pub use resolve::{
    load_config, resolve, CollectingTelemetry, GatedRecord, ResolveOptions, ResolveOutput,
    TelemetryRecord, DEFAULT_ORIGIN,
};
pub use simulate::{run_simulation, SimulationReport, SimulationRow, SimulatorConfig};
pub use site::{FsContentSource, PageFile, SectionFile};
pub use store::JsonFileStore;

/// Install the stderr log subscriber
///
/// `RUST_LOG` wins over `level` when set. Calling twice is harmless.
pub fn init_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        tracing::debug!("tracing subscriber already installed: {err}");
    }
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
