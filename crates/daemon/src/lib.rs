//! Daemon wiring around the protocol, cache and repository crates.

pub mod config;
pub mod server;

pub use config::Config;
pub use server::{Server, ServerError, run};

use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber with the given filter directive.
pub fn init_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::builder().parse_lossy(filter))
        .with_target(true)
        .init();
}
