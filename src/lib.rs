//! # memberwatch
//!
//! Process-level glue: command line, logging setup and the shutdown
//! lifecycle around the membership engine and report server.

pub mod cli;
pub mod lifecycle;

pub use lifecycle::{Lifecycle, LifecycleState};

use tracing_subscriber::EnvFilter;

/// Installs the global `fmt` subscriber; `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
