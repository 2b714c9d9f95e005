//! Tracing subscriber setup for the `repairshop` binary.
//!
//! Filter priority, highest first: `RUST_LOG`, then `--verbose` (debug),
//! then the default `repairshop=info`.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "repairshop=debug"
    } else {
        "repairshop=info"
    }
}

fn build_env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init_subscriber(verbose: bool, format: LogFormat) {
    let filter = build_env_filter(verbose);
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init(),
    }
}
