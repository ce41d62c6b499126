//! Process-wide tracing setup.
//!
//! The client crates only emit `tracing` events. A host application installs
//! one subscriber at startup with [`init_logging`] or [`init_logging_json`].
//! `RUST_LOG`, when set, takes precedence over the level passed in.

use anyhow::{anyhow, Result};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    registry::Registry,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Human-readable output with source locations.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .boxed();
    install(level, layer)
}

/// One JSON object per event, for log shippers.
pub fn init_logging_json(level: &str) -> Result<()> {
    let layer = fmt::layer()
        .json()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_thread_names(true)
        .with_current_span(true)
        .boxed();
    install(level, layer)
}

fn install(level: &str, output: BoxedLayer) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("tracing subscriber already installed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let first = init_logging("debug");
        let second = init_logging_json("info");
        assert!(first.is_ok() || second.is_ok());
        assert!(first.is_err() || second.is_err());
    }
}
