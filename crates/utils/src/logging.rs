//! provides logging helpers

use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;

/// fmt layer shared by every binary of the workspace, writing to stderr so
/// that stdout stays free for command output and child processes
pub fn get_fmt_layer() -> impl Layer<Registry> + Send + Sync {
    layer()
        .with_writer(std::io::stderr)
        .with_target(true)
}

/// initiate the global tracing subscriber
///
/// defaults to `INFO`, overridable through `RUST_LOG`
pub fn init() {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();

    registry()
        .with(get_fmt_layer().with_filter(env_filter))
        .init();
}
