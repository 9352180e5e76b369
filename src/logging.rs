use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Installs the global JSON subscriber. `RUST_LOG` overrides the default
/// `info` filter. Calling it twice is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .with_current_span(false)
        .try_init();
}

pub fn debug(event: &str, message: &str, metadata: Value) {
    tracing::debug!(event, metadata = %metadata, "{message}");
}

pub fn info(event: &str, message: &str, metadata: Value) {
    tracing::info!(event, metadata = %metadata, "{message}");
}

pub fn warn(event: &str, message: &str, metadata: Value) {
    tracing::warn!(event, metadata = %metadata, "{message}");
}

pub fn error(event: &str, message: &str, metadata: Value) {
    tracing::error!(event, metadata = %metadata, "{message}");
}

pub fn info_simple(event: &str, message: &str) {
    tracing::info!(event, "{message}");
}
