//! Tracing/logging setup shared by every binary embedding the core.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, LoggingConfig};

/// Initialize process-wide logging with defaults (`info`, JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    self::tracing::init(&LoggingConfig::default());
}

/// Initialize process-wide logging from explicit configuration.
pub fn init_with(config: &LoggingConfig) {
    self::tracing::init(config);
}
