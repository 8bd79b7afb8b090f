//! Logging setup and the tracing-backed audit sink.

/// Initialize process-wide logging from `KEYWARD_LOG_*` / `RUST_LOG`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    let config = self::tracing::LogConfig::from_env().unwrap_or_default();
    self::tracing::init_with(&config);
}

/// Security events routed to the `audit` target.
pub mod audit;

/// Subscriber configuration (filters, output format).
pub mod tracing;

pub use audit::TracingAuditSink;
pub use self::tracing::{LogConfig, LogConfigError, LogFormat, init_with};
