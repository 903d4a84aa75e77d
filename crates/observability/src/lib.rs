//! Process-wide observability setup.

/// Initialize tracing/logging for the process, honouring `RUST_LOG` and
/// `EVENTHUB_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;
