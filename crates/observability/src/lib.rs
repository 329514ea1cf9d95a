//! Process-wide logging setup for reconq binaries.

/// Tracing subscriber configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize structured JSON logging, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json, "info");
}

/// Initialize logging with an explicit format and fallback filter directive.
///
/// `RUST_LOG` still wins when set.
pub fn init_with(format: LogFormat, default_directive: &str) {
    tracing::init(format, default_directive);
}
