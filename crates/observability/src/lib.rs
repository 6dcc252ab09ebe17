//! Process-wide logging setup for consumers.

/// Initialize process-wide logging from the environment.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;

pub use self::tracing::{LOG_FORMAT_VAR, LogFormat, ParseLogFormatError};
