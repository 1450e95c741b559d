//! Process-wide tracing setup for binaries and tests embedding the sync layer.

/// Subscriber construction (filters, output format).
pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize process-wide tracing.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init(LogFormat::from_env());
}
