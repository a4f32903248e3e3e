//! Process-wide tracing setup shared by the API binary and tests.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize tracing with the format named by `LOG_FORMAT` (JSON unless it says `pretty`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .map(|v| LogFormat::parse(&v))
        .unwrap_or_default();
    tracing::init(format);
}
