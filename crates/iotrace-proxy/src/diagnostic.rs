//! Call-context capture for boundary cases.

use std::backtrace::Backtrace;

/// Capture the current call stack as text, regardless of `RUST_BACKTRACE`.
///
/// Only called when diagnostics are enabled, so the capture cost is opt-in.
pub fn capture() -> String {
    Backtrace::force_capture().to_string()
}

/// Log the call context of a filesystem-level call.
pub(crate) fn log_call_context(operation: &str, subject: &str) {
    tracing::info!(
        operation,
        subject,
        backtrace = %capture(),
        "Call context"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_not_empty() {
        assert!(!capture().trim().is_empty());
    }
}
