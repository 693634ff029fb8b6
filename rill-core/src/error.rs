//! Error types for the runtime.
//!
//! Programmer errors (misuse of the store) are not represented here; they go
//! through [`crate::issue::report_issue`]. This enum covers conditions a
//! caller can reasonably handle.

use thiserror::Error;

/// Errors produced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// An effect was cancelled. Effect operations may return this to stop
    /// early; it is filtered before any unhandled-error reporting.
    #[error("effect was cancelled")]
    Cancelled,

    /// A bounded wait elapsed.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A configuration value could not be parsed or is out of range.
    #[error("invalid configuration for {key}: {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    /// A dependency was requested that has no registered value.
    #[error("no value registered for dependency {0}")]
    DependencyMissing(&'static str),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Whether an effect error represents cancellation rather than failure.
pub(crate) fn is_cancellation(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        matches!(cause.downcast_ref::<Error>(), Some(Error::Cancelled))
            || cause.is::<futures_util::future::Aborted>()
    })
}
