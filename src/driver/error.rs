//! Driver error surface consumed by the retry and recovery layers

/// Errors produced by page and element operations
///
/// The `Other` variant preserves the backend's message verbatim; the
/// recovery classifier pattern-matches on it.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// This driver variant cannot perform the requested action
    #[error("operation not supported by this driver: {operation}")]
    NotSupported { operation: &'static str },

    /// A selector matched nothing
    #[error("no element matched selector: {selector}")]
    ElementNotFound { selector: String },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    /// Backend failure with the underlying message preserved
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    #[must_use]
    pub fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    #[must_use]
    pub fn element_not_found(selector: impl Into<String>) -> Self {
        Self::ElementNotFound { selector: selector.into() }
    }

    #[must_use]
    pub fn other(err: impl std::fmt::Display) -> Self {
        Self::Other(err.to_string())
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
