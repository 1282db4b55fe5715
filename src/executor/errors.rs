//! Task-level error kinds
//!
//! Ordered by severity; the task-level error reported at end-of-phase is
//! the highest-severity unresolved error.

use crate::driver::DriverError;

/// Errors surfaced by the task execution core
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Malformed message or task; logged and acked, never retried
    #[error("invalid task: {0}")]
    Validation(String),

    /// Network, timeout, 429/5xx, connection reset, browser disconnect;
    /// retried locally, then handed to recovery
    #[error("transient i/o failure: {0}")]
    TransientIo(String),

    /// Element not found after wait, selector never visible; classified by
    /// recovery, usually not retryable locally
    #[error("browser interaction failed: {0}")]
    BrowserInteraction(String),

    /// Recovery declared the task terminal; dead-lettered with an incident
    #[error("terminal recovery outcome: {0}")]
    RuleTerminal(String),

    /// Store or bus unavailable on a critical path; nacked so the bus
    /// redelivers once the dependency recovers
    #[error("fatal infrastructure failure: {0}")]
    Fatal(String),
}

impl ExecError {
    /// Severity rank; higher wins when reducing node errors to a task error
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            Self::Validation(_) => 0,
            Self::BrowserInteraction(_) => 1,
            Self::TransientIo(_) => 2,
            Self::RuleTerminal(_) => 3,
            Self::Fatal(_) => 4,
        }
    }

    /// Pick the more severe of two errors
    #[must_use]
    pub fn max_severity(self, other: Self) -> Self {
        if other.severity() > self.severity() { other } else { self }
    }
}

impl From<DriverError> for ExecError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::ElementNotFound { .. } | DriverError::NotSupported { .. } => {
                Self::BrowserInteraction(err.to_string())
            }
            DriverError::Timeout { .. } => Self::TransientIo(err.to_string()),
            DriverError::Other(message) => Self::TransientIo(message),
        }
    }
}

impl From<crate::store::StoreError> for ExecError {
    fn from(err: crate::store::StoreError) -> Self {
        Self::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_reduces_to_worst() {
        let low = ExecError::BrowserInteraction("missing".to_string());
        let high = ExecError::Fatal("store down".to_string());
        assert_eq!(low.max_severity(high).severity(), 4);

        let a = ExecError::TransientIo("timeout".to_string());
        let b = ExecError::Validation("bad params".to_string());
        assert_eq!(a.max_severity(b).severity(), 2);
    }
}
