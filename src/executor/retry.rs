//! Exponential backoff retry for node operations
//!
//! Only classified-retryable failures are retried: network errors,
//! timeouts, transient navigation failures and 429/5xx responses. Anything
//! else fails fast into the recovery path.

use log::debug;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::driver::DriverError;
use crate::recovery::classifier::is_transient_message;

/// Backoff schedule: exponential with jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Fractional jitter applied symmetrically (0.1 = ±10%)
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based), jittered
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let base = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        let spread = capped * self.jitter;
        let jittered = if spread > 0.0 {
            capped + rand::rng().random_range(-spread..=spread)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Whether a driver error is worth retrying locally
#[must_use]
pub fn is_retryable(error: &DriverError) -> bool {
    match error {
        DriverError::Timeout { .. } => true,
        DriverError::Other(message) => is_transient_message(message),
        DriverError::NotSupported { .. } | DriverError::ElementNotFound { .. } => false,
    }
}

/// Run an operation under the policy, retrying transient failures
pub async fn retry_with_policy<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DriverError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.max_attempts && is_retryable(&error) => {
                let delay = policy.delay(attempt);
                debug!(
                    "{operation_name} attempt {attempt}/{} failed ({error}), retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
