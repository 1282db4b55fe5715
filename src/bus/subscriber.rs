//! Subscription configuration and lifecycle handle

use std::time::Duration;
use tokio::task::JoinHandle;

/// Tuning for a task subscription
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Messages held un-acked at once across the subscription
    pub max_outstanding: usize,
    /// Concurrent handler invocations
    pub parallelism: usize,
    /// A handler must resolve within this deadline or the message is nacked
    pub ack_deadline: Duration,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            max_outstanding: 64,
            parallelism: num_cpus::get().max(2),
            ack_deadline: Duration::from_secs(300),
        }
    }
}

/// Handle to a running subscription
///
/// Dropping the handle does not stop the subscription; call [`stop`] to
/// halt intake and drain in-flight handlers.
///
/// [`stop`]: SubscriptionHandle::stop
pub struct SubscriptionHandle {
    pub(crate) dispatcher: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Wait for the dispatcher to finish draining
    pub async fn join(self) {
        let _ = self.dispatcher.await;
    }
}

/// Exponential redelivery backoff: base doubled per attempt, capped
#[must_use]
pub fn redelivery_delay(base: Duration, cap: Duration, delivery_attempt: u32) -> Duration {
    let exponent = delivery_attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(2u32.saturating_pow(exponent));
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redelivery_delay_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(60);
        assert_eq!(redelivery_delay(base, cap, 1), Duration::from_secs(1));
        assert_eq!(redelivery_delay(base, cap, 2), Duration::from_secs(2));
        assert_eq!(redelivery_delay(base, cap, 4), Duration::from_secs(8));
        assert_eq!(redelivery_delay(base, cap, 12), cap);
    }
}
