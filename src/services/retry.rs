use std::time::Duration;

/// Whether a failed attempt may be run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Stage failures, time-limit breaches.
    Retryable,
    /// Corrupt or missing artifacts. Another attempt cannot succeed.
    Fatal,
}

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// `retries_used` counts retries already consumed (0 on the first attempt).
    pub fn should_retry(&self, retries_used: u32, kind: FailureKind) -> bool {
        kind == FailureKind::Retryable && retries_used < self.max_retries
    }

    /// Delay before retry number `retry` (1-based): `base * retry`.
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base.saturating_mul(retry)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(180));
    }

    #[test]
    fn test_retry_ceiling() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0, FailureKind::Retryable));
        assert!(policy.should_retry(2, FailureKind::Retryable));
        assert!(!policy.should_retry(3, FailureKind::Retryable));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_fatal_failures_never_retry() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(0, FailureKind::Fatal));
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert!(!policy.should_retry(0, FailureKind::Retryable));
        assert_eq!(policy.max_attempts(), 1);
    }
}
