use std::time::Duration;

use crate::models::TaskError;
use crate::orchestration::TaskCancellationToken;

/// Bounded retry for transient failures. Only `E_PROCESS_FAILED` qualifies;
/// input, format and permission problems fail identically on every attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// `attempts` counts the attempts already made, including the failed one.
    pub fn should_retry(
        &self,
        attempts: u32,
        error: &TaskError,
        cancel: &TaskCancellationToken,
    ) -> bool {
        !cancel.is_cancelled() && error.code.is_retryable() && attempts <= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::models::TaskError;
    use crate::orchestration::TaskCancellationToken;

    #[test]
    fn retries_process_failures_within_budget() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let token = TaskCancellationToken::new();
        let error = TaskError::process_failed("exit 1");

        assert!(policy.should_retry(1, &error, &token));
        assert!(policy.should_retry(2, &error, &token));
        assert!(!policy.should_retry(3, &error, &token));
    }

    #[test]
    fn never_retries_fatal_codes() {
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let token = TaskCancellationToken::new();
        for error in [
            TaskError::invalid_input("x"),
            TaskError::unsupported_format("x"),
            TaskError::permission_denied("x"),
            TaskError::internal("x"),
            TaskError::cancelled("x"),
        ] {
            assert!(!policy.should_retry(1, &error, &token), "{}", error.code);
        }
    }

    #[test]
    fn cancellation_stops_retries() {
        let policy = RetryPolicy::default();
        let token = TaskCancellationToken::new();
        token.cancel();
        assert!(!policy.should_retry(1, &TaskError::process_failed("x"), &token));
    }
}
