//! Whole-operation retry on transient storage failures.

use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::errors::CheckoutError;

/// Run `attempt` until it succeeds, fails permanently, or the policy gives up.
///
/// Each call of `attempt` must open its own transaction; a failed attempt has
/// already rolled back by the time it returns.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, CheckoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CheckoutError>>,
{
    let max_attempts: u32 = policy.max_attempts.into();
    let mut attempt_number = 1;

    loop {
        match attempt().await {
            Err(error) if error.is_retryable() && attempt_number < max_attempts => {
                attempt_number += 1;
                let delay = policy.delay_for(attempt_number);
                warn!(
                    operation,
                    attempt = attempt_number,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "[checkout.retry] transient storage failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffMultiplier, MaxRetryAttempts, RetryBaseDelayMs, RetryMaxDelayMs};
    use crate::errors::{Operation, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: MaxRetryAttempts::try_new(max_attempts).unwrap(),
            base_delay: RetryBaseDelayMs::try_new(10).unwrap(),
            max_delay: RetryMaxDelayMs::try_new(100).unwrap(),
            backoff_multiplier: BackoffMultiplier::try_new(1.5).unwrap(),
            use_jitter: false,
        }
    }

    fn transient() -> CheckoutError {
        CheckoutError::from(StoreError::Transient {
            operation: Operation::DecreaseStock,
        })
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&quick_policy(3), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&quick_policy(2), "test", || async {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(result.is_err_and(|error| error.is_retryable()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&quick_policy(5), "test", || async {
            let _ = calls.fetch_add(1, Ordering::SeqCst);
            Err(CheckoutError::CartEmpty)
        })
        .await;

        assert_eq!(result, Err(CheckoutError::CartEmpty));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
