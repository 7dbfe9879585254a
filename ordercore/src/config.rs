//! Configuration with type-safe validation.
//!
//! Every knob is a `nutype` so an out-of-range configuration cannot be
//! constructed, whether it is built in code or deserialized from a file.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Maximum number of attempts for one operation, counting the first.
///
/// Validated to be between 1 and 10 attempts to prevent unbounded retry loops.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxRetryAttempts(u32);

/// Base delay between retry attempts in milliseconds.
///
/// Validated to be between 10ms and 10 seconds.
#[nutype(
    validate(greater_or_equal = 10, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryBaseDelayMs(u64);

/// Maximum delay between retry attempts in milliseconds.
///
/// Validated to be between 100ms and 5 minutes.
#[nutype(
    validate(greater_or_equal = 100, less_or_equal = 300_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryMaxDelayMs(u64);

/// Exponential backoff multiplier for retry delays.
///
/// Validated to be between 1.1 and 3.0.
#[nutype(
    validate(greater_or_equal = 1.1, less_or_equal = 3.0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        PartialOrd,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct BackoffMultiplier(f64);

/// Retry behavior for operations aborted by a transient storage failure.
///
/// Only [`crate::CheckoutError::is_retryable`] errors are retried. Each
/// attempt runs a fresh transaction, and placement replays by idempotency
/// key, so a retry never duplicates an order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: MaxRetryAttempts,
    pub base_delay: RetryBaseDelayMs,
    pub max_delay: RetryMaxDelayMs,
    pub backoff_multiplier: BackoffMultiplier,
    /// Randomize each delay by ±20% to avoid synchronized retries.
    pub use_jitter: bool,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: attempts(1),
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based; attempt 1 never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base_ms = u64::from(self.base_delay) as f64;
        let multiplier: f64 = self.backoff_multiplier.into();
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let uncapped = base_ms * multiplier.powi(exponent);
        let capped_ms = uncapped.min(u64::from(self.max_delay) as f64);

        let delay_ms = if self.use_jitter {
            capped_ms * rand::random_range(0.8..1.2)
        } else {
            capped_ms
        };

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: attempts(3),
            base_delay: RetryBaseDelayMs::try_new(50).expect("50ms is a valid base delay"),
            max_delay: RetryMaxDelayMs::try_new(2_000).expect("2s is a valid max delay"),
            backoff_multiplier: BackoffMultiplier::try_new(2.0)
                .expect("2.0 is a valid backoff multiplier"),
            use_jitter: true,
        }
    }
}

fn attempts(count: u32) -> MaxRetryAttempts {
    MaxRetryAttempts::try_new(count).expect("attempt count within 1..=10")
}

/// Top-level configuration of the [`crate::Checkout`] facade.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default)]
    pub retry: RetryPolicy,
}
