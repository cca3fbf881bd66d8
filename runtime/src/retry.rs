//! Bounded exponential backoff for idempotent reads.
//!
//! Repository reads are retried here. Writes that allocate something (ticket
//! numbers, desk claims) must never be wrapped: a retried write could allocate
//! twice, so failed writes go to a [`crate::DeadLetterQueue`] and are replayed
//! by a repair pass instead.
//!
//! # Example
//!
//! ```rust
//! use walkin_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .initial_delay(Duration::from_millis(50))
//!     .max_delay(Duration::from_secs(2))
//!     .build();
//!
//! let number = retry_with_predicate(
//!     &policy,
//!     "get_ticket",
//!     || async { Ok::<_, String>("G-001") },
//!     |error: &String| error.starts_with("timeout"),
//! )
//! .await?;
//! assert_eq!(number, "G-001");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

/// How often and how patiently a read is retried
///
/// Defaults: 3 retries, 100ms first delay doubling up to 30s, no jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Start from the defaults
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay before retry number `attempt` (0-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let (first_ms, cap_ms) = (
            self.initial_delay.as_millis() as f64,
            self.max_delay.as_millis() as f64,
        );
        let mut millis = (first_ms * self.multiplier.powi(exponent)).min(cap_ms);
        if self.jitter {
            use rand::Rng;
            millis *= rand::thread_rng().gen_range(0.5..=1.0);
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(millis as u64)
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Cap on any single delay
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Growth factor between delays
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Randomize delays so that callers failing together spread out
    #[must_use]
    pub const fn jitter(mut self, enabled: bool) -> Self {
        self.policy.jitter = enabled;
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Run `operation`, retrying errors for which `is_transient` holds
///
/// # Errors
///
/// The first permanent error, or the last transient one once
/// `policy.max_retries` retries are used up.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    is_transient: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    metrics::counter!("store.retry.success", "operation" => operation_name.to_string())
                        .increment(1);
                    tracing::info!(operation = operation_name, attempt, "Read succeeded after retry");
                }
                return Ok(value);
            },
            Err(error) => error,
        };

        if !is_transient(&error) {
            tracing::debug!(operation = operation_name, error = %error, "Permanent error, not retrying");
            return Err(error);
        }
        if attempt >= policy.max_retries {
            metrics::counter!("store.retry.exhausted", "operation" => operation_name.to_string())
                .increment(1);
            tracing::error!(operation = operation_name, attempt, error = %error, "Retries exhausted");
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis(),
            error = %error,
            "Transient failure, backing off"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
