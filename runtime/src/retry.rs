//! Exponential backoff for effects whose collaborator failed transiently.
//!
//! An effect definition may carry a [`RetryPolicy`]. The orchestrator re-runs
//! a failed [`Effect::Future`](stately_core::effect::Effect::Future) under that
//! policy while the error reports itself retryable, then hands the last error
//! to the effect's error handler or to the dead letter queue.
//!
//! # Example
//!
//! ```rust
//! use stately_runtime::retry::{RetryPolicy, retry_while};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(10))
//!     .build();
//!
//! let (outcome, attempts) = retry_while(&policy, |_: &String| true, |attempt| async move {
//!     if attempt < 1 { Err("busy".to_string()) } else { Ok(attempt) }
//! })
//! .await;
//!
//! assert_eq!(outcome, Ok(1));
//! assert_eq!(attempts, 2);
//! # }
//! ```

use crate::metrics::RetryMetrics;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Backoff schedule for retrying an effect
///
/// The n-th retry (starting at 0) waits `initial_delay * multiplier^n`,
/// capped at `max_delay`. Defaults: 3 retries, 100ms, 30s cap, doubling,
/// no jitter. Effects without an explicit policy use [`RetryPolicy::none`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0)`
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
    /// Start from the defaults and override what differs
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// The first failure is final
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Attempts made before giving up, the first one included
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (0 for the first retry)
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let growth = self.multiplier.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let millis = self.initial_delay.as_millis() as f64 * growth;
        let cap = self.max_delay.as_millis() as f64;

        let delay = if millis.is_finite() && millis < cap {
            Duration::from_millis(millis as u64)
        } else {
            self.max_delay
        };

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..1.0))
        } else {
            delay
        }
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

    /// Upper bound for any delay
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Growth factor between consecutive delays
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Randomize delays
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Finish the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Run `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy runs out of retries
///
/// `operation` receives the zero-based attempt number. Returns the final
/// outcome together with the number of attempts made.
pub async fn retry_while<F, Fut, T, E, P>(policy: &RetryPolicy, is_retryable: P, mut operation: F) -> (Result<T, E>, usize)
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(attempts = attempt + 1, "Effect succeeded after retry");
                }
                return (Ok(value), attempt + 1);
            }
            Err(error) => error,
        };

        if !is_retryable(&error) {
            tracing::debug!(error = %error, "Permanent failure, not retrying");
            return (Err(error), attempt + 1);
        }

        if attempt >= policy.max_retries {
            if policy.max_retries > 0 {
                RetryMetrics::record_exhausted();
                tracing::error!(attempts = attempt + 1, error = %error, "Retries exhausted");
            }
            return (Err(error), attempt + 1);
        }

        let delay = policy.delay_for_attempt(attempt);
        RetryMetrics::record_attempt();
        tracing::warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            error = %error,
            "Transient failure, retrying"
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
