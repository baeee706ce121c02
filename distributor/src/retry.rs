//! Bounded retry with exponential backoff
//!
//! [`retry`] runs an async operation until it succeeds, fails with an error
//! the caller classifies as [`FailureClass::Terminal`], or runs out of
//! attempts. The result is a tagged [`RetryOutcome`] so callers handle all
//! three endings explicitly.
//!
//! The delay before retry `n` (0-indexed) is `duration × factor^n`, clamped to
//! `cap` when set, plus a random jitter of up to `jitter × base`. The base is
//! derived from the attempt number alone, so jitter never feeds back into
//! later delays.
//!
//! # Example
//!
//! ```ignore
//! let outcome = retry(&Backoff::default(), DispatchError::classify, |_attempt| {
//!     emitter.emit(&url, body.clone())
//! })
//! .await;
//!
//! match outcome {
//!     RetryOutcome::Success { attempts, .. } => info!(attempts, "delivered"),
//!     RetryOutcome::Terminal { error, .. } => warn!(%error, "rejected"),
//!     RetryOutcome::Exhausted { error, attempts } => error!(%error, attempts, "gave up"),
//! }
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retry growth parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts, the first one included
    pub steps: u32,
    /// Delay before the first retry
    pub duration: Duration,
    /// Multiplicative growth per retry
    pub factor: f64,
    /// Upper bound of the random extra delay, as a fraction of the base delay
    pub jitter: f64,
    /// Optional ceiling for the base delay
    pub cap: Option<Duration>,
}

impl Default for Backoff {
    /// 50 attempts starting at 50ms, growing by 10% with 10% jitter
    fn default() -> Self {
        Self {
            steps: 50,
            duration: Duration::from_millis(50),
            factor: 1.1,
            jitter: 0.1,
            cap: None,
        }
    }
}

impl Backoff {
    /// Delay before retry `retry` without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.min(i32::MAX as u32) as i32;
        let secs = self.duration.as_secs_f64() * self.factor.powi(exp);
        let cap = self.cap.unwrap_or(Duration::MAX);

        if !secs.is_finite() || secs < 0.0 || secs >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(secs)
    }

    /// Delay before retry `retry`, jitter applied
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        base.saturating_add(base.mul_f64(extra))
    }
}

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Try again after the backoff delay
    Retryable,
    /// Stop now
    Terminal,
}

/// Final result of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded
    Success { value: T, attempts: u32 },
    /// An attempt failed with a terminal error
    Terminal { error: E, attempts: u32 },
    /// Every attempt failed with a retryable error
    Exhausted { error: E, attempts: u32 },
}

/// Run `op` until it succeeds, fails terminally, or `backoff.steps` attempts are used
///
/// `op` receives the 0-indexed attempt number. `classify` is consulted after
/// every failure. A `steps` of zero still makes one attempt.
pub async fn retry<T, E, Op, Fut, C>(backoff: &Backoff, classify: C, mut op: Op) -> RetryOutcome<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> FailureClass,
{
    let steps = backoff.steps.max(1);
    let mut attempt = 0;

    loop {
        let result = op(attempt).await;
        attempt += 1;

        let error = match result {
            Ok(value) => {
                return RetryOutcome::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) => error,
        };

        if classify(&error) == FailureClass::Terminal {
            return RetryOutcome::Terminal {
                error,
                attempts: attempt,
            };
        }
        if attempt >= steps {
            return RetryOutcome::Exhausted {
                error,
                attempts: attempt,
            };
        }

        tokio::time::sleep(backoff.delay(attempt - 1)).await;
    }
}
