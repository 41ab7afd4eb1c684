//! Retry - Bounded retries for operations that fail transiently
//!
//! The caller decides which errors are worth another attempt; everything else
//! is returned after the attempt that produced it. When the deadline passes,
//! one last attempt is made so a success right at the edge is not reported as
//! a timeout.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::wait::{Pause, instant_after, pause_until};

/// Errors returned by the retrier
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The operation failed with an error that is not retryable
    #[error(transparent)]
    Fatal(E),

    /// Retryable failures continued past the deadline
    #[error("timeout after {timeout:?} ({attempts} attempts): {source}")]
    Timeout {
        source: E,
        attempts: u32,
        timeout: Duration,
    },

    /// The cancellation token fired between or during attempts
    #[error("retry cancelled after {attempts} attempts")]
    Cancelled { last: Option<E>, attempts: u32 },
}

impl<E> RetryError<E> {
    /// Returns true if the retrier ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::Timeout { .. })
    }

    /// Returns true if the retrier was cancelled from outside
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// The error of the last attempt, if there was one
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Fatal(e) | RetryError::Timeout { source: e, .. } => Some(e),
            RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// Configuration for a single retry loop
#[derive(Debug, Clone)]
pub struct RetrySpec {
    /// Overall deadline for the retry loop
    pub timeout: Duration,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Make one more attempt after the deadline before reporting a timeout
    pub final_attempt: bool,
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            final_attempt: true,
        }
    }
}

impl RetrySpec {
    /// Create a spec with the given deadline and default delays
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Use a constant delay between attempts
    pub fn with_fixed_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self.max_delay = delay;
        self.backoff_multiplier = 1.0;
        self
    }

    pub fn without_final_attempt(mut self) -> Self {
        self.final_attempt = false;
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }

    /// Run `operation` until it succeeds. See [`retry`].
    pub async fn retry<T, E, F, Fut, P>(
        &self,
        is_retryable: P,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        retry(self, &CancellationToken::new(), is_retryable, operation).await
    }

    /// Run `operation` until it succeeds or `cancel` fires
    pub async fn retry_with_cancel<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        is_retryable: P,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        retry(self, cancel, is_retryable, operation).await
    }
}

/// Invoke `operation` until it succeeds, fails fatally, or the deadline passes.
///
/// Errors for which `is_retryable` returns false are returned as
/// [`RetryError::Fatal`] straight away. Retryable errors are followed by a
/// sleep (exponential, capped at `max_delay`, never past the deadline). Once
/// the deadline has passed and `final_attempt` is set, the operation runs one
/// more time: success wins, a retryable failure becomes
/// [`RetryError::Timeout`], anything else is fatal.
pub async fn retry<T, E, F, Fut, P>(
    spec: &RetrySpec,
    cancel: &CancellationToken,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let deadline = instant_after(Instant::now(), spec.timeout);
    let mut delay = spec.initial_delay;
    let mut attempts = 0u32;
    let mut previous: Option<E> = None;

    let last_error = loop {
        attempts += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled {
                    last: previous,
                    attempts: attempts - 1,
                });
            }
            result = operation() => result,
        };

        let err = match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !is_retryable(&err) {
            debug!("Non-retryable error on attempt {}: {}", attempts, err);
            return Err(RetryError::Fatal(err));
        }

        let now = Instant::now();
        if now >= deadline {
            break err;
        }

        let wake = instant_after(now, delay).min(deadline);
        warn!(
            "Attempt {} failed with retryable error, retrying in {:?}: {}",
            attempts,
            wake - now,
            err
        );
        if pause_until(wake, cancel).await == Pause::Cancelled {
            return Err(RetryError::Cancelled {
                last: Some(err),
                attempts,
            });
        }
        delay = spec.next_delay(delay);

        if Instant::now() >= deadline {
            break err;
        }
        previous = Some(err);
    };

    if !spec.final_attempt {
        warn!("Giving up after {} attempts: {}", attempts, last_error);
        return Err(RetryError::Timeout {
            source: last_error,
            attempts,
            timeout: spec.timeout,
        });
    }

    attempts += 1;
    debug!("Deadline passed, making final attempt {}", attempts);
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Err(RetryError::Cancelled {
                last: Some(last_error),
                attempts: attempts - 1,
            });
        }
        result = operation() => result,
    };
    match result {
        Ok(value) => Ok(value),
        Err(e) if is_retryable(&e) => {
            warn!("Final attempt {} failed: {}", attempts, e);
            Err(RetryError::Timeout {
                source: e,
                attempts,
                timeout: spec.timeout,
            })
        }
        Err(e) => Err(RetryError::Fatal(e)),
    }
}
