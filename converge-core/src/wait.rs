//! Wait - Polling a remote resource until it settles into a target state
//!
//! A `WaitSpec` describes which lifecycle labels are transitional (pending)
//! and which are the goal (target). The probe closure reports the current
//! label on every call; anything outside both sets ends the wait.

use std::future::Future;
use std::time::Duration;

use log::{debug, trace, warn};
use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// First sleep when no fixed poll interval is configured
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound for the exponential backoff between probes
const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Roughly 30 years; stands in for deadlines that would overflow `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A single successful observation of a remote resource
#[derive(Debug, Clone, PartialEq)]
pub struct Observed<T> {
    /// Whatever the probe wants to hand back to the caller (API response, ID, ...)
    pub payload: T,
    /// Lifecycle label (e.g., "creating", "available", "deleted")
    pub state: String,
}

impl<T> Observed<T> {
    pub fn new(payload: T, state: impl Into<String>) -> Self {
        Self {
            payload,
            state: state.into(),
        }
    }
}

/// Errors returned by the poller
#[derive(Debug, Error)]
pub enum WaitError<E> {
    /// The probe reported a label that is neither pending nor target
    #[error("unexpected state '{state}', wanted target '{}'", .target.join(", "))]
    UnexpectedState { state: String, target: Vec<String> },

    /// The overall timeout elapsed before a target label was observed
    #[error(
        "timeout while waiting for state to become '{}' (last state: {}, timeout: {timeout:?})",
        .target.join(", "),
        display_state(.last_state)
    )]
    Timeout {
        last_state: Option<String>,
        target: Vec<String>,
        timeout: Duration,
    },

    /// The resource kept disappearing while a target label was expected
    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: u32 },

    /// The cancellation token fired
    #[error("wait cancelled (last state: {})", display_state(.last_state))]
    Cancelled { last_state: Option<String> },

    /// The probe itself failed; probe failures are never retried here
    #[error("error while checking resource state: {0}")]
    Probe(#[source] E),
}

impl<E> WaitError<E> {
    /// Returns true if the wait ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }

    /// Returns true if the wait was cancelled from outside
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WaitError::Cancelled { .. })
    }

    /// Last label seen before the wait gave up, if any
    pub fn last_state(&self) -> Option<&str> {
        match self {
            WaitError::UnexpectedState { state, .. } => Some(state),
            WaitError::Timeout { last_state, .. } | WaitError::Cancelled { last_state } => {
                last_state.as_deref()
            }
            WaitError::NotFound { .. } | WaitError::Probe(_) => None,
        }
    }
}

fn display_state(state: &Option<String>) -> String {
    match state {
        Some(state) => format!("'{}'", state),
        None => "none".to_string(),
    }
}

/// `base + offset`, clamped to a far-future instant instead of overflowing
pub(crate) fn instant_after(base: Instant, offset: Duration) -> Instant {
    base.checked_add(offset)
        .or_else(|| base.checked_add(FAR_FUTURE))
        .unwrap_or(base)
}

/// Configuration for a single wait
#[derive(Debug, Clone)]
pub struct WaitSpec {
    /// Labels that mean "still transitioning, keep polling"
    pub pending: Vec<String>,
    /// Labels that mean "done"; empty means "wait until the resource is gone"
    pub target: Vec<String>,
    /// Overall deadline for the wait
    pub timeout: Duration,
    /// Fixed interval between probes; `None` uses exponential backoff
    pub poll_interval: Option<Duration>,
    /// Minimum spacing between two probes
    pub min_poll_interval: Duration,
    /// Delay before the first probe
    pub delay: Duration,
    /// Consecutive not-found observations tolerated while a target is expected
    pub not_found_checks: u32,
    /// Consecutive target observations required before returning
    pub continuous_target_occurrence: u32,
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(300),
            poll_interval: None,
            min_poll_interval: Duration::ZERO,
            delay: Duration::ZERO,
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }
}

impl WaitSpec {
    /// Create a spec from pending and target labels with default timing
    pub fn new<P, T, S1, S2>(pending: P, target: T) -> Self
    where
        P: IntoIterator<Item = S1>,
        T: IntoIterator<Item = S2>,
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences;
        self
    }

    fn is_target(&self, state: &str) -> bool {
        self.target.iter().any(|t| t == state)
    }

    fn is_pending(&self, state: &str) -> bool {
        self.pending.iter().any(|p| p == state)
    }

    /// Poll until a target state is reached. See [`wait_for_state`].
    pub async fn wait<T, E, F, Fut>(&self, probe: F) -> Result<Option<T>, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Observed<T>>, E>>,
    {
        wait_for_state(self, &CancellationToken::new(), probe).await
    }

    /// Poll until a target state is reached or `cancel` fires
    pub async fn wait_with_cancel<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        probe: F,
    ) -> Result<Option<T>, WaitError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<Observed<T>>, E>>,
    {
        wait_for_state(self, cancel, probe).await
    }
}

/// Outcome of a cancellable sleep
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Pause {
    Elapsed,
    Cancelled,
}

/// Sleep until `until`, returning early if `cancel` fires
pub(crate) async fn pause_until(until: Instant, cancel: &CancellationToken) -> Pause {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Pause::Cancelled,
        _ = sleep_until(until) => Pause::Elapsed,
    }
}

/// Repeatedly invoke `probe` until the resource reaches a target state.
///
/// Returns `Some(payload)` from the probe call that completed the wait, or
/// `None` when the target set is empty and the probe reported the resource as
/// not found (the "wait for deletion" idiom).
///
/// Probes are sequential. The first probe runs after `spec.delay`; later probes
/// are spaced by the poll interval (or backoff) and never closer than
/// `spec.min_poll_interval`. Both the sleeps and the in-flight probe are raced
/// against the deadline and `cancel`.
pub async fn wait_for_state<T, E, F, Fut>(
    spec: &WaitSpec,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<Option<T>, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Observed<T>>, E>>,
{
    let started = Instant::now();
    let deadline = instant_after(started, spec.timeout);
    let required_targets = spec.continuous_target_occurrence.max(1);

    let timeout = |last_state: Option<String>| {
        warn!(
            "Timed out after {:?} waiting for {:?} (last state: {})",
            spec.timeout,
            spec.target,
            display_state(&last_state)
        );
        WaitError::Timeout {
            last_state,
            target: spec.target.clone(),
            timeout: spec.timeout,
        }
    };

    let mut last_state: Option<String> = None;
    let mut last_probe: Option<Instant> = None;
    let mut next_probe = instant_after(started, spec.delay);
    let mut backoff = INITIAL_BACKOFF;
    let mut not_found = 0u32;
    let mut targets_seen = 0u32;

    debug!(
        "Waiting for state to become {:?} (pending: {:?}, timeout: {:?})",
        spec.target, spec.pending, spec.timeout
    );

    loop {
        if let Some(previous) = last_probe {
            next_probe = next_probe.max(instant_after(previous, spec.min_poll_interval));
        }

        if next_probe >= deadline {
            if pause_until(deadline, cancel).await == Pause::Cancelled {
                return Err(WaitError::Cancelled { last_state });
            }
            return Err(timeout(last_state));
        }
        if pause_until(next_probe, cancel).await == Pause::Cancelled {
            return Err(WaitError::Cancelled { last_state });
        }

        last_probe = Some(Instant::now());
        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WaitError::Cancelled { last_state }),
            result = probe() => result.map_err(WaitError::Probe)?,
            _ = sleep_until(deadline) => return Err(timeout(last_state)),
        };

        match observed {
            None => {
                targets_seen = 0;
                if spec.target.is_empty() {
                    debug!("Resource not found, nothing left to wait for");
                    return Ok(None);
                }
                not_found += 1;
                if not_found > spec.not_found_checks {
                    warn!("Resource still not found after {} checks", not_found);
                    return Err(WaitError::NotFound { checks: not_found });
                }
                trace!("Resource not found ({}/{})", not_found, spec.not_found_checks);
            }
            Some(Observed { payload, state }) => {
                not_found = 0;
                if spec.is_target(&state) {
                    targets_seen += 1;
                    if targets_seen >= required_targets {
                        debug!("Reached target state '{}'", state);
                        return Ok(Some(payload));
                    }
                } else if spec.is_pending(&state) {
                    targets_seen = 0;
                } else {
                    warn!(
                        "Unexpected state '{}' while waiting for {:?}",
                        state, spec.target
                    );
                    return Err(WaitError::UnexpectedState {
                        state,
                        target: spec.target.clone(),
                    });
                }
                trace!("Current state '{}'", state);
                last_state = Some(state);
            }
        }

        let interval = match spec.poll_interval {
            Some(interval) => interval,
            None => {
                let current = backoff;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                current
            }
        };
        next_probe = instant_after(Instant::now(), interval);
    }
}
