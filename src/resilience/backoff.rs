//! Exponential accept backoff and the abortable delay it waits on.

use std::time::Duration;
use tokio::sync::watch;

/// Initial delay after the first transient accept error.
pub const INITIAL_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);

/// Ceiling for the accept backoff.
pub const MAX_ACCEPT_BACKOFF: Duration = Duration::from_millis(1000);

/// Tracks the delay between consecutive failed accept attempts.
///
/// The delay starts unset, becomes `initial` on the first transient error,
/// doubles on each further one, and is clamped to `max` after doubling.
/// Any successful accept resets it.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl AcceptBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: None,
        }
    }

    /// Record a transient failure and return how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.initial,
            Some(d) => d.saturating_mul(2),
        }
        .min(self.max);
        self.current = Some(next);
        next
    }

    /// Record a successful accept.
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// The delay used for the most recent failure, if the streak is ongoing.
    pub fn current(&self) -> Option<Duration> {
        self.current
    }
}

impl Default for AcceptBackoff {
    fn default() -> Self {
        Self::new(INITIAL_ACCEPT_BACKOFF, MAX_ACCEPT_BACKOFF)
    }
}

/// The delay was cut short by the abort signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delay was aborted")]
pub struct DelayAborted;

/// Sleep for `duration` unless `abort` is (or becomes) `true` first.
///
/// A dropped sender counts as an abort.
pub async fn delay(duration: Duration, abort: &mut watch::Receiver<bool>) -> Result<(), DelayAborted> {
    if *abort.borrow() {
        return Err(DelayAborted);
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = abort.wait_for(|aborted| *aborted) => Err(DelayAborted),
    }
}
