//! Shared handle for observing and cancelling a running session.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use crate::progress::ProgressState;

/// Lifecycle states of one session run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No run has started yet.
    #[default]
    Idle,
    /// Arguments are being built and the dataset written to its channel.
    Marshaling,
    /// The engine process has been started.
    Spawned,
    /// The engine is running and progress is being drained.
    Polling,
    /// The engine has exited and trailing progress is being flushed.
    Draining,
    /// The run produced a cluster assignment.
    Completed,
    /// The run ended with an error.
    Failed,
}

impl SessionState {
    /// Returns `true` for [`Self::Completed`] and [`Self::Failed`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Point-in-time view of a run, safe to take from any thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    /// Current lifecycle state.
    pub state: SessionState,
    /// Progress observed so far.
    pub progress: ProgressState,
    /// Process id of the engine once it has been spawned.
    pub engine_pid: Option<u32>,
}

#[derive(Debug, Default)]
struct ControlInner {
    cancelled: AtomicBool,
    snapshot: Mutex<RunSnapshot>,
}

/// Cloneable handle shared between a caller and a running session.
///
/// Cancellation is cooperative: the session checks the flag once per poll
/// interval, terminates the engine, releases its transient files, and then
/// fails with [`crate::SessionError::Cancelled`].
///
/// # Examples
/// ```
/// use gravity_core::{RunControl, SessionState};
///
/// let control = RunControl::new();
/// let observer = control.clone();
/// assert_eq!(observer.snapshot().state, SessionState::Idle);
/// control.cancel();
/// assert!(observer.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

impl RunControl {
    /// Creates a handle for a run that has not started.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of the run using this handle.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a copy of the run's current state and progress.
    #[must_use]
    pub fn snapshot(&self) -> RunSnapshot {
        self.lock().clone()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.lock().state = state;
    }

    pub(crate) fn set_engine_pid(&self, pid: u32) {
        self.lock().engine_pid = Some(pid);
    }

    pub(crate) fn set_progress(&self, progress: &ProgressState) {
        self.lock().progress.clone_from(progress);
    }

    pub(crate) fn reset(&self) {
        *self.lock() = RunSnapshot::default();
    }

    fn lock(&self) -> MutexGuard<'_, RunSnapshot> {
        self.inner
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation_and_snapshot() {
        let control = RunControl::new();
        let observer = control.clone();
        control.set_state(SessionState::Polling);
        control.set_engine_pid(42);
        let snapshot = observer.snapshot();
        assert_eq!(snapshot.state, SessionState::Polling);
        assert_eq!(snapshot.engine_pid, Some(42));

        assert!(!observer.is_cancelled());
        control.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn reset_clears_previous_run() {
        let control = RunControl::new();
        control.set_state(SessionState::Failed);
        control.set_engine_pid(7);
        control.reset();
        assert_eq!(control.snapshot(), RunSnapshot::default());
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Draining.is_terminal());
    }
}
