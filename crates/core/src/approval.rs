//! In-process suspend/resume signalling for approval gates.
//!
//! The coordinator bridges the decision endpoint into the waiting executor:
//! the executor enlists a per-pipeline signal and blocks on it; the
//! decision path resolves the approval row and then wakes the signal.
//!
//! `tokio::sync::Notify` carries the one-shot semantics we need, including
//! the shielding requirement: a permit delivered while the waiter is being
//! torn down by a reminder timeout is re-stored, so the next wait completes
//! immediately and the decision is never lost.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

/// Result of one wait on an approval signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The signal fired; the approval row should be re-read.
    Signalled,

    /// The reminder deadline passed without a signal.
    ReminderElapsed,
}

/// Registry of per-pipeline approval signals.
#[derive(Default)]
pub struct ApprovalCoordinator {
    signals: Mutex<HashMap<i64, Arc<Notify>>>,
}

impl ApprovalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the signal for a pipeline and return it.
    ///
    /// Replacing guarantees a fresh signal per approval-step entry; a stale
    /// permit from an earlier gate can only cause a spurious wake, which
    /// the waiter handles by re-reading the approval row.
    pub fn enlist(&self, pipeline_id: i64) -> Arc<Notify> {
        let signal = Arc::new(Notify::new());
        self.lock().insert(pipeline_id, Arc::clone(&signal));
        signal
    }

    /// Wake the waiter for a pipeline, if one is registered.
    ///
    /// Returns whether a signal existed. The decision row must already be
    /// persisted when this is called; the waiter re-reads it on wake.
    pub fn signal(&self, pipeline_id: i64) -> bool {
        match self.lock().get(&pipeline_id) {
            Some(signal) => {
                signal.notify_one();
                true
            }
            None => false,
        }
    }

    /// Drop the signal registered for a pipeline; idempotent.
    pub fn unregister(&self, pipeline_id: i64) {
        self.lock().remove(&pipeline_id);
    }

    /// Whether a signal is currently registered.
    pub fn is_enlisted(&self, pipeline_id: i64) -> bool {
        self.lock().contains_key(&pipeline_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<i64, Arc<Notify>>> {
        match self.signals.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Wait for `signal`, optionally bounded by a reminder deadline.
///
/// With no deadline the wait is indefinite. With a deadline, an elapsed
/// timer yields [`WaitOutcome::ReminderElapsed`] without consuming the
/// signal: if a decision lands concurrently with the timeout, `Notify`
/// keeps the permit and the caller's next wait returns immediately.
pub async fn wait_with_reminder(signal: &Notify, reminder: Option<Duration>) -> WaitOutcome {
    match reminder {
        None => {
            signal.notified().await;
            WaitOutcome::Signalled
        }
        Some(deadline) => match tokio::time::timeout(deadline, signal.notified()).await {
            Ok(()) => WaitOutcome::Signalled,
            Err(_) => WaitOutcome::ReminderElapsed,
        },
    }
}
