//! Observable state and progress shared by the coordinators.
//!
//! The status doubles as a single-slot lock: only one backup or restore can
//! hold an [`OperationGuard`] at a time.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    BackingUp,
    Restoring,
    /// Last operation failed. Cleared by the next attempt.
    Failed,
}

impl SyncState {
    pub fn is_busy(&self) -> bool {
        matches!(self, SyncState::BackingUp | SyncState::Restoring)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Idle => "idle",
            SyncState::BackingUp => "backing up",
            SyncState::Restoring => "restoring",
            SyncState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub state: SyncState,
    /// Percent complete, 0-100
    pub progress: u8,
}

/// Shared, cloneable handle; clones observe and guard the same slot.
#[derive(Clone)]
pub struct SyncStatus {
    tx: Arc<watch::Sender<StatusSnapshot>>,
}

impl SyncStatus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot {
            state: SyncState::Idle,
            progress: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> StatusSnapshot {
        *self.tx.borrow()
    }

    pub fn state(&self) -> SyncState {
        self.current().state
    }

    pub fn progress(&self) -> u8 {
        self.current().progress
    }

    /// Receiver for change notifications. Slow receivers only see the most
    /// recent value.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Fail fast if an operation is running, without claiming the slot.
    pub(crate) fn ensure_available(&self) -> Result<()> {
        let current = self.state();
        if current.is_busy() {
            return Err(BackupError::OperationInProgress { current });
        }
        Ok(())
    }

    /// Claim the slot for `target`, resetting progress to 0.
    pub(crate) fn try_begin(&self, target: SyncState) -> Result<OperationGuard> {
        let mut busy = None;
        self.tx.send_if_modified(|snapshot| {
            if snapshot.state.is_busy() {
                busy = Some(snapshot.state);
                return false;
            }
            *snapshot = StatusSnapshot {
                state: target,
                progress: 0,
            };
            true
        });

        match busy {
            Some(current) => Err(BackupError::OperationInProgress { current }),
            None => Ok(OperationGuard {
                status: self.clone(),
                done: false,
            }),
        }
    }

    fn advance(&self, progress: u8) {
        let progress = progress.min(100);
        self.tx.send_if_modified(|snapshot| {
            if progress > snapshot.progress {
                snapshot.progress = progress;
                true
            } else {
                false
            }
        });
    }

    fn settle(&self, state: SyncState, progress: Option<u8>) {
        self.tx.send_modify(|snapshot| {
            snapshot.state = state;
            if let Some(progress) = progress {
                snapshot.progress = progress;
            }
        });
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of the running operation. Dropping it without calling
/// [`complete`](Self::complete) marks the status `Failed`.
pub struct OperationGuard {
    status: SyncStatus,
    done: bool,
}

impl OperationGuard {
    /// Publish a progress checkpoint. Lower values than the current one are
    /// ignored.
    pub fn advance(&self, progress: u8) {
        self.status.advance(progress);
    }

    /// Advance within `[from, to]` by `done` out of `total` steps.
    pub fn advance_between(&self, from: u8, to: u8, done: usize, total: usize) {
        if total == 0 {
            self.advance(to);
            return;
        }
        let span = to.saturating_sub(from) as usize;
        let step = (span * done.min(total)) / total;
        self.advance(from + step as u8);
    }

    pub fn complete(mut self) {
        self.done = true;
        self.status.settle(SyncState::Idle, Some(100));
    }

    pub fn fail(mut self) {
        self.done = true;
        self.status.settle(SyncState::Failed, None);
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if !self.done {
            self.status.settle(SyncState::Failed, None);
        }
    }
}
