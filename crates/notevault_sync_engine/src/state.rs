//! Sync coordinator state machine.
//!
//! ```text
//! Idle -> Preparing -> Uploading -> AwaitingResponse -> Reconciling
//!                          ^                                 |
//!                          |---- MoreDataPending <-----------|
//!                          |---- ConflictsPending <----------|
//!                                                  Idle <----|
//! ```
//!
//! Any state may fall back to `Idle` on failure or sign-out.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use tracing::trace;

/// The current state of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not syncing.
    Idle,
    /// Cutting the upload batch.
    Preparing,
    /// Encrypting and sending the batch.
    Uploading,
    /// Waiting for the transport.
    AwaitingResponse,
    /// Merging the response into the item graph.
    Reconciling,
    /// The server has more pages or more dirty items remain.
    MoreDataPending,
    /// Conflict duplicates must be uploaded.
    ConflictsPending,
}

impl SyncState {
    /// Returns true while a sync operation is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, SyncState::Idle)
    }

    /// Returns true if a new sync operation may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle)
    }

    /// Returns true if `next` is a legal successor.
    pub fn can_transition_to(&self, next: SyncState) -> bool {
        use SyncState::*;
        if next == Idle {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, Uploading)
                | (Uploading, AwaitingResponse)
                | (AwaitingResponse, Reconciling)
                | (Reconciling, MoreDataPending)
                | (Reconciling, ConflictsPending)
                | (MoreDataPending, Uploading)
                | (ConflictsPending, Uploading)
        )
    }
}

/// Guards state transitions.
#[derive(Debug)]
pub struct SyncStateMachine {
    state: RwLock<SyncState>,
}

impl SyncStateMachine {
    /// Creates a machine in `Idle`.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(SyncState::Idle),
        }
    }

    /// The current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] for illegal moves.
    pub fn transition(&self, next: SyncState) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{next:?}"),
            });
        }
        trace!(from = ?*state, to = ?next, "sync state");
        *state = next;
        Ok(())
    }

    /// Returns to `Idle` unconditionally.
    pub fn reset(&self) {
        *self.state.write() = SyncState::Idle;
    }
}

impl Default for SyncStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(!SyncState::Uploading.can_start_sync());
        assert!(SyncState::Reconciling.is_active());
        assert!(!SyncState::Idle.is_active());
    }

    #[test]
    fn full_round_is_legal() {
        let machine = SyncStateMachine::new();
        for next in [
            SyncState::Preparing,
            SyncState::Uploading,
            SyncState::AwaitingResponse,
            SyncState::Reconciling,
            SyncState::MoreDataPending,
            SyncState::Uploading,
            SyncState::AwaitingResponse,
            SyncState::Reconciling,
            SyncState::ConflictsPending,
            SyncState::Uploading,
            SyncState::AwaitingResponse,
            SyncState::Reconciling,
            SyncState::Idle,
        ] {
            machine.transition(next).unwrap();
        }
        assert_eq!(machine.state(), SyncState::Idle);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let machine = SyncStateMachine::new();
        let err = machine.transition(SyncState::Reconciling).unwrap_err();
        assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        assert_eq!(machine.state(), SyncState::Idle);
    }

    #[test]
    fn any_state_can_fall_back_to_idle() {
        let machine = SyncStateMachine::new();
        machine.transition(SyncState::Preparing).unwrap();
        machine.transition(SyncState::Uploading).unwrap();
        machine.transition(SyncState::Idle).unwrap();
        assert!(machine.state().can_start_sync());
    }
}
