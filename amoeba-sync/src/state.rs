//! Per-record reconciliation state.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

/// Where a record stands within one push pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordState {
    /// Not yet classified.
    #[default]
    Unsynced,
    /// Linked; an update is due.
    PendingUpdate,
    /// Unlinked, or its update failed; a create is due.
    PendingCreate,
    /// The CRM confirmed the update or create.
    Synced,
    /// The create failed. Terminal for this pass.
    Failed,
}

impl RecordState {
    /// Returns true for states that end a record's pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordState::Synced | RecordState::Failed)
    }

    /// Whether `self -> to` is an edge of the state machine.
    pub fn can_transition(self, to: RecordState) -> bool {
        use RecordState::*;
        matches!(
            (self, to),
            (Unsynced, PendingUpdate)
                | (Unsynced, PendingCreate)
                | (PendingUpdate, Synced)
                | (PendingUpdate, PendingCreate)
                | (PendingCreate, Synced)
                | (PendingCreate, Failed)
        )
    }

    /// Moves to `to`, rejecting illegal edges.
    pub fn transition(&mut self, to: RecordState) -> SyncResult<()> {
        if !self.can_transition(to) {
            return Err(SyncError::InvalidTransition { from: *self, to });
        }
        *self = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_then_create_path() {
        let mut state = RecordState::default();
        state.transition(RecordState::PendingUpdate).unwrap();
        state.transition(RecordState::PendingCreate).unwrap();
        state.transition(RecordState::Synced).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut state = RecordState::Failed;
        assert!(state.transition(RecordState::PendingCreate).is_err());
        let mut state = RecordState::Synced;
        assert!(state.transition(RecordState::PendingUpdate).is_err());
    }

    #[test]
    fn update_cannot_fail_directly() {
        let mut state = RecordState::PendingUpdate;
        let err = state.transition(RecordState::Failed).unwrap_err();
        assert!(matches!(err, SyncError::InvalidTransition { .. }));
        assert_eq!(state, RecordState::PendingUpdate);
    }
}
