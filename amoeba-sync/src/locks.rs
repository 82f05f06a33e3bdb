//! Per-record lock table.

use amoeba_types::LocalId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keeps at most one sync in flight per local id.
#[derive(Default)]
pub(crate) struct RecordLocks {
    table: Mutex<HashMap<LocalId, Arc<AsyncMutex<()>>>>,
}

/// Held while a record is being synced.
pub(crate) struct RecordGuard<'a> {
    locks: &'a RecordLocks,
    id: LocalId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RecordLocks {
    /// Waits until no other task holds `id`, then takes it.
    pub(crate) async fn acquire(&self, id: LocalId) -> RecordGuard<'_> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(id).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        RecordGuard {
            locks: self,
            id,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.locks.table.lock().unwrap_or_else(|e| e.into_inner());
        // Drop the slot once nobody else waits on it.
        if table
            .get(&self.id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            table.remove(&self.id);
        }
    }
}
