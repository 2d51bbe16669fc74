use crate::core::{FieldPatch, RecordId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

pub type EditKey = (RecordId, String);

/// One field of an unconfirmed local edit.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEdit {
    pub previous: Value,
    pub applied: Value,
}

/// Unconfirmed edits keyed by (record, field). At most one per key.
#[derive(Debug, Default)]
pub struct EditLedger {
    pending: HashMap<EditKey, PendingEdit>,
}

impl EditLedger {
    pub fn is_pending(&self, record_id: &RecordId, field: &str) -> bool {
        self.pending
            .contains_key(&(record_id.clone(), field.to_string()))
    }

    pub fn begin(&mut self, record_id: &RecordId, field: &str, previous: Value, applied: Value) {
        self.pending.insert(
            (record_id.clone(), field.to_string()),
            PendingEdit { previous, applied },
        );
    }

    pub fn take(&mut self, record_id: &RecordId, field: &str) -> Option<PendingEdit> {
        self.pending.remove(&(record_id.clone(), field.to_string()))
    }

    /// Applied values still awaiting confirmation, grouped per record.
    pub fn overlay(&self) -> HashMap<RecordId, FieldPatch> {
        let mut grouped: HashMap<RecordId, FieldPatch> = HashMap::new();
        for ((record_id, field), edit) in &self.pending {
            grouped
                .entry(record_id.clone())
                .or_default()
                .insert(field.clone(), edit.applied.clone());
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Per-(record, field) async locks that queue concurrent edits of the same field.
#[derive(Clone, Default)]
pub struct EditLocks {
    slots: Arc<Mutex<HashMap<EditKey, Arc<AsyncMutex<()>>>>>,
}

/// Held for the whole optimistic write; releasing it lets the next queued edit run.
pub struct EditPermit {
    guards: Vec<OwnedMutexGuard<()>>,
    keys: Vec<EditKey>,
    locks: EditLocks,
}

impl EditLocks {
    /// Acquires every field of `patch` in key order, so two multi-field edits cannot deadlock.
    pub async fn acquire(&self, record_id: &RecordId, patch: &FieldPatch) -> EditPermit {
        let keys: Vec<EditKey> = patch
            .keys()
            .map(|field| (record_id.clone(), field.clone()))
            .collect();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let slot = {
                let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
                Arc::clone(slots.entry(key.clone()).or_default())
            };
            guards.push(slot.lock_owned().await);
        }

        EditPermit {
            guards,
            keys,
            locks: self.clone(),
        }
    }

    pub fn tracked_slots(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }
}

impl Drop for EditPermit {
    fn drop(&mut self) {
        self.guards.clear();
        let mut slots = self.locks.slots.lock().unwrap_or_else(|p| p.into_inner());
        for key in &self.keys {
            // Only the map holds the slot once no edit is running or queued on it.
            if slots
                .get(key)
                .is_some_and(|slot| Arc::strong_count(slot) == 1)
            {
                slots.remove(key);
            }
        }
    }
}
