//! Logging capability handed to each synchronizer.

use crate::store::{ChangeKind, FeedId};
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SyncLogEvent {
    ScopeEntered { tenant: Option<String>, filter: Option<String> },
    FetchIssued { seq: u64 },
    FetchApplied { seq: u64, records: usize },
    FetchDiscarded { seq: u64, reason: &'static str },
    FetchFailed { seq: u64, error: String },
    Subscribed { feed: FeedId },
    SubscriptionFailed { error: String },
    SubscriptionRetired { feed: FeedId },
    EventIgnored { kind: ChangeKind },
    EventPatched { record_id: String, fields: Vec<String> },
    EventRefetch { kind: ChangeKind },
    EditApplied { record_id: String, fields: Vec<String> },
    EditConfirmed { record_id: String },
    EditRolledBack { record_id: String, error: String },
    EditDiscarded { record_id: String, reason: &'static str },
    Stopped,
}

impl SyncLogEvent {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed { .. } | Self::SubscriptionFailed { .. } | Self::EditRolledBack { .. }
        )
    }
}

pub trait SyncLog: Send + Sync {
    fn record(&self, table: &str, event: &SyncLogEvent);
}

/// Forwards to `tracing`: failures at WARN, everything else at DEBUG.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl SyncLog for TracingLog {
    fn record(&self, table: &str, event: &SyncLogEvent) {
        if event.is_failure() {
            warn!(table = %table, event = ?event, "collection sync");
        } else {
            debug!(table = %table, event = ?event, "collection sync");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl SyncLog for NullLog {
    fn record(&self, _table: &str, _event: &SyncLogEvent) {}
}

/// Keeps every event in memory; used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemoryLog {
    events: Mutex<Vec<(String, SyncLogEvent)>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncLogEvent> {
        self.events
            .lock()
            .map(|events| events.iter().map(|(_, event)| event.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, predicate: impl Fn(&SyncLogEvent) -> bool) -> usize {
        self.events().iter().filter(|event| predicate(event)).count()
    }
}

impl SyncLog for MemoryLog {
    fn record(&self, table: &str, event: &SyncLogEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((table.to_string(), event.clone()));
        }
    }
}
