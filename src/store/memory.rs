use super::{ChangeEvent, ChangeFeed, FeedId, FeedRegistration, FilterExpr, RemoteStore};
use crate::core::{
    FieldPatch, OrderBy, Result, Row, SortDirection, SyncError, compare_values, values_equal,
};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Counters exposed for assertions about collaborator traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub queries: u64,
    pub updates: u64,
    pub subscribes: u64,
    pub unsubscribe_calls: u64,
}

struct FeedEntry {
    table: String,
    filter: FilterExpr,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Faults {
    failing_queries: usize,
    failing_updates: usize,
    update_delay: Option<Duration>,
    reject_subscriptions: bool,
}

#[derive(Default)]
struct StoreState {
    tables: HashMap<String, Vec<Row>>,
    feeds: HashMap<FeedId, FeedEntry>,
    next_feed_id: u64,
    faults: Faults,
    gates: VecDeque<oneshot::Receiver<()>>,
    blocked_queries: usize,
    stats: StoreStats,
}

/// Holds one query's response until released (or dropped).
pub struct QueryGate {
    sender: Option<oneshot::Sender<()>>,
}

impl QueryGate {
    pub fn release(mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }
}

impl Drop for QueryGate {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(());
        }
    }
}

/// Process-local implementation of both `RemoteStore` and `ChangeFeed`.
///
/// Writes made through it fan out change events to every registration whose
/// filter matches the new or old row, which is how the hosted backend behaves.
/// Fault injection hooks make failure paths deterministic in tests.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loads rows without emitting change events.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        let mut state = self.state();
        state.tables.entry(table.to_string()).or_default().extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Inserts a row as another writer would, notifying subscribers.
    pub fn insert(&self, table: &str, row: Row) {
        let mut state = self.state();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Self::emit(&mut state, table, ChangeEvent::insert(row));
    }

    /// Patches a row as another writer would, notifying subscribers.
    pub fn patch_row(&self, table: &str, id_field: &str, id: &str, patch: &FieldPatch) -> Result<()> {
        let mut state = self.state();
        Self::apply_update(&mut state, table, id_field, id, patch)
    }

    pub fn delete(&self, table: &str, id_field: &str, id: &str) -> Result<()> {
        let mut state = self.state();
        let rows = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;
        let position = rows
            .iter()
            .position(|row| row_has_id(row, id_field, id))
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;
        let old = rows.remove(position);
        Self::emit(&mut state, table, ChangeEvent::delete(old));
        Ok(())
    }

    /// The next `count` queries fail with a query error.
    pub fn fail_next_queries(&self, count: usize) {
        self.state().faults.failing_queries = count;
    }

    /// The next `count` updates fail with a write error.
    pub fn fail_next_updates(&self, count: usize) {
        self.state().faults.failing_updates = count;
    }

    /// Every later update waits this long before it is applied or failed.
    pub fn delay_updates(&self, delay: Duration) {
        self.state().faults.update_delay = Some(delay);
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.state().faults.reject_subscriptions = reject;
    }

    /// Holds back the response of the next query that has no gate yet.
    ///
    /// The query still reads the table when it is issued; only its delivery waits.
    pub fn hold_next_query(&self) -> QueryGate {
        let (sender, receiver) = oneshot::channel();
        self.state().gates.push_back(receiver);
        QueryGate {
            sender: Some(sender),
        }
    }

    /// Queries currently parked behind a gate.
    pub fn blocked_queries(&self) -> usize {
        self.state().blocked_queries
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state().feeds.len()
    }

    pub fn stats(&self) -> StoreStats {
        self.state().stats.clone()
    }

    fn apply_update(
        state: &mut StoreState,
        table: &str,
        id_field: &str,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<()> {
        let rows = state
            .tables
            .get_mut(table)
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;
        let row = rows
            .iter_mut()
            .find(|row| row_has_id(row, id_field, id))
            .ok_or_else(|| SyncError::RecordNotFound(id.to_string()))?;
        let old = row.clone();
        for (field, value) in patch {
            row.insert(field.clone(), value.clone());
        }
        let new = row.clone();
        Self::emit(state, table, ChangeEvent::update(new, Some(old)));
        Ok(())
    }

    fn emit(state: &mut StoreState, table: &str, event: ChangeEvent) {
        for entry in state.feeds.values() {
            if entry.table == table && event.touches(&entry.filter) {
                // A closed receiver just means the listener is gone.
                let _ = entry.sender.send(event.clone());
            }
        }
    }
}

fn row_has_id(row: &Row, id_field: &str, id: &str) -> bool {
    row.get(id_field)
        .is_some_and(|value| values_equal(value, &Value::String(id.to_string())))
}

fn sort_rows(rows: &mut [Row], order: &OrderBy) {
    rows.sort_by(|left, right| {
        let ordering = match (left.get(&order.field), right.get(&order.field)) {
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        };
        match order.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn query(&self, table: &str, filter: &FilterExpr, order: &OrderBy) -> Result<Vec<Row>> {
        let (rows, gate) = {
            let mut state = self.state();
            state.stats.queries += 1;
            if state.faults.failing_queries > 0 {
                state.faults.failing_queries -= 1;
                return Err(SyncError::Query(format!(
                    "injected query failure on '{table}'"
                )));
            }

            let mut rows = state
                .tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| filter.matches(row))
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            sort_rows(&mut rows, order);

            let gate = state.gates.pop_front();
            if gate.is_some() {
                state.blocked_queries += 1;
            }
            (rows, gate)
        };

        if let Some(gate) = gate {
            // Err means the gate was dropped, which releases it as well.
            let _ = gate.await;
            self.state().blocked_queries -= 1;
        }

        Ok(rows)
    }

    async fn update(
        &self,
        table: &str,
        id_field: &str,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<()> {
        let delay = self.state().faults.update_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.stats.updates += 1;
        if state.faults.failing_updates > 0 {
            state.faults.failing_updates -= 1;
            return Err(SyncError::Write(format!(
                "injected write failure on '{table}.{id}'"
            )));
        }
        Self::apply_update(&mut state, table, id_field, id, patch)
    }
}

#[async_trait]
impl ChangeFeed for InMemoryStore {
    async fn subscribe(&self, table: &str, filter: &FilterExpr) -> Result<FeedRegistration> {
        let mut state = self.state();
        if state.faults.reject_subscriptions {
            return Err(SyncError::Subscription(format!(
                "channel for '{table}' refused"
            )));
        }

        state.next_feed_id += 1;
        let id = FeedId(state.next_feed_id);
        let (sender, events) = mpsc::unbounded_channel();
        state.feeds.insert(
            id,
            FeedEntry {
                table: table.to_string(),
                filter: filter.clone(),
                sender,
            },
        );
        state.stats.subscribes += 1;
        Ok(FeedRegistration { id, events })
    }

    fn unsubscribe(&self, id: FeedId) {
        let mut state = self.state();
        state.stats.unsubscribe_calls += 1;
        state.feeds.remove(&id);
    }
}
