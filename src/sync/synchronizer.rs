use super::entity::{SyncEntity, apply_patch, changed_fields, from_row, read_fields, to_row};
use super::log::{SyncLog, SyncLogEvent, TracingLog};
use super::optimistic::{EditLedger, EditLocks};
use super::policy::CollectionPolicy;
use super::state::{SyncPhase, SyncStatus};
use super::subscription::SubscriptionHandle;
use crate::config::SyncConfig;
use crate::core::{FieldPatch, RecordId, Result, Row, SortDirection, SyncError, TenantKey};
use crate::store::{ChangeEvent, ChangeFeed, ChangeKind, FilterExpr, InMemoryStore, RemoteStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// Collaborators shared by every synchronizer of an application.
#[derive(Clone)]
pub struct SyncDeps {
    pub store: Arc<dyn RemoteStore>,
    pub feed: Arc<dyn ChangeFeed>,
    pub log: Arc<dyn SyncLog>,
    pub config: SyncConfig,
}

impl SyncDeps {
    pub fn new(store: Arc<dyn RemoteStore>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            store,
            feed,
            log: Arc::new(TracingLog),
            config: SyncConfig::default(),
        }
    }

    /// Uses one `InMemoryStore` as both table and change feed.
    pub fn in_memory(store: &InMemoryStore) -> Self {
        Self::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    pub fn with_log(mut self, log: Arc<dyn SyncLog>) -> Self {
        self.log = log;
        self
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}

struct FetchTicket {
    seq: u64,
    epoch: u64,
    filter: FilterExpr,
}

enum EventOutcome {
    Stale,
    Absorbed,
    Refetch,
}

struct SyncInner<E> {
    phase: SyncPhase,
    snapshot: Vec<E>,
    error: Option<String>,
    edit_errors: BTreeMap<(RecordId, String), String>,
    tenant: Option<TenantKey>,
    filter: Option<FilterExpr>,
    // Bumped on every scope change; work tagged with an older epoch is dropped.
    epoch: u64,
    latest_issued: u64,
    latest_applied: u64,
    subscription: Option<SubscriptionHandle>,
    is_subscribed: bool,
    edits: EditLedger,
    stopped: bool,
}

impl<E> SyncInner<E> {
    fn new() -> Self {
        Self {
            phase: SyncPhase::Idle,
            snapshot: Vec::new(),
            error: None,
            edit_errors: BTreeMap::new(),
            tenant: None,
            filter: None,
            epoch: 0,
            latest_issued: 0,
            latest_applied: 0,
            subscription: None,
            is_subscribed: false,
            edits: EditLedger::default(),
            stopped: false,
        }
    }
}

struct Shared<E> {
    policy: CollectionPolicy,
    deps: SyncDeps,
    inner: Mutex<SyncInner<E>>,
    locks: EditLocks,
    revision: watch::Sender<u64>,
}

/// Keeps one tenant-scoped collection consistent with a remote table and its change feed.
///
/// Every inbound change triggers a full refetch unless the policy declares it
/// silent; fetch results are ordered by request sequence so a slow early query
/// can never overwrite a faster later one; local edits are applied
/// optimistically and rolled back if the write fails. Dropping the
/// synchronizer stops it.
pub struct CollectionSynchronizer<E: SyncEntity> {
    shared: Arc<Shared<E>>,
}

impl<E: SyncEntity> CollectionSynchronizer<E> {
    /// Creates an idle instance with no tenant and no subscription.
    pub fn new(deps: SyncDeps, policy: CollectionPolicy) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                policy,
                deps,
                inner: Mutex::new(SyncInner::new()),
                locks: EditLocks::default(),
                revision,
            }),
        }
    }

    /// Creates an instance and enters the given scope.
    ///
    /// Without a tenant the instance stays `Idle` with an empty snapshot and no error.
    pub async fn start(
        deps: SyncDeps,
        policy: CollectionPolicy,
        tenant: Option<TenantKey>,
        filter: Option<FilterExpr>,
    ) -> Self {
        let sync = Self::new(deps, policy);
        sync.set_scope(tenant, filter).await;
        sync
    }

    /// Switches tenant and secondary filter together.
    ///
    /// The current subscription is retired before anything else happens and the
    /// snapshot is cleared, so stale data from the previous scope is never shown.
    pub async fn set_scope(&self, tenant: Option<TenantKey>, filter: Option<FilterExpr>) {
        let Some(epoch) = self.shared.enter_scope(tenant, filter) else {
            return;
        };
        Shared::attach_feed(&self.shared, epoch).await;
        self.fetch_all().await;
    }

    pub async fn set_tenant(&self, tenant: Option<TenantKey>) {
        let filter = self.filter();
        self.set_scope(tenant, filter).await;
    }

    /// Replaces the secondary filter, keeping the tenant scope.
    pub async fn set_filter(&self, filter: Option<FilterExpr>) {
        let tenant = self.tenant();
        self.set_scope(tenant, filter).await;
    }

    /// Issues a full refetch.
    ///
    /// The request sequence number is taken when this is called, not when the
    /// returned future is first polled. Failures never escape: they are stored
    /// in `status().error` and the previous snapshot is kept.
    pub fn fetch_all(&self) -> impl Future<Output = ()> + Send + use<E> {
        let ticket = self.shared.issue_fetch();
        let shared = Arc::clone(&self.shared);
        async move {
            if let Some(ticket) = ticket {
                shared.run_fetch(ticket).await;
            }
        }
    }

    pub async fn refetch(&self) {
        self.fetch_all().await;
    }

    /// Applies `patch` to the held record immediately, remembering prior values.
    ///
    /// Fails if any field already has an unconfirmed edit; use [`Self::edit`] to
    /// queue behind it instead.
    pub fn apply_optimistic(&self, record_id: &RecordId, patch: &FieldPatch) -> Result<()> {
        self.shared.apply_optimistic(record_id, patch).map(|_| ())
    }

    /// Settles an optimistic edit: success keeps the local values, failure restores them.
    ///
    /// Fields with no pending edit are ignored, so settling an edit whose scope
    /// was left in the meantime changes nothing.
    pub fn confirm_or_rollback(
        &self,
        record_id: &RecordId,
        patch: &FieldPatch,
        result: std::result::Result<(), &SyncError>,
    ) {
        self.shared.confirm_or_rollback(record_id, patch, None, result);
    }

    /// Full edit action: queue behind edits of the same fields, apply locally,
    /// write through, then confirm or roll back.
    ///
    /// Queues behind both concurrent `edit` calls and edits applied directly
    /// with [`Self::apply_optimistic`] that are still waiting to be settled.
    pub async fn edit(&self, record_id: &RecordId, patch: FieldPatch) -> Result<()> {
        let _permit = self.shared.locks.acquire(record_id, &patch).await;
        let epoch = self.shared.apply_when_settled(record_id, &patch).await?;

        let policy = &self.shared.policy;
        let limit = self.shared.deps.config.fetch_timeout;
        let write = match timeout(
            limit,
            self.shared.deps.store.update(
                &policy.table,
                &policy.id_field,
                record_id.as_str(),
                &patch,
            ),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(limit)),
        };

        self.shared
            .confirm_or_rollback(record_id, &patch, Some(epoch), write.as_ref().map(|_| ()));
        write
    }

    /// Retires the subscription and freezes the instance. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn status(&self) -> SyncStatus {
        let inner = self.shared.lock();
        SyncStatus {
            phase: inner.phase,
            loading: inner.phase == SyncPhase::Loading,
            error: inner.error.clone(),
            is_subscribed: inner.is_subscribed,
            tenant: inner.tenant.clone(),
            records: inner.snapshot.len(),
            pending_edits: inner.edits.len(),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.shared.lock().phase
    }

    /// Copy of the current collection, in policy order.
    pub fn snapshot(&self) -> Vec<E> {
        self.shared.lock().snapshot.clone()
    }

    pub fn get(&self, record_id: &str) -> Option<E> {
        self.shared
            .lock()
            .snapshot
            .iter()
            .find(|record| record.record_id() == record_id)
            .cloned()
    }

    /// Error from the last failed edit of this field, if it was rolled back.
    pub fn edit_error(&self, record_id: &RecordId, field: &str) -> Option<String> {
        self.shared
            .lock()
            .edit_errors
            .get(&(record_id.clone(), field.to_string()))
            .cloned()
    }

    pub fn tenant(&self) -> Option<TenantKey> {
        self.shared.lock().tenant.clone()
    }

    pub fn filter(&self) -> Option<FilterExpr> {
        self.shared.lock().filter.clone()
    }

    pub fn policy(&self) -> &CollectionPolicy {
        &self.shared.policy
    }

    /// Revision counter bumped on every visible change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }
}

impl<E: SyncEntity> Drop for CollectionSynchronizer<E> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl<E: SyncEntity> Shared<E> {
    fn lock(&self) -> MutexGuard<'_, SyncInner<E>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn log(&self, event: SyncLogEvent) {
        self.deps.log.record(&self.policy.table, &event);
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }

    fn enter_scope(&self, tenant: Option<TenantKey>, filter: Option<FilterExpr>) -> Option<u64> {
        let mut inner = self.lock();
        if inner.stopped {
            return None;
        }

        if let Some(mut handle) = inner.subscription.take() {
            if handle.retire() {
                self.log(SyncLogEvent::SubscriptionRetired { feed: handle.id() });
            }
        }
        inner.is_subscribed = false;
        inner.epoch += 1;
        inner.snapshot.clear();
        inner.error = None;
        inner.edit_errors.clear();
        inner.edits.clear();
        inner.tenant = tenant;
        inner.filter = filter;
        inner.phase = if inner.tenant.is_some() {
            SyncPhase::Loading
        } else {
            SyncPhase::Idle
        };

        self.log(SyncLogEvent::ScopeEntered {
            tenant: inner.tenant.as_ref().map(ToString::to_string),
            filter: inner.filter.as_ref().map(ToString::to_string),
        });
        let epoch = inner.epoch;
        let ready = inner.tenant.is_some();
        drop(inner);
        self.notify();

        ready.then_some(epoch)
    }

    fn scope_filter(&self, inner: &SyncInner<E>) -> Option<FilterExpr> {
        inner
            .tenant
            .as_ref()
            .map(|tenant| self.policy.scope_filter(tenant, inner.filter.as_ref()))
    }

    async fn attach_feed(self: &Arc<Self>, epoch: u64) {
        let filter = {
            let inner = self.lock();
            if inner.stopped || inner.epoch != epoch {
                return;
            }
            match self.scope_filter(&inner) {
                Some(filter) => filter,
                None => return,
            }
        };

        let result = self.deps.feed.subscribe(&self.policy.table, &filter).await;

        let mut inner = self.lock();
        match result {
            Ok(registration) => {
                if inner.stopped || inner.epoch != epoch {
                    // Scope moved on while the backend was acknowledging.
                    self.deps.feed.unsubscribe(registration.id);
                    return;
                }
                if let Some(mut previous) = inner.subscription.take() {
                    previous.retire();
                }
                let listener = tokio::spawn(listen(
                    Arc::downgrade(self),
                    epoch,
                    registration.events,
                    self.deps.config.coalesce_events,
                ));
                inner.subscription = Some(SubscriptionHandle::new(
                    registration.id,
                    Arc::clone(&self.deps.feed),
                    listener,
                ));
                inner.is_subscribed = true;
                drop(inner);
                self.log(SyncLogEvent::Subscribed {
                    feed: registration.id,
                });
            }
            Err(err) => {
                // Degraded mode: the collection keeps working off explicit refetches.
                inner.is_subscribed = false;
                drop(inner);
                self.log(SyncLogEvent::SubscriptionFailed {
                    error: err.to_string(),
                });
            }
        }
        self.notify();
    }

    fn issue_fetch(&self) -> Option<FetchTicket> {
        let mut inner = self.lock();
        if inner.stopped {
            return None;
        }
        let Some(filter) = self.scope_filter(&inner) else {
            inner.phase = SyncPhase::Idle;
            inner.snapshot.clear();
            return None;
        };

        inner.latest_issued += 1;
        inner.phase = SyncPhase::Loading;
        let ticket = FetchTicket {
            seq: inner.latest_issued,
            epoch: inner.epoch,
            filter,
        };
        drop(inner);

        self.log(SyncLogEvent::FetchIssued { seq: ticket.seq });
        self.notify();
        Some(ticket)
    }

    async fn run_fetch(&self, ticket: FetchTicket) {
        let limit = self.deps.config.fetch_timeout;
        let order = self.policy.order_by();
        let query = self
            .deps
            .store
            .query(&self.policy.table, &ticket.filter, &order);

        let result = match timeout(limit, query).await {
            Ok(Ok(rows)) => self.decode(rows),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(SyncError::Timeout(limit)),
        };
        self.complete_fetch(&ticket, result);
    }

    /// Decodes rows, drops duplicate ids (first wins) and applies policy order.
    fn decode(&self, rows: Vec<Row>) -> Result<Vec<E>> {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record: E = from_row(row)?;
            if seen.insert(record.record_id().to_string()) {
                records.push(record);
            }
        }
        match self.policy.order {
            SortDirection::Ascending => records.sort_by_key(|record| record.created_at()),
            SortDirection::Descending => {
                records.sort_by_key(|record| std::cmp::Reverse(record.created_at()))
            }
        }
        Ok(records)
    }

    fn complete_fetch(&self, ticket: &FetchTicket, result: Result<Vec<E>>) {
        let mut inner = self.lock();
        if inner.stopped || inner.epoch != ticket.epoch {
            drop(inner);
            self.log(SyncLogEvent::FetchDiscarded {
                seq: ticket.seq,
                reason: "scope_changed",
            });
            return;
        }
        if ticket.seq <= inner.latest_applied {
            drop(inner);
            self.log(SyncLogEvent::FetchDiscarded {
                seq: ticket.seq,
                reason: "superseded",
            });
            return;
        }

        inner.latest_applied = ticket.seq;
        let settled = ticket.seq == inner.latest_issued;
        let event = match result {
            Ok(mut records) => {
                self.overlay_pending(&inner.edits, &mut records);
                let count = records.len();
                inner.snapshot = records;
                inner.error = None;
                if settled {
                    inner.phase = SyncPhase::Ready;
                }
                SyncLogEvent::FetchApplied {
                    seq: ticket.seq,
                    records: count,
                }
            }
            Err(err) => {
                inner.error = Some(err.to_string());
                if settled {
                    inner.phase = SyncPhase::Error;
                }
                SyncLogEvent::FetchFailed {
                    seq: ticket.seq,
                    error: err.to_string(),
                }
            }
        };
        drop(inner);

        self.log(event);
        self.notify();
    }

    /// Re-applies unconfirmed edits so a refetch does not flash old values.
    fn overlay_pending(&self, edits: &EditLedger, records: &mut [E]) {
        if edits.is_empty() {
            return;
        }
        let overlay = edits.overlay();
        for record in records.iter_mut() {
            let Some(patch) = overlay.get(&RecordId::from(record.record_id())) else {
                continue;
            };
            if let Ok(patched) = apply_patch(record, patch) {
                *record = patched;
            }
        }
    }

    fn absorb_events(&self, epoch: u64, events: Vec<ChangeEvent>) -> EventOutcome {
        let mut inner = self.lock();
        if inner.stopped || inner.epoch != epoch {
            return EventOutcome::Stale;
        }
        let Some(scope) = self.scope_filter(&inner) else {
            return EventOutcome::Stale;
        };

        let mut refetch = false;
        let mut patched = false;
        let mut log_events = Vec::new();
        for event in events {
            let record_id = event.record_id(&self.policy.id_field);
            let position = record_id.as_deref().and_then(|id| {
                inner
                    .snapshot
                    .iter()
                    .position(|record| record.record_id() == id)
            });

            if position.is_none() && !event.touches(&scope) {
                log_events.push(SyncLogEvent::EventIgnored { kind: event.kind });
                continue;
            }

            if let (ChangeKind::Update, Some(index), Some(new_row)) =
                (event.kind, position, event.new.as_ref())
            {
                let silent = self.silent_patch(&inner.snapshot[index], new_row);
                // A row that cannot be merged falls through to a refetch.
                if let Some(fields) = silent {
                    if let Ok(updated) = apply_patch(&inner.snapshot[index], &fields) {
                        log_events.push(SyncLogEvent::EventPatched {
                            record_id: updated.record_id().to_string(),
                            fields: fields.keys().cloned().collect(),
                        });
                        inner.snapshot[index] = updated;
                        patched = true;
                        continue;
                    }
                }
            }

            log_events.push(SyncLogEvent::EventRefetch { kind: event.kind });
            refetch = true;
        }
        drop(inner);

        for event in log_events {
            self.log(event);
        }
        if patched {
            self.notify();
        }
        if refetch {
            EventOutcome::Refetch
        } else {
            EventOutcome::Absorbed
        }
    }

    /// Changed values of `new_row` when every changed field is declared silent.
    ///
    /// An update that changes nothing the record carries (typically the echo
    /// of a local edit) is silent too, as long as the policy has silent fields.
    fn silent_patch(&self, record: &E, new_row: &Row) -> Option<FieldPatch> {
        if self.policy.silent_fields.is_empty() {
            return None;
        }
        let local = to_row(record).ok()?;
        let skip = [
            self.policy.id_field.as_str(),
            self.policy.created_at_field.as_str(),
        ];
        let changed = changed_fields(&local, new_row, &skip);
        if !changed.is_empty() && !self.policy.is_silent_change(&changed) {
            return None;
        }
        Some(
            changed
                .into_iter()
                .filter_map(|field| new_row.get(&field).cloned().map(|value| (field, value)))
                .collect(),
        )
    }

    /// Applies `patch` once no field of it has an unconfirmed edit.
    async fn apply_when_settled(&self, record_id: &RecordId, patch: &FieldPatch) -> Result<u64> {
        loop {
            // Subscribed before the check so a settlement in between still wakes us.
            let mut changes = self.revision.subscribe();
            match self.apply_optimistic(record_id, patch) {
                Err(SyncError::EditInFlight { .. }) => {
                    if changes.changed().await.is_err() {
                        return Err(SyncError::Stopped);
                    }
                }
                result => return result,
            }
        }
    }

    /// Returns the scope epoch the edit was applied under.
    fn apply_optimistic(&self, record_id: &RecordId, patch: &FieldPatch) -> Result<u64> {
        if let Some(field) = patch.keys().find(|field| self.policy.is_immutable(field)) {
            return Err(SyncError::ImmutableField(field.clone()));
        }

        let mut inner = self.lock();
        if inner.stopped {
            return Err(SyncError::Stopped);
        }
        if inner.tenant.is_none() {
            return Err(SyncError::NotReady);
        }
        if let Some(field) = patch
            .keys()
            .find(|field| inner.edits.is_pending(record_id, field))
        {
            return Err(SyncError::EditInFlight {
                record_id: record_id.to_string(),
                field: field.clone(),
            });
        }
        let index = inner
            .snapshot
            .iter()
            .position(|record| record.record_id() == record_id.as_str())
            .ok_or_else(|| SyncError::RecordNotFound(record_id.to_string()))?;

        let current = &inner.snapshot[index];
        let previous = read_fields(current, patch.keys())?;
        let updated = apply_patch(current, patch)?;
        inner.snapshot[index] = updated;
        for (field, applied) in patch {
            let prior = previous.get(field).cloned().unwrap_or(Value::Null);
            inner.edits.begin(record_id, field, prior, applied.clone());
            inner.edit_errors.remove(&(record_id.clone(), field.clone()));
        }
        let epoch = inner.epoch;
        drop(inner);

        self.log(SyncLogEvent::EditApplied {
            record_id: record_id.to_string(),
            fields: patch.keys().cloned().collect(),
        });
        self.notify();
        Ok(epoch)
    }

    fn confirm_or_rollback(
        &self,
        record_id: &RecordId,
        patch: &FieldPatch,
        epoch: Option<u64>,
        result: std::result::Result<(), &SyncError>,
    ) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        if epoch.is_some_and(|epoch| epoch != inner.epoch) {
            drop(inner);
            self.log(SyncLogEvent::EditDiscarded {
                record_id: record_id.to_string(),
                reason: "scope_changed",
            });
            return;
        }

        let mut restore = FieldPatch::new();
        for field in patch.keys() {
            if let Some(pending) = inner.edits.take(record_id, field) {
                restore.insert(field.clone(), pending.previous);
            }
        }
        if restore.is_empty() {
            drop(inner);
            self.log(SyncLogEvent::EditDiscarded {
                record_id: record_id.to_string(),
                reason: "not_pending",
            });
            return;
        }

        let event = match result {
            Ok(()) => SyncLogEvent::EditConfirmed {
                record_id: record_id.to_string(),
            },
            Err(err) => {
                let message = err.to_string();
                let position = inner
                    .snapshot
                    .iter()
                    .position(|record| record.record_id() == record_id.as_str());
                if let Some(index) = position {
                    let restored = apply_patch(&inner.snapshot[index], &restore);
                    if let Ok(restored) = restored {
                        inner.snapshot[index] = restored;
                    }
                }
                for field in restore.keys() {
                    inner
                        .edit_errors
                        .insert((record_id.clone(), field.clone()), message.clone());
                }
                inner.error = Some(message.clone());
                SyncLogEvent::EditRolledBack {
                    record_id: record_id.to_string(),
                    error: message,
                }
            }
        };
        drop(inner);

        self.log(event);
        self.notify();
    }

    fn stop(&self) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        inner.phase = SyncPhase::Stopped;
        inner.is_subscribed = false;
        let retired = inner.subscription.take().and_then(|mut handle| {
            let id = handle.id();
            handle.retire().then_some(id)
        });
        drop(inner);

        if let Some(feed) = retired {
            self.log(SyncLogEvent::SubscriptionRetired { feed });
        }
        self.log(SyncLogEvent::Stopped);
        self.notify();
    }
}

async fn listen<E: SyncEntity>(
    shared: Weak<Shared<E>>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    coalesce: bool,
) {
    while let Some(first) = events.recv().await {
        let mut batch = vec![first];
        if coalesce {
            while let Ok(next) = events.try_recv() {
                batch.push(next);
            }
        }

        let Some(shared) = shared.upgrade() else {
            break;
        };
        match shared.absorb_events(epoch, batch) {
            EventOutcome::Stale => break,
            EventOutcome::Absorbed => {}
            EventOutcome::Refetch => {
                if let Some(ticket) = shared.issue_fetch() {
                    shared.run_fetch(ticket).await;
                }
            }
        }
    }
}
