use conex_sync::core::patch_of;
use conex_sync::features::leads::{self, Lead, LeadStatus};
use conex_sync::{
    CollectionSynchronizer, FilterExpr, InMemoryStore, MemoryLog, RecordId, Row, SyncDeps,
    SyncError, SyncLogEvent, SyncPhase, TenantKey,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = leads::TABLE;

fn lead(uid: &str, tenant: &str, day: u32) -> Row {
    lead_in_project(uid, tenant, day, None)
}

fn lead_in_project(uid: &str, tenant: &str, day: u32, project: Option<&str>) -> Row {
    json!({
        "uid": uid,
        "created_at": format!("2024-05-{day:02}T09:00:00Z"),
        "led_empresa": tenant,
        "lead_nome": format!("Lead {uid}"),
        "lead_whatsapp": format!("55119{day:08}"),
        "status": "Pendente",
        "lead_projeto": project,
    })
    .as_object()
    .cloned()
    .unwrap()
}

fn tenant(key: &str) -> Option<TenantKey> {
    TenantKey::parse(key)
}

fn seeded_store() -> InMemoryStore {
    let store = InMemoryStore::new();
    store.seed(
        TABLE,
        vec![lead("L1", "T1", 1), lead("L2", "T1", 2), lead("L5", "T1", 5)],
    );
    store.seed(TABLE, vec![lead("X1", "T2", 3), lead("X2", "T2", 4)]);
    store
}

async fn start(store: &InMemoryStore, key: Option<TenantKey>) -> (CollectionSynchronizer<Lead>, Arc<MemoryLog>) {
    let log = Arc::new(MemoryLog::new());
    let deps = SyncDeps::in_memory(store).with_log(log.clone());
    let sync = CollectionSynchronizer::start(deps, leads::policy(), key, None).await;
    (sync, log)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn ids(sync: &CollectionSynchronizer<Lead>) -> Vec<String> {
    sync.snapshot().into_iter().map(|lead| lead.uid).collect()
}

#[tokio::test]
async fn test_start_populates_snapshot_and_subscribes() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;

    let status = sync.status();
    assert_eq!(status.phase, SyncPhase::Ready);
    assert!(!status.loading);
    assert!(status.is_subscribed);
    assert_eq!(status.error, None);
    assert_eq!(ids(&sync), vec!["L5", "L2", "L1"]);
    assert_eq!(store.active_subscriptions(), 1);
}

#[tokio::test]
async fn test_absent_tenant_yields_empty_idle_collection() {
    let store = seeded_store();
    let (sync, _) = start(&store, TenantKey::parse("   ")).await;

    let status = sync.status();
    assert_eq!(status.phase, SyncPhase::Idle);
    assert!(!status.loading);
    assert_eq!(status.error, None);
    assert!(sync.snapshot().is_empty());
    assert_eq!(store.stats().queries, 0);
    assert_eq!(store.stats().subscribes, 0);

    sync.refetch().await;
    assert_eq!(store.stats().queries, 0);
    assert!(matches!(
        sync.apply_optimistic(&RecordId::from("L1"), &patch_of("status", "Atendido")),
        Err(SyncError::NotReady)
    ));
}

#[tokio::test]
async fn test_update_event_triggers_full_refetch() {
    let store = seeded_store();
    let (sync, log) = start(&store, tenant("T1")).await;
    assert_eq!(store.stats().queries, 1);

    store
        .patch_row(TABLE, "uid", "L2", &patch_of("lead_nome", "Renamed"))
        .unwrap();

    eventually(|| sync.get("L2").and_then(|lead| lead.lead_nome) == Some("Renamed".into())).await;
    assert_eq!(sync.phase(), SyncPhase::Ready);
    assert_eq!(store.stats().queries, 2);
    assert_eq!(log.count(|e| matches!(e, SyncLogEvent::EventRefetch { .. })), 1);
}

#[tokio::test]
async fn test_insert_and_delete_events_refetch() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;

    store.insert(TABLE, lead("L9", "T1", 9));
    eventually(|| sync.status().records == 4).await;
    assert_eq!(ids(&sync)[0], "L9");

    store.delete(TABLE, "uid", "L1").unwrap();
    eventually(|| sync.status().records == 3).await;
    assert!(sync.get("L1").is_none());
}

#[tokio::test]
async fn test_other_tenant_changes_are_not_seen() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;

    store.insert(TABLE, lead("X9", "T2", 9));
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(store.stats().queries, 1);
    assert!(sync.get("X9").is_none());
}

#[tokio::test]
async fn test_optimistic_edit_is_visible_immediately() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let id = RecordId::from("L5");
    let patch = patch_of("status", "Atendido");

    sync.apply_optimistic(&id, &patch).unwrap();
    assert_eq!(sync.get("L5").unwrap().status, LeadStatus::Atendido);
    assert_eq!(sync.status().pending_edits, 1);

    sync.confirm_or_rollback(&id, &patch, Ok(()));
    assert_eq!(sync.get("L5").unwrap().status, LeadStatus::Atendido);
    assert_eq!(sync.status().pending_edits, 0);
    assert_eq!(sync.status().error, None);
}

#[tokio::test]
async fn test_failed_write_rolls_back_to_pre_edit_value() {
    let store = seeded_store();
    let (sync, log) = start(&store, tenant("T1")).await;
    let id = RecordId::from("L5");
    store.fail_next_updates(1);

    let result = sync.edit(&id, patch_of("status", "Atendido")).await;

    assert!(matches!(result, Err(SyncError::Write(_))));
    assert_eq!(sync.get("L5").unwrap().status, LeadStatus::Pendente);
    assert!(sync.status().error.is_some());
    assert!(sync.edit_error(&id, "status").is_some());
    assert_eq!(sync.status().pending_edits, 0);
    assert_eq!(log.count(|e| matches!(e, SyncLogEvent::EditRolledBack { .. })), 1);

    // The next successful edit clears the field error.
    sync.edit(&id, patch_of("status", "Atendido")).await.unwrap();
    assert_eq!(sync.edit_error(&id, "status"), None);
    assert_eq!(sync.get("L5").unwrap().status, LeadStatus::Atendido);
}

#[tokio::test]
async fn test_manual_rollback_restores_previous_value() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let id = RecordId::from("L1");
    let patch = patch_of("lead_nome", "Typo");

    sync.apply_optimistic(&id, &patch).unwrap();
    let failure = SyncError::Write("rejected".into());
    sync.confirm_or_rollback(&id, &patch, Err(&failure));

    assert_eq!(sync.get("L1").unwrap().lead_nome.as_deref(), Some("Lead L1"));
    assert_eq!(sync.edit_error(&id, "lead_nome").as_deref(), Some("Write error: rejected"));
}

#[tokio::test]
async fn test_edits_of_same_field_are_serialized() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let sync = Arc::new(sync);
    let id = RecordId::from("L2");

    let first = {
        let sync = Arc::clone(&sync);
        let id = id.clone();
        tokio::spawn(async move { sync.edit(&id, patch_of("lead_nome", "First")).await })
    };
    let second = {
        let sync = Arc::clone(&sync);
        let id = id.clone();
        tokio::spawn(async move { sync.edit(&id, patch_of("lead_nome", "Second")).await })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(store.stats().updates, 2);

    let stored: Vec<Row> = store.rows(TABLE);
    let l2 = stored.iter().find(|row| row["uid"] == "L2").unwrap();
    let local = sync.get("L2").unwrap().lead_nome.unwrap();
    assert_eq!(l2["lead_nome"], json!(local));
}

#[tokio::test]
async fn test_immediate_second_edit_of_pending_field_is_refused() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let id = RecordId::from("L2");

    sync.apply_optimistic(&id, &patch_of("status", "Atendido")).unwrap();
    let second = sync.apply_optimistic(&id, &patch_of("status", "Pendente"));
    assert!(matches!(second, Err(SyncError::EditInFlight { .. })));

    // A different field of the same record is independent.
    sync.apply_optimistic(&id, &patch_of("lead_perfil", "VIP")).unwrap();
    assert_eq!(sync.status().pending_edits, 2);
}

#[tokio::test]
async fn test_edit_queues_behind_manually_applied_edit() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let sync = Arc::new(sync);
    let id = RecordId::from("L5");
    let first = patch_of("status", "Atendido");

    sync.apply_optimistic(&id, &first).unwrap();
    let second = {
        let sync = Arc::clone(&sync);
        let id = id.clone();
        tokio::spawn(async move { sync.edit(&id, patch_of("status", "Pendente")).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!second.is_finished());
    assert_eq!(store.stats().updates, 0);

    sync.confirm_or_rollback(&id, &first, Ok(()));
    second.await.unwrap().unwrap();

    assert_eq!(store.stats().updates, 1);
    assert_eq!(sync.get("L5").unwrap().status, LeadStatus::Pendente);
    assert_eq!(sync.status().pending_edits, 0);
    let stored = store.rows(TABLE);
    let l5 = stored.iter().find(|row| row["uid"] == "L5").unwrap();
    assert_eq!(l5["status"], json!("Pendente"));
}

#[tokio::test]
async fn test_write_failing_after_tenant_switch_leaves_new_scope_clean() {
    let store = seeded_store();
    let (sync, log) = start(&store, tenant("T1")).await;
    let sync = Arc::new(sync);
    store.delay_updates(Duration::from_millis(50));
    store.fail_next_updates(1);

    let pending = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move {
            sync.edit(&RecordId::from("L1"), patch_of("status", "Atendido")).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    sync.set_tenant(tenant("T2")).await;

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(SyncError::Write(_))));

    let status = sync.status();
    assert_eq!(status.tenant, tenant("T2"));
    assert_eq!(status.phase, SyncPhase::Ready);
    assert_eq!(status.error, None);
    assert_eq!(status.pending_edits, 0);
    assert_eq!(ids(&sync), vec!["X2", "X1"]);
    assert_eq!(sync.edit_error(&RecordId::from("L1"), "status"), None);
    assert_eq!(log.count(|e| matches!(e, SyncLogEvent::EditRolledBack { .. })), 0);
    assert_eq!(log.count(|e| matches!(e, SyncLogEvent::EditDiscarded { .. })), 1);
}

#[tokio::test]
async fn test_settling_an_unknown_edit_changes_nothing() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let failure = SyncError::Write("late".into());

    sync.confirm_or_rollback(&RecordId::from("L2"), &patch_of("status", "Atendido"), Err(&failure));

    assert_eq!(sync.status().error, None);
    assert_eq!(sync.edit_error(&RecordId::from("L2"), "status"), None);
    assert_eq!(sync.get("L2").unwrap().status, LeadStatus::Pendente);
}

#[tokio::test]
async fn test_slow_earlier_fetch_never_overwrites_later_one() {
    let store = seeded_store();
    let (sync, log) = start(&store, tenant("T1")).await;

    let gate = store.hold_next_query();
    let earlier = tokio::spawn(sync.fetch_all());
    eventually(|| store.blocked_queries() == 1).await;

    store.seed(TABLE, vec![lead("L7", "T1", 7)]);
    sync.fetch_all().await;
    assert_eq!(sync.status().records, 4);

    gate.release();
    earlier.await.unwrap();

    assert_eq!(ids(&sync), vec!["L7", "L5", "L2", "L1"]);
    assert_eq!(sync.phase(), SyncPhase::Ready);
    assert_eq!(
        log.count(|e| matches!(e, SyncLogEvent::FetchDiscarded { reason: "superseded", .. })),
        1
    );
}

#[tokio::test]
async fn test_fetch_failure_keeps_last_good_snapshot() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;

    store.fail_next_queries(1);
    sync.refetch().await;

    let status = sync.status();
    assert_eq!(status.phase, SyncPhase::Error);
    assert!(!status.loading);
    assert!(status.error.unwrap().contains("injected query failure"));
    assert_eq!(status.records, 3);

    sync.refetch().await;
    assert_eq!(sync.phase(), SyncPhase::Ready);
    assert_eq!(sync.status().error, None);
}

#[tokio::test]
async fn test_subscription_failure_degrades_to_refetch_only() {
    let store = seeded_store();
    store.reject_subscriptions(true);
    let (sync, log) = start(&store, tenant("T1")).await;

    let status = sync.status();
    assert_eq!(status.phase, SyncPhase::Ready);
    assert!(!status.is_subscribed);
    assert_eq!(status.records, 3);
    assert_eq!(log.count(|e| matches!(e, SyncLogEvent::SubscriptionFailed { .. })), 1);

    store.insert(TABLE, lead("L8", "T1", 8));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sync.status().records, 3);

    sync.refetch().await;
    assert_eq!(sync.status().records, 4);
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let store = seeded_store();
    let (sync, log) = start(&store, tenant("T1")).await;

    sync.stop();
    sync.stop();
    drop(sync);

    assert_eq!(store.active_subscriptions(), 0);
    assert_eq!(store.stats().unsubscribe_calls, 1);
    assert_eq!(log.count(|e| matches!(e, SyncLogEvent::Stopped)), 1);
}

#[tokio::test]
async fn test_stopped_instance_ignores_everything() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    sync.stop();

    sync.refetch().await;
    sync.set_tenant(tenant("T2")).await;
    store.insert(TABLE, lead("L9", "T1", 9));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(sync.phase(), SyncPhase::Stopped);
    assert_eq!(sync.tenant(), tenant("T1"));
    assert_eq!(sync.status().records, 3);
    assert_eq!(store.stats().queries, 1);
    assert!(matches!(
        sync.apply_optimistic(&RecordId::from("L1"), &patch_of("status", "Atendido")),
        Err(SyncError::Stopped)
    ));
}

#[tokio::test]
async fn test_stop_during_fetch_drops_late_result() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;

    let gate = store.hold_next_query();
    let in_flight = tokio::spawn(sync.fetch_all());
    eventually(|| store.blocked_queries() == 1).await;

    store.seed(TABLE, vec![lead("L7", "T1", 7)]);
    sync.stop();
    drop(sync);
    gate.release();

    in_flight.await.unwrap();
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_stop_during_fetch_keeps_snapshot_untouched() {
    let store = InMemoryStore::new();
    store.seed(TABLE, vec![lead("L1", "T1", 1)]);
    let (sync, _) = start(&store, tenant("T1")).await;

    let gate = store.hold_next_query();
    store.seed(TABLE, vec![lead("L2", "T1", 2)]);
    let in_flight = tokio::spawn(sync.fetch_all());
    eventually(|| store.blocked_queries() == 1).await;

    sync.stop();
    gate.release();
    in_flight.await.unwrap();

    assert_eq!(ids(&sync), vec!["L1"]);
    assert_eq!(sync.phase(), SyncPhase::Stopped);
}

#[tokio::test]
async fn test_tenant_switch_clears_snapshot_before_new_data() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let sync = Arc::new(sync);

    let gate = store.hold_next_query();
    let switching = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.set_tenant(tenant("T2")).await })
    };
    eventually(|| store.blocked_queries() == 1).await;

    let interim = sync.status();
    assert_eq!(interim.phase, SyncPhase::Loading);
    assert!(interim.loading);
    assert_eq!(interim.records, 0);
    assert_eq!(interim.tenant, tenant("T2"));
    assert_eq!(store.stats().unsubscribe_calls, 1);
    assert_eq!(store.active_subscriptions(), 1);

    gate.release();
    switching.await.unwrap();

    let mut held = ids(&sync);
    held.sort();
    assert_eq!(held, vec!["X1", "X2"]);
    assert_eq!(sync.phase(), SyncPhase::Ready);
    assert_eq!(store.stats().unsubscribe_calls, 1);
}

#[tokio::test]
async fn test_old_tenant_events_do_not_reach_new_scope() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    sync.set_tenant(tenant("T2")).await;
    let queries = store.stats().queries;

    store.insert(TABLE, lead("L9", "T1", 9));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(store.stats().queries, queries);
    assert!(sync.get("L9").is_none());
}

#[tokio::test]
async fn test_filter_swaps_keep_one_live_subscription() {
    let store = InMemoryStore::new();
    store.seed(
        TABLE,
        vec![
            lead_in_project("A", "T1", 1, Some("P1")),
            lead_in_project("B", "T1", 2, Some("P2")),
            lead_in_project("C", "T1", 3, Some("P1")),
        ],
    );
    let (sync, _) = start(&store, tenant("T1")).await;
    assert_eq!(sync.status().records, 3);

    for (round, project) in ["P1", "P2", "P1"].into_iter().enumerate() {
        sync.set_filter(Some(FilterExpr::eq("lead_projeto", project))).await;
        assert_eq!(store.active_subscriptions(), 1);
        assert_eq!(store.stats().unsubscribe_calls, round as u64 + 1);
        assert!(sync.snapshot().iter().all(|lead| lead.lead_projeto.as_deref() == Some(project)));
    }
    assert_eq!(sync.tenant(), tenant("T1"));

    sync.set_filter(None).await;
    assert_eq!(sync.status().records, 3);

    sync.stop();
    assert_eq!(store.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_snapshot_never_holds_duplicate_ids() {
    let store = InMemoryStore::new();
    store.seed(
        TABLE,
        vec![lead("D1", "T1", 1), lead("D1", "T1", 1), lead("D2", "T1", 2)],
    );
    let (sync, _) = start(&store, tenant("T1")).await;

    store.insert(TABLE, lead("D2", "T1", 2));
    store.insert(TABLE, lead("D3", "T1", 3));
    eventually(|| sync.get("D3").is_some()).await;
    sync.apply_optimistic(&RecordId::from("D1"), &patch_of("status", "Atendido")).unwrap();
    sync.refetch().await;

    let held = ids(&sync);
    let unique: HashSet<_> = held.iter().collect();
    assert_eq!(unique.len(), held.len());
    assert_eq!(held.len(), 3);
}

#[tokio::test]
async fn test_changes_channel_reports_revisions() {
    let store = seeded_store();
    let (sync, _) = start(&store, tenant("T1")).await;
    let mut changes = sync.changes();
    let before = *changes.borrow_and_update();

    sync.apply_optimistic(&RecordId::from("L1"), &patch_of("status", "Atendido")).unwrap();

    tokio::time::timeout(Duration::from_secs(1), changes.changed())
        .await
        .unwrap()
        .unwrap();
    assert!(*changes.borrow() > before);
}
