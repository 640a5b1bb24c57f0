//! End-to-end cycles: a real on-disk store driven through the orchestrator
//! with a scripted transport.

use fieldsync_engine::{
    MockTransport, RetryConfig, SyncConfig, SyncError, SyncEventFeed, SyncOrchestrator,
};
use fieldsync_protocol::{
    BatchPushResponse, ChangeOperation, Checkpoint, ConflictPolicy, ConflictResolution,
    DeltaChange, DeltaResponse, EntityKey, PushOutcome,
};
use fieldsync_store::{EntityStore, PutOptions, StoreConfig};
use std::sync::Arc;
use std::time::Duration;

fn open(dir: &tempfile::TempDir) -> Arc<EntityStore> {
    Arc::new(EntityStore::open(dir.path().join("field.db"), StoreConfig::new()).unwrap())
}

fn orchestrator(
    store: Arc<EntityStore>,
    transport: Arc<MockTransport>,
    config: SyncConfig,
) -> SyncOrchestrator {
    SyncOrchestrator::new(store, transport, config, Arc::new(SyncEventFeed::new()))
}

fn base_config() -> SyncConfig {
    SyncConfig::new("https://sync.example.com", "device-1")
        .with_tracked_types(["shift"])
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::ZERO))
}

#[test]
fn offline_edits_survive_reopen_and_then_sync() {
    let dir = tempfile::tempdir().unwrap();
    let key = EntityKey::new("shift", "s1");

    {
        let store = open(&dir);
        store
            .put(&key, br#"{"status":"active"}"#, &PutOptions::new())
            .unwrap();
    }

    // Process restart: the edit and its queue item are still there.
    let store = open(&dir);
    assert_eq!(store.get(&key).unwrap().payload, br#"{"status":"active"}"#);
    assert_eq!(store.queue_counts().unwrap().pending, 1);

    let transport = Arc::new(MockTransport::new());
    let report = orchestrator(store.clone(), transport, base_config())
        .perform_full_sync()
        .unwrap();

    assert!(report.success);
    assert_eq!(report.synced, 1);
    assert!(store.get(&key).unwrap().synced);
}

#[test]
fn rapid_edits_push_only_the_final_payload() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let key = EntityKey::new("shift", "shift_42");

    for status in ["draft", "active", "paused", "completed"] {
        store
            .put(
                &key,
                format!(r#"{{"status":"{status}"}}"#).as_bytes(),
                &PutOptions::new(),
            )
            .unwrap();
    }
    assert_eq!(store.queue_counts().unwrap().pending, 1);

    let transport = Arc::new(MockTransport::new());
    orchestrator(store, transport.clone(), base_config())
        .perform_full_sync()
        .unwrap();

    let batches = transport.pushed_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].items.len(), 1);
    assert_eq!(
        batches[0].items[0].payload.as_deref(),
        Some(br#"{"status":"completed"}"#.as_slice())
    );
}

#[test]
fn backoff_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = EntityKey::new("shift", "s1");

    {
        let store = open(&dir);
        store.put(&key, b"{}", &PutOptions::new()).unwrap();

        let transport = Arc::new(MockTransport::new());
        transport.script_push(Err(SyncError::transport_retryable("reset")));
        let report = orchestrator(store.clone(), transport, base_config())
            .perform_full_sync()
            .unwrap();
        assert!(!report.success);
    }

    // After a restart the failure count is still on the row.
    let store = open(&dir);
    let item = &store.pending_changes(1).unwrap()[0];
    assert_eq!(item.retry_count, 1);
    assert!(item.last_attempt_at.is_some());

    // With a long backoff the item is not due, so nothing is pushed.
    let config = SyncConfig::new("https://sync.example.com", "device-1")
        .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_secs(3600)));
    let transport = Arc::new(MockTransport::new());
    let report = orchestrator(store, transport.clone(), config)
        .perform_full_sync()
        .unwrap();
    assert_eq!(report.synced, 0);
    assert!(transport.pushed_batches().is_empty());
}

#[test]
fn item_fails_after_exactly_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    store
        .put(&EntityKey::new("shift", "s1"), b"{}", &PutOptions::new())
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    let orchestrator = orchestrator(store.clone(), transport.clone(), base_config());

    for _ in 0..3 {
        transport.script_push(Ok(BatchPushResponse::new(vec![PushOutcome::error("busy")])));
        orchestrator.perform_full_sync().unwrap();
    }
    // Two more cycles: the failed item is never pushed again.
    orchestrator.perform_full_sync().unwrap();
    orchestrator.perform_full_sync().unwrap();

    // max_attempts is 3: attempts stop there even though more cycles ran.
    assert_eq!(transport.pushed_batches().len(), 3);
    assert_eq!(store.queue_counts().unwrap().failed, 1);

    // Manual retry gives the item a fresh budget.
    let failed_id = {
        let counts = store.queue_counts().unwrap();
        assert_eq!(counts.pending, 0);
        // The only item in the queue.
        store.queue_item(&transport.pushed_batches()[0].items[0].id)
    }
    .unwrap()
    .unwrap()
    .id;
    assert!(store.retry_failed_item(&failed_id).unwrap());

    orchestrator.perform_full_sync().unwrap();
    assert_eq!(store.queue_counts().unwrap().completed, 1);
}

#[test]
fn pulled_pages_replay_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let transport = Arc::new(MockTransport::new());
    let orchestrator = orchestrator(store.clone(), transport.clone(), base_config());

    let page = DeltaResponse::new(
        vec![DeltaChange {
            key: EntityKey::new("shift", "remote"),
            operation: ChangeOperation::Create,
            timestamp: 100,
            payload: Some(br#"{"status":"posted"}"#.to_vec()),
            searchable_fields: vec!["status".into()],
        }],
        Checkpoint::new("c1"),
        false,
    );

    // The server resends the same page (ack lost) on the next cycle.
    transport.script_pull("shift", Ok(page.clone()));
    orchestrator.perform_full_sync().unwrap();
    transport.script_pull("shift", Ok(page));
    orchestrator.perform_full_sync().unwrap();

    let listing = store
        .list_by_type("shift", &fieldsync_store::ListOptions::default())
        .unwrap();
    assert_eq!(listing.total, 1);
    assert_eq!(store.checkpoint("shift").unwrap().as_str(), "c1");
}

#[test]
fn manual_conflict_round_trip_across_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let key = EntityKey::new("shift", "s1");
    store
        .put(&key, br#"{"who":"client"}"#, &PutOptions::new())
        .unwrap();

    let transport = Arc::new(MockTransport::new());
    let orchestrator = orchestrator(
        store.clone(),
        transport.clone(),
        base_config().with_policy(ConflictPolicy::Manual),
    );

    transport.script_push(Ok(BatchPushResponse::new(vec![PushOutcome::conflict(
        Some(br#"{"who":"server"}"#.to_vec()),
        900,
    )])));
    let report = orchestrator.perform_full_sync().unwrap();
    assert_eq!(report.conflicts, 1);

    // The item is parked, not retried.
    orchestrator.perform_full_sync().unwrap();
    assert_eq!(transport.pushed_batches().len(), 1);

    let pending = store.pending_conflicts().unwrap();
    assert_eq!(pending.len(), 1);

    // Keep the client's copy; the next cycle pushes it again.
    assert!(orchestrator
        .resolver()
        .resolve(&pending[0].id, ConflictResolution::KeepClient, None)
        .unwrap());
    let report = orchestrator.perform_full_sync().unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(
        store.get(&key).unwrap().payload,
        br#"{"who":"client"}"#.to_vec()
    );
    assert!(store.pending_conflicts().unwrap().is_empty());
}
