// crates/datapilot-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Unit Tests
// Description: Targeted persistence tests for the control plane store.
// Purpose: Validate ordinal allocation, idempotent creation, transition
//          atomicity, attempt uniqueness, and ledger ordering.
// ============================================================================

//! ## Overview
//! Unit-level tests for `SQLite` store invariants:
//! - Ordinal allocation is strictly monotonic per dataset
//! - Duplicate content is rejected with `duplicate_content`
//! - Run creation is idempotent on `(project, key, spec hash)`
//! - Status transitions couple their audit event and deduplicate replays
//! - Step attempts are unique per `(run, step, attempt)`
//! - Ledger listings are ordered by `event_id` ascending

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions and helpers are permitted."
)]

use datapilot_core::AuditInfo;
use datapilot_core::CreateRunRecord;
use datapilot_core::Dataset;
use datapilot_core::DatasetId;
use datapilot_core::DatasetVersionId;
use datapilot_core::HashAlgorithm;
use datapilot_core::HashDigest;
use datapilot_core::IdempotencyKey;
use datapilot_core::LedgerQuery;
use datapilot_core::Metadata;
use datapilot_core::NewDatasetVersion;
use datapilot_core::ObjectKey;
use datapilot_core::Project;
use datapilot_core::ProjectId;
use datapilot_core::RepositoryError;
use datapilot_core::RequestId;
use datapilot_core::RunId;
use datapilot_core::RunState;
use datapilot_core::StepExecutionRecord;
use datapilot_core::StepName;
use datapilot_core::StepStatus;
use datapilot_core::Timestamp;
use datapilot_core::core::audit::NewAuditEvent;
use datapilot_core::core::audit::NewAuditEventParams;
use datapilot_core::interfaces::AuditLedger;
use datapilot_core::interfaces::DatasetRepository;
use datapilot_core::interfaces::DatasetVersionRepository;
use datapilot_core::interfaces::ProjectRepository;
use datapilot_core::interfaces::RunRepository;
use datapilot_core::interfaces::StepExecutionRepository;
use datapilot_store_sqlite::SqliteStore;
use datapilot_store_sqlite::SqliteStoreConfig;
use serde_json::json;

/// Fixed fixture instant.
fn now() -> Timestamp {
    Timestamp::parse_rfc3339("2026-03-01T12:00:00Z").expect("fixture timestamp")
}

/// Opens a store on a temporary file.
fn store() -> (SqliteStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::new(SqliteStoreConfig {
        path: dir.path().join("datapilot.db"),
        busy_timeout_ms: 1_000,
        journal_mode: datapilot_store_sqlite::SqliteJournalMode::Wal,
        sync_mode: datapilot_store_sqlite::SqliteSyncMode::Normal,
    })
    .expect("open store");
    (store, dir)
}

/// Seeds project p1 and dataset d1.
fn seed_dataset(store: &SqliteStore) {
    let project = Project::new(
        ProjectId::new("p1"),
        "p-one",
        "test project",
        Metadata::new(),
        now(),
        "tester",
    )
    .expect("project");
    store.insert_project(&project).expect("insert project");
    let dataset = Dataset::new(
        DatasetId::new("d1"),
        ProjectId::new("p1"),
        "d-one",
        "test dataset",
        Metadata::new(),
        now(),
        "tester",
    )
    .expect("dataset");
    store.insert_dataset(&dataset).expect("insert dataset");
}

/// Builds a version insert payload for the given content hash nibble.
fn new_version(id: &str, nibble: char) -> NewDatasetVersion {
    NewDatasetVersion {
        id: DatasetVersionId::new(id),
        content_sha256: HashDigest::from_hex(
            HashAlgorithm::Sha256,
            nibble.to_string().repeat(64),
        ),
        object_key: ObjectKey::new(format!("p1/d1/{id}")),
        size_bytes: 16,
        quality_rule_id: None,
        metadata: Metadata::new(),
        created_at: now(),
        created_by: "tester".to_string(),
    }
}

/// Builds audit info for a test request.
fn info() -> AuditInfo {
    AuditInfo {
        actor: "tester".to_string(),
        request_id: RequestId::new("req-1"),
        ip: None,
        user_agent: None,
    }
}

/// Builds a run creation record.
fn run_record(key: &str, hash_nibble: char) -> CreateRunRecord {
    CreateRunRecord {
        id: RunId::new(format!("run-{key}")),
        project_id: ProjectId::new("p1"),
        idempotency_key: IdempotencyKey::new(key),
        pipeline_spec: json!({"kind": "Pipeline"}),
        run_spec: json!({"projectId": "p1"}),
        spec_hash: HashDigest::from_hex(HashAlgorithm::Sha256, hash_nibble.to_string().repeat(64)),
        created_at: now(),
    }
}

#[test]
fn ordinals_are_strictly_monotonic() {
    let (store, _dir) = store();
    seed_dataset(&store);
    let project = ProjectId::new("p1");
    let dataset = DatasetId::new("d1");

    let first = store.create_version(&project, &dataset, new_version("v1", 'a')).expect("v1");
    let second = store.create_version(&project, &dataset, new_version("v2", 'b')).expect("v2");
    let third = store.create_version(&project, &dataset, new_version("v3", 'c')).expect("v3");

    assert_eq!((first.ordinal, second.ordinal, third.ordinal), (1, 2, 3));
    assert!(first.verify_integrity().expect("integrity"));
}

#[test]
fn duplicate_content_is_rejected() {
    let (store, _dir) = store();
    seed_dataset(&store);
    let project = ProjectId::new("p1");
    let dataset = DatasetId::new("d1");

    store.create_version(&project, &dataset, new_version("v1", 'a')).expect("v1");
    let err = store
        .create_version(&project, &dataset, new_version("v2", 'a'))
        .expect_err("identical content must fail");
    assert!(matches!(err, RepositoryError::DuplicateContent));
}

#[test]
fn missing_dataset_is_not_found() {
    let (store, _dir) = store();
    seed_dataset(&store);
    let err = store
        .create_version(&ProjectId::new("p1"), &DatasetId::new("ghost"), new_version("v1", 'a'))
        .expect_err("missing dataset");
    assert!(matches!(err, RepositoryError::NotFound));
}

#[test]
fn cross_project_reads_return_nothing() {
    let (store, _dir) = store();
    seed_dataset(&store);
    let version = store
        .create_version(&ProjectId::new("p1"), &DatasetId::new("d1"), new_version("v1", 'a'))
        .expect("v1");

    let leaked = store
        .get_version(&ProjectId::new("p2"), &version.id)
        .expect("query");
    assert!(leaked.is_none(), "cross-project access must look like absence");
}

#[test]
fn run_creation_is_idempotent_per_key_and_hash() {
    let (store, _dir) = store();
    seed_dataset(&store);

    let (first, created_first) = store.create_or_get_run(run_record("k1", 'a')).expect("first");
    assert!(created_first);

    let (second, created_second) = store.create_or_get_run(run_record("k1", 'a')).expect("second");
    assert!(!created_second);
    assert_eq!(second.id, first.id);

    let err = store
        .create_or_get_run(run_record("k1", 'b'))
        .expect_err("different hash must conflict");
    assert!(matches!(err, RepositoryError::IdempotencyConflict(_)));
}

#[test]
fn status_transition_couples_audit_and_deduplicates() {
    let (store, _dir) = store();
    seed_dataset(&store);
    let (run, _) = store.create_or_get_run(run_record("k1", 'a')).expect("run");

    let event = NewAuditEvent::new(NewAuditEventParams {
        project_id: run.project_id.clone(),
        occurred_at: now(),
        info: info(),
        action: "run.planned".to_string(),
        resource_type: "run".to_string(),
        resource_id: run.id.to_string(),
        payload: json!({"idempotency_key": "p1:run-k1:created:planned"}),
    })
    .expect("event");

    let transition = store
        .update_derived_status(&run.project_id, &run.id, RunState::Planned, Some(event.clone()))
        .expect("transition");
    assert_eq!(transition.previous, RunState::Created);
    assert!(transition.changed);

    // Replaying the event alone must not create a second row.
    store.append_audit(event).expect("replay append");
    let events = store
        .list_audit(&run.project_id, &LedgerQuery::default())
        .expect("list audit");
    let planned: Vec<_> =
        events.iter().filter(|event| event.action == "run.planned").collect();
    assert_eq!(planned.len(), 1);

    // Same-state update is a no-op.
    let noop = store
        .update_derived_status(&run.project_id, &run.id, RunState::Planned, None)
        .expect("noop");
    assert!(!noop.changed);

    // Terminal guard.
    store
        .update_derived_status(&run.project_id, &run.id, RunState::DryrunSucceeded, None)
        .expect("to terminal");
    let err = store
        .update_derived_status(&run.project_id, &run.id, RunState::DryrunRunning, None)
        .expect_err("terminal must reject");
    assert!(matches!(err, RepositoryError::InvalidTransition { .. }));
}

#[test]
fn step_attempts_are_unique_and_existing_rows_win() {
    let (store, _dir) = store();
    seed_dataset(&store);

    let record = StepExecutionRecord {
        project_id: ProjectId::new("p1"),
        run_id: RunId::new("r1"),
        step_name: StepName::new("a"),
        attempt: 1,
        status: StepStatus::Succeeded,
        started_at: now(),
        finished_at: now(),
        error_code: None,
        error_message: None,
        result: json!({"dry_run": true}),
        spec_hash: HashDigest::from_hex(HashAlgorithm::Sha256, "a".repeat(64)),
    };
    let (_, created) = store.insert_attempt(&record).expect("insert");
    assert!(created);

    let mut conflicting = record.clone();
    conflicting.status = StepStatus::Failed;
    let (stored, created) = store.insert_attempt(&conflicting).expect("conflict insert");
    assert!(!created);
    assert_eq!(stored.status, StepStatus::Succeeded, "existing row is authoritative");

    let records = store
        .list_for_run(&ProjectId::new("p1"), &RunId::new("r1"))
        .expect("list");
    assert_eq!(records.len(), 1);
}

#[test]
fn audit_listing_is_ordered_and_windowed() {
    let (store, _dir) = store();
    seed_dataset(&store);
    let project = ProjectId::new("p1");

    for index in 0 .. 5 {
        let event = NewAuditEvent::new(NewAuditEventParams {
            project_id: project.clone(),
            occurred_at: now().plus_millis(index),
            info: info(),
            action: format!("test.event.{index}"),
            resource_type: "test".to_string(),
            resource_id: format!("res-{index}"),
            payload: json!({}),
        })
        .expect("event");
        store.append_audit(event).expect("append");
    }

    let all = store.list_audit(&project, &LedgerQuery::default()).expect("list");
    assert_eq!(all.len(), 5);
    let ids: Vec<u64> = all.iter().map(|event| event.event_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted, "export order is event_id ascending");

    let paged = store
        .list_audit(
            &project,
            &LedgerQuery {
                after_event_id: Some(ids[1]),
                limit: Some(2),
                ..LedgerQuery::default()
            },
        )
        .expect("paged list");
    assert_eq!(paged.len(), 2);
    assert!(paged.iter().all(|event| event.event_id > ids[1]));

    for event in &all {
        assert!(event.verify_integrity().expect("integrity"));
    }
}

#[test]
fn reopened_store_preserves_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("datapilot.db");
    {
        let store = SqliteStore::new(SqliteStoreConfig {
            path: path.clone(),
            busy_timeout_ms: 1_000,
            journal_mode: datapilot_store_sqlite::SqliteJournalMode::Wal,
            sync_mode: datapilot_store_sqlite::SqliteSyncMode::Normal,
        })
        .expect("open store");
        seed_dataset(&store);
        store
            .create_version(&ProjectId::new("p1"), &DatasetId::new("d1"), new_version("v1", 'a'))
            .expect("v1");
    }

    let reopened = SqliteStore::new(SqliteStoreConfig {
        path,
        busy_timeout_ms: 1_000,
        journal_mode: datapilot_store_sqlite::SqliteJournalMode::Wal,
        sync_mode: datapilot_store_sqlite::SqliteSyncMode::Normal,
    })
    .expect("reopen store");
    let version = reopened
        .get_version(&ProjectId::new("p1"), &DatasetVersionId::new("v1"))
        .expect("query")
        .expect("version survives reopen");
    assert_eq!(version.ordinal, 1);
    assert!(version.verify_integrity().expect("integrity"));
}
