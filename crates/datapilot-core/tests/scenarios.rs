// crates/datapilot-core/tests/scenarios.rs
// ============================================================================
// Module: End-to-End Scenario Tests
// Description: Seed-data scenarios over the in-memory control plane.
// ============================================================================
//! ## Overview
//! Drives the full control plane over the in-memory stores: deterministic
//! two-run dry-run, idempotent run creation, quality-gate blocking, and
//! immutability of content-addressed rows.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

mod common;

use bytes::Bytes;
use common::audit_info;
use common::base_time;
use common::pipeline_json_with_refs;
use common::run_spec_json;
use datapilot_core::AuditLedger;
use datapilot_core::CreateRunInput;
use datapilot_core::Dataset;
use datapilot_core::DatasetId;
use datapilot_core::DatasetRepository;
use datapilot_core::DatasetVersion;
use datapilot_core::DatasetVersionId;
use datapilot_core::DryRunExecutor;
use datapilot_core::DryRunInput;
use datapilot_core::EvaluationId;
use datapilot_core::EvaluationStatus;
use datapilot_core::FixedClock;
use datapilot_core::IdempotencyKey;
use datapilot_core::InMemoryObjectStore;
use datapilot_core::InMemoryStore;
use datapilot_core::LedgerQuery;
use datapilot_core::Metadata;
use datapilot_core::PipelineSpec;
use datapilot_core::PlanRepository;
use datapilot_core::Project;
use datapilot_core::ProjectId;
use datapilot_core::ProjectRepository;
use datapilot_core::QualityCheck;
use datapilot_core::QualityEvaluationRepository;
use datapilot_core::QualityRule;
use datapilot_core::QualityRuleId;
use datapilot_core::QualityRuleRepository;
use datapilot_core::RepositoryError;
use datapilot_core::RunCreator;
use datapilot_core::RunId;
use datapilot_core::RunService;
use datapilot_core::RunState;
use datapilot_core::ScriptedOutcomeDecider;
use datapilot_core::ServiceError;
use datapilot_core::build_plan;
use datapilot_core::evaluate_rule;
use datapilot_core::runtime::IngestFlows;
use datapilot_core::runtime::VersionUpload;

/// CSV content from the seed scenario.
const CSV_CONTENT: &[u8] = b"a,b\n1,2\n";

/// Scenario fixture: store, object store, and seeded entities.
struct Scenario {
    /// Control plane store.
    store: InMemoryStore,
    /// Object store.
    objects: InMemoryObjectStore,
    /// Uploaded dataset version.
    version: DatasetVersion,
}

/// Seeds project P, dataset D, version V, rule R1, and a pass evaluation.
async fn seed() -> Scenario {
    let store = InMemoryStore::new();
    let objects = InMemoryObjectStore::new();
    let clock = FixedClock::new(base_time());
    let info = audit_info("req-seed");
    let project_id = ProjectId::new("p1");

    let project = Project::new(
        project_id.clone(),
        "governance-demo",
        "seed project",
        Metadata::new(),
        base_time(),
        "tester",
    )
    .expect("project");
    store.insert_project(&project).expect("insert project");

    let dataset = Dataset::new(
        DatasetId::new("d1"),
        project_id.clone(),
        "training-data",
        "seed dataset",
        Metadata::new(),
        base_time(),
        "tester",
    )
    .expect("dataset");
    store.insert_dataset(&dataset).expect("insert dataset");

    let rule = QualityRule::new(
        QualityRuleId::new("r1"),
        project_id.clone(),
        "size-floor",
        vec![QualityCheck::MinSizeBytes {
            min_bytes: 1,
        }],
        base_time(),
        "tester",
    )
    .expect("rule");
    store.insert_rule(&rule).expect("insert rule");

    let flows = IngestFlows::new(
        &store, &store, &store, &store, &store, &store, &objects, &clock,
    );
    let version = flows
        .upload_dataset_version(
            &info,
            &project_id,
            &DatasetId::new("d1"),
            VersionUpload {
                version_id: DatasetVersionId::new("v1"),
                filename: "training.csv".to_string(),
                content_type: "text/csv".to_string(),
                quality_rule_id: Some(QualityRuleId::new("r1")),
                metadata: Metadata::new(),
                created_by: "tester".to_string(),
            },
            Bytes::from_static(CSV_CONTENT),
        )
        .await
        .expect("upload version");

    let evaluation =
        evaluate_rule(&objects, &rule, &version, EvaluationId::new("e1"), base_time())
            .await
            .expect("evaluate");
    assert_eq!(evaluation.status, EvaluationStatus::Pass, "seed evaluation must pass");
    store.insert_evaluation(&evaluation).expect("insert evaluation");

    Scenario {
        store,
        objects,
        version,
    }
}

/// Counts transition audit events.
fn transition_count(store: &InMemoryStore) -> usize {
    store
        .list_audit(&ProjectId::new("p1"), &LedgerQuery::default())
        .expect("audit list")
        .into_iter()
        .filter(|event| {
            matches!(
                event.action.as_str(),
                "run.planned" | "dry_run.started" | "dry_run.completed" | "dry_run.failed"
            )
        })
        .count()
}

#[tokio::test]
async fn deterministic_two_run_dry_run() {
    let scenario = seed().await;
    let store = &scenario.store;
    let clock = FixedClock::new(base_time());
    let info = audit_info("req-s1");
    let project_id = ProjectId::new("p1");

    let creator = RunCreator::new(store, store, store, store, store, &clock);
    let (run, created) = creator
        .create(
            &info,
            &project_id,
            CreateRunInput {
                run_id: RunId::new("r1"),
                idempotency_key: IdempotencyKey::new("s1-key"),
                pipeline_spec: pipeline_json_with_refs(
                    &[("a", 1), ("b", 1)],
                    &[("a", "b")],
                    &["training"],
                ),
                run_spec: run_spec_json("p1", &[("training", "v1")]),
            },
        )
        .expect("create run");
    assert!(created);
    assert_eq!(run.status, RunState::Created);

    let spec: PipelineSpec =
        serde_json::from_value(run.pipeline_spec.clone()).expect("pipeline document");
    let plan =
        build_plan(project_id.clone(), run.id.clone(), &spec, base_time()).expect("plan");
    assert_eq!(
        plan.steps.iter().map(|step| step.name.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    store.put_plan(&plan).expect("store plan");

    let service = RunService::new(store, store, store, &clock);
    let planned = service
        .derive_and_persist_with_audit(&info, &project_id, &run.id, &run.spec_hash)
        .expect("to planned");
    assert_eq!((planned.previous, planned.next), (RunState::Created, RunState::Planned));

    let running = service
        .mark_dry_run_running_with_audit(&info, &project_id, &run.id, &run.spec_hash)
        .expect("to running");
    assert_eq!((running.previous, running.next), (RunState::Planned, RunState::DryrunRunning));

    let decider = ScriptedOutcomeDecider::new(0.1);
    let executor = DryRunExecutor::new(store, &decider, &clock);
    let dry_input = DryRunInput {
        project_id: project_id.clone(),
        run_id: run.id.clone(),
        spec_hash: run.spec_hash.clone(),
    };
    let first = executor.execute(&dry_input, &plan).expect("dry run one");
    assert!(!first.existing);
    assert_eq!(first.inserted.len(), 2, "two attempts recorded");

    let succeeded = service
        .derive_and_persist_with_audit(&info, &project_id, &run.id, &run.spec_hash)
        .expect("to succeeded");
    assert_eq!(succeeded.next, RunState::DryrunSucceeded);
    assert_eq!(transition_count(store), 3);

    // Dry-run #2: exactly zero new inserts, no extra transitions.
    let second = executor.execute(&dry_input, &plan).expect("dry run two");
    assert!(second.existing);
    assert!(second.inserted.is_empty());
    let replay = service
        .derive_and_persist_with_audit(&info, &project_id, &run.id, &run.spec_hash)
        .expect("replay derivation");
    assert!(!replay.changed);
    assert_eq!(transition_count(store), 3, "audit contains three transition events, no more");
}

#[tokio::test]
async fn idempotent_run_creation() {
    let scenario = seed().await;
    let store = &scenario.store;
    let clock = FixedClock::new(base_time());
    let info = audit_info("req-s4");
    let project_id = ProjectId::new("p1");
    let creator = RunCreator::new(store, store, store, store, store, &clock);

    let input = CreateRunInput {
        run_id: RunId::new("r1"),
        idempotency_key: IdempotencyKey::new("s4-key"),
        pipeline_spec: pipeline_json_with_refs(&[("a", 1)], &[], &["training"]),
        run_spec: run_spec_json("p1", &[("training", "v1")]),
    };

    let (first, created_first) =
        creator.create(&info, &project_id, input.clone()).expect("first create");
    assert!(created_first);

    let mut replay = input.clone();
    replay.run_id = RunId::new("r-other");
    let (second, created_second) =
        creator.create(&info, &project_id, replay).expect("second create");
    assert!(!created_second, "second call returns the existing row");
    assert_eq!(second.id, first.id);
    assert_eq!(second.spec_hash, first.spec_hash);

    // Same key, different pipeline: conflict.
    let mut conflicting = input;
    conflicting.pipeline_spec = pipeline_json_with_refs(&[("a", 2)], &[], &["training"]);
    let err = creator
        .create(&info, &project_id, conflicting)
        .expect_err("differing spec hash must conflict");
    assert!(matches!(
        err,
        ServiceError::Repository(RepositoryError::IdempotencyConflict(_))
    ));
}

#[tokio::test]
async fn quality_gate_blocks_run_creation() {
    let scenario = seed().await;
    let store = &scenario.store;
    let clock = FixedClock::new(base_time());
    let info = audit_info("req-s5");
    let project_id = ProjectId::new("p1");

    // Newer failing verdict supersedes the seeded pass.
    let failing = datapilot_core::QualityEvaluation::new(
        EvaluationId::new("e2"),
        project_id.clone(),
        DatasetVersionId::new("v1"),
        QualityRuleId::new("r1"),
        EvaluationStatus::Fail,
        base_time().plus_millis(1),
        None,
        None,
        serde_json::json!({}),
    )
    .expect("failing verdict");
    store.insert_evaluation(&failing).expect("insert failing verdict");

    let creator = RunCreator::new(store, store, store, store, store, &clock);
    let err = creator
        .create(
            &info,
            &project_id,
            CreateRunInput {
                run_id: RunId::new("r1"),
                idempotency_key: IdempotencyKey::new("s5-key"),
                pipeline_spec: pipeline_json_with_refs(&[("a", 1)], &[], &["training"]),
                run_spec: run_spec_json("p1", &[("training", "v1")]),
            },
        )
        .expect_err("gate must block");
    assert_eq!(err.code().as_str(), "quality_gate_failed");
    assert_eq!(err.code().http_status(), 409);

    let blocks: Vec<String> = store
        .list_audit(&project_id, &LedgerQuery::default())
        .expect("audit list")
        .into_iter()
        .filter(|event| event.action == "quality_gate.block")
        .map(|event| event.payload["reason"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(blocks, vec!["not_pass".to_string()]);
}

#[tokio::test]
async fn duplicate_content_upload_is_rejected_and_compensated() {
    let scenario = seed().await;
    let store = &scenario.store;
    let clock = FixedClock::new(base_time());
    let info = audit_info("req-dup");
    let project_id = ProjectId::new("p1");

    let flows = IngestFlows::new(
        store,
        store,
        store,
        store,
        store,
        store,
        &scenario.objects,
        &clock,
    );
    let err = flows
        .upload_dataset_version(
            &info,
            &project_id,
            &DatasetId::new("d1"),
            VersionUpload {
                version_id: DatasetVersionId::new("v2"),
                filename: "training.csv".to_string(),
                content_type: "text/csv".to_string(),
                quality_rule_id: None,
                metadata: Metadata::new(),
                created_by: "tester".to_string(),
            },
            Bytes::from_static(CSV_CONTENT),
        )
        .await
        .expect_err("identical content must be rejected");
    assert_eq!(err.code().as_str(), "duplicate_content");
}

#[tokio::test]
async fn dataset_version_rows_are_immutable() {
    let scenario = seed().await;
    let version = &scenario.version;

    // Ordinal 1, content-addressed, integrity verified.
    assert_eq!(version.ordinal, 1);
    assert!(version.verify_integrity().expect("integrity"));

    // The repository exposes no mutation surface for versions; re-reading
    // returns the identical row with the identical integrity hash.
    let reloaded = datapilot_core::DatasetVersionRepository::get_version(
        &scenario.store,
        &ProjectId::new("p1"),
        &DatasetVersionId::new("v1"),
    )
    .expect("load version")
    .expect("version exists");
    assert_eq!(reloaded, *version);
    assert_eq!(reloaded.integrity_sha256, version.integrity_sha256);
}
