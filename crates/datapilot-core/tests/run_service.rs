// crates/datapilot-core/tests/run_service.rs
// ============================================================================
// Module: Run Service Tests
// Description: Idempotent transitions, audit coupling, and dedupe.
// ============================================================================
//! ## Overview
//! Exercises derive-and-persist transitions, the dry-run-running guard, the
//! one-audit-per-transition invariant, and silent no-ops on re-application.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

mod common;

use common::audit_info;
use common::base_time;
use common::pipeline_json;
use common::run_spec_json;
use datapilot_core::AuditEvent;
use datapilot_core::AuditLedger;
use datapilot_core::CreateRunInput;
use datapilot_core::DryRunExecutor;
use datapilot_core::DryRunInput;
use datapilot_core::FixedClock;
use datapilot_core::IdempotencyKey;
use datapilot_core::InMemoryStore;
use datapilot_core::LedgerQuery;
use datapilot_core::PipelineSpec;
use datapilot_core::PlanRepository;
use datapilot_core::ProjectId;
use datapilot_core::Run;
use datapilot_core::RunCreator;
use datapilot_core::RunId;
use datapilot_core::RunService;
use datapilot_core::RunState;
use datapilot_core::ScriptedOutcomeDecider;
use datapilot_core::ServiceError;
use datapilot_core::build_plan;

/// Creates a run through the creator with no dataset bindings.
fn seeded_run(store: &InMemoryStore) -> Run {
    let clock = FixedClock::new(base_time());
    let creator = RunCreator::new(store, store, store, store, store, &clock);
    let (run, created) = creator
        .create(
            &audit_info("req-create"),
            &ProjectId::new("p1"),
            CreateRunInput {
                run_id: RunId::new("r1"),
                idempotency_key: IdempotencyKey::new("key-1"),
                pipeline_spec: pipeline_json(&[("a", 1), ("b", 1)], &[("a", "b")]),
                run_spec: run_spec_json("p1", &[]),
            },
        )
        .expect("create run");
    assert!(created);
    run
}

/// Stores the plan for the seeded run.
fn seed_plan(store: &InMemoryStore, run: &Run) {
    let spec: PipelineSpec =
        serde_json::from_value(run.pipeline_spec.clone()).expect("pipeline document");
    let plan = build_plan(run.project_id.clone(), run.id.clone(), &spec, base_time())
        .expect("plan");
    store.put_plan(&plan).expect("store plan");
}

/// Lists transition audit events for the run.
fn transition_events(store: &InMemoryStore) -> Vec<AuditEvent> {
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
        .collect()
}

#[test]
fn derive_persists_planned_with_one_audit() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let run = seeded_run(&store);
    seed_plan(&store, &run);

    let service = RunService::new(&store, &store, &store, &clock);
    let report = service
        .derive_and_persist_with_audit(
            &audit_info("req-1"),
            &run.project_id,
            &run.id,
            &run.spec_hash,
        )
        .expect("transition");

    assert_eq!(report.previous, RunState::Created);
    assert_eq!(report.next, RunState::Planned);
    assert!(report.changed);

    let events = transition_events(&store);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, "run.planned");
    assert_eq!(
        events[0].payload["idempotency_key"].as_str(),
        Some("p1:r1:created:planned")
    );
    assert!(events[0].verify_integrity().expect("integrity"));
}

#[test]
fn reapplying_the_same_state_is_a_silent_no_op() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let run = seeded_run(&store);
    seed_plan(&store, &run);

    let service = RunService::new(&store, &store, &store, &clock);
    let first = service
        .derive_and_persist_with_audit(
            &audit_info("req-1"),
            &run.project_id,
            &run.id,
            &run.spec_hash,
        )
        .expect("first transition");
    assert!(first.changed);

    let second = service
        .derive_and_persist_with_audit(
            &audit_info("req-2"),
            &run.project_id,
            &run.id,
            &run.spec_hash,
        )
        .expect("second derivation");
    assert!(!second.changed, "same state must be a no-op");
    assert_eq!(transition_events(&store).len(), 1, "no-op emits no audit");
}

#[test]
fn mark_dry_run_running_requires_a_plan() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let run = seeded_run(&store);

    let service = RunService::new(&store, &store, &store, &clock);
    let err = service
        .mark_dry_run_running_with_audit(
            &audit_info("req-1"),
            &run.project_id,
            &run.id,
            &run.spec_hash,
        )
        .expect_err("plan guard");
    assert!(matches!(err, ServiceError::PlanMissing));
    assert!(transition_events(&store).is_empty(), "rejected transition emits no audit");
}

#[test]
fn full_lifecycle_emits_three_transition_audits() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let run = seeded_run(&store);
    seed_plan(&store, &run);

    let service = RunService::new(&store, &store, &store, &clock);
    let info = audit_info("req-1");

    service
        .derive_and_persist_with_audit(&info, &run.project_id, &run.id, &run.spec_hash)
        .expect("to planned");
    service
        .mark_dry_run_running_with_audit(&info, &run.project_id, &run.id, &run.spec_hash)
        .expect("to running");

    let decider = ScriptedOutcomeDecider::new(0.1);
    let plan = store.get_plan(&run.project_id, &run.id).expect("plan").expect("plan exists");
    let executor = DryRunExecutor::new(&store, &decider, &clock);
    executor
        .execute(
            &DryRunInput {
                project_id: run.project_id.clone(),
                run_id: run.id.clone(),
                spec_hash: run.spec_hash.clone(),
            },
            &plan,
        )
        .expect("dry run");

    let report = service
        .derive_and_persist_with_audit(&info, &run.project_id, &run.id, &run.spec_hash)
        .expect("to succeeded");
    assert_eq!(report.next, RunState::DryrunSucceeded);

    let events = transition_events(&store);
    let actions: Vec<&str> = events.iter().map(|event| event.action.as_str()).collect();
    assert_eq!(actions, vec!["run.planned", "dry_run.started", "dry_run.completed"]);
}

#[test]
fn replayed_transition_audit_deduplicates() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let run = seeded_run(&store);
    seed_plan(&store, &run);

    let service = RunService::new(&store, &store, &store, &clock);
    let info = audit_info("req-1");
    service
        .derive_and_persist_with_audit(&info, &run.project_id, &run.id, &run.spec_hash)
        .expect("to planned");

    // Replaying the same transition event through the ledger must not
    // produce a second row.
    let replay = datapilot_core::runtime::build_transition_audit(
        &info,
        &run.project_id,
        &run.id,
        &run.spec_hash,
        RunState::Created,
        RunState::Planned,
        base_time(),
    )
    .expect("replay event");
    store.append_audit(replay).expect("replay append");

    let keyed: Vec<AuditEvent> = transition_events(&store)
        .into_iter()
        .filter(|event| {
            event.payload["idempotency_key"].as_str() == Some("p1:r1:created:planned")
        })
        .collect();
    assert_eq!(keyed.len(), 1, "at most one audit per transition idempotency key");
}

#[test]
fn unknown_run_reports_not_found() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let service = RunService::new(&store, &store, &store, &clock);
    let err = service
        .derive_and_persist_with_audit(
            &audit_info("req-1"),
            &ProjectId::new("p1"),
            &RunId::new("ghost"),
            &datapilot_core::HashDigest::from_hex(
                datapilot_core::HashAlgorithm::Sha256,
                "00".repeat(32),
            ),
        )
        .expect_err("missing run");
    assert!(matches!(err, ServiceError::RunNotFound));
}
