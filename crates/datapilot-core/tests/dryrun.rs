// crates/datapilot-core/tests/dryrun.rs
// ============================================================================
// Module: Dry-Run Executor Tests
// Description: Seeded simulation, retry exhaustion, skips, and idempotency.
// ============================================================================
//! ## Overview
//! Exercises the deterministic outcome seed, the retry/backoff loop, the
//! dependency-failed skip propagation, shared-base timestamps, and idempotent
//! reentry over a completed run.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    reason = "Test-only assertions are permitted."
)]

mod common;

use common::base_time;
use common::pipeline_json;
use datapilot_core::BackoffSpec;
use datapilot_core::BackoffType;
use datapilot_core::DryRunExecutor;
use datapilot_core::DryRunInput;
use datapilot_core::ExecutionPlan;
use datapilot_core::FixedClock;
use datapilot_core::HashAlgorithm;
use datapilot_core::HashDigest;
use datapilot_core::InMemoryStore;
use datapilot_core::OutcomeDecider;
use datapilot_core::PipelineSpec;
use datapilot_core::ProjectId;
use datapilot_core::RetryPolicy;
use datapilot_core::RunId;
use datapilot_core::ScriptedOutcomeDecider;
use datapilot_core::SeededOutcomeDecider;
use datapilot_core::StepExecutionRepository;
use datapilot_core::StepName;
use datapilot_core::StepStatus;
use datapilot_core::build_plan;
use datapilot_core::runtime::backoff_seconds;

/// Fixture spec hash.
fn spec_hash() -> HashDigest {
    HashDigest::from_hex(HashAlgorithm::Sha256, "ab".repeat(32))
}

/// Builds a plan from step/edge shorthand.
fn plan(steps: &[(&str, u32)], edges: &[(&str, &str)]) -> ExecutionPlan {
    let spec: PipelineSpec =
        serde_json::from_value(pipeline_json(steps, edges)).expect("pipeline document");
    build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time()).expect("plan")
}

/// Fixture input.
fn input() -> DryRunInput {
    DryRunInput {
        project_id: ProjectId::new("p1"),
        run_id: RunId::new("r1"),
        spec_hash: spec_hash(),
    }
}

#[test]
fn seeded_scores_are_deterministic_and_in_range() {
    let decider = SeededOutcomeDecider;
    let hash = spec_hash();
    let run = RunId::new("r1");
    let step = StepName::new("a");

    let first = decider.score(&hash, &run, &step, 1);
    let second = decider.score(&hash, &run, &step, 1);
    assert_eq!(first, second, "same seed must give the same score");
    assert!((0.0 .. 1.0).contains(&first));

    let other_attempt = decider.score(&hash, &run, &step, 2);
    assert_ne!(first, other_attempt, "attempt number is part of the seed");
}

#[test]
fn two_dry_runs_produce_identical_record_sequences() {
    let decider = SeededOutcomeDecider;
    let clock = FixedClock::new(base_time());
    let the_plan = plan(&[("a", 3), ("b", 2)], &[("a", "b")]);

    let store_one = InMemoryStore::new();
    let executor = DryRunExecutor::new(&store_one, &decider, &clock);
    let outcome_one = executor.execute(&input(), &the_plan).expect("first dry run");

    let store_two = InMemoryStore::new();
    let executor = DryRunExecutor::new(&store_two, &decider, &clock);
    let outcome_two = executor.execute(&input(), &the_plan).expect("second dry run");

    let sequence_one: Vec<(String, u32, StepStatus)> = outcome_one
        .inserted
        .iter()
        .map(|record| (record.step_name.to_string(), record.attempt, record.status))
        .collect();
    let sequence_two: Vec<(String, u32, StepStatus)> = outcome_two
        .inserted
        .iter()
        .map(|record| (record.step_name.to_string(), record.attempt, record.status))
        .collect();
    assert_eq!(sequence_one, sequence_two, "sequences must be byte-identical");
}

#[test]
fn retry_exhaustion_records_retried_then_succeeded() {
    // Attempts 1 and 2 forced >= 0.8, attempt 3 succeeds.
    let decider = ScriptedOutcomeDecider::new(0.1)
        .with_score("a", 1, 0.9)
        .with_score("a", 2, 0.95);
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 3)], &[]);

    let executor = DryRunExecutor::new(&store, &decider, &clock);
    let outcome = executor.execute(&input(), &the_plan).expect("dry run");

    let statuses: Vec<(u32, StepStatus)> =
        outcome.inserted.iter().map(|record| (record.attempt, record.status)).collect();
    assert_eq!(
        statuses,
        vec![(1, StepStatus::Retried), (2, StepStatus::Retried), (3, StepStatus::Succeeded)]
    );
    let retry = &outcome.inserted[0];
    assert_eq!(retry.error_code.as_deref(), Some("dry_run_retry"));
    assert!(retry.result.get("backoff_seconds").is_some());
}

#[test]
fn exhausted_attempts_record_failed() {
    let decider = ScriptedOutcomeDecider::new(0.9);
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 2)], &[]);

    let executor = DryRunExecutor::new(&store, &decider, &clock);
    let outcome = executor.execute(&input(), &the_plan).expect("dry run");

    let last = outcome.inserted.last().expect("records");
    assert_eq!(last.status, StepStatus::Failed);
    assert_eq!(last.error_code.as_deref(), Some("dry_run_failed"));
}

#[test]
fn dependency_failure_skips_downstream_steps() {
    let decider = ScriptedOutcomeDecider::new(0.1).with_score("a", 1, 0.9);
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 1), ("b", 1)], &[("a", "b")]);

    let executor = DryRunExecutor::new(&store, &decider, &clock);
    let outcome = executor.execute(&input(), &the_plan).expect("dry run");

    assert_eq!(outcome.inserted.len(), 2);
    assert_eq!(outcome.inserted[0].status, StepStatus::Failed);
    assert_eq!(outcome.inserted[1].status, StepStatus::Skipped);
    assert_eq!(outcome.inserted[1].error_code.as_deref(), Some("dependency_failed"));
}

#[test]
fn skip_propagates_through_chains() {
    let decider = ScriptedOutcomeDecider::new(0.1).with_score("a", 1, 0.9);
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 1), ("b", 1), ("c", 1)], &[("a", "b"), ("b", "c")]);

    let executor = DryRunExecutor::new(&store, &decider, &clock);
    let outcome = executor.execute(&input(), &the_plan).expect("dry run");

    let by_step: Vec<(String, StepStatus)> = outcome
        .inserted
        .iter()
        .map(|record| (record.step_name.to_string(), record.status))
        .collect();
    assert_eq!(
        by_step,
        vec![
            ("a".to_string(), StepStatus::Failed),
            ("b".to_string(), StepStatus::Skipped),
            ("c".to_string(), StepStatus::Skipped),
        ]
    );
}

#[test]
fn timestamps_share_one_base_and_advance_per_record() {
    let decider = ScriptedOutcomeDecider::new(0.1);
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 1), ("b", 1)], &[]);

    let executor = DryRunExecutor::new(&store, &decider, &clock);
    let outcome = executor.execute(&input(), &the_plan).expect("dry run");

    assert_eq!(outcome.inserted.len(), 2);
    assert_eq!(outcome.inserted[0].started_at, base_time());
    assert_eq!(outcome.inserted[1].started_at, base_time().plus_millis(1));
    for record in &outcome.inserted {
        assert_eq!(record.started_at, record.finished_at);
    }
}

#[test]
fn second_dry_run_of_complete_run_is_a_no_op() {
    let decider = ScriptedOutcomeDecider::new(0.1);
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 1), ("b", 1)], &[("a", "b")]);

    let executor = DryRunExecutor::new(&store, &decider, &clock);
    let first = executor.execute(&input(), &the_plan).expect("first run");
    assert!(!first.existing);
    assert_eq!(first.inserted.len(), 2);

    let second = executor.execute(&input(), &the_plan).expect("second run");
    assert!(second.existing, "completed run must report existing");
    assert!(second.inserted.is_empty(), "no new inserts on reentry");

    let records = store
        .list_for_run(&ProjectId::new("p1"), &RunId::new("r1"))
        .expect("records");
    assert_eq!(records.len(), 2, "record count must be unchanged");
}

#[test]
fn interrupted_dry_run_resumes_from_recorded_attempts() {
    let clock = FixedClock::new(base_time());
    let store = InMemoryStore::new();
    let the_plan = plan(&[("a", 1), ("b", 1)], &[("a", "b")]);

    // First pass: only step a gets a record (b's insert is simulated as
    // interrupted by running against a single-step plan).
    let partial_plan = plan(&[("a", 1)], &[]);
    let decider = ScriptedOutcomeDecider::new(0.1);
    let executor = DryRunExecutor::new(&store, &decider, &clock);
    executor.execute(&input(), &partial_plan).expect("partial run");

    let resumed = executor.execute(&input(), &the_plan).expect("resumed run");
    assert!(!resumed.existing);
    assert_eq!(resumed.inserted.len(), 1, "only the missing step is simulated");
    assert_eq!(resumed.inserted[0].step_name.as_str(), "b");
}

// ============================================================================
// SECTION: Backoff
// ============================================================================

/// Builds a retry policy fixture.
fn policy(backoff_type: BackoffType, initial: i64, max: i64, multiplier: f64) -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        backoff: BackoffSpec {
            backoff_type,
            initial_seconds: initial,
            max_seconds: max,
            multiplier,
        },
    }
}

#[test]
fn fixed_backoff_caps_at_max_when_positive() {
    let capped = policy(BackoffType::Fixed, 30, 10, 1.0);
    assert_eq!(backoff_seconds(&capped, 1), 10);

    let uncapped = policy(BackoffType::Fixed, 30, 0, 1.0);
    assert_eq!(backoff_seconds(&uncapped, 3), 30);
}

#[test]
fn exponential_backoff_grows_and_caps() {
    let growth = policy(BackoffType::Exponential, 2, 100, 3.0);
    assert_eq!(backoff_seconds(&growth, 1), 2);
    assert_eq!(backoff_seconds(&growth, 2), 6);
    assert_eq!(backoff_seconds(&growth, 3), 18);
    assert_eq!(backoff_seconds(&growth, 4), 54);
    assert_eq!(backoff_seconds(&growth, 5), 100, "cap applies");
}

#[test]
fn backoff_never_goes_negative() {
    let negative = policy(BackoffType::Exponential, -5, 100, 2.0);
    assert_eq!(backoff_seconds(&negative, 1), 0);
}
