// crates/datapilot-core/tests/derive.rs
// ============================================================================
// Module: Run State Deriver Tests
// Description: Rule ordering and record-order independence.
// ============================================================================
//! ## Overview
//! Covers every deriver rule, the skip-justification invariant, and
//! permutation independence of the record list (property-based).

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

mod common;

use common::base_time;
use common::pipeline_json;
use datapilot_core::ExecutionPlan;
use datapilot_core::HashAlgorithm;
use datapilot_core::HashDigest;
use datapilot_core::PipelineSpec;
use datapilot_core::ProjectId;
use datapilot_core::RunId;
use datapilot_core::RunState;
use datapilot_core::StepExecutionRecord;
use datapilot_core::StepName;
use datapilot_core::StepStatus;
use datapilot_core::build_plan;
use datapilot_core::derive_run_state;
use proptest::prelude::Just;
use proptest::prelude::Strategy;
use proptest::proptest;
use serde_json::json;

/// Builds a plan fixture.
fn plan(steps: &[(&str, u32)], edges: &[(&str, &str)]) -> ExecutionPlan {
    let spec: PipelineSpec =
        serde_json::from_value(pipeline_json(steps, edges)).expect("pipeline document");
    build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time()).expect("plan")
}

/// Builds one record fixture.
fn record(step: &str, attempt: u32, status: StepStatus) -> StepExecutionRecord {
    StepExecutionRecord {
        project_id: ProjectId::new("p1"),
        run_id: RunId::new("r1"),
        step_name: StepName::new(step),
        attempt,
        status,
        started_at: base_time(),
        finished_at: base_time(),
        error_code: None,
        error_message: None,
        result: json!({"dry_run": true}),
        spec_hash: HashDigest::from_hex(HashAlgorithm::Sha256, "ab".repeat(32)),
    }
}

/// Step names of a plan.
fn names(plan: &ExecutionPlan) -> Vec<StepName> {
    plan.step_names()
}

#[test]
fn no_plan_derives_created() {
    assert_eq!(derive_run_state(None, &[], &[]), RunState::Created);
}

#[test]
fn plan_without_records_derives_planned() {
    let plan = plan(&[("a", 1)], &[]);
    assert_eq!(derive_run_state(Some(&plan), &[], &names(&plan)), RunState::Planned);
}

#[test]
fn failed_step_derives_dryrun_failed() {
    let plan = plan(&[("a", 1), ("b", 1)], &[]);
    let records =
        vec![record("a", 1, StepStatus::Failed), record("b", 1, StepStatus::Succeeded)];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunFailed);
}

#[test]
fn missing_terminal_outcome_derives_running() {
    let plan = plan(&[("a", 3), ("b", 1)], &[]);
    let records = vec![record("a", 1, StepStatus::Retried)];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunRunning);
}

#[test]
fn retried_then_succeeded_uses_maximum_attempt() {
    let plan = plan(&[("a", 3)], &[]);
    let records = vec![
        record("a", 1, StepStatus::Retried),
        record("a", 2, StepStatus::Retried),
        record("a", 3, StepStatus::Succeeded),
    ];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunSucceeded);
}

#[test]
fn all_succeeded_derives_dryrun_succeeded() {
    let plan = plan(&[("a", 1), ("b", 1)], &[("a", "b")]);
    let records =
        vec![record("a", 1, StepStatus::Succeeded), record("b", 1, StepStatus::Succeeded)];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunSucceeded);
}

#[test]
fn justified_skip_derives_failed_from_upstream_failure() {
    let plan = plan(&[("a", 1), ("b", 1)], &[("a", "b")]);
    let records = vec![record("a", 1, StepStatus::Failed), record("b", 1, StepStatus::Skipped)];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunFailed);
}

#[test]
fn unjustified_skip_derives_failed() {
    // No ancestor failed; the skip itself violates the invariant.
    let plan = plan(&[("a", 1), ("b", 1)], &[("a", "b")]);
    let records =
        vec![record("a", 1, StepStatus::Succeeded), record("b", 1, StepStatus::Skipped)];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunFailed);
}

#[test]
fn transitive_skip_justification_is_accepted() {
    // a failed, b skipped, c skipped: c's failed ancestor is transitive.
    let plan = plan(&[("a", 1), ("b", 1), ("c", 1)], &[("a", "b"), ("b", "c")]);
    let records = vec![
        record("a", 1, StepStatus::Failed),
        record("b", 1, StepStatus::Skipped),
        record("c", 1, StepStatus::Skipped),
    ];
    assert_eq!(derive_run_state(Some(&plan), &records, &names(&plan)), RunState::DryrunFailed);
}

// ============================================================================
// SECTION: Order Independence
// ============================================================================

/// Mixed-outcome record fixture for permutation tests.
fn mixed_records() -> Vec<StepExecutionRecord> {
    vec![
        record("a", 1, StepStatus::Retried),
        record("a", 2, StepStatus::Succeeded),
        record("b", 1, StepStatus::Failed),
        record("c", 1, StepStatus::Skipped),
    ]
}

proptest! {
    #[test]
    fn derive_is_independent_of_record_order(
        shuffled in Just(mixed_records()).prop_shuffle()
    ) {
        let plan = plan(
            &[("a", 3), ("b", 1), ("c", 1)],
            &[("a", "b"), ("b", "c")],
        );
        let expected = derive_run_state(Some(&plan), &mixed_records(), &names(&plan));
        let actual = derive_run_state(Some(&plan), &shuffled, &names(&plan));
        assert_eq!(actual, expected);
    }
}
