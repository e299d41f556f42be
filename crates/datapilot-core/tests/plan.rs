// crates/datapilot-core/tests/plan.rs
// ============================================================================
// Module: Plan Builder Tests
// Description: Deterministic topological ordering and cycle reporting.
// ============================================================================
//! ## Overview
//! Asserts the lexicographic tie-break, byte-identical canonical
//! serialization for equal inputs, verbatim edge copies, and cycle failure.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

mod common;

use common::base_time;
use common::pipeline_json;
use datapilot_core::PipelineSpec;
use datapilot_core::PlanError;
use datapilot_core::ProjectId;
use datapilot_core::RunId;
use datapilot_core::build_plan;
use datapilot_core::core::hashing::canonical_json_bytes;

/// Builds a plan from a pipeline document.
fn plan_for(steps: &[(&str, u32)], edges: &[(&str, &str)]) -> Result<Vec<String>, PlanError> {
    let spec: PipelineSpec =
        serde_json::from_value(pipeline_json(steps, edges)).expect("pipeline document");
    let plan = build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time())?;
    Ok(plan.steps.iter().map(|step| step.name.to_string()).collect())
}

#[test]
fn single_step_with_empty_dependencies_plans() {
    let order = plan_for(&[("only", 1)], &[]).expect("plan");
    assert_eq!(order, vec!["only"]);
}

#[test]
fn ready_set_ties_break_lexicographically() {
    // All three are ready at once; emission must be name order.
    let order = plan_for(&[("zeta", 1), ("alpha", 1), ("mid", 1)], &[]).expect("plan");
    assert_eq!(order, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn dependencies_override_name_order() {
    let order =
        plan_for(&[("a", 1), ("b", 1), ("z", 1)], &[("z", "a"), ("a", "b")]).expect("plan");
    assert_eq!(order, vec!["z", "a", "b"]);
}

#[test]
fn diamond_orders_deterministically() {
    let order = plan_for(
        &[("d", 1), ("b", 1), ("c", 1), ("a", 1)],
        &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
    )
    .expect("plan");
    assert_eq!(order, vec!["a", "b", "c", "d"]);
}

#[test]
fn cycle_is_reported() {
    let err = plan_for(&[("a", 1), ("b", 1)], &[("a", "b"), ("b", "a")]).expect_err("cycle");
    assert!(matches!(err, PlanError::CycleDetected));
}

#[test]
fn equal_inputs_serialize_byte_identically() {
    let spec: PipelineSpec = serde_json::from_value(pipeline_json(
        &[("b", 2), ("a", 1)],
        &[("a", "b")],
    ))
    .expect("pipeline document");

    let plan_one =
        build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time()).expect("plan one");
    let plan_two =
        build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time()).expect("plan two");

    let bytes_one = canonical_json_bytes(&plan_one).expect("bytes one");
    let bytes_two = canonical_json_bytes(&plan_two).expect("bytes two");
    assert_eq!(bytes_one, bytes_two, "plan serialization is part of the public contract");
}

#[test]
fn edges_are_copied_verbatim_and_attempts_start_at_one() {
    let spec: PipelineSpec = serde_json::from_value(pipeline_json(
        &[("a", 3), ("b", 2)],
        &[("a", "b")],
    ))
    .expect("pipeline document");
    let plan =
        build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time()).expect("plan");

    assert_eq!(plan.edges.len(), 1);
    assert_eq!(plan.edges[0].from.as_str(), "a");
    assert_eq!(plan.edges[0].to.as_str(), "b");
    assert!(plan.steps.iter().all(|step| step.attempt_start == 1));
}

#[test]
fn plan_round_trips_through_serde() {
    let spec: PipelineSpec =
        serde_json::from_value(pipeline_json(&[("a", 1), ("b", 1)], &[("a", "b")]))
            .expect("pipeline document");
    let plan =
        build_plan(ProjectId::new("p1"), RunId::new("r1"), &spec, base_time()).expect("plan");

    let encoded = serde_json::to_string(&plan).expect("encode");
    let decoded: datapilot_core::ExecutionPlan = serde_json::from_str(&encoded).expect("decode");
    assert_eq!(decoded, plan, "Unmarshal(Marshal(plan)) must equal plan");
}
