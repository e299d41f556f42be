// crates/datapilot-core/src/runtime/plan.rs
// ============================================================================
// Module: DataPilot Plan Builder
// Description: Deterministic topological ordering of pipeline steps.
// Purpose: Derive the execution plan the dry-run executor replays against.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The plan builder runs Kahn's algorithm with a lexicographic tie-break: the
//! ready set is kept sorted ascending by step name and the smallest name is
//! emitted first. Two valid topological orders are not interchangeable here;
//! the byte-identical canonical serialization of the plan is part of the
//! public contract the dry-run executor depends on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::ExecutionPlan;
use crate::core::PipelineSpec;
use crate::core::PlanEdge;
use crate::core::PlanStep;
use crate::core::ProjectId;
use crate::core::RunId;
use crate::core::StepName;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plan construction errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum PlanError {
    /// The dependency graph contains a cycle.
    #[error("cycle_detected: fewer steps emitted than declared")]
    CycleDetected,
    /// The pipeline body or steps are missing (spec not validated).
    #[error("pipeline spec has no steps")]
    MissingSteps,
    /// A step is missing its name or retry policy (spec not validated).
    #[error("step is incomplete: {0}")]
    IncompleteStep(String),
}

// ============================================================================
// SECTION: Plan Builder
// ============================================================================

/// Builds the deterministic execution plan for a validated pipeline spec.
///
/// # Errors
///
/// Returns [`PlanError::CycleDetected`] when the edge set admits no full
/// topological order, and [`PlanError::MissingSteps`] /
/// [`PlanError::IncompleteStep`] when the spec was not validated first.
pub fn build_plan(
    project_id: ProjectId,
    run_id: RunId,
    spec: &PipelineSpec,
    created_at: Timestamp,
) -> Result<ExecutionPlan, PlanError> {
    let body = spec.spec.as_ref().ok_or(PlanError::MissingSteps)?;
    let steps = body.steps.as_deref().filter(|steps| !steps.is_empty()).ok_or(PlanError::MissingSteps)?;
    let dependencies = body.dependencies.as_deref().unwrap_or_default();

    let mut policies: BTreeMap<&str, &crate::core::RetryPolicy> = BTreeMap::new();
    for step in steps {
        let name = step.name.as_deref().filter(|name| !name.is_empty()).ok_or_else(|| {
            PlanError::IncompleteStep("step without a name".to_string())
        })?;
        let policy = step
            .retry_policy
            .as_ref()
            .ok_or_else(|| PlanError::IncompleteStep(format!("step {name} has no retryPolicy")))?;
        policies.insert(name, policy);
    }

    let mut indegree: BTreeMap<&str, usize> = policies.keys().map(|name| (*name, 0)).collect();
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for edge in dependencies {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        if let Some(count) = indegree.get_mut(edge.to.as_str()) {
            *count += 1;
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter_map(|(name, count)| (*count == 0).then_some(*name))
        .collect();

    let mut ordered: Vec<PlanStep> = Vec::with_capacity(policies.len());
    while let Some(name) = ready.pop_first() {
        if let Some(policy) = policies.get(name) {
            ordered.push(PlanStep {
                name: StepName::new(name),
                retry_policy: (*policy).clone(),
                attempt_start: 1,
            });
        }
        if let Some(next) = adjacency.get(name) {
            for target in next {
                if let Some(count) = indegree.get_mut(target) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        ready.insert(target);
                    }
                }
            }
        }
    }

    if ordered.len() != policies.len() {
        return Err(PlanError::CycleDetected);
    }

    let edges = dependencies
        .iter()
        .map(|edge| PlanEdge {
            from: StepName::new(edge.from.as_str()),
            to: StepName::new(edge.to.as_str()),
        })
        .collect();

    Ok(ExecutionPlan {
        run_id,
        project_id,
        steps: ordered,
        edges,
        created_at,
    })
}
