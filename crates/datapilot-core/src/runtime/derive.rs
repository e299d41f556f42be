// crates/datapilot-core/src/runtime/derive.rs
// ============================================================================
// Module: DataPilot Run State Deriver
// Description: Pure derivation of run state from plan presence and records.
// Purpose: Keep the authoritative lifecycle state a function of stored facts.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! The deriver is a pure function over (plan presence, step records, expected
//! step names). It groups records per step, takes the outcome attached to the
//! maximum attempt, and applies a fixed rule order. Grouping goes through
//! ordered maps so the result never depends on record iteration order.
//!
//! A skipped step must be justified by an upstream failure along reversed
//! edges; an unjustified skip derives `dryrun_failed`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::core::ExecutionPlan;
use crate::core::RunState;
use crate::core::StepExecutionRecord;
use crate::core::StepName;
use crate::core::StepStatus;

// ============================================================================
// SECTION: Derivation
// ============================================================================

/// Derives the canonical run state.
///
/// Rule order:
/// 1. No plan ⇒ `created`.
/// 2. Plan, no records ⇒ `planned`.
/// 3. Any expected step failed ⇒ `dryrun_failed`.
/// 4. Any expected step without a terminal outcome ⇒ `dryrun_running`.
/// 5. Any skipped step without a failed ancestor ⇒ `dryrun_failed`.
/// 6. Otherwise ⇒ `dryrun_succeeded`.
#[must_use]
pub fn derive_run_state(
    plan: Option<&ExecutionPlan>,
    records: &[StepExecutionRecord],
    expected_steps: &[StepName],
) -> RunState {
    let Some(plan) = plan else {
        return RunState::Created;
    };
    if records.is_empty() {
        return RunState::Planned;
    }

    let outcomes = terminal_outcomes(records);

    if expected_steps
        .iter()
        .any(|step| outcomes.get(step).copied().flatten() == Some(StepStatus::Failed))
    {
        return RunState::DryrunFailed;
    }

    if expected_steps.iter().any(|step| outcomes.get(step).copied().flatten().is_none()) {
        return RunState::DryrunRunning;
    }

    let skipped: Vec<&StepName> = expected_steps
        .iter()
        .filter(|step| outcomes.get(*step).copied().flatten() == Some(StepStatus::Skipped))
        .collect();
    if !skipped.is_empty() {
        let ancestors_of = reverse_reachability(plan);
        for step in skipped {
            let justified = ancestors_of.get(step).is_some_and(|ancestors| {
                ancestors.iter().any(|ancestor| {
                    outcomes.get(ancestor).copied().flatten() == Some(StepStatus::Failed)
                })
            });
            if !justified {
                return RunState::DryrunFailed;
            }
        }
    }

    RunState::DryrunSucceeded
}

// ============================================================================
// SECTION: Grouping Helpers
// ============================================================================

/// Groups records per step and keeps the outcome at the maximum attempt.
///
/// `Retried` (and any unknown non-terminal outcome) maps to `None`.
fn terminal_outcomes(
    records: &[StepExecutionRecord],
) -> BTreeMap<StepName, Option<StepStatus>> {
    let mut max_attempts: BTreeMap<StepName, u32> = BTreeMap::new();
    let mut outcomes: BTreeMap<StepName, Option<StepStatus>> = BTreeMap::new();
    for record in records {
        let best = max_attempts.entry(record.step_name.clone()).or_insert(0);
        if record.attempt >= *best {
            *best = record.attempt;
            outcomes.insert(
                record.step_name.clone(),
                record.status.is_terminal().then_some(record.status),
            );
        }
    }
    outcomes
}

/// Computes transitive ancestors per step along reversed plan edges.
fn reverse_reachability(plan: &ExecutionPlan) -> BTreeMap<StepName, BTreeSet<StepName>> {
    let mut parents: BTreeMap<&StepName, Vec<&StepName>> = BTreeMap::new();
    for edge in &plan.edges {
        parents.entry(&edge.to).or_default().push(&edge.from);
    }

    let mut ancestors_of: BTreeMap<StepName, BTreeSet<StepName>> = BTreeMap::new();
    for step in &plan.steps {
        let mut ancestors: BTreeSet<StepName> = BTreeSet::new();
        let mut frontier: Vec<&StepName> = parents.get(&step.name).cloned().unwrap_or_default();
        while let Some(parent) = frontier.pop() {
            if ancestors.insert(parent.clone())
                && let Some(next) = parents.get(parent)
            {
                frontier.extend(next.iter().copied());
            }
        }
        ancestors_of.insert(step.name.clone(), ancestors);
    }
    ancestors_of
}
