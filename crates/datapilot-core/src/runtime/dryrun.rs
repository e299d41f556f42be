// crates/datapilot-core/src/runtime/dryrun.rs
// ============================================================================
// Module: DataPilot Dry-Run Executor
// Description: Seeded deterministic simulation with per-attempt records.
// Purpose: Produce the append-only attempt trail a run's state derives from.
// Dependencies: crate::{core, interfaces}, serde_json, sha2
// ============================================================================

//! ## Overview
//! The dry-run executor simulates execution without invoking user code. Every
//! (step, attempt) outcome is a deterministic scalar seeded by the run
//! contract hash, so two dry-runs of the same run produce byte-identical
//! attempt sequences. Records insert through the unique
//! `(run, step, attempt)` key; an existing row is authoritative, which makes
//! reentry idempotent and concurrent dry-runs safe.
//!
//! All records share one `now()` base from the injected clock; `started_at`
//! advances by one millisecond per inserted record and `finished_at` equals
//! `started_at`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::BackoffType;
use crate::core::Clock;
use crate::core::ExecutionPlan;
use crate::core::HashDigest;
use crate::core::ProjectId;
use crate::core::RetryPolicy;
use crate::core::RunId;
use crate::core::StepExecutionRecord;
use crate::core::StepName;
use crate::core::StepStatus;
use crate::interfaces::RepositoryError;
use crate::interfaces::StepExecutionRepository;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Score threshold below which a simulated attempt succeeds.
pub const SUCCESS_THRESHOLD: f64 = 0.8;

/// Error code recorded on retried attempts.
pub const DRY_RUN_RETRY: &str = "dry_run_retry";

/// Error code recorded on exhausted attempts.
pub const DRY_RUN_FAILED: &str = "dry_run_failed";

/// Error code recorded on skipped steps.
pub const DEPENDENCY_FAILED: &str = "dependency_failed";

// ============================================================================
// SECTION: Outcome Decider
// ============================================================================

/// Deterministic outcome source for simulated attempts.
pub trait OutcomeDecider: Send + Sync {
    /// Returns the outcome scalar in `[0, 1)` for one (step, attempt).
    fn score(
        &self,
        spec_hash: &HashDigest,
        run_id: &RunId,
        step_name: &StepName,
        attempt: u32,
    ) -> f64;
}

/// Default decider seeded by the run contract hash.
///
/// `score = u64::from_be_bytes(SHA256("{spec_hash}:{run_id}:{step}:{attempt}")[0..8]) / 2^64`
#[derive(Debug, Clone, Copy, Default)]
pub struct SeededOutcomeDecider;

impl OutcomeDecider for SeededOutcomeDecider {
    fn score(
        &self,
        spec_hash: &HashDigest,
        run_id: &RunId,
        step_name: &StepName,
        attempt: u32,
    ) -> f64 {
        let seed = format!("{}:{}:{}:{}", spec_hash.value, run_id, step_name, attempt);
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[.. 8]);
        #[allow(clippy::cast_precision_loss, reason = "Scalar only gates a threshold compare.")]
        let scaled = u64::from_be_bytes(prefix) as f64 / (u64::MAX as f64 + 1.0);
        scaled
    }
}

/// Scripted decider for tests: explicit scores per (step, attempt).
#[derive(Debug, Clone, Default)]
pub struct ScriptedOutcomeDecider {
    /// Explicit scores keyed by (step name, attempt).
    scores: BTreeMap<(String, u32), f64>,
    /// Score returned when no explicit entry exists.
    default_score: f64,
}

impl ScriptedOutcomeDecider {
    /// Creates a scripted decider with a default score for unlisted attempts.
    #[must_use]
    pub fn new(default_score: f64) -> Self {
        Self {
            scores: BTreeMap::new(),
            default_score,
        }
    }

    /// Pins the score for one (step, attempt).
    #[must_use]
    pub fn with_score(mut self, step_name: &str, attempt: u32, score: f64) -> Self {
        self.scores.insert((step_name.to_string(), attempt), score);
        self
    }
}

impl OutcomeDecider for ScriptedOutcomeDecider {
    fn score(
        &self,
        _spec_hash: &HashDigest,
        _run_id: &RunId,
        step_name: &StepName,
        attempt: u32,
    ) -> f64 {
        self.scores
            .get(&(step_name.as_str().to_string(), attempt))
            .copied()
            .unwrap_or(self.default_score)
    }
}

// ============================================================================
// SECTION: Backoff
// ============================================================================

/// Computes the whole-second backoff before the next attempt.
///
/// Fixed backoff is `initialSeconds` capped by `maxSeconds` when the cap is
/// positive. Exponential backoff is
/// `initialSeconds × multiplier^(attempt-1)` capped by `maxSeconds`. Results
/// are integer seconds and never negative.
#[must_use]
pub fn backoff_seconds(policy: &RetryPolicy, attempt: u32) -> i64 {
    let backoff = &policy.backoff;
    let initial = backoff.initial_seconds.max(0);
    match backoff.backoff_type {
        BackoffType::Fixed => {
            if backoff.max_seconds > 0 {
                initial.min(backoff.max_seconds)
            } else {
                initial
            }
        }
        BackoffType::Exponential => {
            let exponent = attempt.saturating_sub(1);
            #[allow(
                clippy::cast_precision_loss,
                clippy::cast_possible_truncation,
                reason = "Backoff values are small whole seconds."
            )]
            let grown = (initial as f64 * backoff.multiplier.powi(exponent.cast_signed())) as i64;
            grown.clamp(0, backoff.max_seconds.max(0))
        }
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Dry-run inputs.
#[derive(Debug, Clone)]
pub struct DryRunInput {
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Run identifier.
    pub run_id: RunId,
    /// Run contract hash seeding every outcome.
    pub spec_hash: HashDigest,
}

/// Dry-run result.
#[derive(Debug, Clone)]
pub struct DryRunOutcome {
    /// True when every step was already terminal and nothing was inserted.
    pub existing: bool,
    /// Records inserted by this invocation, in insertion order.
    pub inserted: Vec<StepExecutionRecord>,
}

/// Dry-run executor errors.
#[derive(Debug, Error)]
pub enum DryRunError {
    /// Repository failure while loading or inserting records.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Per-step aggregate over existing records.
#[derive(Debug, Clone, Copy, Default)]
struct StepAggregate {
    /// Highest attempt number observed.
    max_attempt: u32,
    /// Terminal status, when one exists.
    terminal: Option<StepStatus>,
}

/// Deterministic dry-run executor over a step-execution repository.
pub struct DryRunExecutor<'a, S, D, C> {
    /// Step execution repository.
    steps: &'a S,
    /// Outcome decider.
    decider: &'a D,
    /// Injected clock supplying the single timestamp base.
    clock: &'a C,
}

impl<'a, S, D, C> DryRunExecutor<'a, S, D, C>
where
    S: StepExecutionRepository,
    D: OutcomeDecider,
    C: Clock,
{
    /// Creates a new executor.
    #[must_use]
    pub const fn new(steps: &'a S, decider: &'a D, clock: &'a C) -> Self {
        Self {
            steps,
            decider,
            clock,
        }
    }

    /// Runs the simulation for one plan.
    ///
    /// Re-entry over a fully terminal run inserts nothing and reports
    /// `existing = true`; an interrupted dry-run resumes from the recorded
    /// attempts.
    ///
    /// # Errors
    ///
    /// Returns [`DryRunError`] when the repository fails.
    pub fn execute(
        &self,
        input: &DryRunInput,
        plan: &ExecutionPlan,
    ) -> Result<DryRunOutcome, DryRunError> {
        let existing = self.steps.list_for_run(&input.project_id, &input.run_id)?;
        let mut aggregates = aggregate_records(&existing);

        let all_terminal = !plan.steps.is_empty()
            && plan.steps.iter().all(|step| {
                aggregates.get(&step.name).is_some_and(|agg| agg.terminal.is_some())
            });
        if all_terminal {
            return Ok(DryRunOutcome {
                existing: true,
                inserted: Vec::new(),
            });
        }

        let dependencies = reverse_dependencies(plan);
        let base = self.clock.now();
        let mut sequence: i64 = 0;
        let mut inserted = Vec::new();

        for step in &plan.steps {
            if aggregates.get(&step.name).is_some_and(|agg| agg.terminal.is_some()) {
                continue;
            }

            let failed_upstream = dependencies.get(&step.name).is_some_and(|upstream| {
                upstream.iter().any(|dep| {
                    aggregates
                        .get(dep)
                        .and_then(|agg| agg.terminal)
                        .is_none_or(|status| status != StepStatus::Succeeded)
                })
            });
            if failed_upstream {
                let attempt =
                    aggregates.get(&step.name).map_or(1, |agg| agg.max_attempt + 1).max(1);
                let record = self.build_record(
                    input,
                    step,
                    attempt,
                    StepStatus::Skipped,
                    Some(DEPENDENCY_FAILED),
                    json!({ "dry_run": true, "reason": DEPENDENCY_FAILED }),
                    base.plus_millis(sequence),
                );
                let (stored, created) = self.steps.insert_attempt(&record)?;
                if created {
                    sequence += 1;
                    inserted.push(stored.clone());
                }
                aggregates.insert(
                    step.name.clone(),
                    StepAggregate {
                        max_attempt: stored.attempt,
                        terminal: stored.status.is_terminal().then_some(stored.status),
                    },
                );
                continue;
            }

            let start = aggregates.get(&step.name).map_or(1, |agg| agg.max_attempt + 1).max(1);
            let max_attempts = step.retry_policy.max_attempts.max(1);
            let mut terminal: Option<StepStatus> = None;
            let mut last_attempt = start;

            for attempt in start ..= max_attempts {
                last_attempt = attempt;
                let score =
                    self.decider.score(&input.spec_hash, &input.run_id, &step.name, attempt);
                let (status, error_code, payload) = if score < SUCCESS_THRESHOLD {
                    (
                        StepStatus::Succeeded,
                        None,
                        json!({ "dry_run": true, "attempt": attempt, "score": score }),
                    )
                } else if attempt < max_attempts {
                    (
                        StepStatus::Retried,
                        Some(DRY_RUN_RETRY),
                        json!({
                            "dry_run": true,
                            "attempt": attempt,
                            "score": score,
                            "backoff_seconds": backoff_seconds(&step.retry_policy, attempt),
                        }),
                    )
                } else {
                    (
                        StepStatus::Failed,
                        Some(DRY_RUN_FAILED),
                        json!({ "dry_run": true, "attempt": attempt, "score": score }),
                    )
                };

                let record = self.build_record(
                    input,
                    step,
                    attempt,
                    status,
                    error_code,
                    payload,
                    base.plus_millis(sequence),
                );
                let (stored, created) = self.steps.insert_attempt(&record)?;
                if created {
                    sequence += 1;
                    inserted.push(stored.clone());
                }
                if stored.status.is_terminal() {
                    terminal = Some(stored.status);
                    break;
                }
            }

            aggregates.insert(
                step.name.clone(),
                StepAggregate {
                    max_attempt: last_attempt,
                    terminal,
                },
            );
        }

        Ok(DryRunOutcome {
            existing: false,
            inserted,
        })
    }

    /// Builds one attempt record with shared-base timestamps.
    #[allow(clippy::too_many_arguments, reason = "Record fields mirror the attempt shape.")]
    fn build_record(
        &self,
        input: &DryRunInput,
        step: &crate::core::PlanStep,
        attempt: u32,
        status: StepStatus,
        error_code: Option<&str>,
        payload: serde_json::Value,
        started_at: crate::core::Timestamp,
    ) -> StepExecutionRecord {
        StepExecutionRecord {
            project_id: input.project_id.clone(),
            run_id: input.run_id.clone(),
            step_name: step.name.clone(),
            attempt,
            status,
            started_at,
            finished_at: started_at,
            error_code: error_code.map(ToString::to_string),
            error_message: error_code.map(|code| format!("dry run simulated outcome: {code}")),
            result: payload,
            spec_hash: input.spec_hash.clone(),
        }
    }
}

// ============================================================================
// SECTION: Aggregation Helpers
// ============================================================================

/// Groups records per step into `(max_attempt, terminal_status)`.
fn aggregate_records(records: &[StepExecutionRecord]) -> BTreeMap<StepName, StepAggregate> {
    let mut aggregates: BTreeMap<StepName, StepAggregate> = BTreeMap::new();
    for record in records {
        let entry = aggregates.entry(record.step_name.clone()).or_default();
        if record.attempt >= entry.max_attempt {
            entry.max_attempt = record.attempt;
            entry.terminal = record.status.is_terminal().then_some(record.status);
        }
    }
    aggregates
}

/// Builds the reverse dependency map: step → upstream steps it depends on.
fn reverse_dependencies(plan: &ExecutionPlan) -> BTreeMap<StepName, Vec<StepName>> {
    let mut dependencies: BTreeMap<StepName, Vec<StepName>> = BTreeMap::new();
    for edge in &plan.edges {
        dependencies.entry(edge.to.clone()).or_default().push(edge.from.clone());
    }
    dependencies
}
