// crates/datapilot-core/src/core/run.rs
// ============================================================================
// Module: DataPilot Run Model
// Description: Run specs, lifecycle state, execution plans, and step records.
// Purpose: Capture the reproducible execution contract and its derived state.
// Dependencies: crate::core::{hashing, identifiers, pipeline, time}, serde
// ============================================================================

//! ## Overview
//! A run binds a pipeline specification to concrete inputs: dataset-version
//! bindings, a source commit, and a pinned execution environment. The binding
//! core (everything except timestamps and creator) feeds `spec_hash` together
//! with the pipeline document, and that hash seeds every dry-run outcome.
//!
//! Run lifecycle is forward-only:
//! `created → planned → dryrun_running → {dryrun_succeeded | dryrun_failed}`.
//! The two dry-run outcomes are terminal; self-transitions are no-ops.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::HashDigest;
use crate::core::identifiers::IdempotencyKey;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::StepName;
use crate::core::pipeline::RetryPolicy;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Run Specification
// ============================================================================

/// Immutable binding of a pipeline spec to concrete inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpec {
    /// Run-spec document version tag.
    pub run_spec_version: Option<String>,
    /// Owning project identifier.
    pub project_id: Option<String>,
    /// Pipeline `datasetRef` → dataset version id bindings.
    pub dataset_bindings: Option<BTreeMap<String, String>>,
    /// Source code reference.
    pub code_ref: Option<CodeRef>,
    /// Pinned execution environment.
    pub env_lock: Option<EnvLock>,
    /// Creation timestamp (excluded from the binding core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Timestamp>,
    /// Creating actor (excluded from the binding core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl RunSpec {
    /// Returns the binding core hashed into `spec_hash`.
    ///
    /// Timestamps and creator fields are excluded so the same logical binding
    /// always hashes identically.
    #[must_use]
    pub fn binding_core(&self) -> RunSpecBindingCore<'_> {
        RunSpecBindingCore {
            run_spec_version: self.run_spec_version.as_deref(),
            project_id: self.project_id.as_deref(),
            dataset_bindings: self.dataset_bindings.as_ref(),
            code_ref: self.code_ref.as_ref(),
            env_lock: self.env_lock.as_ref(),
        }
    }
}

/// Borrowed binding core serialized canonically for `spec_hash`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSpecBindingCore<'a> {
    /// Run-spec document version tag.
    pub run_spec_version: Option<&'a str>,
    /// Owning project identifier.
    pub project_id: Option<&'a str>,
    /// Dataset bindings.
    pub dataset_bindings: Option<&'a BTreeMap<String, String>>,
    /// Source code reference.
    pub code_ref: Option<&'a CodeRef>,
    /// Pinned execution environment.
    pub env_lock: Option<&'a EnvLock>,
}

/// Source code reference pinned into the run contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeRef {
    /// Repository URL.
    pub repo_url: String,
    /// Commit SHA.
    pub commit_sha: String,
}

/// Pinned execution environment lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvLock {
    /// Image name → digest map.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_digests: Option<BTreeMap<String, String>>,
    /// Optional environment template identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_template_id: Option<String>,
    /// Environment content hash.
    pub env_hash: Option<String>,
}

// ============================================================================
// SECTION: Run State
// ============================================================================

/// Derived run lifecycle state.
///
/// # Invariants
/// - Variants are stable for serialization and transition matching.
/// - `dryrun_succeeded` and `dryrun_failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Run exists without a plan.
    Created,
    /// A plan exists; no step executions yet.
    Planned,
    /// Dry-run in progress.
    DryrunRunning,
    /// Dry-run completed with every step succeeded.
    DryrunSucceeded,
    /// Dry-run completed with a failure or unjustified skip.
    DryrunFailed,
}

impl RunState {
    /// Returns the stable wire label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Planned => "planned",
            Self::DryrunRunning => "dryrun_running",
            Self::DryrunSucceeded => "dryrun_succeeded",
            Self::DryrunFailed => "dryrun_failed",
        }
    }

    /// Returns true when the state accepts no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::DryrunSucceeded | Self::DryrunFailed)
    }

    /// Returns true when the lifecycle table allows `self → next`.
    ///
    /// Same-state transitions are not allowed here; callers treat them as
    /// no-ops before consulting the table.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        match self {
            Self::Created => !matches!(next, Self::Created),
            Self::Planned => {
                matches!(next, Self::DryrunRunning | Self::DryrunSucceeded | Self::DryrunFailed)
            }
            Self::DryrunRunning => matches!(next, Self::DryrunSucceeded | Self::DryrunFailed),
            Self::DryrunSucceeded | Self::DryrunFailed => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Run Record
// ============================================================================

/// Persisted run lifecycle record.
///
/// # Invariants
/// - `(project_id, idempotency_key)` is unique; re-creation with the same
///   `spec_hash` returns the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier.
    pub id: RunId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Idempotency key unique within the project.
    pub idempotency_key: IdempotencyKey,
    /// Current derived lifecycle state.
    pub status: RunState,
    /// Run contract hash (pipeline + binding core).
    pub spec_hash: HashDigest,
    /// Pipeline specification document as submitted.
    pub pipeline_spec: Value,
    /// Run specification document as submitted.
    pub run_spec: Value,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Execution Plan
// ============================================================================

/// Deterministic per-run execution plan.
///
/// # Invariants
/// - `steps` are in deterministic topological order (lexicographic
///   tie-break); equal inputs serialize byte-identically.
/// - One plan exists per run; re-derivation upserts identical content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Owning run identifier.
    pub run_id: RunId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Ordered plan steps.
    pub steps: Vec<PlanStep>,
    /// Dependency edges copied verbatim from the pipeline spec.
    pub edges: Vec<PlanEdge>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

impl ExecutionPlan {
    /// Returns the ordered step names the deriver expects records for.
    #[must_use]
    pub fn step_names(&self) -> Vec<StepName> {
        self.steps.iter().map(|step| step.name.clone()).collect()
    }
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step name.
    pub name: StepName,
    /// Retry policy copied from the pipeline spec.
    pub retry_policy: RetryPolicy,
    /// First attempt number (always 1).
    pub attempt_start: u32,
}

/// Directed edge of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEdge {
    /// Upstream step name.
    pub from: StepName,
    /// Downstream step name.
    pub to: StepName,
}

// ============================================================================
// SECTION: Step Execution Records
// ============================================================================

/// Outcome recorded for one step attempt.
///
/// # Invariants
/// - Variants are stable for serialization and derivation matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Attempt succeeded; the step is terminal.
    Succeeded,
    /// Final attempt failed; the step is terminal.
    Failed,
    /// Attempt failed with retries remaining; not terminal.
    Retried,
    /// Step skipped because an upstream dependency failed; terminal.
    Skipped,
}

impl StepStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Retried => "retried",
            Self::Skipped => "skipped",
        }
    }

    /// Returns true when the status terminates its step.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Append-only record of one (run, step, attempt).
///
/// # Invariants
/// - `(project_id, run_id, step_name, attempt)` is unique; re-insertion
///   yields the existing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionRecord {
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Owning run identifier.
    pub run_id: RunId,
    /// Step name.
    pub step_name: StepName,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// Attempt outcome.
    pub status: StepStatus,
    /// Attempt start timestamp.
    pub started_at: Timestamp,
    /// Attempt finish timestamp.
    pub finished_at: Timestamp,
    /// Stable error code when the attempt did not succeed.
    pub error_code: Option<String>,
    /// Human-readable error message.
    pub error_message: Option<String>,
    /// Structured result payload (includes the seeded score).
    pub result: Value,
    /// Run contract hash the attempt was simulated under.
    pub spec_hash: HashDigest,
}
