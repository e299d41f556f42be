// crates/datapilot-core/src/runtime/service.rs
// ============================================================================
// Module: DataPilot Run Service
// Description: Idempotent, audited run lifecycle transitions and creation.
// Purpose: Drive every run mutation through one canonical, replayable path.
// Dependencies: crate::{core, interfaces, runtime}, serde_json
// ============================================================================

//! ## Overview
//! The run service is the single canonical mutation path for runs. All API
//! surfaces call into these methods to preserve invariance and auditability:
//! state is always re-derived from stored facts, transitions are applied
//! under the run row lock with the audit event in the same transaction, and
//! replayed transitions deduplicate on the transition idempotency key.
//!
//! Rejected transitions emit no audit; re-applying the current state is a
//! silent no-op.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::json;
use thiserror::Error;

use crate::core::AuditInfo;
use crate::core::Clock;
use crate::core::ErrorCode;
use crate::core::HashDigest;
use crate::core::hashing::HashError;
use crate::core::IdempotencyKey;
use crate::core::NewAuditEvent;
use crate::core::NewAuditEventParams;
use crate::core::NewLineageEvent;
use crate::core::PipelineSpec;
use crate::core::ProjectId;
use crate::core::Run;
use crate::core::RunId;
use crate::core::RunSpec;
use crate::core::RunState;
use crate::core::Timestamp;
use crate::core::actions;
use crate::core::hashing::spec_hash;
use crate::core::predicates;
use crate::interfaces::AuditLedger;
use crate::interfaces::CreateRunRecord;
use crate::interfaces::DatasetVersionRepository;
use crate::interfaces::LineageLedger;
use crate::interfaces::PlanRepository;
use crate::interfaces::QualityEvaluationRepository;
use crate::interfaces::RepositoryError;
use crate::interfaces::RunRepository;
use crate::interfaces::StepExecutionRepository;
use crate::runtime::derive::derive_run_state;
use crate::runtime::gate::ConsumptionContext;
use crate::runtime::gate::GateError;
use crate::runtime::gate::QualityGate;
use crate::runtime::validate::ValidationError;
use crate::runtime::validate::validate_pipeline_spec;
use crate::runtime::validate::validate_run_spec;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Run service errors.
///
/// # Invariants
/// - Variants are stable and map onto wire error codes.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Run does not exist in the project scope.
    #[error("run not found")]
    RunNotFound,
    /// Transition rejected by the lifecycle table.
    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: RunState,
        /// Rejected target state.
        to: RunState,
    },
    /// Dry-run start requires a plan.
    #[error("run has no execution plan")]
    PlanMissing,
    /// Specification validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Quality gate blocked a referenced dataset version.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// A referenced dataset version does not exist.
    #[error("dataset version not found: {0}")]
    VersionNotFound(String),
    /// Submitted document was not parseable into its typed form.
    #[error("invalid json document: {0}")]
    InvalidDocument(String),
    /// Repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Canonical hashing failure.
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl ServiceError {
    /// Returns the wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RunNotFound | Self::VersionNotFound(_) => ErrorCode::NotFound,
            Self::InvalidTransition {
                ..
            } => ErrorCode::InvalidTransition,
            Self::PlanMissing | Self::Validation(_) => ErrorCode::InvalidParams,
            Self::Gate(error) => error.code(),
            Self::InvalidDocument(_) => ErrorCode::InvalidJson,
            Self::Repository(error) => error.code(),
            Self::Hash(_) => ErrorCode::InternalError,
        }
    }
}

// ============================================================================
// SECTION: Transition Report
// ============================================================================

/// Outcome of one derive-and-persist cycle.
#[derive(Debug, Clone)]
pub struct TransitionReport {
    /// Run row after the cycle.
    pub run: Run,
    /// State observed before the cycle.
    pub previous: RunState,
    /// State derived and persisted by the cycle.
    pub next: RunState,
    /// True when the stored state actually changed.
    pub changed: bool,
}

// ============================================================================
// SECTION: Run Service
// ============================================================================

/// Run lifecycle state machine over the run, plan, and step repositories.
pub struct RunService<'a, R, P, X, C> {
    /// Run repository.
    runs: &'a R,
    /// Plan repository.
    plans: &'a P,
    /// Step execution repository.
    steps: &'a X,
    /// Injected clock for audit timestamps.
    clock: &'a C,
}

impl<'a, R, P, X, C> RunService<'a, R, P, X, C>
where
    R: RunRepository,
    P: PlanRepository,
    X: StepExecutionRepository,
    C: Clock,
{
    /// Creates a new run service.
    #[must_use]
    pub const fn new(runs: &'a R, plans: &'a P, steps: &'a X, clock: &'a C) -> Self {
        Self {
            runs,
            plans,
            steps,
            clock,
        }
    }

    /// Derives the canonical state and persists the transition with audit.
    ///
    /// The audit event is appended in the same repository transaction as the
    /// status write. Re-applying the current state is a no-op and emits no
    /// audit; rejected transitions emit no audit either.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] when the run is missing, the table rejects
    /// the transition, or persistence fails.
    pub fn derive_and_persist_with_audit(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        run_id: &RunId,
        spec_hash: &HashDigest,
    ) -> Result<TransitionReport, ServiceError> {
        let run = self.runs.get_run(project_id, run_id)?.ok_or(ServiceError::RunNotFound)?;
        let previous = run.status;

        let plan = self.plans.get_plan(project_id, run_id)?;
        let records = self.steps.list_for_run(project_id, run_id)?;
        let expected = plan.as_ref().map(crate::core::ExecutionPlan::step_names).unwrap_or_default();
        let next = derive_run_state(plan.as_ref(), &records, &expected);

        self.persist_transition(info, project_id, run_id, run, previous, next, spec_hash)
    }

    /// Attempts only the `→ dryrun_running` transition; requires a plan.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::PlanMissing`] when no plan exists, and the
    /// usual transition errors otherwise.
    pub fn mark_dry_run_running_with_audit(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        run_id: &RunId,
        spec_hash: &HashDigest,
    ) -> Result<TransitionReport, ServiceError> {
        let run = self.runs.get_run(project_id, run_id)?.ok_or(ServiceError::RunNotFound)?;
        if self.plans.get_plan(project_id, run_id)?.is_none() {
            return Err(ServiceError::PlanMissing);
        }
        let previous = run.status;
        self.persist_transition(
            info,
            project_id,
            run_id,
            run,
            previous,
            RunState::DryrunRunning,
            spec_hash,
        )
    }

    /// Applies one transition under the run row lock with audit coupling.
    #[allow(clippy::too_many_arguments, reason = "Transition inputs mirror the audit payload.")]
    fn persist_transition(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        run_id: &RunId,
        mut run: Run,
        previous: RunState,
        next: RunState,
        spec_hash: &HashDigest,
    ) -> Result<TransitionReport, ServiceError> {
        if next == previous {
            return Ok(TransitionReport {
                run,
                previous,
                next,
                changed: false,
            });
        }
        if !previous.can_transition(next) {
            return Err(ServiceError::InvalidTransition {
                from: previous,
                to: next,
            });
        }

        let event = build_transition_audit(
            info,
            project_id,
            run_id,
            spec_hash,
            previous,
            next,
            self.clock.now(),
        )?;
        let transition = self.runs.update_derived_status(project_id, run_id, next, Some(event))?;
        if transition.changed {
            run.status = next;
        }
        Ok(TransitionReport {
            run,
            previous: transition.previous,
            next,
            changed: transition.changed,
        })
    }
}

// ============================================================================
// SECTION: Transition Audit
// ============================================================================

/// Maps a target state to its transition action name.
#[must_use]
pub const fn transition_action(next: RunState) -> &'static str {
    match next {
        RunState::Planned => actions::RUN_PLANNED,
        RunState::DryrunRunning => actions::DRY_RUN_STARTED,
        RunState::DryrunSucceeded => actions::DRY_RUN_COMPLETED,
        RunState::DryrunFailed => actions::DRY_RUN_FAILED,
        RunState::Created => actions::RUN_CREATED,
    }
}

/// Builds the audit event for one run transition.
///
/// The payload carries `idempotency_key = "project:run:from:to"` so the audit
/// layer can deduplicate a replayed transition on
/// `(resource_id, idempotency_key)`.
///
/// # Errors
///
/// Returns [`HashError`] when canonical serialization fails.
pub fn build_transition_audit(
    info: &AuditInfo,
    project_id: &ProjectId,
    run_id: &RunId,
    spec_hash: &HashDigest,
    from: RunState,
    to: RunState,
    occurred_at: Timestamp,
) -> Result<NewAuditEvent, HashError> {
    NewAuditEvent::new(NewAuditEventParams {
        project_id: project_id.clone(),
        occurred_at,
        info: info.clone(),
        action: transition_action(to).to_string(),
        resource_type: "run".to_string(),
        resource_id: run_id.to_string(),
        payload: json!({
            "service": "run",
            "project_id": project_id.to_string(),
            "run_id": run_id.to_string(),
            "spec_hash": spec_hash.value.clone(),
            "from": from.as_str(),
            "to": to.as_str(),
            "actor": info.actor.clone(),
            "request_id": info.request_id.to_string(),
            "occurred_at": occurred_at.to_rfc3339(),
            "idempotency_key": format!("{project_id}:{run_id}:{}:{}", from.as_str(), to.as_str()),
        }),
    })
}

// ============================================================================
// SECTION: Run Creation
// ============================================================================

/// Create-run inputs: submitted documents plus the idempotency key.
#[derive(Debug, Clone)]
pub struct CreateRunInput {
    /// Candidate run identifier used when a new row is created.
    pub run_id: RunId,
    /// Idempotency key unique within the project.
    pub idempotency_key: IdempotencyKey,
    /// Pipeline specification document as submitted.
    pub pipeline_spec: serde_json::Value,
    /// Run specification document as submitted.
    pub run_spec: serde_json::Value,
}

/// Run creation orchestrator: validation, gate interlock, idempotent insert.
pub struct RunCreator<'a, R, V, E, A, L, C> {
    /// Run repository.
    runs: &'a R,
    /// Dataset version repository.
    versions: &'a V,
    /// Quality evaluation repository.
    evaluations: &'a E,
    /// Audit ledger.
    audit: &'a A,
    /// Lineage ledger.
    lineage: &'a L,
    /// Injected clock.
    clock: &'a C,
}

impl<'a, R, V, E, A, L, C> RunCreator<'a, R, V, E, A, L, C>
where
    R: RunRepository,
    V: DatasetVersionRepository,
    E: QualityEvaluationRepository,
    A: AuditLedger,
    L: LineageLedger,
    C: Clock,
{
    /// Creates a new run creator.
    #[must_use]
    pub const fn new(
        runs: &'a R,
        versions: &'a V,
        evaluations: &'a E,
        audit: &'a A,
        lineage: &'a L,
        clock: &'a C,
    ) -> Self {
        Self {
            runs,
            versions,
            evaluations,
            audit,
            lineage,
            clock,
        }
    }

    /// Validates, gates, and idempotently creates a run.
    ///
    /// Returns `(run, created)`. When `created` is false the existing row was
    /// returned for an identical spec hash; a differing hash under the same
    /// key fails with `idempotency_conflict`. Creation appends one
    /// `run.created` audit event and one `consumes` lineage edge per dataset
    /// binding.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError`] for validation, gate, and persistence
    /// failures.
    pub fn create(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        input: CreateRunInput,
    ) -> Result<(Run, bool), ServiceError> {
        let pipeline: PipelineSpec = serde_json::from_value(input.pipeline_spec.clone())
            .map_err(|err| ServiceError::InvalidDocument(err.to_string()))?;
        let run_spec: RunSpec = serde_json::from_value(input.run_spec.clone())
            .map_err(|err| ServiceError::InvalidDocument(err.to_string()))?;

        validate_pipeline_spec(&pipeline)?;
        validate_run_spec(&run_spec, &pipeline)?;

        let gate = QualityGate::new(self.evaluations, self.audit, self.clock);
        let bindings = run_spec.dataset_bindings.clone().unwrap_or_default();
        for version_id in bindings.values() {
            let version = self
                .versions
                .get_version(project_id, &crate::core::DatasetVersionId::new(version_id.as_str()))?
                .ok_or_else(|| ServiceError::VersionNotFound(version_id.clone()))?;
            gate.enforce(info, &version, ConsumptionContext::RunCreate)?;
        }

        let contract_hash = spec_hash(&input.pipeline_spec, &run_spec.binding_core())?;
        let created_at = self.clock.now();
        let (run, created) = self.runs.create_or_get_run(CreateRunRecord {
            id: input.run_id,
            project_id: project_id.clone(),
            idempotency_key: input.idempotency_key,
            pipeline_spec: input.pipeline_spec,
            run_spec: input.run_spec,
            spec_hash: contract_hash,
            created_at,
        })?;

        if created {
            let event = NewAuditEvent::new(NewAuditEventParams {
                project_id: project_id.clone(),
                occurred_at: created_at,
                info: info.clone(),
                action: actions::RUN_CREATED.to_string(),
                resource_type: "run".to_string(),
                resource_id: run.id.to_string(),
                payload: json!({
                    "idempotency_key": format!("create:{}", run.idempotency_key),
                    "spec_hash": run.spec_hash.value.clone(),
                }),
            })?;
            self.audit.append_audit(event)?;

            for (dataset_ref, version_id) in &bindings {
                let edge = NewLineageEvent::new(
                    project_id.clone(),
                    created_at,
                    format!("run:{}", run.id),
                    predicates::CONSUMES,
                    format!("dataset_version:{version_id}"),
                    info.request_id.clone(),
                    json!({ "dataset_ref": dataset_ref }),
                )?;
                self.lineage.append_lineage(edge)?;
            }
        }

        Ok((run, created))
    }
}
