// crates/datapilot-core/src/runtime/mod.rs
// ============================================================================
// Module: DataPilot Runtime
// Description: Deterministic run lifecycle engine components.
// Purpose: Validation, planning, simulation, derivation, and interlocks.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The runtime hosts the deterministic engine: spec validators, the plan
//! builder, the dry-run executor, the run state deriver, the audited run
//! service, the quality-gate interlock, the ingest flows, and the in-memory
//! store used by tests and single-process wiring.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod derive;
pub mod dryrun;
pub mod gate;
pub mod ingest;
pub mod memory;
pub mod plan;
pub mod service;
pub mod validate;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use derive::derive_run_state;
pub use dryrun::DEPENDENCY_FAILED;
pub use dryrun::DRY_RUN_FAILED;
pub use dryrun::DRY_RUN_RETRY;
pub use dryrun::DryRunError;
pub use dryrun::DryRunExecutor;
pub use dryrun::DryRunInput;
pub use dryrun::DryRunOutcome;
pub use dryrun::OutcomeDecider;
pub use dryrun::SUCCESS_THRESHOLD;
pub use dryrun::ScriptedOutcomeDecider;
pub use dryrun::SeededOutcomeDecider;
pub use dryrun::backoff_seconds;
pub use gate::ConsumptionContext;
pub use gate::GateError;
pub use gate::QualityGate;
pub use gate::evaluate_rule;
pub use ingest::ArtifactRegistration;
pub use ingest::DEFAULT_PRESIGN_SECONDS;
pub use ingest::IngestError;
pub use ingest::IngestFlows;
pub use ingest::VersionUpload;
pub use ingest::hash_streaming;
pub use memory::InMemoryObjectStore;
pub use memory::InMemoryStore;
pub use plan::PlanError;
pub use plan::build_plan;
pub use service::CreateRunInput;
pub use service::RunCreator;
pub use service::RunService;
pub use service::ServiceError;
pub use service::TransitionReport;
pub use service::build_transition_audit;
pub use service::transition_action;
pub use validate::ValidationError;
pub use validate::ValidationIssue;
pub use validate::validate_pipeline_spec;
pub use validate::validate_run_spec;
