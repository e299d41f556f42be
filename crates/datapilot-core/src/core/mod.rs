// crates/datapilot-core/src/core/mod.rs
// ============================================================================
// Module: DataPilot Core Types
// Description: Canonical DataPilot entity and document structures.
// Purpose: Provide stable, serializable types for the run lifecycle engine.
// Dependencies: serde, serde_jcs, sha2, time
// ============================================================================

//! ## Overview
//! DataPilot core types define projects, datasets and their versions,
//! artifacts, quality rules and evaluations, pipeline and run specifications,
//! derived run state, and the append-only audit/lineage ledgers. These types
//! are the canonical source of truth for any derived API surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod artifact;
pub mod audit;
pub mod error;
pub mod hashing;
pub mod identifiers;
pub mod pipeline;
pub mod project;
pub mod quality;
pub mod run;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use artifact::Artifact;
pub use artifact::RetentionUpdate;
pub use audit::AuditEvent;
pub use audit::AuditInfo;
pub use audit::LineageEvent;
pub use audit::NewAuditEvent;
pub use audit::NewAuditEventParams;
pub use audit::NewLineageEvent;
pub use audit::actions;
pub use audit::predicates;
pub use error::ErrorCode;
pub use error::required_code;
pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::SPEC_HASH_SEPARATOR;
pub use identifiers::ArtifactId;
pub use identifiers::DatasetId;
pub use identifiers::DatasetVersionId;
pub use identifiers::EvaluationId;
pub use identifiers::IdempotencyKey;
pub use identifiers::ObjectKey;
pub use identifiers::ProjectId;
pub use identifiers::QualityRuleId;
pub use identifiers::RequestId;
pub use identifiers::RunId;
pub use identifiers::StepName;
pub use pipeline::ArtifactInput;
pub use pipeline::ArtifactOutput;
pub use pipeline::BackoffSpec;
pub use pipeline::BackoffType;
pub use pipeline::DatasetInput;
pub use pipeline::DependencyEdge;
pub use pipeline::EnvVar;
pub use pipeline::PipelineBody;
pub use pipeline::PipelineSpec;
pub use pipeline::ResourceRequests;
pub use pipeline::RetryPolicy;
pub use pipeline::StepInputs;
pub use pipeline::StepOutputs;
pub use pipeline::StepSpec;
pub use project::Dataset;
pub use project::DatasetVersion;
pub use project::Metadata;
pub use project::NewDatasetVersion;
pub use project::Project;
pub use quality::EvaluationStatus;
pub use quality::QUALITY_RULE_SCHEMA;
pub use quality::QualityCheck;
pub use quality::QualityEvaluation;
pub use quality::QualityRule;
pub use run::CodeRef;
pub use run::EnvLock;
pub use run::ExecutionPlan;
pub use run::PlanEdge;
pub use run::PlanStep;
pub use run::Run;
pub use run::RunSpec;
pub use run::RunSpecBindingCore;
pub use run::RunState;
pub use run::StepExecutionRecord;
pub use run::StepStatus;
pub use self::time::Clock;
pub use self::time::FixedClock;
pub use self::time::SystemClock;
pub use self::time::Timestamp;
