// crates/datapilot-core/src/interfaces/mod.rs
// ============================================================================
// Module: DataPilot Interfaces
// Description: Backend-agnostic interfaces for persistence and object storage.
// Purpose: Define the contract surfaces used by the DataPilot runtime.
// Dependencies: crate::core, async-trait, bytes
// ============================================================================

//! ## Overview
//! Interfaces define how the run lifecycle engine integrates with relational
//! persistence and object storage without embedding backend-specific details.
//! Every read and write is project-scoped; implementations must reject
//! cross-project access with not-found semantics and must fail closed on
//! missing or invalid data.
//!
//! The audit and lineage appenders are the only write paths into the ledgers;
//! no update or delete surface exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::Artifact;
use crate::core::ArtifactId;
use crate::core::AuditEvent;
use crate::core::Dataset;
use crate::core::DatasetId;
use crate::core::DatasetVersion;
use crate::core::DatasetVersionId;
use crate::core::ErrorCode;
use crate::core::EvaluationId;
use crate::core::ExecutionPlan;
use crate::core::HashDigest;
use crate::core::IdempotencyKey;
use crate::core::LineageEvent;
use crate::core::NewAuditEvent;
use crate::core::NewDatasetVersion;
use crate::core::NewLineageEvent;
use crate::core::ObjectKey;
use crate::core::Project;
use crate::core::ProjectId;
use crate::core::QualityEvaluation;
use crate::core::QualityRule;
use crate::core::QualityRuleId;
use crate::core::RetentionUpdate;
use crate::core::Run;
use crate::core::RunId;
use crate::core::RunState;
use crate::core::StepExecutionRecord;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Repository Errors
// ============================================================================

/// Repository errors shared by every aggregate.
///
/// # Invariants
/// - Variants are stable for programmatic handling and map 1:1 onto wire
///   error codes.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Record does not exist in the project scope.
    #[error("record not found")]
    NotFound,
    /// Unique name or key already taken.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    /// Identical content already exists for the dataset.
    #[error("duplicate content for dataset")]
    DuplicateContent,
    /// Idempotency key reused with a different spec hash.
    #[error("idempotency key conflict: {0}")]
    IdempotencyConflict(String),
    /// Run state transition not allowed by the lifecycle table.
    #[error("invalid run state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: RunState,
        /// Rejected target state.
        to: RunState,
    },
    /// Attempted mutation of an immutable field.
    #[error("immutable field update rejected: {0}")]
    Immutable(String),
    /// Audit append failed inside the enclosing transaction.
    #[error("audit append failed: {0}")]
    AuditFailed(String),
    /// Lineage append failed inside the enclosing transaction.
    #[error("lineage append failed: {0}")]
    LineageFailed(String),
    /// Serialization of a stored document failed.
    #[error("repository serialization error: {0}")]
    Serialization(String),
    /// Underlying store I/O error.
    #[error("repository io error: {0}")]
    Io(String),
    /// Underlying store reported an error.
    #[error("repository error: {0}")]
    Store(String),
}

impl RepositoryError {
    /// Returns the wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::UniqueViolation(_) => ErrorCode::InvalidParams,
            Self::DuplicateContent => ErrorCode::DuplicateContent,
            Self::IdempotencyConflict(_) => ErrorCode::IdempotencyConflict,
            Self::InvalidTransition {
                ..
            } => ErrorCode::InvalidTransition,
            Self::Immutable(_) => ErrorCode::Immutable,
            Self::AuditFailed(_) => ErrorCode::AuditFailed,
            Self::LineageFailed(_) => ErrorCode::LineageWriteFailed,
            Self::Serialization(_) | Self::Io(_) | Self::Store(_) => ErrorCode::InternalError,
        }
    }
}

// ============================================================================
// SECTION: Project Repositories
// ============================================================================

/// Repository for project records.
pub trait ProjectRepository: Send + Sync {
    /// Inserts a project; `name` must be unique across the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::UniqueViolation`] on a duplicate name.
    fn insert_project(&self, project: &Project) -> Result<(), RepositoryError>;

    /// Loads a project by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_project(&self, project_id: &ProjectId) -> Result<Option<Project>, RepositoryError>;

    /// Lists projects ordered by creation time descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_projects(&self) -> Result<Vec<Project>, RepositoryError>;
}

/// Repository for dataset records.
pub trait DatasetRepository: Send + Sync {
    /// Inserts a dataset; `name` must be unique within the project.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::UniqueViolation`] on a duplicate name.
    fn insert_dataset(&self, dataset: &Dataset) -> Result<(), RepositoryError>;

    /// Loads a dataset scoped to a project.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_dataset(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Option<Dataset>, RepositoryError>;

    /// Lists datasets in a project ordered by creation time descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_datasets(&self, project_id: &ProjectId) -> Result<Vec<Dataset>, RepositoryError>;
}

/// Repository for immutable dataset versions.
pub trait DatasetVersionRepository: Send + Sync {
    /// Inserts a version, allocating `MAX(ordinal)+1` under the parent
    /// dataset lock in a single serialized transaction.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DuplicateContent`] when
    /// `(dataset_id, content_sha256)` already exists, and
    /// [`RepositoryError::NotFound`] when the dataset is missing.
    fn create_version(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
        new: NewDatasetVersion,
    ) -> Result<DatasetVersion, RepositoryError>;

    /// Loads a version scoped to a project.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_version(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<Option<DatasetVersion>, RepositoryError>;

    /// Loads the highest-ordinal version of a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn latest_version(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Option<DatasetVersion>, RepositoryError>;

    /// Lists versions of a dataset ordered by ordinal descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_versions(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Vec<DatasetVersion>, RepositoryError>;
}

/// Repository for artifact records.
pub trait ArtifactRepository: Send + Sync {
    /// Inserts an artifact record.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when insertion fails.
    fn insert_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError>;

    /// Loads an artifact scoped to a project.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_artifact(
        &self,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<Artifact>, RepositoryError>;

    /// Lists artifacts in a project ordered by creation time descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_artifacts(&self, project_id: &ProjectId) -> Result<Vec<Artifact>, RepositoryError>;

    /// Applies the only permitted mutation: retention horizon and legal hold.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when the artifact is missing.
    fn update_retention(
        &self,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
        update: RetentionUpdate,
    ) -> Result<Artifact, RepositoryError>;
}

/// Repository for quality rule documents.
pub trait QualityRuleRepository: Send + Sync {
    /// Inserts a rule document.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when insertion fails.
    fn insert_rule(&self, rule: &QualityRule) -> Result<(), RepositoryError>;

    /// Loads a rule scoped to a project.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_rule(
        &self,
        project_id: &ProjectId,
        rule_id: &QualityRuleId,
    ) -> Result<Option<QualityRule>, RepositoryError>;

    /// Lists rules in a project ordered by creation time descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_rules(&self, project_id: &ProjectId) -> Result<Vec<QualityRule>, RepositoryError>;
}

/// Repository for append-only quality evaluations.
pub trait QualityEvaluationRepository: Send + Sync {
    /// Appends an evaluation verdict.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when insertion fails.
    fn insert_evaluation(&self, evaluation: &QualityEvaluation) -> Result<(), RepositoryError>;

    /// Loads the latest evaluation for (version, rule) by `evaluated_at`
    /// descending, evaluation id descending as tiebreak.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn latest_evaluation(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
        rule_id: &QualityRuleId,
    ) -> Result<Option<QualityEvaluation>, RepositoryError>;

    /// Loads an evaluation by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_evaluation(
        &self,
        project_id: &ProjectId,
        evaluation_id: &EvaluationId,
    ) -> Result<Option<QualityEvaluation>, RepositoryError>;

    /// Lists evaluations for a version ordered by `evaluated_at` descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_evaluations(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<Vec<QualityEvaluation>, RepositoryError>;
}

// ============================================================================
// SECTION: Run Repositories
// ============================================================================

/// Insert payload for create-or-get run semantics.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRunRecord {
    /// Candidate run identifier used when a new row is created.
    pub id: RunId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Idempotency key unique within the project.
    pub idempotency_key: IdempotencyKey,
    /// Pipeline specification document as submitted.
    pub pipeline_spec: serde_json::Value,
    /// Run specification document as submitted.
    pub run_spec: serde_json::Value,
    /// Run contract hash.
    pub spec_hash: HashDigest,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

/// Outcome of a derived-status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTransition {
    /// Status observed under the row lock before the update.
    pub previous: RunState,
    /// True when the stored status actually changed.
    pub changed: bool,
}

/// Repository for run lifecycle records.
pub trait RunRepository: Send + Sync {
    /// Creates a run or returns the existing row for the idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::IdempotencyConflict`] when the key exists
    /// with a different spec hash.
    fn create_or_get_run(&self, record: CreateRunRecord)
    -> Result<(Run, bool), RepositoryError>;

    /// Loads a run scoped to a project.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_run(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Option<Run>, RepositoryError>;

    /// Lists runs in a project ordered by creation time descending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_runs(&self, project_id: &ProjectId) -> Result<Vec<Run>, RepositoryError>;

    /// Applies a derived status under the run row lock.
    ///
    /// Enforces the lifecycle table, applies the change only when the target
    /// differs, and appends `audit` in the same transaction when the change
    /// is applied. Audit events deduplicate on
    /// `(resource_id, payload.idempotency_key)`: a replayed transition event
    /// is dropped silently.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidTransition`] when the table rejects
    /// the move and [`RepositoryError::NotFound`] when the run is missing.
    fn update_derived_status(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
        next: RunState,
        audit: Option<NewAuditEvent>,
    ) -> Result<StatusTransition, RepositoryError>;
}

/// Repository for per-run execution plans.
pub trait PlanRepository: Send + Sync {
    /// Stores the plan for a run; identical content upserts idempotently.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when storing fails.
    fn put_plan(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError>;

    /// Loads the plan for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_plan(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Option<ExecutionPlan>, RepositoryError>;
}

/// Repository for append-only step execution records.
pub trait StepExecutionRepository: Send + Sync {
    /// Inserts an attempt record; on unique conflict
    /// `(run_id, step_name, attempt)` returns the existing row with
    /// `created = false`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when insertion fails.
    fn insert_attempt(
        &self,
        record: &StepExecutionRecord,
    ) -> Result<(StepExecutionRecord, bool), RepositoryError>;

    /// Lists all records for a run.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_for_run(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Vec<StepExecutionRecord>, RepositoryError>;
}

// ============================================================================
// SECTION: Ledgers
// ============================================================================

/// Query window for ledger listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQuery {
    /// Inclusive lower bound on `occurred_at`.
    pub from: Option<Timestamp>,
    /// Inclusive upper bound on `occurred_at`.
    pub to: Option<Timestamp>,
    /// Cursor: only events with `event_id` greater than this are returned.
    pub after_event_id: Option<u64>,
    /// Page size bound.
    pub limit: Option<usize>,
}

/// Append-only audit ledger.
pub trait AuditLedger: Send + Sync {
    /// Appends an event and assigns its monotonic identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::AuditFailed`] when the append fails.
    fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent, RepositoryError>;

    /// Loads an event by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when loading fails.
    fn get_audit(
        &self,
        project_id: &ProjectId,
        event_id: u64,
    ) -> Result<Option<AuditEvent>, RepositoryError>;

    /// Lists events ordered by `event_id` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_audit(
        &self,
        project_id: &ProjectId,
        query: &LedgerQuery,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
}

/// Append-only lineage ledger.
pub trait LineageLedger: Send + Sync {
    /// Appends a lineage edge and assigns its monotonic identifier.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::LineageFailed`] when the append fails.
    fn append_lineage(&self, event: NewLineageEvent) -> Result<LineageEvent, RepositoryError>;

    /// Lists edges ordered by `event_id` ascending.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when listing fails.
    fn list_lineage(
        &self,
        project_id: &ProjectId,
        query: &LedgerQuery,
    ) -> Result<Vec<LineageEvent>, RepositoryError>;

    /// Returns every edge touching `node` as subject or object.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the query fails.
    fn subgraph(
        &self,
        project_id: &ProjectId,
        node: &str,
    ) -> Result<Vec<LineageEvent>, RepositoryError>;
}

// ============================================================================
// SECTION: Object Store
// ============================================================================

/// Logical bucket selector for object operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectBucket {
    /// Dataset version content.
    Datasets,
    /// Artifact content.
    Artifacts,
}

impl ObjectBucket {
    /// Returns a stable label for the bucket.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Datasets => "datasets",
            Self::Artifacts => "artifacts",
        }
    }
}

/// Presigned URL returned for direct client transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    /// The presigned URL.
    pub url: String,
    /// HTTP method the URL is valid for.
    pub method: String,
    /// Validity window in seconds.
    pub expires_in_seconds: u64,
}

/// Object store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    /// Object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
    /// Backend reported an error.
    #[error("object store backend error: {0}")]
    Backend(String),
    /// Store I/O error.
    #[error("object store io error: {0}")]
    Io(String),
}

impl ObjectStoreError {
    /// Returns the wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Backend(_) | Self::Io(_) => ErrorCode::ObjectStoreError,
        }
    }
}

/// Byte-stream interface to the object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Writes object bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when the write fails.
    async fn put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        bytes: Bytes,
    ) -> Result<(), ObjectStoreError>;

    /// Reads object bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::NotFound`] when the object is missing.
    async fn get(&self, bucket: ObjectBucket, key: &ObjectKey)
    -> Result<Bytes, ObjectStoreError>;

    /// Deletes an object; deleting a missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when the delete fails.
    async fn delete(&self, bucket: ObjectBucket, key: &ObjectKey)
    -> Result<(), ObjectStoreError>;

    /// Presigns a PUT for direct client upload.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when presigning fails.
    async fn presign_put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError>;

    /// Presigns a GET for direct client download.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError`] when presigning fails.
    async fn presign_get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError>;
}
