// crates/datapilot-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Control Plane Store
// Description: Durable DataPilot repositories backed by SQLite WAL.
// Purpose: Persist entities and ledgers with transactional audit coupling.
// Dependencies: datapilot-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! This module implements every DataPilot repository, ledger, and plan
//! interface over `SQLite`. Rows store the canonical JSON document of the
//! entity plus indexed key columns, so unique constraints (project name,
//! dataset content, idempotency keys, attempt tuples) are enforced by the
//! engine rather than by application checks.
//!
//! A single writer connection guarded by a mutex serializes mutations, which
//! combined with immediate transactions gives the ordinal-allocation and
//! status-transition paths the row-lock semantics the core contract
//! requires. Ledger identifiers come from `INTEGER PRIMARY KEY` rowids and
//! are monotonic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use datapilot_core::Artifact;
use datapilot_core::ArtifactId;
use datapilot_core::AuditEvent;
use datapilot_core::Dataset;
use datapilot_core::DatasetId;
use datapilot_core::DatasetVersion;
use datapilot_core::DatasetVersionId;
use datapilot_core::EvaluationId;
use datapilot_core::ExecutionPlan;
use datapilot_core::LineageEvent;
use datapilot_core::NewAuditEvent;
use datapilot_core::NewDatasetVersion;
use datapilot_core::NewLineageEvent;
use datapilot_core::Project;
use datapilot_core::ProjectId;
use datapilot_core::QualityEvaluation;
use datapilot_core::QualityRule;
use datapilot_core::QualityRuleId;
use datapilot_core::RetentionUpdate;
use datapilot_core::Run;
use datapilot_core::RunId;
use datapilot_core::RunState;
use datapilot_core::StepExecutionRecord;
use datapilot_core::interfaces::ArtifactRepository;
use datapilot_core::interfaces::AuditLedger;
use datapilot_core::interfaces::CreateRunRecord;
use datapilot_core::interfaces::DatasetRepository;
use datapilot_core::interfaces::DatasetVersionRepository;
use datapilot_core::interfaces::LedgerQuery;
use datapilot_core::interfaces::LineageLedger;
use datapilot_core::interfaces::PlanRepository;
use datapilot_core::interfaces::ProjectRepository;
use datapilot_core::interfaces::QualityEvaluationRepository;
use datapilot_core::interfaces::QualityRuleRepository;
use datapilot_core::interfaces::RepositoryError;
use datapilot_core::interfaces::RunRepository;
use datapilot_core::interfaces::StatusTransition;
use datapilot_core::interfaces::StepExecutionRepository;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` control plane store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding stored documents.
#[derive(Debug, Error, Clone)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data.
    #[error("sqlite store invalid data: {0}")]
    Invalid(String),
}

impl From<SqliteStoreError> for RepositoryError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::Io(message) => Self::Io(message),
            SqliteStoreError::Db(message) => Self::Store(message),
            SqliteStoreError::VersionMismatch(message) | SqliteStoreError::Invalid(message) => {
                Self::Serialization(message)
            }
        }
    }
}

/// Maps a rusqlite error into a repository error.
fn db_error(error: &rusqlite::Error) -> RepositoryError {
    RepositoryError::Store(format!("sqlite: {error}"))
}

/// Returns true when the error is a unique-constraint violation.
fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed control plane store with WAL support.
///
/// # Invariants
/// - All writes go through the single mutex-guarded connection.
/// - Multi-step writes run inside immediate transactions.
#[derive(Clone)]
pub struct SqliteStore {
    /// Shared connection guarded by a mutex.
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the store at the configured path.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the database cannot be opened,
    /// configured, or migrated.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        let connection = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|err| SqliteStoreError::Io(err.to_string()))?;

        connection
            .pragma_update(None, "journal_mode", config.journal_mode.pragma_value())
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .pragma_update(None, "synchronous", config.sync_mode.pragma_value())
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .pragma_update(None, "busy_timeout", i64::try_from(config.busy_timeout_ms).unwrap_or(i64::MAX))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        connection
            .pragma_update(None, "foreign_keys", "on")
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        init_schema(&connection)?;

        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Opens an in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when initialization fails.
    pub fn in_memory() -> Result<Self, SqliteStoreError> {
        let connection =
            Connection::open_in_memory().map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        init_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the store is unavailable.
    pub fn readiness(&self) -> Result<(), SqliteStoreError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Db("connection mutex poisoned".to_string()))?;
        guard
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|err| SqliteStoreError::Db(err.to_string()))
    }

    /// Locks the connection, mapping poisoning into a store error.
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.connection
            .lock()
            .map_err(|_| RepositoryError::Store("connection mutex poisoned".to_string()))
    }
}

/// Creates tables and indexes, verifying the schema version.
fn init_schema(connection: &Connection) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL,
                UNIQUE (project_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_datasets_project
                ON datasets (project_id, created_at_ms DESC);
            CREATE TABLE IF NOT EXISTS dataset_versions (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                content_sha256 TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL,
                UNIQUE (dataset_id, content_sha256),
                UNIQUE (dataset_id, ordinal)
            );
            CREATE INDEX IF NOT EXISTS idx_versions_dataset
                ON dataset_versions (dataset_id, ordinal DESC);
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_artifacts_project
                ON artifacts (project_id, created_at_ms DESC);
            CREATE TABLE IF NOT EXISTS quality_rules (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS quality_evaluations (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                dataset_version_id TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                evaluated_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_evaluations_version
                ON quality_evaluations (dataset_version_id, rule_id, evaluated_at_ms DESC);
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                status TEXT NOT NULL,
                spec_hash TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                doc TEXT NOT NULL,
                UNIQUE (project_id, idempotency_key)
            );
            CREATE INDEX IF NOT EXISTS idx_runs_project
                ON runs (project_id, created_at_ms DESC);
            CREATE TABLE IF NOT EXISTS execution_plans (
                run_id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS step_executions (
                run_id TEXT NOT NULL,
                step_name TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                project_id TEXT NOT NULL,
                doc TEXT NOT NULL,
                PRIMARY KEY (run_id, step_name, attempt)
            );
            CREATE TABLE IF NOT EXISTS audit_events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                occurred_at_ms INTEGER NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT NOT NULL,
                idempotency_key TEXT,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_time
                ON audit_events (project_id, occurred_at_ms);
            CREATE INDEX IF NOT EXISTS idx_audit_resource
                ON audit_events (resource_type, resource_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_dedupe
                ON audit_events (resource_id, idempotency_key)
                WHERE idempotency_key IS NOT NULL;
            CREATE TABLE IF NOT EXISTS lineage_events (
                event_id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                occurred_at_ms INTEGER NOT NULL,
                subject TEXT NOT NULL,
                object TEXT NOT NULL,
                doc TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_lineage_nodes
                ON lineage_events (project_id, subject, object);
            ",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;

    let stored: Option<i64> = connection
        .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match stored {
        None => {
            connection
                .execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION],
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            Ok(())
        }
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(version) => Err(SqliteStoreError::VersionMismatch(format!(
            "found schema version {version}, expected {SCHEMA_VERSION}"
        ))),
    }
}

// ============================================================================
// SECTION: Document Helpers
// ============================================================================

/// Serializes an entity document for storage.
fn to_doc<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|err| RepositoryError::Serialization(err.to_string()))
}

/// Deserializes an entity document from storage.
fn from_doc<T: DeserializeOwned>(doc: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(doc).map_err(|err| RepositoryError::Serialization(err.to_string()))
}

/// Loads documents for a single-column doc query.
fn collect_docs<T: DeserializeOwned>(
    connection: &Connection,
    sql: &str,
    query_params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<T>, RepositoryError> {
    let mut statement = connection.prepare(sql).map_err(|err| db_error(&err))?;
    let rows = statement
        .query_map(query_params, |row| row.get::<_, String>(0))
        .map_err(|err| db_error(&err))?;
    let mut out = Vec::new();
    for row in rows {
        let doc = row.map_err(|err| db_error(&err))?;
        out.push(from_doc(&doc)?);
    }
    Ok(out)
}

// ============================================================================
// SECTION: Project Repositories
// ============================================================================

impl ProjectRepository for SqliteStore {
    fn insert_project(&self, project: &Project) -> Result<(), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(project)?;
        guard
            .execute(
                "INSERT INTO projects (id, name, created_at_ms, doc) VALUES (?1, ?2, ?3, ?4)",
                params![
                    project.id.as_str(),
                    project.name,
                    project.created_at.as_unix_millis(),
                    doc
                ],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    RepositoryError::UniqueViolation(format!(
                        "project name already exists: {}",
                        project.name
                    ))
                } else {
                    db_error(&err)
                }
            })?;
        Ok(())
    }

    fn get_project(&self, project_id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM projects WHERE id = ?1",
                params![project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(&guard, "SELECT doc FROM projects ORDER BY created_at_ms DESC", &[])
    }
}

impl DatasetRepository for SqliteStore {
    fn insert_dataset(&self, dataset: &Dataset) -> Result<(), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(dataset)?;
        guard
            .execute(
                "INSERT INTO datasets (id, project_id, name, created_at_ms, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    dataset.id.as_str(),
                    dataset.project_id.as_str(),
                    dataset.name,
                    dataset.created_at.as_unix_millis(),
                    doc
                ],
            )
            .map_err(|err| {
                if is_unique_violation(&err) {
                    RepositoryError::UniqueViolation(format!(
                        "dataset name already exists in project: {}",
                        dataset.name
                    ))
                } else {
                    db_error(&err)
                }
            })?;
        Ok(())
    }

    fn get_dataset(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Option<Dataset>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM datasets WHERE id = ?1 AND project_id = ?2",
                params![dataset_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_datasets(&self, project_id: &ProjectId) -> Result<Vec<Dataset>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM datasets WHERE project_id = ?1 ORDER BY created_at_ms DESC",
            &[&project_id.as_str()],
        )
    }
}

impl DatasetVersionRepository for SqliteStore {
    fn create_version(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
        new: NewDatasetVersion,
    ) -> Result<DatasetVersion, RepositoryError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;

        // The immediate transaction is the dataset row lock: ordinal reads
        // and the insert are serialized against concurrent uploads.
        let dataset_exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM datasets WHERE id = ?1 AND project_id = ?2",
                params![dataset_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        if dataset_exists.is_none() {
            return Err(RepositoryError::NotFound);
        }

        let max_ordinal: Option<i64> = tx
            .query_row(
                "SELECT MAX(ordinal) FROM dataset_versions WHERE dataset_id = ?1",
                params![dataset_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| db_error(&err))?;
        let ordinal = u64::try_from(max_ordinal.unwrap_or(0))
            .map_err(|err| RepositoryError::Store(err.to_string()))?
            + 1;

        let version =
            DatasetVersion::from_new(new, project_id.clone(), dataset_id.clone(), ordinal)
                .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        let doc = to_doc(&version)?;
        let inserted = tx.execute(
            "INSERT INTO dataset_versions
                 (id, project_id, dataset_id, ordinal, content_sha256, created_at_ms, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                version.id.as_str(),
                version.project_id.as_str(),
                version.dataset_id.as_str(),
                i64::try_from(version.ordinal).unwrap_or(i64::MAX),
                version.content_sha256.value,
                version.created_at.as_unix_millis(),
                doc
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(RepositoryError::DuplicateContent);
            }
            Err(err) => return Err(db_error(&err)),
        }

        tx.commit().map_err(|err| db_error(&err))?;
        Ok(version)
    }

    fn get_version(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<Option<DatasetVersion>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM dataset_versions WHERE id = ?1 AND project_id = ?2",
                params![version_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn latest_version(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Option<DatasetVersion>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM dataset_versions
                 WHERE dataset_id = ?1 AND project_id = ?2
                 ORDER BY ordinal DESC LIMIT 1",
                params![dataset_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_versions(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Vec<DatasetVersion>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM dataset_versions
             WHERE dataset_id = ?1 AND project_id = ?2
             ORDER BY ordinal DESC",
            &[&dataset_id.as_str(), &project_id.as_str()],
        )
    }
}

impl ArtifactRepository for SqliteStore {
    fn insert_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(artifact)?;
        guard
            .execute(
                "INSERT INTO artifacts (id, project_id, created_at_ms, doc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    artifact.id.as_str(),
                    artifact.project_id.as_str(),
                    artifact.created_at.as_unix_millis(),
                    doc
                ],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn get_artifact(
        &self,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<Artifact>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM artifacts WHERE id = ?1 AND project_id = ?2",
                params![artifact_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_artifacts(&self, project_id: &ProjectId) -> Result<Vec<Artifact>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM artifacts WHERE project_id = ?1 ORDER BY created_at_ms DESC",
            &[&project_id.as_str()],
        )
    }

    fn update_retention(
        &self,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
        update: RetentionUpdate,
    ) -> Result<Artifact, RepositoryError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;

        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM artifacts WHERE id = ?1 AND project_id = ?2",
                params![artifact_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        let mut artifact: Artifact = from_doc(&doc.ok_or(RepositoryError::NotFound)?)?;

        // Only the retention fields may change; everything else is frozen.
        artifact.retention_until = update.retention_until;
        artifact.legal_hold = update.legal_hold;
        let updated = to_doc(&artifact)?;
        tx.execute(
            "UPDATE artifacts SET doc = ?1 WHERE id = ?2 AND project_id = ?3",
            params![updated, artifact_id.as_str(), project_id.as_str()],
        )
        .map_err(|err| db_error(&err))?;
        tx.commit().map_err(|err| db_error(&err))?;
        Ok(artifact)
    }
}

impl QualityRuleRepository for SqliteStore {
    fn insert_rule(&self, rule: &QualityRule) -> Result<(), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(rule)?;
        guard
            .execute(
                "INSERT INTO quality_rules (id, project_id, created_at_ms, doc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    rule.id.as_str(),
                    rule.project_id.as_str(),
                    rule.created_at.as_unix_millis(),
                    doc
                ],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn get_rule(
        &self,
        project_id: &ProjectId,
        rule_id: &QualityRuleId,
    ) -> Result<Option<QualityRule>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM quality_rules WHERE id = ?1 AND project_id = ?2",
                params![rule_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_rules(&self, project_id: &ProjectId) -> Result<Vec<QualityRule>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM quality_rules WHERE project_id = ?1 ORDER BY created_at_ms DESC",
            &[&project_id.as_str()],
        )
    }
}

impl QualityEvaluationRepository for SqliteStore {
    fn insert_evaluation(&self, evaluation: &QualityEvaluation) -> Result<(), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(evaluation)?;
        guard
            .execute(
                "INSERT INTO quality_evaluations
                     (id, project_id, dataset_version_id, rule_id, evaluated_at_ms, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    evaluation.id.as_str(),
                    evaluation.project_id.as_str(),
                    evaluation.dataset_version_id.as_str(),
                    evaluation.rule_id.as_str(),
                    evaluation.evaluated_at.as_unix_millis(),
                    doc
                ],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn latest_evaluation(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
        rule_id: &QualityRuleId,
    ) -> Result<Option<QualityEvaluation>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM quality_evaluations
                 WHERE project_id = ?1 AND dataset_version_id = ?2 AND rule_id = ?3
                 ORDER BY evaluated_at_ms DESC, id DESC LIMIT 1",
                params![project_id.as_str(), version_id.as_str(), rule_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn get_evaluation(
        &self,
        project_id: &ProjectId,
        evaluation_id: &EvaluationId,
    ) -> Result<Option<QualityEvaluation>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM quality_evaluations WHERE id = ?1 AND project_id = ?2",
                params![evaluation_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_evaluations(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<Vec<QualityEvaluation>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM quality_evaluations
             WHERE project_id = ?1 AND dataset_version_id = ?2
             ORDER BY evaluated_at_ms DESC",
            &[&project_id.as_str(), &version_id.as_str()],
        )
    }
}

// ============================================================================
// SECTION: Run Repositories
// ============================================================================

impl RunRepository for SqliteStore {
    fn create_or_get_run(
        &self,
        record: CreateRunRecord,
    ) -> Result<(Run, bool), RepositoryError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;

        let existing: Option<(String, String)> = tx
            .query_row(
                "SELECT spec_hash, doc FROM runs
                 WHERE project_id = ?1 AND idempotency_key = ?2",
                params![record.project_id.as_str(), record.idempotency_key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        if let Some((stored_hash, doc)) = existing {
            if stored_hash == record.spec_hash.value {
                let run: Run = from_doc(&doc)?;
                return Ok((run, false));
            }
            return Err(RepositoryError::IdempotencyConflict(
                record.idempotency_key.to_string(),
            ));
        }

        let run = Run {
            id: record.id,
            project_id: record.project_id,
            idempotency_key: record.idempotency_key,
            status: RunState::Created,
            spec_hash: record.spec_hash,
            pipeline_spec: record.pipeline_spec,
            run_spec: record.run_spec,
            created_at: record.created_at,
        };
        let doc = to_doc(&run)?;
        tx.execute(
            "INSERT INTO runs
                 (id, project_id, idempotency_key, status, spec_hash, created_at_ms, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.id.as_str(),
                run.project_id.as_str(),
                run.idempotency_key.as_str(),
                run.status.as_str(),
                run.spec_hash.value,
                run.created_at.as_unix_millis(),
                doc
            ],
        )
        .map_err(|err| db_error(&err))?;
        tx.commit().map_err(|err| db_error(&err))?;
        Ok((run, true))
    }

    fn get_run(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Option<Run>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM runs WHERE id = ?1 AND project_id = ?2",
                params![run_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }

    fn list_runs(&self, project_id: &ProjectId) -> Result<Vec<Run>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM runs WHERE project_id = ?1 ORDER BY created_at_ms DESC",
            &[&project_id.as_str()],
        )
    }

    fn update_derived_status(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
        next: RunState,
        audit: Option<NewAuditEvent>,
    ) -> Result<StatusTransition, RepositoryError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;

        let doc: Option<String> = tx
            .query_row(
                "SELECT doc FROM runs WHERE id = ?1 AND project_id = ?2",
                params![run_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        let mut run: Run = from_doc(&doc.ok_or(RepositoryError::NotFound)?)?;
        let previous = run.status;

        if previous == next {
            return Ok(StatusTransition {
                previous,
                changed: false,
            });
        }
        if !previous.can_transition(next) {
            return Err(RepositoryError::InvalidTransition {
                from: previous,
                to: next,
            });
        }

        run.status = next;
        let updated = to_doc(&run)?;
        tx.execute(
            "UPDATE runs SET status = ?1, doc = ?2 WHERE id = ?3 AND project_id = ?4",
            params![next.as_str(), updated, run_id.as_str(), project_id.as_str()],
        )
        .map_err(|err| db_error(&err))?;

        if let Some(event) = audit {
            insert_audit_tx(&tx, &event)
                .map_err(|err| RepositoryError::AuditFailed(err.to_string()))?;
        }

        tx.commit().map_err(|err| db_error(&err))?;
        Ok(StatusTransition {
            previous,
            changed: true,
        })
    }
}

impl PlanRepository for SqliteStore {
    fn put_plan(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(plan)?;
        guard
            .execute(
                "INSERT INTO execution_plans (run_id, project_id, doc)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (run_id) DO UPDATE SET doc = excluded.doc",
                params![plan.run_id.as_str(), plan.project_id.as_str(), doc],
            )
            .map_err(|err| db_error(&err))?;
        Ok(())
    }

    fn get_plan(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Option<ExecutionPlan>, RepositoryError> {
        let guard = self.lock()?;
        let doc: Option<String> = guard
            .query_row(
                "SELECT doc FROM execution_plans WHERE run_id = ?1 AND project_id = ?2",
                params![run_id.as_str(), project_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        doc.map(|doc| from_doc(&doc)).transpose()
    }
}

impl StepExecutionRepository for SqliteStore {
    fn insert_attempt(
        &self,
        record: &StepExecutionRecord,
    ) -> Result<(StepExecutionRecord, bool), RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(record)?;
        let inserted = guard
            .execute(
                "INSERT OR IGNORE INTO step_executions
                     (run_id, step_name, attempt, project_id, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.run_id.as_str(),
                    record.step_name.as_str(),
                    record.attempt,
                    record.project_id.as_str(),
                    doc
                ],
            )
            .map_err(|err| db_error(&err))?;
        if inserted > 0 {
            return Ok((record.clone(), true));
        }
        // Unique conflict: the stored row is authoritative.
        let existing: String = guard
            .query_row(
                "SELECT doc FROM step_executions
                 WHERE run_id = ?1 AND step_name = ?2 AND attempt = ?3",
                params![record.run_id.as_str(), record.step_name.as_str(), record.attempt],
                |row| row.get(0),
            )
            .map_err(|err| db_error(&err))?;
        Ok((from_doc(&existing)?, false))
    }

    fn list_for_run(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Vec<StepExecutionRecord>, RepositoryError> {
        let guard = self.lock()?;
        collect_docs(
            &guard,
            "SELECT doc FROM step_executions
             WHERE run_id = ?1 AND project_id = ?2
             ORDER BY step_name ASC, attempt ASC",
            &[&run_id.as_str(), &project_id.as_str()],
        )
    }
}

// ============================================================================
// SECTION: Ledgers
// ============================================================================

/// Inserts an audit event inside an open transaction, honouring dedupe.
///
/// Returns the assigned event identifier, or the existing row's identifier
/// when the transition idempotency key was already recorded.
fn insert_audit_tx(
    tx: &rusqlite::Transaction<'_>,
    event: &NewAuditEvent,
) -> Result<i64, rusqlite::Error> {
    let doc = serde_json::to_string(event).map_err(|err| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(err))
    })?;
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO audit_events
             (project_id, occurred_at_ms, resource_type, resource_id, idempotency_key, doc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.project_id.as_str(),
            event.occurred_at.as_unix_millis(),
            event.resource_type,
            event.resource_id,
            event.idempotency_key(),
            doc
        ],
    )?;
    if inserted > 0 {
        return Ok(tx.last_insert_rowid());
    }
    tx.query_row(
        "SELECT event_id FROM audit_events
         WHERE resource_id = ?1 AND idempotency_key = ?2",
        params![event.resource_id, event.idempotency_key()],
        |row| row.get(0),
    )
}

impl AuditLedger for SqliteStore {
    fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent, RepositoryError> {
        let mut guard = self.lock()?;
        let tx = guard
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| db_error(&err))?;
        let event_id = insert_audit_tx(&tx, &event)
            .map_err(|err| RepositoryError::AuditFailed(err.to_string()))?;
        tx.commit().map_err(|err| db_error(&err))?;
        let event_id = u64::try_from(event_id)
            .map_err(|err| RepositoryError::AuditFailed(err.to_string()))?;
        Ok(event.into_event(event_id))
    }

    fn get_audit(
        &self,
        project_id: &ProjectId,
        event_id: u64,
    ) -> Result<Option<AuditEvent>, RepositoryError> {
        let guard = self.lock()?;
        let row: Option<(i64, String)> = guard
            .query_row(
                "SELECT event_id, doc FROM audit_events
                 WHERE event_id = ?1 AND project_id = ?2",
                params![i64::try_from(event_id).unwrap_or(i64::MAX), project_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|err| db_error(&err))?;
        row.map(|(id, doc)| {
            let event: NewAuditEvent = from_doc(&doc)?;
            Ok(event.into_event(u64::try_from(id).unwrap_or_default()))
        })
        .transpose()
    }

    fn list_audit(
        &self,
        project_id: &ProjectId,
        query: &LedgerQuery,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let guard = self.lock()?;
        let from_ms = query.from.map_or(i64::MIN, |from| from.as_unix_millis());
        let to_ms = query.to.map_or(i64::MAX, |to| to.as_unix_millis());
        let after = query
            .after_event_id
            .map_or(0_i64, |after| i64::try_from(after).unwrap_or(i64::MAX));
        let limit = query.limit.map_or(i64::MAX, |limit| i64::try_from(limit).unwrap_or(i64::MAX));

        let mut statement = guard
            .prepare(
                "SELECT event_id, doc FROM audit_events
                 WHERE project_id = ?1
                   AND occurred_at_ms >= ?2 AND occurred_at_ms <= ?3
                   AND event_id > ?4
                 ORDER BY event_id ASC
                 LIMIT ?5",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![project_id.as_str(), from_ms, to_ms, after, limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| db_error(&err))?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, doc) = row.map_err(|err| db_error(&err))?;
            let event: NewAuditEvent = from_doc(&doc)?;
            events.push(event.into_event(u64::try_from(event_id).unwrap_or_default()));
        }
        Ok(events)
    }
}

impl LineageLedger for SqliteStore {
    fn append_lineage(&self, event: NewLineageEvent) -> Result<LineageEvent, RepositoryError> {
        let guard = self.lock()?;
        let doc = to_doc(&event)?;
        guard
            .execute(
                "INSERT INTO lineage_events
                     (project_id, occurred_at_ms, subject, object, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.project_id.as_str(),
                    event.occurred_at.as_unix_millis(),
                    event.subject,
                    event.object,
                    doc
                ],
            )
            .map_err(|err| RepositoryError::LineageFailed(err.to_string()))?;
        let event_id = u64::try_from(guard.last_insert_rowid())
            .map_err(|err| RepositoryError::LineageFailed(err.to_string()))?;
        Ok(event.into_event(event_id))
    }

    fn list_lineage(
        &self,
        project_id: &ProjectId,
        query: &LedgerQuery,
    ) -> Result<Vec<LineageEvent>, RepositoryError> {
        let guard = self.lock()?;
        let from_ms = query.from.map_or(i64::MIN, |from| from.as_unix_millis());
        let to_ms = query.to.map_or(i64::MAX, |to| to.as_unix_millis());
        let after = query
            .after_event_id
            .map_or(0_i64, |after| i64::try_from(after).unwrap_or(i64::MAX));
        let limit = query.limit.map_or(i64::MAX, |limit| i64::try_from(limit).unwrap_or(i64::MAX));

        let mut statement = guard
            .prepare(
                "SELECT event_id, doc FROM lineage_events
                 WHERE project_id = ?1
                   AND occurred_at_ms >= ?2 AND occurred_at_ms <= ?3
                   AND event_id > ?4
                 ORDER BY event_id ASC
                 LIMIT ?5",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![project_id.as_str(), from_ms, to_ms, after, limit], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| db_error(&err))?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, doc) = row.map_err(|err| db_error(&err))?;
            let event: NewLineageEvent = from_doc(&doc)?;
            events.push(event.into_event(u64::try_from(event_id).unwrap_or_default()));
        }
        Ok(events)
    }

    fn subgraph(
        &self,
        project_id: &ProjectId,
        node: &str,
    ) -> Result<Vec<LineageEvent>, RepositoryError> {
        let guard = self.lock()?;
        let mut statement = guard
            .prepare(
                "SELECT event_id, doc FROM lineage_events
                 WHERE project_id = ?1 AND (subject = ?2 OR object = ?2)
                 ORDER BY event_id ASC",
            )
            .map_err(|err| db_error(&err))?;
        let rows = statement
            .query_map(params![project_id.as_str(), node], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|err| db_error(&err))?;

        let mut events = Vec::new();
        for row in rows {
            let (event_id, doc) = row.map_err(|err| db_error(&err))?;
            let event: NewLineageEvent = from_doc(&doc)?;
            events.push(event.into_event(u64::try_from(event_id).unwrap_or_default()));
        }
        Ok(events)
    }
}
