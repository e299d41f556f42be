// crates/datapilot-core/src/runtime/memory.rs
// ============================================================================
// Module: DataPilot In-Memory Store
// Description: In-memory repositories, ledgers, and object store.
// Purpose: Provide deterministic store implementations without external deps.
// Dependencies: crate::{core, interfaces}, async-trait, bytes
// ============================================================================

//! ## Overview
//! This module provides in-memory implementations of every repository,
//! ledger, and the object store for tests, examples, and single-process
//! wiring. A single mutex serializes mutations, which gives the same
//! linearisation the durable store gets from transactions and row locks. Not
//! intended for production use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::Artifact;
use crate::core::ArtifactId;
use crate::core::AuditEvent;
use crate::core::Dataset;
use crate::core::DatasetId;
use crate::core::DatasetVersion;
use crate::core::DatasetVersionId;
use crate::core::EvaluationId;
use crate::core::ExecutionPlan;
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
use crate::interfaces::ArtifactRepository;
use crate::interfaces::AuditLedger;
use crate::interfaces::CreateRunRecord;
use crate::interfaces::DatasetRepository;
use crate::interfaces::DatasetVersionRepository;
use crate::interfaces::LedgerQuery;
use crate::interfaces::LineageLedger;
use crate::interfaces::ObjectBucket;
use crate::interfaces::ObjectStore;
use crate::interfaces::ObjectStoreError;
use crate::interfaces::PlanRepository;
use crate::interfaces::PresignedUrl;
use crate::interfaces::ProjectRepository;
use crate::interfaces::QualityEvaluationRepository;
use crate::interfaces::QualityRuleRepository;
use crate::interfaces::RepositoryError;
use crate::interfaces::RunRepository;
use crate::interfaces::StatusTransition;
use crate::interfaces::StepExecutionRepository;

// ============================================================================
// SECTION: State
// ============================================================================

/// Mutable state behind the store mutex.
#[derive(Debug, Default)]
struct StoreState {
    /// Projects by identifier.
    projects: BTreeMap<String, Project>,
    /// Datasets by identifier.
    datasets: BTreeMap<String, Dataset>,
    /// Dataset versions by identifier.
    versions: BTreeMap<String, DatasetVersion>,
    /// Artifacts by identifier.
    artifacts: BTreeMap<String, Artifact>,
    /// Quality rules by identifier.
    rules: BTreeMap<String, QualityRule>,
    /// Append-only evaluation log.
    evaluations: Vec<QualityEvaluation>,
    /// Runs by identifier.
    runs: BTreeMap<String, Run>,
    /// Idempotency index: (project, key) → run id.
    run_keys: BTreeMap<(String, String), String>,
    /// Plans by run identifier.
    plans: BTreeMap<String, ExecutionPlan>,
    /// Step records by (run, step, attempt).
    step_records: BTreeMap<(String, String, u32), StepExecutionRecord>,
    /// Append-only audit log.
    audit: Vec<AuditEvent>,
    /// Next audit event identifier.
    next_audit_id: u64,
    /// Transition dedupe index: (resource id, idempotency key).
    audit_dedupe: BTreeSet<(String, String)>,
    /// Append-only lineage log.
    lineage: Vec<LineageEvent>,
    /// Next lineage event identifier.
    next_lineage_id: u64,
}

/// In-memory control plane store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    /// Store state protected by a mutex.
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the state, mapping poisoning into a store error.
    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state.lock().map_err(|_| RepositoryError::Store("store mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Project Repositories
// ============================================================================

impl ProjectRepository for InMemoryStore {
    fn insert_project(&self, project: &Project) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.projects.values().any(|existing| existing.name == project.name) {
            return Err(RepositoryError::UniqueViolation(format!(
                "project name already exists: {}",
                project.name
            )));
        }
        state.projects.insert(project.id.to_string(), project.clone());
        Ok(())
    }

    fn get_project(&self, project_id: &ProjectId) -> Result<Option<Project>, RepositoryError> {
        Ok(self.lock()?.projects.get(project_id.as_str()).cloned())
    }

    fn list_projects(&self) -> Result<Vec<Project>, RepositoryError> {
        let state = self.lock()?;
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }
}

impl DatasetRepository for InMemoryStore {
    fn insert_dataset(&self, dataset: &Dataset) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state
            .datasets
            .values()
            .any(|existing| existing.project_id == dataset.project_id && existing.name == dataset.name)
        {
            return Err(RepositoryError::UniqueViolation(format!(
                "dataset name already exists in project: {}",
                dataset.name
            )));
        }
        state.datasets.insert(dataset.id.to_string(), dataset.clone());
        Ok(())
    }

    fn get_dataset(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Option<Dataset>, RepositoryError> {
        Ok(self
            .lock()?
            .datasets
            .get(dataset_id.as_str())
            .filter(|dataset| &dataset.project_id == project_id)
            .cloned())
    }

    fn list_datasets(&self, project_id: &ProjectId) -> Result<Vec<Dataset>, RepositoryError> {
        let state = self.lock()?;
        let mut datasets: Vec<Dataset> = state
            .datasets
            .values()
            .filter(|dataset| &dataset.project_id == project_id)
            .cloned()
            .collect();
        datasets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(datasets)
    }
}

impl DatasetVersionRepository for InMemoryStore {
    fn create_version(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
        new: NewDatasetVersion,
    ) -> Result<DatasetVersion, RepositoryError> {
        let mut state = self.lock()?;
        let dataset_exists = state
            .datasets
            .get(dataset_id.as_str())
            .is_some_and(|dataset| &dataset.project_id == project_id);
        if !dataset_exists {
            return Err(RepositoryError::NotFound);
        }
        let duplicate = state.versions.values().any(|version| {
            &version.dataset_id == dataset_id
                && version.content_sha256.value == new.content_sha256.value
        });
        if duplicate {
            return Err(RepositoryError::DuplicateContent);
        }
        let ordinal = state
            .versions
            .values()
            .filter(|version| &version.dataset_id == dataset_id)
            .map(|version| version.ordinal)
            .max()
            .unwrap_or(0)
            + 1;
        let version =
            DatasetVersion::from_new(new, project_id.clone(), dataset_id.clone(), ordinal)
                .map_err(|err| RepositoryError::Serialization(err.to_string()))?;
        state.versions.insert(version.id.to_string(), version.clone());
        Ok(version)
    }

    fn get_version(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<Option<DatasetVersion>, RepositoryError> {
        Ok(self
            .lock()?
            .versions
            .get(version_id.as_str())
            .filter(|version| &version.project_id == project_id)
            .cloned())
    }

    fn latest_version(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Option<DatasetVersion>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .versions
            .values()
            .filter(|version| {
                &version.project_id == project_id && &version.dataset_id == dataset_id
            })
            .max_by_key(|version| version.ordinal)
            .cloned())
    }

    fn list_versions(
        &self,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
    ) -> Result<Vec<DatasetVersion>, RepositoryError> {
        let state = self.lock()?;
        let mut versions: Vec<DatasetVersion> = state
            .versions
            .values()
            .filter(|version| {
                &version.project_id == project_id && &version.dataset_id == dataset_id
            })
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.ordinal.cmp(&a.ordinal));
        Ok(versions)
    }
}

impl ArtifactRepository for InMemoryStore {
    fn insert_artifact(&self, artifact: &Artifact) -> Result<(), RepositoryError> {
        self.lock()?.artifacts.insert(artifact.id.to_string(), artifact.clone());
        Ok(())
    }

    fn get_artifact(
        &self,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<Artifact>, RepositoryError> {
        Ok(self
            .lock()?
            .artifacts
            .get(artifact_id.as_str())
            .filter(|artifact| &artifact.project_id == project_id)
            .cloned())
    }

    fn list_artifacts(&self, project_id: &ProjectId) -> Result<Vec<Artifact>, RepositoryError> {
        let state = self.lock()?;
        let mut artifacts: Vec<Artifact> = state
            .artifacts
            .values()
            .filter(|artifact| &artifact.project_id == project_id)
            .cloned()
            .collect();
        artifacts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(artifacts)
    }

    fn update_retention(
        &self,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
        update: RetentionUpdate,
    ) -> Result<Artifact, RepositoryError> {
        let mut state = self.lock()?;
        let artifact = state
            .artifacts
            .get_mut(artifact_id.as_str())
            .filter(|artifact| &artifact.project_id == project_id)
            .ok_or(RepositoryError::NotFound)?;
        artifact.retention_until = update.retention_until;
        artifact.legal_hold = update.legal_hold;
        Ok(artifact.clone())
    }
}

impl QualityRuleRepository for InMemoryStore {
    fn insert_rule(&self, rule: &QualityRule) -> Result<(), RepositoryError> {
        self.lock()?.rules.insert(rule.id.to_string(), rule.clone());
        Ok(())
    }

    fn get_rule(
        &self,
        project_id: &ProjectId,
        rule_id: &QualityRuleId,
    ) -> Result<Option<QualityRule>, RepositoryError> {
        Ok(self
            .lock()?
            .rules
            .get(rule_id.as_str())
            .filter(|rule| &rule.project_id == project_id)
            .cloned())
    }

    fn list_rules(&self, project_id: &ProjectId) -> Result<Vec<QualityRule>, RepositoryError> {
        let state = self.lock()?;
        let mut rules: Vec<QualityRule> = state
            .rules
            .values()
            .filter(|rule| &rule.project_id == project_id)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rules)
    }
}

impl QualityEvaluationRepository for InMemoryStore {
    fn insert_evaluation(&self, evaluation: &QualityEvaluation) -> Result<(), RepositoryError> {
        self.lock()?.evaluations.push(evaluation.clone());
        Ok(())
    }

    fn latest_evaluation(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
        rule_id: &QualityRuleId,
    ) -> Result<Option<QualityEvaluation>, RepositoryError> {
        let state = self.lock()?;
        let mut matching: Vec<&QualityEvaluation> = state
            .evaluations
            .iter()
            .filter(|evaluation| {
                &evaluation.project_id == project_id
                    && &evaluation.dataset_version_id == version_id
                    && &evaluation.rule_id == rule_id
            })
            .collect();
        matching.sort_by(|a, b| {
            b.evaluated_at.cmp(&a.evaluated_at).then_with(|| b.id.cmp(&a.id))
        });
        Ok(matching.first().map(|evaluation| (*evaluation).clone()))
    }

    fn get_evaluation(
        &self,
        project_id: &ProjectId,
        evaluation_id: &EvaluationId,
    ) -> Result<Option<QualityEvaluation>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .evaluations
            .iter()
            .find(|evaluation| {
                &evaluation.project_id == project_id && &evaluation.id == evaluation_id
            })
            .cloned())
    }

    fn list_evaluations(
        &self,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<Vec<QualityEvaluation>, RepositoryError> {
        let state = self.lock()?;
        let mut matching: Vec<QualityEvaluation> = state
            .evaluations
            .iter()
            .filter(|evaluation| {
                &evaluation.project_id == project_id
                    && &evaluation.dataset_version_id == version_id
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.evaluated_at.cmp(&a.evaluated_at));
        Ok(matching)
    }
}

// ============================================================================
// SECTION: Run Repositories
// ============================================================================

impl RunRepository for InMemoryStore {
    fn create_or_get_run(
        &self,
        record: CreateRunRecord,
    ) -> Result<(Run, bool), RepositoryError> {
        let mut state = self.lock()?;
        let key = (record.project_id.to_string(), record.idempotency_key.to_string());
        if let Some(run_id) = state.run_keys.get(&key) {
            let existing = state
                .runs
                .get(run_id)
                .cloned()
                .ok_or_else(|| RepositoryError::Store("idempotency index desync".to_string()))?;
            if existing.spec_hash.value == record.spec_hash.value {
                return Ok((existing, false));
            }
            return Err(RepositoryError::IdempotencyConflict(
                record.idempotency_key.to_string(),
            ));
        }
        let run = Run {
            id: record.id.clone(),
            project_id: record.project_id,
            idempotency_key: record.idempotency_key,
            status: RunState::Created,
            spec_hash: record.spec_hash,
            pipeline_spec: record.pipeline_spec,
            run_spec: record.run_spec,
            created_at: record.created_at,
        };
        state.run_keys.insert(key, run.id.to_string());
        state.runs.insert(run.id.to_string(), run.clone());
        Ok((run, true))
    }

    fn get_run(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Option<Run>, RepositoryError> {
        Ok(self
            .lock()?
            .runs
            .get(run_id.as_str())
            .filter(|run| &run.project_id == project_id)
            .cloned())
    }

    fn list_runs(&self, project_id: &ProjectId) -> Result<Vec<Run>, RepositoryError> {
        let state = self.lock()?;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|run| &run.project_id == project_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    fn update_derived_status(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
        next: RunState,
        audit: Option<NewAuditEvent>,
    ) -> Result<StatusTransition, RepositoryError> {
        let mut state = self.lock()?;
        let previous = state
            .runs
            .get(run_id.as_str())
            .filter(|run| &run.project_id == project_id)
            .map(|run| run.status)
            .ok_or(RepositoryError::NotFound)?;

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

        if let Some(run) = state.runs.get_mut(run_id.as_str()) {
            run.status = next;
        }
        if let Some(event) = audit {
            append_audit_locked(&mut state, event)?;
        }
        Ok(StatusTransition {
            previous,
            changed: true,
        })
    }
}

impl PlanRepository for InMemoryStore {
    fn put_plan(&self, plan: &ExecutionPlan) -> Result<(), RepositoryError> {
        self.lock()?.plans.insert(plan.run_id.to_string(), plan.clone());
        Ok(())
    }

    fn get_plan(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Option<ExecutionPlan>, RepositoryError> {
        Ok(self
            .lock()?
            .plans
            .get(run_id.as_str())
            .filter(|plan| &plan.project_id == project_id)
            .cloned())
    }
}

impl StepExecutionRepository for InMemoryStore {
    fn insert_attempt(
        &self,
        record: &StepExecutionRecord,
    ) -> Result<(StepExecutionRecord, bool), RepositoryError> {
        let mut state = self.lock()?;
        let key = (
            record.run_id.to_string(),
            record.step_name.to_string(),
            record.attempt,
        );
        if let Some(existing) = state.step_records.get(&key) {
            return Ok((existing.clone(), false));
        }
        state.step_records.insert(key, record.clone());
        Ok((record.clone(), true))
    }

    fn list_for_run(
        &self,
        project_id: &ProjectId,
        run_id: &RunId,
    ) -> Result<Vec<StepExecutionRecord>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .step_records
            .values()
            .filter(|record| {
                &record.project_id == project_id && &record.run_id == run_id
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Ledgers
// ============================================================================

/// Appends an audit event under the held lock, honouring transition dedupe.
///
/// A replayed transition (same resource id and payload idempotency key)
/// returns the original row without inserting.
fn append_audit_locked(
    state: &mut StoreState,
    event: NewAuditEvent,
) -> Result<AuditEvent, RepositoryError> {
    if let Some(key) = event.idempotency_key() {
        let dedupe = (event.resource_id.clone(), key.to_string());
        if state.audit_dedupe.contains(&dedupe) {
            let existing = state
                .audit
                .iter()
                .find(|stored| {
                    stored.resource_id == dedupe.0
                        && stored.payload.get("idempotency_key").and_then(serde_json::Value::as_str)
                            == Some(dedupe.1.as_str())
                })
                .cloned();
            return existing
                .ok_or_else(|| RepositoryError::AuditFailed("dedupe index desync".to_string()));
        }
        state.audit_dedupe.insert(dedupe);
    }
    state.next_audit_id += 1;
    let stored = event.into_event(state.next_audit_id);
    state.audit.push(stored.clone());
    Ok(stored)
}

impl AuditLedger for InMemoryStore {
    fn append_audit(&self, event: NewAuditEvent) -> Result<AuditEvent, RepositoryError> {
        let mut state = self.lock()?;
        append_audit_locked(&mut state, event)
    }

    fn get_audit(
        &self,
        project_id: &ProjectId,
        event_id: u64,
    ) -> Result<Option<AuditEvent>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .audit
            .iter()
            .find(|event| event.event_id == event_id && &event.project_id == project_id)
            .cloned())
    }

    fn list_audit(
        &self,
        project_id: &ProjectId,
        query: &LedgerQuery,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let state = self.lock()?;
        let mut events: Vec<AuditEvent> = state
            .audit
            .iter()
            .filter(|event| &event.project_id == project_id)
            .filter(|event| query.from.is_none_or(|from| event.occurred_at >= from))
            .filter(|event| query.to.is_none_or(|to| event.occurred_at <= to))
            .filter(|event| query.after_event_id.is_none_or(|after| event.event_id > after))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.event_id);
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }
}

impl LineageLedger for InMemoryStore {
    fn append_lineage(&self, event: NewLineageEvent) -> Result<LineageEvent, RepositoryError> {
        let mut state = self.lock()?;
        state.next_lineage_id += 1;
        let stored = event.into_event(state.next_lineage_id);
        state.lineage.push(stored.clone());
        Ok(stored)
    }

    fn list_lineage(
        &self,
        project_id: &ProjectId,
        query: &LedgerQuery,
    ) -> Result<Vec<LineageEvent>, RepositoryError> {
        let state = self.lock()?;
        let mut events: Vec<LineageEvent> = state
            .lineage
            .iter()
            .filter(|event| &event.project_id == project_id)
            .filter(|event| query.from.is_none_or(|from| event.occurred_at >= from))
            .filter(|event| query.to.is_none_or(|to| event.occurred_at <= to))
            .filter(|event| query.after_event_id.is_none_or(|after| event.event_id > after))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.event_id);
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    fn subgraph(
        &self,
        project_id: &ProjectId,
        node: &str,
    ) -> Result<Vec<LineageEvent>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .lineage
            .iter()
            .filter(|event| {
                &event.project_id == project_id
                    && (event.subject == node || event.object == node)
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: In-Memory Object Store
// ============================================================================

/// In-memory object store for tests and examples.
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    /// Object map protected by a mutex.
    objects: Arc<Mutex<BTreeMap<(ObjectBucket, String), Bytes>>>,
}

impl InMemoryObjectStore {
    /// Creates an empty object store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the map, mapping poisoning into a backend error.
    fn lock(
        &self,
    ) -> Result<MutexGuard<'_, BTreeMap<(ObjectBucket, String), Bytes>>, ObjectStoreError> {
        self.objects
            .lock()
            .map_err(|_| ObjectStoreError::Backend("object store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        bytes: Bytes,
    ) -> Result<(), ObjectStoreError> {
        self.lock()?.insert((bucket, key.to_string()), bytes);
        Ok(())
    }

    async fn get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<Bytes, ObjectStoreError> {
        self.lock()?
            .get(&(bucket, key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn delete(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
    ) -> Result<(), ObjectStoreError> {
        self.lock()?.remove(&(bucket, key.to_string()));
        Ok(())
    }

    async fn presign_put(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        Ok(PresignedUrl {
            url: format!("memory://{}/{key}?expires={expires_in_seconds}", bucket.as_str()),
            method: "PUT".to_string(),
            expires_in_seconds,
        })
    }

    async fn presign_get(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        expires_in_seconds: u64,
    ) -> Result<PresignedUrl, ObjectStoreError> {
        Ok(PresignedUrl {
            url: format!("memory://{}/{key}?expires={expires_in_seconds}", bucket.as_str()),
            method: "GET".to_string(),
            expires_in_seconds,
        })
    }
}
