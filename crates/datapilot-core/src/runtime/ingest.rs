// crates/datapilot-core/src/runtime/ingest.rs
// ============================================================================
// Module: DataPilot Ingest Flows
// Description: Dataset-version upload, artifact registration, and presigning.
// Purpose: Enforce content addressing, immutability, and gate interlocks.
// Dependencies: crate::{core, interfaces, runtime}, bytes, serde_json, sha2
// ============================================================================

//! ## Overview
//! Dataset-version upload hashes the payload while it streams to the object
//! store, then inserts the row under the serialized ordinal transaction. A
//! failed insert (including a `duplicate_content` conflict) deletes the
//! orphaned object before the error surfaces. Artifact creation is
//! two-phase: the row is registered with its declared digest, then the
//! client uploads directly through a presigned PUT.
//!
//! The download path runs the quality-gate interlock before presigning the
//! GET, so no pass verdict means no bytes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use bytes::Bytes;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

use crate::core::Artifact;
use crate::core::ArtifactId;
use crate::core::AuditInfo;
use crate::core::Clock;
use crate::core::DEFAULT_HASH_ALGORITHM;
use crate::core::Dataset;
use crate::core::DatasetId;
use crate::core::DatasetVersion;
use crate::core::DatasetVersionId;
use crate::core::ErrorCode;
use crate::core::HashAlgorithm;
use crate::core::HashDigest;
use crate::core::hashing::HashError;
use crate::core::Metadata;
use crate::core::NewAuditEvent;
use crate::core::NewAuditEventParams;
use crate::core::NewDatasetVersion;
use crate::core::NewLineageEvent;
use crate::core::ObjectKey;
use crate::core::ProjectId;
use crate::core::QualityRuleId;
use crate::core::RetentionUpdate;
use crate::core::actions;
use crate::core::predicates;
use crate::interfaces::ArtifactRepository;
use crate::interfaces::AuditLedger;
use crate::interfaces::DatasetRepository;
use crate::interfaces::DatasetVersionRepository;
use crate::interfaces::LineageLedger;
use crate::interfaces::ObjectBucket;
use crate::interfaces::ObjectStore;
use crate::interfaces::ObjectStoreError;
use crate::interfaces::PresignedUrl;
use crate::interfaces::QualityEvaluationRepository;
use crate::interfaces::RepositoryError;
use crate::runtime::gate::ConsumptionContext;
use crate::runtime::gate::GateError;
use crate::runtime::gate::QualityGate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default presigned URL validity window in seconds.
pub const DEFAULT_PRESIGN_SECONDS: u64 = 900;

/// Chunk size used when hashing a streamed payload.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ingest flow errors.
///
/// # Invariants
/// - Variants are stable and map onto wire error codes.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Parent dataset does not exist in the project scope.
    #[error("dataset not found")]
    DatasetNotFound,
    /// Dataset version does not exist in the project scope.
    #[error("dataset version not found")]
    VersionNotFound,
    /// Quality gate blocked the consumption.
    #[error(transparent)]
    Gate(#[from] GateError),
    /// Repository failure.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Object store failure.
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    /// Canonical hashing failure.
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl IngestError {
    /// Returns the wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::DatasetNotFound | Self::VersionNotFound => ErrorCode::NotFound,
            Self::Gate(error) => error.code(),
            Self::Repository(error) => error.code(),
            Self::ObjectStore(error) => error.code(),
            Self::Hash(_) => ErrorCode::InternalError,
        }
    }
}

// ============================================================================
// SECTION: Upload Request
// ============================================================================

/// Dataset-version upload request assembled from the multipart parts.
#[derive(Debug, Clone)]
pub struct VersionUpload {
    /// Version identifier.
    pub version_id: DatasetVersionId,
    /// Uploaded filename.
    pub filename: String,
    /// Declared content type.
    pub content_type: String,
    /// Optional quality rule binding.
    pub quality_rule_id: Option<QualityRuleId>,
    /// Caller metadata merged into the version metadata.
    pub metadata: Metadata,
    /// Creating actor.
    pub created_by: String,
}

/// Artifact registration request.
#[derive(Debug, Clone)]
pub struct ArtifactRegistration {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Artifact kind label.
    pub kind: String,
    /// Declared content type.
    pub content_type: String,
    /// Declared SHA-256 of the bytes the client will upload.
    pub sha256: String,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Open metadata map.
    pub metadata: Metadata,
    /// Creating actor.
    pub created_by: String,
}

// ============================================================================
// SECTION: Ingest Flows
// ============================================================================

/// Ingest flows over the repositories, ledgers, and object store.
pub struct IngestFlows<'a, D, V, E, R, A, L, C> {
    /// Dataset repository.
    datasets: &'a D,
    /// Dataset version repository.
    versions: &'a V,
    /// Quality evaluation repository.
    evaluations: &'a E,
    /// Artifact repository.
    artifacts: &'a R,
    /// Audit ledger.
    audit: &'a A,
    /// Lineage ledger.
    lineage: &'a L,
    /// Object store.
    store: &'a dyn ObjectStore,
    /// Injected clock.
    clock: &'a C,
}

impl<'a, D, V, E, R, A, L, C> IngestFlows<'a, D, V, E, R, A, L, C>
where
    D: DatasetRepository,
    V: DatasetVersionRepository,
    E: QualityEvaluationRepository,
    R: ArtifactRepository,
    A: AuditLedger,
    L: LineageLedger,
    C: Clock,
{
    /// Creates the ingest flows.
    #[allow(clippy::too_many_arguments, reason = "Flow wiring mirrors the storage surfaces.")]
    #[must_use]
    pub const fn new(
        datasets: &'a D,
        versions: &'a V,
        evaluations: &'a E,
        artifacts: &'a R,
        audit: &'a A,
        lineage: &'a L,
        store: &'a dyn ObjectStore,
        clock: &'a C,
    ) -> Self {
        Self {
            datasets,
            versions,
            evaluations,
            artifacts,
            audit,
            lineage,
            store,
            clock,
        }
    }

    /// Uploads a dataset version: hash, store, insert, audit, lineage.
    ///
    /// On any insert failure the stored object is deleted before the error
    /// surfaces, so no orphan bytes outlive a rolled-back row.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Repository`] with `duplicate_content` when the
    /// dataset already holds identical bytes, and other variants for store or
    /// ledger failures.
    pub async fn upload_dataset_version(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        dataset_id: &DatasetId,
        upload: VersionUpload,
        payload: Bytes,
    ) -> Result<DatasetVersion, IngestError> {
        let dataset: Dataset = self
            .datasets
            .get_dataset(project_id, dataset_id)?
            .ok_or(IngestError::DatasetNotFound)?;

        let content_sha256 = hash_streaming(DEFAULT_HASH_ALGORITHM, &payload);
        let size_bytes = u64::try_from(payload.len()).unwrap_or(u64::MAX);
        let object_key = ObjectKey::new(format!(
            "{project_id}/{dataset_id}/{}",
            content_sha256.value
        ));

        self.store.put(ObjectBucket::Datasets, &object_key, payload).await?;

        let mut metadata = upload.metadata;
        metadata.insert("filename".to_string(), json!(upload.filename));
        metadata.insert("content_type".to_string(), json!(upload.content_type));
        metadata.insert("content_sha256".to_string(), json!(content_sha256.value));

        let created_at = self.clock.now();
        let inserted = self.versions.create_version(
            project_id,
            dataset_id,
            NewDatasetVersion {
                id: upload.version_id,
                content_sha256,
                object_key: object_key.clone(),
                size_bytes,
                quality_rule_id: upload.quality_rule_id,
                metadata,
                created_at,
                created_by: upload.created_by,
            },
        );

        let version = match inserted {
            Ok(version) => version,
            Err(error) => {
                // Compensating delete: the row never committed.
                let _ = self.store.delete(ObjectBucket::Datasets, &object_key).await;
                return Err(error.into());
            }
        };

        let event = NewAuditEvent::new(NewAuditEventParams {
            project_id: project_id.clone(),
            occurred_at: created_at,
            info: info.clone(),
            action: actions::DATASET_VERSION_CREATED.to_string(),
            resource_type: "dataset_version".to_string(),
            resource_id: version.id.to_string(),
            payload: json!({
                "dataset_id": dataset.id.to_string(),
                "ordinal": version.ordinal,
                "content_sha256": version.content_sha256.value.clone(),
                "size_bytes": version.size_bytes,
            }),
        })?;
        self.audit.append_audit(event)?;

        let edge = NewLineageEvent::new(
            project_id.clone(),
            created_at,
            format!("dataset:{}", dataset.id),
            predicates::HAS_VERSION,
            format!("dataset_version:{}", version.id),
            info.request_id.clone(),
            json!({ "ordinal": version.ordinal }),
        )?;
        self.lineage.append_lineage(edge)?;

        Ok(version)
    }

    /// Authorizes a dataset-version download through the quality gate.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Gate`] when the interlock blocks the version.
    pub async fn authorize_version_download(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        version_id: &DatasetVersionId,
    ) -> Result<(DatasetVersion, PresignedUrl), IngestError> {
        let version = self
            .versions
            .get_version(project_id, version_id)?
            .ok_or(IngestError::VersionNotFound)?;

        let gate = QualityGate::new(self.evaluations, self.audit, self.clock);
        gate.enforce(info, &version, ConsumptionContext::Download)?;

        let url = self
            .store
            .presign_get(ObjectBucket::Datasets, &version.object_key, DEFAULT_PRESIGN_SECONDS)
            .await?;

        let event = NewAuditEvent::new(NewAuditEventParams {
            project_id: project_id.clone(),
            occurred_at: self.clock.now(),
            info: info.clone(),
            action: actions::DATASET_VERSION_DOWNLOADED.to_string(),
            resource_type: "dataset_version".to_string(),
            resource_id: version.id.to_string(),
            payload: json!({ "object_key": version.object_key.to_string() }),
        })?;
        self.audit.append_audit(event)?;

        Ok((version, url))
    }

    /// Registers an artifact row and presigns the client upload.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] when persistence or presigning fails.
    pub async fn register_artifact(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        registration: ArtifactRegistration,
    ) -> Result<(Artifact, PresignedUrl), IngestError> {
        let object_key = ObjectKey::new(format!(
            "{project_id}/{}/{}",
            registration.kind, registration.artifact_id
        ));
        let created_at = self.clock.now();
        let artifact = Artifact::new(
            registration.artifact_id,
            project_id.clone(),
            registration.kind,
            registration.content_type,
            object_key.clone(),
            HashDigest::from_hex(DEFAULT_HASH_ALGORITHM, registration.sha256),
            registration.size_bytes,
            registration.metadata,
            created_at,
            registration.created_by,
        )?;
        self.artifacts.insert_artifact(&artifact)?;

        let url = self
            .store
            .presign_put(ObjectBucket::Artifacts, &object_key, DEFAULT_PRESIGN_SECONDS)
            .await?;

        let event = NewAuditEvent::new(NewAuditEventParams {
            project_id: project_id.clone(),
            occurred_at: created_at,
            info: info.clone(),
            action: actions::ARTIFACT_CREATED.to_string(),
            resource_type: "artifact".to_string(),
            resource_id: artifact.id.to_string(),
            payload: json!({
                "kind": artifact.kind.clone(),
                "sha256": artifact.sha256.value.clone(),
                "size_bytes": artifact.size_bytes,
            }),
        })?;
        self.audit.append_audit(event)?;

        Ok((artifact, url))
    }

    /// Applies the only permitted artifact mutation and audits it.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Repository`] when the artifact is missing.
    pub fn update_artifact_retention(
        &self,
        info: &AuditInfo,
        project_id: &ProjectId,
        artifact_id: &ArtifactId,
        update: RetentionUpdate,
    ) -> Result<Artifact, IngestError> {
        let artifact = self.artifacts.update_retention(project_id, artifact_id, update)?;
        let event = NewAuditEvent::new(NewAuditEventParams {
            project_id: project_id.clone(),
            occurred_at: self.clock.now(),
            info: info.clone(),
            action: actions::ARTIFACT_RETENTION_UPDATED.to_string(),
            resource_type: "artifact".to_string(),
            resource_id: artifact.id.to_string(),
            payload: json!({
                "retention_until": update.retention_until.map(|ts| ts.to_rfc3339()),
                "legal_hold": update.legal_hold,
            }),
        })?;
        self.audit.append_audit(event)?;
        Ok(artifact)
    }

    /// Fetches object bytes and verifies them against a declared digest.
    ///
    /// Any ingesting reader must re-hash; a mismatch fails closed.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ObjectStore`] when the bytes cannot be read and
    /// [`IngestError::Repository`] with an immutability message on digest
    /// mismatch.
    pub async fn fetch_verified(
        &self,
        bucket: ObjectBucket,
        key: &ObjectKey,
        declared: &HashDigest,
    ) -> Result<Bytes, IngestError> {
        let data = self.store.get(bucket, key).await?;
        let actual = hash_streaming(DEFAULT_HASH_ALGORITHM, &data);
        if &actual != declared {
            return Err(IngestError::ObjectStore(ObjectStoreError::Backend(format!(
                "content hash mismatch for {key}: declared {} actual {}",
                declared.value, actual.value
            ))));
        }
        Ok(data)
    }
}

// ============================================================================
// SECTION: Streaming Hash
// ============================================================================

/// Hashes a payload in fixed-size chunks.
#[must_use]
pub fn hash_streaming(algorithm: HashAlgorithm, payload: &[u8]) -> HashDigest {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            for chunk in payload.chunks(HASH_CHUNK_BYTES) {
                hasher.update(chunk);
            }
            let digest = hasher.finalize();
            HashDigest::new(HashAlgorithm::Sha256, &digest)
        }
    }
}
