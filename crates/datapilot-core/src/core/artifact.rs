// crates/datapilot-core/src/core/artifact.rs
// ============================================================================
// Module: DataPilot Artifacts
// Description: Project-scoped immutable blob records with retention controls.
// Purpose: Model artifact registration, content addressing, and legal holds.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Artifacts are project-scoped immutable blobs. The row is registered before
//! bytes are uploaded through a presigned PUT; any reader that ingests the
//! bytes must re-hash them against `sha256` and fail closed on mismatch. The
//! only mutable fields are `retention_until` and `legal_hold`; every other
//! change fails with `immutable`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::ObjectKey;
use crate::core::identifiers::ProjectId;
use crate::core::project::Metadata;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// Project-scoped immutable blob record.
///
/// # Invariants
/// - Bytes at `object_key` must hash to `sha256` before ingestion.
/// - Only `retention_until` and `legal_hold` may change after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identifier.
    pub id: ArtifactId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Artifact kind label (model, report, bundle, ...).
    pub kind: String,
    /// Declared content type.
    pub content_type: String,
    /// Object-store key for the uploaded bytes.
    pub object_key: ObjectKey,
    /// Declared SHA-256 of the bytes.
    pub sha256: HashDigest,
    /// Declared size in bytes.
    pub size_bytes: u64,
    /// Open metadata map.
    pub metadata: Metadata,
    /// Optional retention horizon.
    pub retention_until: Option<Timestamp>,
    /// Legal hold flag blocking deletion workflows.
    pub legal_hold: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Creating actor.
    pub created_by: String,
    /// Integrity hash over the semantic field tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic field tuple hashed into an artifact's integrity digest.
///
/// Retention fields are excluded: they are the only mutable fields and must
/// not invalidate the content-identity hash.
#[derive(Serialize)]
struct ArtifactIntegrityFields<'a> {
    /// Artifact identifier.
    id: &'a ArtifactId,
    /// Owning project identifier.
    project_id: &'a ProjectId,
    /// Artifact kind label.
    kind: &'a str,
    /// Declared content type.
    content_type: &'a str,
    /// Object-store key.
    object_key: &'a ObjectKey,
    /// Declared SHA-256 of the bytes.
    sha256: &'a HashDigest,
    /// Declared size in bytes.
    size_bytes: u64,
    /// Open metadata map.
    metadata: &'a Metadata,
    /// Creation timestamp.
    created_at: &'a Timestamp,
    /// Creating actor.
    created_by: &'a str,
}

impl Artifact {
    /// Creates an artifact record and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    #[allow(clippy::too_many_arguments, reason = "Constructor mirrors the registration payload.")]
    pub fn new(
        id: ArtifactId,
        project_id: ProjectId,
        kind: impl Into<String>,
        content_type: impl Into<String>,
        object_key: ObjectKey,
        sha256: HashDigest,
        size_bytes: u64,
        metadata: Metadata,
        created_at: Timestamp,
        created_by: impl Into<String>,
    ) -> Result<Self, HashError> {
        let kind = kind.into();
        let content_type = content_type.into();
        let created_by = created_by.into();
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &ArtifactIntegrityFields {
                id: &id,
                project_id: &project_id,
                kind: &kind,
                content_type: &content_type,
                object_key: &object_key,
                sha256: &sha256,
                size_bytes,
                metadata: &metadata,
                created_at: &created_at,
                created_by: &created_by,
            },
        )?;
        Ok(Self {
            id,
            project_id,
            kind,
            content_type,
            object_key,
            sha256,
            size_bytes,
            metadata,
            retention_until: None,
            legal_hold: false,
            created_at,
            created_by,
            integrity_sha256,
        })
    }

    /// Recomputes the integrity digest and compares it to the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn verify_integrity(&self) -> Result<bool, HashError> {
        let recomputed = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &ArtifactIntegrityFields {
                id: &self.id,
                project_id: &self.project_id,
                kind: &self.kind,
                content_type: &self.content_type,
                object_key: &self.object_key,
                sha256: &self.sha256,
                size_bytes: self.size_bytes,
                metadata: &self.metadata,
                created_at: &self.created_at,
                created_by: &self.created_by,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}

// ============================================================================
// SECTION: Retention Update
// ============================================================================

/// The only permitted artifact mutation: retention horizon and legal hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionUpdate {
    /// New retention horizon (`None` clears it).
    pub retention_until: Option<Timestamp>,
    /// New legal hold flag.
    pub legal_hold: bool,
}
