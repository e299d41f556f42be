// crates/datapilot-core/src/core/project.rs
// ============================================================================
// Module: DataPilot Projects and Datasets
// Description: Project, dataset, and dataset-version entities.
// Purpose: Model the isolation boundary and immutable content snapshots.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Projects are the hard isolation boundary: every entity carries a
//! `ProjectId` and cross-project references are forbidden. Datasets are named
//! containers; dataset versions are immutable, content-addressed snapshots
//! whose ordinal is allocated under a dataset row lock at insert time.
//!
//! Each entity hashes a fixed tuple of semantic fields (never the wire JSON)
//! into `integrity_sha256`; `verify_integrity` recomputes and compares.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::DatasetId;
use crate::core::identifiers::DatasetVersionId;
use crate::core::identifiers::ObjectKey;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::QualityRuleId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Open metadata map attached to entities.
///
/// Keys are ordered so canonical serialization is stable.
pub type Metadata = BTreeMap<String, Value>;

// ============================================================================
// SECTION: Project
// ============================================================================

/// Project entity: the hard isolation boundary.
///
/// # Invariants
/// - Identity is immutable after creation.
/// - `name` is unique across the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier.
    pub id: ProjectId,
    /// Unique project name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Open metadata map.
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Creating actor.
    pub created_by: String,
    /// Integrity hash over the semantic field tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic field tuple hashed into a project's integrity digest.
#[derive(Serialize)]
struct ProjectIntegrityFields<'a> {
    /// Project identifier.
    id: &'a ProjectId,
    /// Unique project name.
    name: &'a str,
    /// Human-readable description.
    description: &'a str,
    /// Open metadata map.
    metadata: &'a Metadata,
    /// Creation timestamp.
    created_at: &'a Timestamp,
    /// Creating actor.
    created_by: &'a str,
}

impl Project {
    /// Creates a project and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn new(
        id: ProjectId,
        name: impl Into<String>,
        description: impl Into<String>,
        metadata: Metadata,
        created_at: Timestamp,
        created_by: impl Into<String>,
    ) -> Result<Self, HashError> {
        let name = name.into();
        let description = description.into();
        let created_by = created_by.into();
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &ProjectIntegrityFields {
                id: &id,
                name: &name,
                description: &description,
                metadata: &metadata,
                created_at: &created_at,
                created_by: &created_by,
            },
        )?;
        Ok(Self {
            id,
            name,
            description,
            metadata,
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
            &ProjectIntegrityFields {
                id: &self.id,
                name: &self.name,
                description: &self.description,
                metadata: &self.metadata,
                created_at: &self.created_at,
                created_by: &self.created_by,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}

// ============================================================================
// SECTION: Dataset
// ============================================================================

/// Dataset entity: a named container within a project.
///
/// # Invariants
/// - `name` is unique within the project.
/// - Treated as immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset identifier.
    pub id: DatasetId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Unique-in-project dataset name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Open metadata map.
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Creating actor.
    pub created_by: String,
    /// Integrity hash over the semantic field tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic field tuple hashed into a dataset's integrity digest.
#[derive(Serialize)]
struct DatasetIntegrityFields<'a> {
    /// Dataset identifier.
    id: &'a DatasetId,
    /// Owning project identifier.
    project_id: &'a ProjectId,
    /// Unique-in-project dataset name.
    name: &'a str,
    /// Human-readable description.
    description: &'a str,
    /// Open metadata map.
    metadata: &'a Metadata,
    /// Creation timestamp.
    created_at: &'a Timestamp,
    /// Creating actor.
    created_by: &'a str,
}

impl Dataset {
    /// Creates a dataset and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn new(
        id: DatasetId,
        project_id: ProjectId,
        name: impl Into<String>,
        description: impl Into<String>,
        metadata: Metadata,
        created_at: Timestamp,
        created_by: impl Into<String>,
    ) -> Result<Self, HashError> {
        let name = name.into();
        let description = description.into();
        let created_by = created_by.into();
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &DatasetIntegrityFields {
                id: &id,
                project_id: &project_id,
                name: &name,
                description: &description,
                metadata: &metadata,
                created_at: &created_at,
                created_by: &created_by,
            },
        )?;
        Ok(Self {
            id,
            project_id,
            name,
            description,
            metadata,
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
            &DatasetIntegrityFields {
                id: &self.id,
                project_id: &self.project_id,
                name: &self.name,
                description: &self.description,
                metadata: &self.metadata,
                created_at: &self.created_at,
                created_by: &self.created_by,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}

// ============================================================================
// SECTION: Dataset Version
// ============================================================================

/// Immutable content-addressed snapshot of a dataset.
///
/// # Invariants
/// - No field changes after insert.
/// - `ordinal` is strictly monotonic within the dataset, allocated under a
///   dataset row lock.
/// - `(dataset_id, content_sha256)` is unique; duplicates fail with
///   `duplicate_content`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVersion {
    /// Version identifier.
    pub id: DatasetVersionId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Parent dataset identifier.
    pub dataset_id: DatasetId,
    /// Monotonic ordinal within the dataset, assigned at insert.
    pub ordinal: u64,
    /// SHA-256 of the uploaded bytes.
    pub content_sha256: HashDigest,
    /// Object-store key for the uploaded bytes.
    pub object_key: ObjectKey,
    /// Uploaded size in bytes.
    pub size_bytes: u64,
    /// Optional quality rule binding.
    pub quality_rule_id: Option<QualityRuleId>,
    /// Open metadata map (filename, content type, content hash).
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Creating actor.
    pub created_by: String,
    /// Integrity hash over the semantic field tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic field tuple hashed into a dataset version's integrity digest.
#[derive(Serialize)]
struct DatasetVersionIntegrityFields<'a> {
    /// Version identifier.
    id: &'a DatasetVersionId,
    /// Owning project identifier.
    project_id: &'a ProjectId,
    /// Parent dataset identifier.
    dataset_id: &'a DatasetId,
    /// Monotonic ordinal within the dataset.
    ordinal: u64,
    /// SHA-256 of the uploaded bytes.
    content_sha256: &'a HashDigest,
    /// Object-store key for the uploaded bytes.
    object_key: &'a ObjectKey,
    /// Uploaded size in bytes.
    size_bytes: u64,
    /// Optional quality rule binding.
    quality_rule_id: &'a Option<QualityRuleId>,
    /// Open metadata map.
    metadata: &'a Metadata,
    /// Creation timestamp.
    created_at: &'a Timestamp,
    /// Creating actor.
    created_by: &'a str,
}

/// Insert payload for a dataset version before ordinal allocation.
///
/// # Invariants
/// - The repository allocates `ordinal` and computes the integrity digest.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDatasetVersion {
    /// Version identifier.
    pub id: DatasetVersionId,
    /// SHA-256 of the uploaded bytes.
    pub content_sha256: HashDigest,
    /// Object-store key for the uploaded bytes.
    pub object_key: ObjectKey,
    /// Uploaded size in bytes.
    pub size_bytes: u64,
    /// Optional quality rule binding.
    pub quality_rule_id: Option<QualityRuleId>,
    /// Open metadata map.
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Creating actor.
    pub created_by: String,
}

impl DatasetVersion {
    /// Materialises a version from an insert payload and an allocated ordinal.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn from_new(
        new: NewDatasetVersion,
        project_id: ProjectId,
        dataset_id: DatasetId,
        ordinal: u64,
    ) -> Result<Self, HashError> {
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &DatasetVersionIntegrityFields {
                id: &new.id,
                project_id: &project_id,
                dataset_id: &dataset_id,
                ordinal,
                content_sha256: &new.content_sha256,
                object_key: &new.object_key,
                size_bytes: new.size_bytes,
                quality_rule_id: &new.quality_rule_id,
                metadata: &new.metadata,
                created_at: &new.created_at,
                created_by: &new.created_by,
            },
        )?;
        Ok(Self {
            id: new.id,
            project_id,
            dataset_id,
            ordinal,
            content_sha256: new.content_sha256,
            object_key: new.object_key,
            size_bytes: new.size_bytes,
            quality_rule_id: new.quality_rule_id,
            metadata: new.metadata,
            created_at: new.created_at,
            created_by: new.created_by,
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
            &DatasetVersionIntegrityFields {
                id: &self.id,
                project_id: &self.project_id,
                dataset_id: &self.dataset_id,
                ordinal: self.ordinal,
                content_sha256: &self.content_sha256,
                object_key: &self.object_key,
                size_bytes: self.size_bytes,
                quality_rule_id: &self.quality_rule_id,
                metadata: &self.metadata,
                created_at: &self.created_at,
                created_by: &self.created_by,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}
