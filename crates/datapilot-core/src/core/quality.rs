// crates/datapilot-core/src/core/quality.rs
// ============================================================================
// Module: DataPilot Quality Rules
// Description: Quality rule documents, typed checks, and evaluation verdicts.
// Purpose: Model the rule schema and append-only evaluation records.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Quality rules are versioned, named JSON documents with schema tag
//! `animus.quality.rule.v1` containing an ordered sequence of typed checks.
//! Rules are immutable once created. Evaluations are append-only verdicts of
//! a rule applied to one dataset version; the latest verdict gates
//! consumption of that version.
//!
//! New check kinds are additive: the tagged variant keeps deserialization
//! closed while allowing the evaluator to grow.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::hash_canonical_json;
use crate::core::identifiers::DatasetVersionId;
use crate::core::identifiers::EvaluationId;
use crate::core::identifiers::ObjectKey;
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::QualityRuleId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Schema tag carried by every quality rule document.
pub const QUALITY_RULE_SCHEMA: &str = "animus.quality.rule.v1";

// ============================================================================
// SECTION: Checks
// ============================================================================

/// Typed quality check applied to a dataset version.
///
/// # Invariants
/// - Kinds are stable wire symbols; unknown kinds fail deserialization.
/// - Checks run in document order; the first hard failure decides `fail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityCheck {
    /// Uploaded size must be at least `min_bytes`.
    MinSizeBytes {
        /// Minimum accepted size in bytes.
        min_bytes: u64,
    },
    /// Declared content type must match exactly.
    ContentTypeEquals {
        /// Required content type.
        content_type: String,
    },
    /// Uploaded filename must end with the suffix.
    FilenameSuffix {
        /// Required filename suffix.
        suffix: String,
    },
    /// Version metadata must contain every listed key.
    RequiredMetadataKeys {
        /// Required metadata keys.
        keys: Vec<String>,
    },
    /// First CSV line of the object bytes must equal the column list.
    CsvHeaderEquals {
        /// Expected header columns in order.
        columns: Vec<String>,
    },
    /// Object bytes must re-hash to the recorded content SHA-256.
    VerifyContentSha256,
    /// Recorded content SHA-256 must appear in the allowlist.
    Sha256Allowlist {
        /// Allowed lowercase hex digests.
        allowed: Vec<String>,
    },
}

impl QualityCheck {
    /// Returns a stable label for the check kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MinSizeBytes {
                ..
            } => "min_size_bytes",
            Self::ContentTypeEquals {
                ..
            } => "content_type_equals",
            Self::FilenameSuffix {
                ..
            } => "filename_suffix",
            Self::RequiredMetadataKeys {
                ..
            } => "required_metadata_keys",
            Self::CsvHeaderEquals {
                ..
            } => "csv_header_equals",
            Self::VerifyContentSha256 => "verify_content_sha256",
            Self::Sha256Allowlist {
                ..
            } => "sha256_allowlist",
        }
    }
}

// ============================================================================
// SECTION: Quality Rule
// ============================================================================

/// Versioned, named quality rule document.
///
/// # Invariants
/// - Immutable once created.
/// - `schema` equals [`QUALITY_RULE_SCHEMA`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRule {
    /// Rule identifier.
    pub id: QualityRuleId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Rule name.
    pub name: String,
    /// Schema tag of the rule document.
    pub schema: String,
    /// Ordered checks applied during evaluation.
    pub checks: Vec<QualityCheck>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Creating actor.
    pub created_by: String,
    /// Integrity hash over the semantic field tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic field tuple hashed into a quality rule's integrity digest.
#[derive(Serialize)]
struct QualityRuleIntegrityFields<'a> {
    /// Rule identifier.
    id: &'a QualityRuleId,
    /// Owning project identifier.
    project_id: &'a ProjectId,
    /// Rule name.
    name: &'a str,
    /// Schema tag.
    schema: &'a str,
    /// Ordered checks.
    checks: &'a [QualityCheck],
    /// Creation timestamp.
    created_at: &'a Timestamp,
    /// Creating actor.
    created_by: &'a str,
}

impl QualityRule {
    /// Creates a rule document and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn new(
        id: QualityRuleId,
        project_id: ProjectId,
        name: impl Into<String>,
        checks: Vec<QualityCheck>,
        created_at: Timestamp,
        created_by: impl Into<String>,
    ) -> Result<Self, HashError> {
        let name = name.into();
        let created_by = created_by.into();
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &QualityRuleIntegrityFields {
                id: &id,
                project_id: &project_id,
                name: &name,
                schema: QUALITY_RULE_SCHEMA,
                checks: &checks,
                created_at: &created_at,
                created_by: &created_by,
            },
        )?;
        Ok(Self {
            id,
            project_id,
            name,
            schema: QUALITY_RULE_SCHEMA.to_string(),
            checks,
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
            &QualityRuleIntegrityFields {
                id: &self.id,
                project_id: &self.project_id,
                name: &self.name,
                schema: &self.schema,
                checks: &self.checks,
                created_at: &self.created_at,
                created_by: &self.created_by,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// Verdict of applying a rule to a dataset version.
///
/// # Invariants
/// - Variants are stable for serialization and gate matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    /// Every check passed.
    Pass,
    /// A check failed on the content or metadata.
    Fail,
    /// An operational failure (I/O, decoding) prevented a verdict.
    Error,
}

impl EvaluationStatus {
    /// Returns the stable wire label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// Append-only evaluation record for (dataset version, rule).
///
/// # Invariants
/// - Never updated or deleted; the latest row by `evaluated_at` decides the
///   gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityEvaluation {
    /// Evaluation identifier.
    pub id: EvaluationId,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Evaluated dataset version.
    pub dataset_version_id: DatasetVersionId,
    /// Rule applied.
    pub rule_id: QualityRuleId,
    /// Verdict.
    pub status: EvaluationStatus,
    /// Evaluation timestamp.
    pub evaluated_at: Timestamp,
    /// Object key of the stored report, when written.
    pub report_object_key: Option<ObjectKey>,
    /// SHA-256 of the stored report, when written.
    pub report_sha256: Option<HashDigest>,
    /// Structured per-check summary.
    pub summary: Value,
    /// Integrity hash over the semantic field tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic field tuple hashed into an evaluation's integrity digest.
#[derive(Serialize)]
struct EvaluationIntegrityFields<'a> {
    /// Evaluation identifier.
    id: &'a EvaluationId,
    /// Owning project identifier.
    project_id: &'a ProjectId,
    /// Evaluated dataset version.
    dataset_version_id: &'a DatasetVersionId,
    /// Rule applied.
    rule_id: &'a QualityRuleId,
    /// Verdict.
    status: EvaluationStatus,
    /// Evaluation timestamp.
    evaluated_at: &'a Timestamp,
    /// Object key of the stored report.
    report_object_key: &'a Option<ObjectKey>,
    /// SHA-256 of the stored report.
    report_sha256: &'a Option<HashDigest>,
    /// Structured per-check summary.
    summary: &'a Value,
}

impl QualityEvaluation {
    /// Creates an evaluation record and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    #[allow(clippy::too_many_arguments, reason = "Constructor mirrors the verdict payload.")]
    pub fn new(
        id: EvaluationId,
        project_id: ProjectId,
        dataset_version_id: DatasetVersionId,
        rule_id: QualityRuleId,
        status: EvaluationStatus,
        evaluated_at: Timestamp,
        report_object_key: Option<ObjectKey>,
        report_sha256: Option<HashDigest>,
        summary: Value,
    ) -> Result<Self, HashError> {
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &EvaluationIntegrityFields {
                id: &id,
                project_id: &project_id,
                dataset_version_id: &dataset_version_id,
                rule_id: &rule_id,
                status,
                evaluated_at: &evaluated_at,
                report_object_key: &report_object_key,
                report_sha256: &report_sha256,
                summary: &summary,
            },
        )?;
        Ok(Self {
            id,
            project_id,
            dataset_version_id,
            rule_id,
            status,
            evaluated_at,
            report_object_key,
            report_sha256,
            summary,
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
            &EvaluationIntegrityFields {
                id: &self.id,
                project_id: &self.project_id,
                dataset_version_id: &self.dataset_version_id,
                rule_id: &self.rule_id,
                status: self.status,
                evaluated_at: &self.evaluated_at,
                report_object_key: &self.report_object_key,
                report_sha256: &self.report_sha256,
                summary: &self.summary,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}
