// crates/datapilot-core/src/core/audit.rs
// ============================================================================
// Module: DataPilot Audit and Lineage Events
// Description: Append-only, integrity-hashed ledger entry types.
// Purpose: Capture every write and cross-entity relation for regulated replay.
// Dependencies: crate::core::{hashing, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! Every write surface appends an audit event in the same transaction as the
//! domain write; every cross-entity relation appends a lineage event. Events
//! are never updated or deleted. The integrity digest covers the canonical
//! payload plus the semantic headers, so a tampered row fails verification.
//!
//! Correlation: one request identifier is propagated on the calling context
//! and copied into every event that request produces.

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
use crate::core::identifiers::ProjectId;
use crate::core::identifiers::RequestId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Action Names
// ============================================================================

/// Stable audit action names.
pub mod actions {
    /// Run gained a plan.
    pub const RUN_PLANNED: &str = "run.planned";
    /// Dry-run started.
    pub const DRY_RUN_STARTED: &str = "dry_run.started";
    /// Dry-run completed successfully.
    pub const DRY_RUN_COMPLETED: &str = "dry_run.completed";
    /// Dry-run failed.
    pub const DRY_RUN_FAILED: &str = "dry_run.failed";
    /// Run created.
    pub const RUN_CREATED: &str = "run.created";
    /// Quality gate allowed a consumption.
    pub const QUALITY_GATE_ALLOW: &str = "quality_gate.allow";
    /// Quality gate blocked a consumption.
    pub const QUALITY_GATE_BLOCK: &str = "quality_gate.block";
    /// Authentication or authorization denial at the boundary.
    pub const AUTH_DENIED: &str = "auth.denied";
    /// Project created.
    pub const PROJECT_CREATED: &str = "project.created";
    /// Dataset created.
    pub const DATASET_CREATED: &str = "dataset.created";
    /// Dataset version uploaded.
    pub const DATASET_VERSION_CREATED: &str = "dataset_version.created";
    /// Dataset version download authorized.
    pub const DATASET_VERSION_DOWNLOADED: &str = "dataset_version.downloaded";
    /// Artifact registered.
    pub const ARTIFACT_CREATED: &str = "artifact.created";
    /// Artifact retention fields updated.
    pub const ARTIFACT_RETENTION_UPDATED: &str = "artifact.retention_updated";
    /// Quality rule created.
    pub const QUALITY_RULE_CREATED: &str = "quality_rule.created";
    /// Quality evaluation appended.
    pub const QUALITY_EVALUATED: &str = "quality.evaluated";
}

/// Stable lineage predicates.
pub mod predicates {
    /// Dataset owns a version.
    pub const HAS_VERSION: &str = "has_version";
    /// Run consumes a dataset version.
    pub const CONSUMES: &str = "consumes";
    /// Evaluation judges a dataset version.
    pub const EVALUATES: &str = "evaluates";
}

// ============================================================================
// SECTION: Audit Info
// ============================================================================

/// Caller identity and correlation data carried into every audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditInfo {
    /// Acting subject.
    pub actor: String,
    /// Request identifier copied into every event the request produces.
    pub request_id: RequestId,
    /// Caller IP when known.
    pub ip: Option<String>,
    /// Caller user agent when known.
    pub user_agent: Option<String>,
}

impl AuditInfo {
    /// Builds audit info for an internal (system) actor.
    #[must_use]
    pub fn system(request_id: RequestId) -> Self {
        Self {
            actor: "system".to_string(),
            request_id,
            ip: None,
            user_agent: None,
        }
    }
}

// ============================================================================
// SECTION: Audit Events
// ============================================================================

/// Append-only audit event.
///
/// # Invariants
/// - `event_id` is assigned monotonically by the ledger and totally orders
///   export.
/// - Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic event identifier assigned by the ledger.
    pub event_id: u64,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Event timestamp.
    pub occurred_at: Timestamp,
    /// Acting subject.
    pub actor: String,
    /// Action name.
    pub action: String,
    /// Resource type label.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Request identifier for correlation.
    pub request_id: RequestId,
    /// Caller IP when known.
    pub ip: Option<String>,
    /// Caller user agent when known.
    pub user_agent: Option<String>,
    /// Free-form structured payload.
    pub payload: Value,
    /// Integrity hash over the canonical payload plus semantic headers.
    pub integrity_sha256: HashDigest,
}

/// Audit event awaiting ledger insertion (no event id yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Event timestamp.
    pub occurred_at: Timestamp,
    /// Acting subject.
    pub actor: String,
    /// Action name.
    pub action: String,
    /// Resource type label.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Request identifier for correlation.
    pub request_id: RequestId,
    /// Caller IP when known.
    pub ip: Option<String>,
    /// Caller user agent when known.
    pub user_agent: Option<String>,
    /// Free-form structured payload.
    pub payload: Value,
    /// Integrity hash over the canonical payload plus semantic headers.
    pub integrity_sha256: HashDigest,
}

/// Semantic tuple hashed into an audit event's integrity digest.
#[derive(Serialize)]
struct AuditIntegrityFields<'a> {
    /// Acting subject.
    actor: &'a str,
    /// Action name.
    action: &'a str,
    /// Resource type label.
    resource_type: &'a str,
    /// Resource identifier.
    resource_id: &'a str,
    /// Request identifier.
    request_id: &'a RequestId,
    /// Caller IP.
    ip: &'a Option<String>,
    /// Caller user agent.
    user_agent: &'a Option<String>,
    /// Event timestamp.
    occurred_at: &'a Timestamp,
    /// Structured payload.
    payload: &'a Value,
}

/// Inputs required to construct an audit event.
#[derive(Debug, Clone)]
pub struct NewAuditEventParams {
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Event timestamp.
    pub occurred_at: Timestamp,
    /// Caller identity and correlation.
    pub info: AuditInfo,
    /// Action name.
    pub action: String,
    /// Resource type label.
    pub resource_type: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Structured payload.
    pub payload: Value,
}

impl NewAuditEvent {
    /// Builds an audit event and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn new(params: NewAuditEventParams) -> Result<Self, HashError> {
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &AuditIntegrityFields {
                actor: &params.info.actor,
                action: &params.action,
                resource_type: &params.resource_type,
                resource_id: &params.resource_id,
                request_id: &params.info.request_id,
                ip: &params.info.ip,
                user_agent: &params.info.user_agent,
                occurred_at: &params.occurred_at,
                payload: &params.payload,
            },
        )?;
        Ok(Self {
            project_id: params.project_id,
            occurred_at: params.occurred_at,
            actor: params.info.actor,
            action: params.action,
            resource_type: params.resource_type,
            resource_id: params.resource_id,
            request_id: params.info.request_id,
            ip: params.info.ip,
            user_agent: params.info.user_agent,
            payload: params.payload,
            integrity_sha256,
        })
    }

    /// Returns the transition idempotency key carried in the payload, if any.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.payload.get("idempotency_key").and_then(Value::as_str)
    }

    /// Materialises the ledger row once an event id is assigned.
    #[must_use]
    pub fn into_event(self, event_id: u64) -> AuditEvent {
        AuditEvent {
            event_id,
            project_id: self.project_id,
            occurred_at: self.occurred_at,
            actor: self.actor,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            request_id: self.request_id,
            ip: self.ip,
            user_agent: self.user_agent,
            payload: self.payload,
            integrity_sha256: self.integrity_sha256,
        }
    }
}

impl AuditEvent {
    /// Recomputes the integrity digest and compares it to the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn verify_integrity(&self) -> Result<bool, HashError> {
        let recomputed = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &AuditIntegrityFields {
                actor: &self.actor,
                action: &self.action,
                resource_type: &self.resource_type,
                resource_id: &self.resource_id,
                request_id: &self.request_id,
                ip: &self.ip,
                user_agent: &self.user_agent,
                occurred_at: &self.occurred_at,
                payload: &self.payload,
            },
        )?;
        Ok(recomputed == self.integrity_sha256)
    }
}

// ============================================================================
// SECTION: Lineage Events
// ============================================================================

/// Append-only lineage edge: subject → predicate → object.
///
/// # Invariants
/// - Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEvent {
    /// Monotonic event identifier assigned by the ledger.
    pub event_id: u64,
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Event timestamp.
    pub occurred_at: Timestamp,
    /// Subject node (for example `dataset:<id>`).
    pub subject: String,
    /// Relation predicate.
    pub predicate: String,
    /// Object node (for example `dataset_version:<id>`).
    pub object: String,
    /// Request identifier for correlation.
    pub request_id: RequestId,
    /// Free-form structured metadata.
    pub metadata: Value,
    /// Integrity hash over the semantic tuple.
    pub integrity_sha256: HashDigest,
}

/// Lineage event awaiting ledger insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineageEvent {
    /// Owning project identifier.
    pub project_id: ProjectId,
    /// Event timestamp.
    pub occurred_at: Timestamp,
    /// Subject node.
    pub subject: String,
    /// Relation predicate.
    pub predicate: String,
    /// Object node.
    pub object: String,
    /// Request identifier for correlation.
    pub request_id: RequestId,
    /// Free-form structured metadata.
    pub metadata: Value,
    /// Integrity hash over the semantic tuple.
    pub integrity_sha256: HashDigest,
}

/// Semantic tuple hashed into a lineage event's integrity digest.
#[derive(Serialize)]
struct LineageIntegrityFields<'a> {
    /// Subject node.
    subject: &'a str,
    /// Relation predicate.
    predicate: &'a str,
    /// Object node.
    object: &'a str,
    /// Request identifier.
    request_id: &'a RequestId,
    /// Event timestamp.
    occurred_at: &'a Timestamp,
    /// Structured metadata.
    metadata: &'a Value,
}

impl NewLineageEvent {
    /// Builds a lineage event and computes its integrity digest.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when canonical serialization fails.
    pub fn new(
        project_id: ProjectId,
        occurred_at: Timestamp,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        request_id: RequestId,
        metadata: Value,
    ) -> Result<Self, HashError> {
        let subject = subject.into();
        let predicate = predicate.into();
        let object = object.into();
        let integrity_sha256 = hash_canonical_json(
            DEFAULT_HASH_ALGORITHM,
            &LineageIntegrityFields {
                subject: &subject,
                predicate: &predicate,
                object: &object,
                request_id: &request_id,
                occurred_at: &occurred_at,
                metadata: &metadata,
            },
        )?;
        Ok(Self {
            project_id,
            occurred_at,
            subject,
            predicate,
            object,
            request_id,
            metadata,
            integrity_sha256,
        })
    }

    /// Materialises the ledger row once an event id is assigned.
    #[must_use]
    pub fn into_event(self, event_id: u64) -> LineageEvent {
        LineageEvent {
            event_id,
            project_id: self.project_id,
            occurred_at: self.occurred_at,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            request_id: self.request_id,
            metadata: self.metadata,
            integrity_sha256: self.integrity_sha256,
        }
    }
}
