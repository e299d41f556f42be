// crates/datapilot-core/src/core/error.rs
// ============================================================================
// Module: DataPilot Error Taxonomy
// Description: Stable wire error codes and their HTTP status mapping.
// Purpose: Keep error symbols identical across the core, stores, and gateway.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every externally observable failure maps to one stable wire symbol. The
//! symbols are part of the public contract: clients match on them, and the
//! gateway derives HTTP status codes from them. Field-presence failures use
//! the `<field>_required` convention built by [`required_code`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Stable wire error codes for DataPilot surfaces.
///
/// # Invariants
/// - Wire symbols never change once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request body is not valid JSON.
    InvalidJson,
    /// Metadata document is malformed.
    InvalidMetadata,
    /// Multipart upload is malformed.
    InvalidMultipart,
    /// Time window is inverted or unparsable.
    InvalidTimeRange,
    /// Query or path parameters are invalid.
    InvalidParams,
    /// Metrics payload is invalid.
    InvalidMetrics,
    /// Caller is not authenticated.
    Unauthenticated,
    /// Caller is authenticated but not permitted.
    Forbidden,
    /// Resource does not exist in the project scope.
    NotFound,
    /// Idempotency key reused with a different spec hash.
    IdempotencyConflict,
    /// Identical content already exists for the dataset.
    DuplicateContent,
    /// Run state transition is not allowed by the lifecycle table.
    InvalidTransition,
    /// Dataset version has no quality rule bound.
    QualityRuleNotSet,
    /// Dataset version has no evaluation for its rule.
    QualityNotEvaluated,
    /// Latest evaluation is not a pass verdict.
    QualityGateFailed,
    /// Attempted mutation of an immutable field.
    Immutable,
    /// Upload to the object store failed.
    UploadFailed,
    /// Object store backend reported an error.
    ObjectStoreError,
    /// Unclassified internal failure.
    InternalError,
    /// Audit append failed; the enclosing transaction rolled back.
    AuditFailed,
    /// Lineage append failed; the enclosing transaction rolled back.
    LineageWriteFailed,
    /// Audit export is not configured.
    ExportNotConfigured,
    /// Audit export destination is not supported.
    ExportDestinationUnsupported,
    /// Audit export format is not supported.
    ExportFormatUnsupported,
}

impl ErrorCode {
    /// Returns the stable wire symbol.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::InvalidMetadata => "invalid_metadata",
            Self::InvalidMultipart => "invalid_multipart",
            Self::InvalidTimeRange => "invalid_time_range",
            Self::InvalidParams => "invalid_params",
            Self::InvalidMetrics => "invalid_metrics",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::IdempotencyConflict => "idempotency_conflict",
            Self::DuplicateContent => "duplicate_content",
            Self::InvalidTransition => "invalid_transition",
            Self::QualityRuleNotSet => "quality_rule_not_set",
            Self::QualityNotEvaluated => "quality_not_evaluated",
            Self::QualityGateFailed => "quality_gate_failed",
            Self::Immutable => "immutable",
            Self::UploadFailed => "upload_failed",
            Self::ObjectStoreError => "object_store_error",
            Self::InternalError => "internal_error",
            Self::AuditFailed => "audit_failed",
            Self::LineageWriteFailed => "lineage_write_failed",
            Self::ExportNotConfigured => "export_not_configured",
            Self::ExportDestinationUnsupported => "export_destination_unsupported",
            Self::ExportFormatUnsupported => "export_format_unsupported",
        }
    }

    /// Returns the HTTP status the gateway maps this code to.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidJson
            | Self::InvalidMetadata
            | Self::InvalidMultipart
            | Self::InvalidTimeRange
            | Self::InvalidParams
            | Self::InvalidMetrics => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::IdempotencyConflict
            | Self::DuplicateContent
            | Self::InvalidTransition
            | Self::QualityRuleNotSet
            | Self::QualityNotEvaluated
            | Self::QualityGateFailed
            | Self::Immutable => 409,
            Self::UploadFailed | Self::ObjectStoreError => 502,
            Self::InternalError | Self::AuditFailed | Self::LineageWriteFailed => 500,
            Self::ExportNotConfigured
            | Self::ExportDestinationUnsupported
            | Self::ExportFormatUnsupported => 501,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Required Fields
// ============================================================================

/// Builds the `<field>_required` wire code for a missing field (HTTP 400).
#[must_use]
pub fn required_code(field: &str) -> String {
    format!("{field}_required")
}
