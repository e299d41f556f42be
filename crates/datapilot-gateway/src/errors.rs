// crates/datapilot-gateway/src/errors.rs
// ============================================================================
// Module: Gateway Error Envelope
// Description: Wire error responses mapped from the core taxonomy.
// Purpose: Keep HTTP status and error symbols identical across surfaces.
// Dependencies: axum, datapilot-core, serde_json
// ============================================================================

//! ## Overview
//! Every failing request produces one JSON envelope `{code, message,
//! details?}` whose `code` is a stable wire symbol from the core taxonomy
//! (plus the `<field>_required` family) and whose HTTP status comes from the
//! same table. Validation failures attach the aggregated issue list as
//! `details`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use datapilot_core::ErrorCode;
use datapilot_core::GateError;
use datapilot_core::IngestError;
use datapilot_core::ObjectStoreError;
use datapilot_core::RepositoryError;
use datapilot_core::ServiceError;
use datapilot_core::ValidationError;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Error Envelope
// ============================================================================

/// Wire error response.
#[derive(Debug, Clone)]
pub struct ApiError {
    /// Stable wire code.
    pub code: String,
    /// HTTP status.
    pub status: u16,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details (validation issue lists).
    pub details: Option<Value>,
}

impl ApiError {
    /// Builds an envelope from a taxonomy code.
    #[must_use]
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.as_str().to_string(),
            status: code.http_status(),
            message: message.into(),
            details: None,
        }
    }

    /// Builds a `<field>_required` envelope (HTTP 400).
    #[must_use]
    pub fn required(field: &str) -> Self {
        Self {
            code: datapilot_core::required_code(field),
            status: 400,
            message: format!("{field} is required"),
            details: None,
        }
    }

    /// Builds a not-found envelope.
    #[must_use]
    pub fn not_found() -> Self {
        Self::from_code(ErrorCode::NotFound, "resource not found")
    }

    /// Builds an internal-error envelope.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InternalError, message)
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "code": self.code,
            "message": self.message,
            "details": self.details,
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// SECTION: Conversions
// ============================================================================

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let envelope = Self::from_code(error.code(), error.to_string());
        match error {
            ServiceError::Validation(validation) => attach_issues(envelope, &validation),
            _ => envelope,
        }
    }
}

impl From<GateError> for ApiError {
    fn from(error: GateError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

impl From<ObjectStoreError> for ApiError {
    fn from(error: ObjectStoreError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        let envelope = Self::from_code(ErrorCode::InvalidParams, error.to_string());
        attach_issues(envelope, &error)
    }
}

/// Attaches the aggregated issue list; a lone missing-field issue keeps its
/// `<field>_required` wire code.
fn attach_issues(mut envelope: ApiError, error: &ValidationError) -> ApiError {
    if let [only] = error.issues.as_slice()
        && only.code.ends_with("_required")
    {
        envelope.code = only.code.clone();
    }
    envelope.with_details(json!({ "issues": &error.issues }))
}
