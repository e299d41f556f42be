// crates/datapilot-gateway/src/routes.rs
// ============================================================================
// Module: Gateway Routes
// Description: Project-scoped HTTP handlers for the control plane.
// Purpose: Authenticate, validate, delegate to the core, and map errors.
// Dependencies: axum, datapilot-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Every handler follows the same shape: verify the identity headers (a
//! denial is audited as `auth.denied`), check the project scope, delegate to
//! the core runtime, and map failures onto the wire error envelope. Handlers
//! hold no business logic; the core services own validation, gating,
//! transitions, and audit emission.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Extension;
use axum::Json;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use bytes::Bytes;
use datapilot_core::Artifact;
use datapilot_core::ArtifactId;
use datapilot_core::AuditInfo;
use datapilot_core::CreateRunInput;
use datapilot_core::Dataset;
use datapilot_core::DatasetId;
use datapilot_core::DatasetVersionId;
use datapilot_core::DryRunExecutor;
use datapilot_core::DryRunInput;
use datapilot_core::ErrorCode;
use datapilot_core::EvaluationId;
use datapilot_core::IdempotencyKey;
use datapilot_core::Metadata;
use datapilot_core::NewAuditEvent;
use datapilot_core::NewAuditEventParams;
use datapilot_core::NewLineageEvent;
use datapilot_core::PipelineSpec;
use datapilot_core::Project;
use datapilot_core::ProjectId;
use datapilot_core::QualityCheck;
use datapilot_core::QualityRule;
use datapilot_core::QualityRuleId;
use datapilot_core::RequestId;
use datapilot_core::RetentionUpdate;
use datapilot_core::RunCreator;
use datapilot_core::RunId;
use datapilot_core::RunService;
use datapilot_core::SeededOutcomeDecider;
use datapilot_core::Timestamp;
use datapilot_core::actions;
use datapilot_core::build_plan;
use datapilot_core::evaluate_rule;
use datapilot_core::interfaces::LedgerQuery;
use datapilot_core::predicates;
use datapilot_core::runtime::IngestFlows;
use datapilot_core::runtime::VersionUpload;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

use crate::correlation::generate_request_id;
use crate::errors::ApiError;
use crate::server::AppState;
use crate::server::GatewayStore;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Project scope header; must match the path scope when present.
const PROJECT_HEADER: &str = "x-project-id";

/// Forwarded caller address header set by the boundary gateway.
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

// ============================================================================
// SECTION: Authentication Helpers
// ============================================================================

/// Verifies identity headers and builds the request's audit info.
///
/// A verification failure appends an `auth.denied` event before surfacing
/// the 401 envelope, so the ledger records attempts.
fn authenticate<S: GatewayStore>(
    state: &AppState<S>,
    headers: &HeaderMap,
    request_id: &RequestId,
    project: Option<&ProjectId>,
) -> Result<AuditInfo, ApiError> {
    let ip = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    match state.verifier.verify(headers, state.clock.as_ref()) {
        Ok(identity) => {
            if let Some(project_id) = project
                && let Some(scope) =
                    headers.get(PROJECT_HEADER).and_then(|value| value.to_str().ok())
                && scope != project_id.as_str()
            {
                return Err(ApiError::from_code(
                    ErrorCode::Forbidden,
                    "project scope header does not match the path scope",
                ));
            }
            Ok(AuditInfo {
                actor: identity.subject,
                request_id: request_id.clone(),
                ip,
                user_agent,
            })
        }
        Err(error) => {
            let scope = project.cloned().unwrap_or_else(|| ProjectId::new("system"));
            let denial = NewAuditEvent::new(NewAuditEventParams {
                project_id: scope,
                occurred_at: state.clock.now(),
                info: AuditInfo {
                    actor: "anonymous".to_string(),
                    request_id: request_id.clone(),
                    ip,
                    user_agent,
                },
                action: actions::AUTH_DENIED.to_string(),
                resource_type: "gateway".to_string(),
                resource_id: "identity".to_string(),
                payload: json!({ "reason": error.to_string() }),
            });
            if let Ok(event) = denial {
                let _ = state.store.append_audit(event);
            }
            Err(ApiError::from_code(ErrorCode::Unauthenticated, error.to_string()))
        }
    }
}

/// Generates a fresh opaque entity identifier.
fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", generate_request_id())
}

// ============================================================================
// SECTION: Health
// ============================================================================

/// Liveness probe.
pub async fn healthz() -> &'static str {
    "ok"
}

/// Readiness probe: one bounded store round-trip.
pub async fn readyz<S: GatewayStore>(State(state): State<AppState<S>>) -> Response {
    match state.store.list_projects() {
        Ok(_) => (StatusCode::OK, "ready").into_response(),
        Err(error) => {
            ApiError::from_code(ErrorCode::InternalError, error.to_string()).into_response()
        }
    }
}

// ============================================================================
// SECTION: Projects
// ============================================================================

/// Create-project request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    /// Unique project name.
    name: String,
    /// Human-readable description.
    #[serde(default)]
    description: String,
    /// Open metadata map.
    #[serde(default)]
    metadata: Metadata,
}

/// Creates a project and audits the write.
pub async fn create_project<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Response, ApiError> {
    let info = authenticate(&state, &headers, &request_id, None)?;
    if body.name.is_empty() {
        return Err(ApiError::required("name"));
    }

    let project = Project::new(
        ProjectId::new(new_id("prj")),
        body.name,
        body.description,
        body.metadata,
        state.clock.now(),
        info.actor.clone(),
    )
    .map_err(|err| ApiError::internal(err.to_string()))?;
    state.store.insert_project(&project)?;

    append_entity_audit(
        &state,
        &info,
        &project.id,
        actions::PROJECT_CREATED,
        "project",
        project.id.as_str(),
        json!({ "name": project.name.clone() }),
    )?;
    Ok((StatusCode::CREATED, Json(project)).into_response())
}

/// Lists projects.
pub async fn list_projects<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
) -> Result<Json<Vec<Project>>, ApiError> {
    authenticate(&state, &headers, &request_id, None)?;
    Ok(Json(state.store.list_projects()?))
}

/// Loads one project.
pub async fn get_project<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Project>, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    state
        .store
        .get_project(&project_id)?
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

// ============================================================================
// SECTION: Datasets
// ============================================================================

/// Create-dataset request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDatasetRequest {
    /// Unique-in-project dataset name.
    name: String,
    /// Human-readable description.
    #[serde(default)]
    description: String,
    /// Open metadata map.
    #[serde(default)]
    metadata: Metadata,
}

/// Creates a dataset and audits the write.
pub async fn create_dataset<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(body): Json<CreateDatasetRequest>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    if body.name.is_empty() {
        return Err(ApiError::required("name"));
    }
    if state.store.get_project(&project_id)?.is_none() {
        return Err(ApiError::not_found());
    }

    let dataset = Dataset::new(
        DatasetId::new(new_id("dst")),
        project_id.clone(),
        body.name,
        body.description,
        body.metadata,
        state.clock.now(),
        info.actor.clone(),
    )
    .map_err(|err| ApiError::internal(err.to_string()))?;
    state.store.insert_dataset(&dataset)?;

    append_entity_audit(
        &state,
        &info,
        &project_id,
        actions::DATASET_CREATED,
        "dataset",
        dataset.id.as_str(),
        json!({ "name": dataset.name.clone() }),
    )?;
    Ok((StatusCode::CREATED, Json(dataset)).into_response())
}

/// Lists datasets in a project.
pub async fn list_datasets<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<Dataset>>, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    Ok(Json(state.store.list_datasets(&project_id)?))
}

/// Loads one dataset.
pub async fn get_dataset<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, dataset_id)): Path<(String, String)>,
) -> Result<Json<Dataset>, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    state
        .store
        .get_dataset(&project_id, &DatasetId::new(dataset_id))?
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

// ============================================================================
// SECTION: Dataset Versions
// ============================================================================

/// Metadata part of the multipart version upload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadataPart {
    /// Optional quality rule binding.
    quality_rule_id: Option<String>,
    /// Caller metadata merged into the version metadata.
    #[serde(default)]
    metadata: Metadata,
}

/// Uploads a dataset version (multipart: `metadata` part + `file` part).
pub async fn upload_version<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, dataset_id)): Path<(String, String)>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;

    let mut metadata_part = UploadMetadataPart::default();
    let mut file: Option<(String, String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::from_code(ErrorCode::InvalidMultipart, err.to_string()))?
    {
        let name = field.name().map(ToString::to_string);
        match name.as_deref() {
            Some("metadata") => {
                let raw = field.bytes().await.map_err(|err| {
                    ApiError::from_code(ErrorCode::InvalidMultipart, err.to_string())
                })?;
                metadata_part = serde_json::from_slice(&raw).map_err(|err| {
                    ApiError::from_code(ErrorCode::InvalidMetadata, err.to_string())
                })?;
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("upload.bin").to_string();
                let content_type =
                    field.content_type().unwrap_or("application/octet-stream").to_string();
                let payload = field.bytes().await.map_err(|err| {
                    ApiError::from_code(ErrorCode::InvalidMultipart, err.to_string())
                })?;
                file = Some((filename, content_type, payload));
            }
            _ => {}
        }
    }
    let (filename, content_type, payload) = file.ok_or_else(|| {
        ApiError::from_code(ErrorCode::InvalidMultipart, "missing file part")
    })?;

    let flows = ingest_flows(&state);
    let version = flows
        .upload_dataset_version(
            &info,
            &project_id,
            &DatasetId::new(dataset_id),
            VersionUpload {
                version_id: DatasetVersionId::new(new_id("dsv")),
                filename,
                content_type,
                quality_rule_id: metadata_part.quality_rule_id.map(QualityRuleId::new),
                metadata: metadata_part.metadata,
                created_by: info.actor.clone(),
            },
            payload,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(version)).into_response())
}

/// Lists versions of a dataset.
pub async fn list_versions<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, dataset_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let versions = state.store.list_versions(&project_id, &DatasetId::new(dataset_id))?;
    Ok(Json(versions).into_response())
}

/// Loads one dataset version.
pub async fn get_version<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, version_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    state
        .store
        .get_version(&project_id, &DatasetVersionId::new(version_id))?
        .map(|version| Json(version).into_response())
        .ok_or_else(ApiError::not_found)
}

/// Rejects every dataset-version mutation: rows are immutable.
pub async fn update_version<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, _version_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    Err(ApiError::from_code(
        ErrorCode::Immutable,
        "dataset versions are immutable after insert",
    ))
}

/// Authorizes a version download through the quality gate and presigns it.
pub async fn download_version<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, version_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let flows = ingest_flows(&state);
    let (version, url) = flows
        .authorize_version_download(&info, &project_id, &DatasetVersionId::new(version_id))
        .await?;
    Ok(Json(json!({ "version": version, "download": url })).into_response())
}

// ============================================================================
// SECTION: Quality Rules & Evaluations
// ============================================================================

/// Create-rule request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleRequest {
    /// Rule name.
    name: String,
    /// Ordered checks.
    checks: Vec<QualityCheck>,
}

/// Creates a quality rule and audits the write.
pub async fn create_rule<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(body): Json<CreateRuleRequest>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    if body.name.is_empty() {
        return Err(ApiError::required("name"));
    }

    let rule = QualityRule::new(
        QualityRuleId::new(new_id("qrl")),
        project_id.clone(),
        body.name,
        body.checks,
        state.clock.now(),
        info.actor.clone(),
    )
    .map_err(|err| ApiError::internal(err.to_string()))?;
    state.store.insert_rule(&rule)?;

    append_entity_audit(
        &state,
        &info,
        &project_id,
        actions::QUALITY_RULE_CREATED,
        "quality_rule",
        rule.id.as_str(),
        json!({ "name": rule.name.clone(), "checks": rule.checks.len() }),
    )?;
    Ok((StatusCode::CREATED, Json(rule)).into_response())
}

/// Lists quality rules.
pub async fn list_rules<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    Ok(Json(state.store.list_rules(&project_id)?).into_response())
}

/// Loads one quality rule.
pub async fn get_rule<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, rule_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    state
        .store
        .get_rule(&project_id, &QualityRuleId::new(rule_id))?
        .map(|rule| Json(rule).into_response())
        .ok_or_else(ApiError::not_found)
}

/// Evaluate-version request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// Rule to apply; defaults to the version's bound rule.
    rule_id: Option<String>,
}

/// Evaluates a rule against a version and appends the verdict.
pub async fn evaluate_version<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, version_id)): Path<(String, String)>,
    Json(body): Json<EvaluateRequest>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;

    let version = state
        .store
        .get_version(&project_id, &DatasetVersionId::new(version_id))?
        .ok_or_else(ApiError::not_found)?;
    let rule_id = body
        .rule_id
        .map(QualityRuleId::new)
        .or_else(|| version.quality_rule_id.clone())
        .ok_or_else(|| {
            ApiError::from_code(
                ErrorCode::QualityRuleNotSet,
                "dataset version has no quality rule bound",
            )
        })?;
    let rule =
        state.store.get_rule(&project_id, &rule_id)?.ok_or_else(ApiError::not_found)?;

    let evaluation = evaluate_rule(
        state.objects.as_ref(),
        &rule,
        &version,
        EvaluationId::new(new_id("qev")),
        state.clock.now(),
    )
    .await
    .map_err(|err| ApiError::internal(err.to_string()))?;
    state.store.insert_evaluation(&evaluation)?;

    append_entity_audit(
        &state,
        &info,
        &project_id,
        actions::QUALITY_EVALUATED,
        "quality_evaluation",
        evaluation.id.as_str(),
        json!({
            "dataset_version_id": version.id.to_string(),
            "rule_id": rule.id.to_string(),
            "status": evaluation.status.as_str(),
        }),
    )?;
    let edge = NewLineageEvent::new(
        project_id.clone(),
        evaluation.evaluated_at,
        format!("quality_evaluation:{}", evaluation.id),
        predicates::EVALUATES,
        format!("dataset_version:{}", version.id),
        info.request_id.clone(),
        json!({ "status": evaluation.status.as_str() }),
    )
    .map_err(|err| ApiError::internal(err.to_string()))?;
    state.store.append_lineage(edge)?;

    Ok((StatusCode::CREATED, Json(evaluation)).into_response())
}

/// Lists evaluations for a version.
pub async fn list_evaluations<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, version_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let evaluations =
        state.store.list_evaluations(&project_id, &DatasetVersionId::new(version_id))?;
    Ok(Json(evaluations).into_response())
}

// ============================================================================
// SECTION: Artifacts
// ============================================================================

/// Register-artifact request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterArtifactRequest {
    /// Artifact kind label.
    kind: String,
    /// Declared content type.
    content_type: String,
    /// Declared SHA-256 of the bytes (lowercase hex).
    sha256: String,
    /// Declared size in bytes.
    size_bytes: u64,
    /// Open metadata map.
    #[serde(default)]
    metadata: Metadata,
}

/// Registers an artifact row and returns the presigned PUT.
pub async fn register_artifact<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(body): Json<RegisterArtifactRequest>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    if body.kind.is_empty() {
        return Err(ApiError::required("kind"));
    }
    if body.sha256.len() != 64 {
        return Err(ApiError::from_code(
            ErrorCode::InvalidParams,
            "sha256 must be 64 lowercase hex characters",
        ));
    }

    let flows = ingest_flows(&state);
    let (artifact, upload) = flows
        .register_artifact(
            &info,
            &project_id,
            datapilot_core::runtime::ArtifactRegistration {
                artifact_id: ArtifactId::new(new_id("art")),
                kind: body.kind,
                content_type: body.content_type,
                sha256: body.sha256,
                size_bytes: body.size_bytes,
                metadata: body.metadata,
                created_by: info.actor.clone(),
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "artifact": artifact, "upload": upload })))
        .into_response())
}

/// Lists artifacts in a project.
pub async fn list_artifacts<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    Ok(Json(state.store.list_artifacts(&project_id)?).into_response())
}

/// Loads one artifact.
pub async fn get_artifact<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, artifact_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    state
        .store
        .get_artifact(&project_id, &ArtifactId::new(artifact_id))?
        .map(|artifact: Artifact| Json(artifact).into_response())
        .ok_or_else(ApiError::not_found)
}

/// Retention update request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionRequest {
    /// New retention horizon (RFC 3339), cleared when absent.
    retention_until: Option<String>,
    /// New legal hold flag.
    #[serde(default)]
    legal_hold: bool,
}

/// Applies the only permitted artifact mutation.
pub async fn update_artifact_retention<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, artifact_id)): Path<(String, String)>,
    Json(body): Json<RetentionRequest>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let retention_until = body
        .retention_until
        .map(|raw| {
            Timestamp::parse_rfc3339(&raw).map_err(|err| {
                ApiError::from_code(ErrorCode::InvalidParams, err.to_string())
            })
        })
        .transpose()?;

    let flows = ingest_flows(&state);
    let artifact = flows.update_artifact_retention(
        &info,
        &project_id,
        &ArtifactId::new(artifact_id),
        RetentionUpdate {
            retention_until,
            legal_hold: body.legal_hold,
        },
    )?;
    Ok(Json(artifact).into_response())
}

// ============================================================================
// SECTION: Runs
// ============================================================================

/// Create-run request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    /// Idempotency key unique within the project.
    idempotency_key: String,
    /// Pipeline specification document.
    pipeline_spec: Value,
    /// Run specification document.
    run_spec: Value,
}

/// Creates a run idempotently: 201 on insert, 200 on replay.
pub async fn create_run<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Json(body): Json<CreateRunRequest>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    if body.idempotency_key.is_empty() {
        return Err(ApiError::required("idempotency_key"));
    }

    let creator = RunCreator::new(
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        &state.clock,
    );
    let (run, created) = creator.create(
        &info,
        &project_id,
        CreateRunInput {
            run_id: RunId::new(new_id("run")),
            idempotency_key: IdempotencyKey::new(body.idempotency_key),
            pipeline_spec: body.pipeline_spec,
            run_spec: body.run_spec,
        },
    )?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(json!({ "run": run, "created": created }))).into_response())
}

/// Lists runs in a project.
pub async fn list_runs<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    Ok(Json(state.store.list_runs(&project_id)?).into_response())
}

/// Loads one run together with its freshly derived state.
pub async fn get_run<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, run_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let run_id = RunId::new(run_id);
    let run =
        state.store.get_run(&project_id, &run_id)?.ok_or_else(ApiError::not_found)?;

    let service = RunService::new(
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        &state.clock,
    );
    let report =
        service.derive_and_persist_with_audit(&info, &project_id, &run_id, &run.spec_hash)?;
    Ok(Json(json!({ "run": report.run, "state": report.next })).into_response())
}

/// Builds and stores the deterministic plan, then persists `planned`.
pub async fn plan_run<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, run_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let run_id = RunId::new(run_id);
    let run =
        state.store.get_run(&project_id, &run_id)?.ok_or_else(ApiError::not_found)?;

    let pipeline: PipelineSpec = serde_json::from_value(run.pipeline_spec.clone())
        .map_err(|err| ApiError::from_code(ErrorCode::InvalidJson, err.to_string()))?;
    let plan = build_plan(project_id.clone(), run_id.clone(), &pipeline, state.clock.now())
        .map_err(|err| ApiError::from_code(ErrorCode::InvalidParams, err.to_string()))?;
    state.store.put_plan(&plan)?;

    let service = RunService::new(
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        &state.clock,
    );
    let report =
        service.derive_and_persist_with_audit(&info, &project_id, &run_id, &run.spec_hash)?;
    Ok(Json(json!({ "plan": plan, "state": report.next })).into_response())
}

/// Executes the deterministic dry-run and persists the derived state.
pub async fn dry_run<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, run_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    let info = authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let run_id = RunId::new(run_id);
    let run =
        state.store.get_run(&project_id, &run_id)?.ok_or_else(ApiError::not_found)?;
    let plan = state
        .store
        .get_plan(&project_id, &run_id)?
        .ok_or_else(|| ApiError::from_code(ErrorCode::InvalidParams, "run has no plan"))?;

    let service = RunService::new(
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        &state.clock,
    );
    // Reentry over a terminal run stays a no-op; only live runs transition.
    if !run.status.is_terminal() {
        service.mark_dry_run_running_with_audit(&info, &project_id, &run_id, &run.spec_hash)?;
    }

    let decider = SeededOutcomeDecider;
    let executor = DryRunExecutor::new(state.store.as_ref(), &decider, &state.clock);
    let outcome = executor
        .execute(
            &DryRunInput {
                project_id: project_id.clone(),
                run_id: run_id.clone(),
                spec_hash: run.spec_hash.clone(),
            },
            &plan,
        )
        .map_err(|err| ApiError::internal(err.to_string()))?;

    let report =
        service.derive_and_persist_with_audit(&info, &project_id, &run_id, &run.spec_hash)?;
    Ok(Json(json!({
        "existing": outcome.existing,
        "inserted": outcome.inserted.len(),
        "state": report.next,
    }))
    .into_response())
}

// ============================================================================
// SECTION: Audit & Lineage
// ============================================================================

/// Ledger listing query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct LedgerParams {
    /// Inclusive lower bound (RFC 3339).
    pub from: Option<String>,
    /// Inclusive upper bound (RFC 3339).
    pub to: Option<String>,
    /// Cursor: events after this identifier.
    pub after: Option<u64>,
    /// Page size bound.
    pub limit: Option<usize>,
}

/// Parses the time window, rejecting inverted ranges.
fn parse_ledger_query(params: &LedgerParams) -> Result<LedgerQuery, ApiError> {
    let from = params
        .from
        .as_deref()
        .map(Timestamp::parse_rfc3339)
        .transpose()
        .map_err(|err| ApiError::from_code(ErrorCode::InvalidTimeRange, err.to_string()))?;
    let to = params
        .to
        .as_deref()
        .map(Timestamp::parse_rfc3339)
        .transpose()
        .map_err(|err| ApiError::from_code(ErrorCode::InvalidTimeRange, err.to_string()))?;
    if let (Some(from), Some(to)) = (from, to)
        && to < from
    {
        return Err(ApiError::from_code(
            ErrorCode::InvalidTimeRange,
            "window ends before it starts",
        ));
    }
    Ok(LedgerQuery {
        from,
        to,
        after_event_id: params.after,
        limit: params.limit,
    })
}

/// Lists audit events ordered by event id ascending.
pub async fn list_audit<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(params): Query<LedgerParams>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let query = parse_ledger_query(&params)?;
    Ok(Json(state.store.list_audit(&project_id, &query)?).into_response())
}

/// Loads one audit event.
pub async fn get_audit<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path((project_id, event_id)): Path<(String, u64)>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    state
        .store
        .get_audit(&project_id, event_id)?
        .map(|event| Json(event).into_response())
        .ok_or_else(ApiError::not_found)
}

/// Exports audit events as NDJSON, ordered by event id ascending.
pub async fn export_audit<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(params): Query<LedgerParams>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let query = parse_ledger_query(&params)?;
    let events = state.store.list_audit(&project_id, &query)?;

    let mut body = String::new();
    for event in &events {
        let line = serde_json::to_string(event)
            .map_err(|err| ApiError::internal(err.to_string()))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")],
        body,
    )
        .into_response())
}

/// Subgraph query parameters.
#[derive(Debug, Deserialize)]
pub struct SubgraphParams {
    /// Node label, for example `dataset_version:<id>`.
    node: String,
}

/// Lists lineage events ordered by event id ascending.
pub async fn list_lineage<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(params): Query<LedgerParams>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    let query = parse_ledger_query(&params)?;
    Ok(Json(state.store.list_lineage(&project_id, &query)?).into_response())
}

/// Returns every lineage edge touching one node.
pub async fn lineage_subgraph<S: GatewayStore>(
    State(state): State<AppState<S>>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    Path(project_id): Path<String>,
    Query(params): Query<SubgraphParams>,
) -> Result<Response, ApiError> {
    let project_id = ProjectId::new(project_id);
    authenticate(&state, &headers, &request_id, Some(&project_id))?;
    if params.node.is_empty() {
        return Err(ApiError::required("node"));
    }
    Ok(Json(state.store.subgraph(&project_id, &params.node)?).into_response())
}

// ============================================================================
// SECTION: Shared Helpers
// ============================================================================

/// Builds the ingest flows over the shared state.
fn ingest_flows<'a, S: GatewayStore>(
    state: &'a AppState<S>,
) -> IngestFlows<'a, S, S, S, S, S, S, std::sync::Arc<dyn datapilot_core::Clock>> {
    IngestFlows::new(
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        state.store.as_ref(),
        state.objects.as_ref(),
        &state.clock,
    )
}

/// Appends one entity-write audit event.
fn append_entity_audit<S: GatewayStore>(
    state: &AppState<S>,
    info: &AuditInfo,
    project_id: &ProjectId,
    action: &str,
    resource_type: &str,
    resource_id: &str,
    payload: Value,
) -> Result<(), ApiError> {
    let event = NewAuditEvent::new(NewAuditEventParams {
        project_id: project_id.clone(),
        occurred_at: state.clock.now(),
        info: info.clone(),
        action: action.to_string(),
        resource_type: resource_type.to_string(),
        resource_id: resource_id.to_string(),
        payload,
    })
    .map_err(|err| ApiError::internal(err.to_string()))?;
    state.store.append_audit(event)?;
    Ok(())
}
