// crates/datapilot-gateway/src/server.rs
// ============================================================================
// Module: Gateway Server
// Description: Router assembly, shared state, middleware, and serving.
// Purpose: Expose the control plane as a mountable axum surface.
// Dependencies: axum, datapilot-core, futures-util, tokio
// ============================================================================

//! ## Overview
//! The gateway mounts every project-scoped route over one shared state:
//! the control-plane store, the object store, the injected clock, and the
//! identity verifier. Middleware issues request ids, and a recovery layer
//! turns handler panics into `internal_error` envelopes instead of dropped
//! connections.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::extract::Request;
use axum::middleware;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::patch;
use axum::routing::post;
use datapilot_core::Clock;
use datapilot_core::ObjectStore;
use datapilot_core::interfaces::ArtifactRepository;
use datapilot_core::interfaces::AuditLedger;
use datapilot_core::interfaces::DatasetRepository;
use datapilot_core::interfaces::DatasetVersionRepository;
use datapilot_core::interfaces::LineageLedger;
use datapilot_core::interfaces::PlanRepository;
use datapilot_core::interfaces::ProjectRepository;
use datapilot_core::interfaces::QualityEvaluationRepository;
use datapilot_core::interfaces::QualityRuleRepository;
use datapilot_core::interfaces::RunRepository;
use datapilot_core::interfaces::StepExecutionRepository;
use futures_util::FutureExt;

use crate::auth::IdentityVerifier;
use crate::correlation::correlation_middleware;
use crate::errors::ApiError;
use crate::routes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted request body size (64 MiB), covering version uploads.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

// ============================================================================
// SECTION: Store Bundle
// ============================================================================

/// The full set of persistence interfaces the gateway requires.
pub trait GatewayStore:
    ProjectRepository
    + DatasetRepository
    + DatasetVersionRepository
    + ArtifactRepository
    + QualityRuleRepository
    + QualityEvaluationRepository
    + RunRepository
    + PlanRepository
    + StepExecutionRepository
    + AuditLedger
    + LineageLedger
    + Send
    + Sync
    + 'static
{
}

impl<T> GatewayStore for T where
    T: ProjectRepository
        + DatasetRepository
        + DatasetVersionRepository
        + ArtifactRepository
        + QualityRuleRepository
        + QualityEvaluationRepository
        + RunRepository
        + PlanRepository
        + StepExecutionRepository
        + AuditLedger
        + LineageLedger
        + Send
        + Sync
        + 'static
{
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared gateway state.
pub struct AppState<S> {
    /// Control-plane store.
    pub store: Arc<S>,
    /// Object store backend.
    pub objects: Arc<dyn ObjectStore>,
    /// Injected clock.
    pub clock: Arc<dyn Clock>,
    /// Identity-header verifier.
    pub verifier: IdentityVerifier,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            objects: Arc::clone(&self.objects),
            clock: Arc::clone(&self.clock),
            verifier: self.verifier.clone(),
        }
    }
}

impl<S: GatewayStore> AppState<S> {
    /// Creates the shared state.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        objects: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        verifier: IdentityVerifier,
    ) -> Self {
        Self {
            store,
            objects,
            clock,
            verifier,
        }
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full gateway router over the shared state.
#[must_use]
pub fn router<S: GatewayStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz::<S>))
        .route("/v1/projects", post(routes::create_project::<S>).get(routes::list_projects::<S>))
        .route("/v1/projects/{project_id}", get(routes::get_project::<S>))
        .route(
            "/v1/projects/{project_id}/datasets",
            post(routes::create_dataset::<S>).get(routes::list_datasets::<S>),
        )
        .route(
            "/v1/projects/{project_id}/datasets/{dataset_id}",
            get(routes::get_dataset::<S>),
        )
        .route(
            "/v1/projects/{project_id}/datasets/{dataset_id}/versions",
            post(routes::upload_version::<S>).get(routes::list_versions::<S>),
        )
        .route(
            "/v1/projects/{project_id}/versions/{version_id}",
            get(routes::get_version::<S>).patch(routes::update_version::<S>),
        )
        .route(
            "/v1/projects/{project_id}/versions/{version_id}/download",
            get(routes::download_version::<S>),
        )
        .route(
            "/v1/projects/{project_id}/versions/{version_id}/evaluations",
            post(routes::evaluate_version::<S>).get(routes::list_evaluations::<S>),
        )
        .route(
            "/v1/projects/{project_id}/artifacts",
            post(routes::register_artifact::<S>).get(routes::list_artifacts::<S>),
        )
        .route(
            "/v1/projects/{project_id}/artifacts/{artifact_id}",
            get(routes::get_artifact::<S>),
        )
        .route(
            "/v1/projects/{project_id}/artifacts/{artifact_id}/retention",
            patch(routes::update_artifact_retention::<S>),
        )
        .route(
            "/v1/projects/{project_id}/quality-rules",
            post(routes::create_rule::<S>).get(routes::list_rules::<S>),
        )
        .route(
            "/v1/projects/{project_id}/quality-rules/{rule_id}",
            get(routes::get_rule::<S>),
        )
        .route(
            "/v1/projects/{project_id}/runs",
            post(routes::create_run::<S>).get(routes::list_runs::<S>),
        )
        .route("/v1/projects/{project_id}/runs/{run_id}", get(routes::get_run::<S>))
        .route("/v1/projects/{project_id}/runs/{run_id}/plan", post(routes::plan_run::<S>))
        .route(
            "/v1/projects/{project_id}/runs/{run_id}/dry-run",
            post(routes::dry_run::<S>),
        )
        .route(
            "/v1/projects/{project_id}/audit",
            get(routes::list_audit::<S>),
        )
        .route(
            "/v1/projects/{project_id}/audit/export",
            get(routes::export_audit::<S>),
        )
        .route(
            "/v1/projects/{project_id}/audit/{event_id}",
            get(routes::get_audit::<S>),
        )
        .route(
            "/v1/projects/{project_id}/lineage",
            get(routes::list_lineage::<S>),
        )
        .route(
            "/v1/projects/{project_id}/lineage/subgraph",
            get(routes::lineage_subgraph::<S>),
        )
        .layer(middleware::from_fn(recovery_middleware))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ============================================================================
// SECTION: Middleware
// ============================================================================

/// Converts handler panics into `internal_error` envelopes.
async fn recovery_middleware(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(_) => ApiError::internal("request handler panicked").into_response(),
    }
}

// ============================================================================
// SECTION: Serving
// ============================================================================

/// Gateway serving errors.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    /// Listener could not bind.
    #[error("gateway bind error: {0}")]
    Bind(String),
    /// Server loop failed.
    #[error("gateway serve error: {0}")]
    Serve(String),
}

/// Binds the listener and serves the router until the process exits.
///
/// # Errors
///
/// Returns [`ServeError`] when binding or serving fails.
pub async fn serve<S: GatewayStore>(
    listen_addr: SocketAddr,
    state: AppState<S>,
) -> Result<(), ServeError> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|err| ServeError::Bind(err.to_string()))?;
    axum::serve(listener, router(state))
        .await
        .map_err(|err| ServeError::Serve(err.to_string()))
}
