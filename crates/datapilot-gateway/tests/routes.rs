// crates/datapilot-gateway/tests/routes.rs
// ============================================================================
// Module: Gateway Route Tests
// Description: Handler-level tests over the in-memory control plane.
// ============================================================================
//! ## Overview
//! Drives the gateway handlers directly with signed identity headers:
//! authentication denial auditing, entity creation, the run lifecycle
//! endpoints, the immutability guard, and NDJSON audit export.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

use std::sync::Arc;

use axum::Extension;
use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::response::Response;
use datapilot_core::AuditLedger;
use datapilot_core::Clock;
use datapilot_core::FixedClock;
use datapilot_core::InMemoryObjectStore;
use datapilot_core::InMemoryStore;
use datapilot_core::LedgerQuery;
use datapilot_core::ProjectId;
use datapilot_core::RequestId;
use datapilot_core::Timestamp;
use datapilot_gateway::AppState;
use datapilot_gateway::IdentityVerifier;
use datapilot_gateway::routes;
use serde_json::Value;
use serde_json::json;

/// Shared test secret.
const SECRET: &[u8] = b"0123456789abcdef";

/// Fixture instant.
fn base_time() -> Timestamp {
    Timestamp::parse_rfc3339("2026-03-01T12:00:00Z").expect("timestamp")
}

/// Unix seconds of the fixture instant.
const NOW_SECONDS: i64 = 1_772_366_400;

/// Builds the shared state over the in-memory store.
fn state() -> AppState<InMemoryStore> {
    AppState::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryObjectStore::new()),
        Arc::new(FixedClock::new(base_time())) as Arc<dyn Clock>,
        IdentityVerifier::new(SECRET.to_vec()),
    )
}

/// Builds signed identity headers for the test subject.
fn signed_headers() -> HeaderMap {
    let verifier = IdentityVerifier::new(SECRET.to_vec());
    let signature = verifier.sign("user-1", "user@animus.local", "admin", NOW_SECONDS);
    let mut headers = HeaderMap::new();
    headers.insert("x-animus-subject", HeaderValue::from_static("user-1"));
    headers.insert("x-animus-email", HeaderValue::from_static("user@animus.local"));
    headers.insert("x-animus-roles", HeaderValue::from_static("admin"));
    headers.insert(
        "x-animus-auth-ts",
        HeaderValue::from_str(&NOW_SECONDS.to_string()).expect("ts header"),
    );
    headers.insert("x-animus-auth-sig", HeaderValue::from_str(&signature).expect("sig header"));
    headers
}

/// Request id fixture.
fn request_id() -> RequestId {
    RequestId::new("req-test")
}

/// Reads a JSON body out of a response.
async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Reads a text body out of a response.
async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

/// Creates a project through the handler and returns its identifier.
async fn create_project(app: &AppState<InMemoryStore>) -> String {
    let response = routes::create_project(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Json(serde_json::from_value(json!({ "name": "gov-demo" })).expect("body")),
    )
    .await
    .expect("create project")
    .into_response();
    assert_eq!(response.status(), 201);
    let body = body_json(response).await;
    body["id"].as_str().expect("project id").to_string()
}

#[tokio::test]
async fn unauthenticated_requests_are_denied_and_audited() {
    let app = state();
    let err = routes::list_projects(
        State(app.clone()),
        Extension(request_id()),
        HeaderMap::new(),
    )
    .await
    .expect_err("must deny");
    assert_eq!(err.status, 401);
    assert_eq!(err.code, "unauthenticated");

    let denials = app
        .store
        .list_audit(&ProjectId::new("system"), &LedgerQuery::default())
        .expect("audit list");
    assert_eq!(denials.len(), 1);
    assert_eq!(denials[0].action, "auth.denied");
}

#[tokio::test]
async fn project_and_dataset_creation_audit_their_writes() {
    let app = state();
    let project_id = create_project(&app).await;

    let response = routes::create_dataset(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path(project_id.clone()),
        Json(serde_json::from_value(json!({ "name": "training" })).expect("body")),
    )
    .await
    .expect("create dataset")
    .into_response();
    assert_eq!(response.status(), 201);

    let events = app
        .store
        .list_audit(&ProjectId::new(project_id), &LedgerQuery::default())
        .expect("audit list");
    let actions: Vec<&str> = events.iter().map(|event| event.action.as_str()).collect();
    assert!(actions.contains(&"dataset.created"));
}

#[tokio::test]
async fn run_lifecycle_endpoints_drive_states() {
    let app = state();
    let project_id = create_project(&app).await;

    let pipeline = json!({
        "apiVersion": "animus/v1",
        "kind": "Pipeline",
        "specVersion": "1",
        "spec": {
            "steps": [{
                "name": "train",
                "image": format!("img@sha256:{}", "a".repeat(64)),
                "command": ["python"],
                "args": [],
                "inputs": { "datasets": [], "artifacts": [] },
                "outputs": { "artifacts": [] },
                "env": [],
                "resources": { "cpu": "1", "memory": "1Gi", "gpu": 0 },
                "retryPolicy": {
                    "maxAttempts": 3,
                    "backoff": {
                        "type": "fixed",
                        "initialSeconds": 0,
                        "maxSeconds": 0,
                        "multiplier": 1.0
                    }
                }
            }],
            "dependencies": []
        }
    });
    let run_spec = json!({
        "runSpecVersion": "1",
        "projectId": project_id,
        "datasetBindings": {},
        "codeRef": { "repoUrl": "https://git.local/r.git", "commitSha": "0f" },
        "envLock": { "imageDigests": {}, "envHash": "e1" }
    });

    let response = routes::create_run(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path(project_id.clone()),
        Json(
            serde_json::from_value(json!({
                "idempotencyKey": "k1",
                "pipelineSpec": pipeline,
                "runSpec": run_spec,
            }))
            .expect("body"),
        ),
    )
    .await
    .expect("create run")
    .into_response();
    assert_eq!(response.status(), 201);
    let created = body_json(response).await;
    let run_id = created["run"]["id"].as_str().expect("run id").to_string();

    let response = routes::plan_run(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path((project_id.clone(), run_id.clone())),
    )
    .await
    .expect("plan")
    .into_response();
    let planned = body_json(response).await;
    assert_eq!(planned["state"], "planned");

    let response = routes::dry_run(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path((project_id.clone(), run_id.clone())),
    )
    .await
    .expect("dry run")
    .into_response();
    let outcome = body_json(response).await;
    assert!(
        outcome["state"] == "dryrun_succeeded" || outcome["state"] == "dryrun_failed",
        "dry run must reach a terminal state, got {outcome}"
    );
    assert_eq!(outcome["existing"], false);

    // Replay: no new inserts, state unchanged.
    let response = routes::dry_run(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path((project_id.clone(), run_id.clone())),
    )
    .await
    .expect("dry run replay")
    .into_response();
    let replay = body_json(response).await;
    assert_eq!(replay["existing"], true);
    assert_eq!(replay["inserted"], 0);
}

#[tokio::test]
async fn dataset_version_patch_is_immutable() {
    let app = state();
    let project_id = create_project(&app).await;
    let err = routes::update_version(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path((project_id, "v1".to_string())),
    )
    .await
    .expect_err("immutable");
    assert_eq!(err.code, "immutable");
    assert_eq!(err.status, 409);
}

#[tokio::test]
async fn audit_export_emits_ordered_ndjson() {
    let app = state();
    let project_id = create_project(&app).await;

    for name in ["one", "two"] {
        routes::create_dataset(
            State(app.clone()),
            Extension(request_id()),
            signed_headers(),
            Path(project_id.clone()),
            Json(serde_json::from_value(json!({ "name": name })).expect("body")),
        )
        .await
        .expect("create dataset");
    }

    let response = routes::export_audit(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path(project_id.clone()),
        Query(routes::LedgerParams::default()),
    )
    .await
    .expect("export")
    .into_response();
    assert_eq!(
        response.headers()["content-type"].to_str().expect("content type"),
        "application/x-ndjson"
    );
    let body = body_text(response).await;
    let lines: Vec<&str> = body.lines().collect();
    assert!(lines.len() >= 3, "project + dataset events expected");

    let mut last_id = 0_u64;
    for line in lines {
        let event: Value = serde_json::from_str(line).expect("ndjson line");
        let event_id = event["event_id"].as_u64().expect("event id");
        assert!(event_id > last_id, "export must be ordered by event_id ascending");
        last_id = event_id;
    }
}

#[tokio::test]
async fn inverted_time_windows_are_rejected() {
    let app = state();
    let project_id = create_project(&app).await;
    let err = routes::list_audit(
        State(app.clone()),
        Extension(request_id()),
        signed_headers(),
        Path(project_id),
        Query(routes::LedgerParams {
            from: Some("2026-03-02T00:00:00Z".to_string()),
            to: Some("2026-03-01T00:00:00Z".to_string()),
            after: None,
            limit: None,
        }),
    )
    .await
    .expect_err("inverted window");
    assert_eq!(err.code, "invalid_time_range");
    assert_eq!(err.status, 400);
}
