// crates/datapilot-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Helpers
// Description: Shared builders for pipeline specs, run specs, and fixtures.
// Purpose: Keep integration tests terse and deterministic.
// ============================================================================

//! ## Overview
//! Builders for fully valid pipeline and run specification documents, fixed
//! clocks, and seeded entities used across the core integration tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    dead_code,
    reason = "Test-only helpers are permitted to panic and are shared unevenly."
)]

use datapilot_core::AuditInfo;
use datapilot_core::RequestId;
use datapilot_core::Timestamp;
use serde_json::Value;
use serde_json::json;

/// Returns a digest-pinned image reference with a repeated nibble.
pub fn pinned_image(nibble: char) -> String {
    format!("registry.local/img@sha256:{}", nibble.to_string().repeat(64))
}

/// Builds one fully explicit step document.
pub fn step_json(name: &str, max_attempts: u32, dataset_refs: &[&str]) -> Value {
    let datasets: Vec<Value> = dataset_refs
        .iter()
        .map(|dataset_ref| json!({ "name": dataset_ref, "datasetRef": dataset_ref }))
        .collect();
    json!({
        "name": name,
        "image": pinned_image('a'),
        "command": ["python"],
        "args": ["main.py"],
        "inputs": { "datasets": datasets, "artifacts": [] },
        "outputs": { "artifacts": [] },
        "env": [],
        "resources": { "cpu": "500m", "memory": "1Gi", "gpu": 0 },
        "retryPolicy": {
            "maxAttempts": max_attempts,
            "backoff": { "type": "fixed", "initialSeconds": 0, "maxSeconds": 0, "multiplier": 1.0 }
        }
    })
}

/// Builds a fully valid pipeline document from (name, max attempts) pairs.
pub fn pipeline_json(steps: &[(&str, u32)], edges: &[(&str, &str)]) -> Value {
    pipeline_json_with_refs(steps, edges, &[])
}

/// Builds a pipeline document whose first step consumes the dataset refs.
pub fn pipeline_json_with_refs(
    steps: &[(&str, u32)],
    edges: &[(&str, &str)],
    dataset_refs: &[&str],
) -> Value {
    let step_docs: Vec<Value> = steps
        .iter()
        .enumerate()
        .map(|(index, (name, attempts))| {
            if index == 0 {
                step_json(name, *attempts, dataset_refs)
            } else {
                step_json(name, *attempts, &[])
            }
        })
        .collect();
    let edge_docs: Vec<Value> =
        edges.iter().map(|(from, to)| json!({ "from": from, "to": to })).collect();
    json!({
        "apiVersion": "animus/v1",
        "kind": "Pipeline",
        "specVersion": "1",
        "spec": { "steps": step_docs, "dependencies": edge_docs }
    })
}

/// Builds a valid run spec document with the given bindings.
pub fn run_spec_json(project_id: &str, bindings: &[(&str, &str)]) -> Value {
    let mut binding_map = serde_json::Map::new();
    for (dataset_ref, version_id) in bindings {
        binding_map.insert((*dataset_ref).to_string(), json!(version_id));
    }
    json!({
        "runSpecVersion": "1",
        "projectId": project_id,
        "datasetBindings": binding_map,
        "codeRef": { "repoUrl": "https://git.local/repo.git", "commitSha": "0f0f0f0f" },
        "envLock": { "imageDigests": {}, "envTemplateId": "tmpl-1", "envHash": "e1" }
    })
}

/// Parses a fixed RFC 3339 instant.
pub fn ts(input: &str) -> Timestamp {
    Timestamp::parse_rfc3339(input).expect("fixture timestamp")
}

/// Returns the pinned base instant used by scenario tests.
pub fn base_time() -> Timestamp {
    ts("2026-03-01T12:00:00Z")
}

/// Builds audit info for a test actor.
pub fn audit_info(request: &str) -> AuditInfo {
    AuditInfo {
        actor: "tester@animus.local".to_string(),
        request_id: RequestId::new(request),
        ip: Some("127.0.0.1".to_string()),
        user_agent: Some("datapilot-tests".to_string()),
    }
}
