// crates/datapilot-core/tests/quality_gate.rs
// ============================================================================
// Module: Quality Gate Tests
// Description: Check engine verdicts and the consumption interlock.
// ============================================================================
//! ## Overview
//! Covers check ordering and verdict mapping (pass, first hard failure,
//! operational error), content re-hashing, and the interlock's allow/block
//! audit trail.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only assertions are permitted."
)]

mod common;

use bytes::Bytes;
use common::audit_info;
use common::base_time;
use datapilot_core::AuditLedger;
use datapilot_core::ConsumptionContext;
use datapilot_core::DatasetId;
use datapilot_core::DatasetVersion;
use datapilot_core::DatasetVersionId;
use datapilot_core::EvaluationId;
use datapilot_core::EvaluationStatus;
use datapilot_core::FixedClock;
use datapilot_core::GateError;
use datapilot_core::InMemoryObjectStore;
use datapilot_core::InMemoryStore;
use datapilot_core::LedgerQuery;
use datapilot_core::Metadata;
use datapilot_core::NewDatasetVersion;
use datapilot_core::ObjectBucket;
use datapilot_core::ObjectKey;
use datapilot_core::ObjectStore;
use datapilot_core::ProjectId;
use datapilot_core::QualityCheck;
use datapilot_core::QualityEvaluation;
use datapilot_core::QualityEvaluationRepository;
use datapilot_core::QualityGate;
use datapilot_core::QualityRule;
use datapilot_core::QualityRuleId;
use datapilot_core::core::hashing::DEFAULT_HASH_ALGORITHM;
use datapilot_core::core::hashing::hash_bytes;
use datapilot_core::evaluate_rule;
use serde_json::json;

/// CSV fixture content.
const CSV_CONTENT: &[u8] = b"a,b\n1,2\n";

/// Builds a version whose object bytes are `CSV_CONTENT`.
fn version_with_rule(rule: Option<&str>) -> DatasetVersion {
    let mut metadata = Metadata::new();
    metadata.insert("filename".to_string(), json!("training.csv"));
    metadata.insert("content_type".to_string(), json!("text/csv"));
    DatasetVersion::from_new(
        NewDatasetVersion {
            id: DatasetVersionId::new("v1"),
            content_sha256: hash_bytes(DEFAULT_HASH_ALGORITHM, CSV_CONTENT),
            object_key: ObjectKey::new("p1/d1/content"),
            size_bytes: u64::try_from(CSV_CONTENT.len()).expect("fixture size"),
            quality_rule_id: rule.map(QualityRuleId::new),
            metadata,
            created_at: base_time(),
            created_by: "tester".to_string(),
        },
        ProjectId::new("p1"),
        DatasetId::new("d1"),
        1,
    )
    .expect("version fixture")
}

/// Builds a rule fixture.
fn rule(checks: Vec<QualityCheck>) -> QualityRule {
    QualityRule::new(
        QualityRuleId::new("r1"),
        ProjectId::new("p1"),
        "csv-intake",
        checks,
        base_time(),
        "tester",
    )
    .expect("rule fixture")
}

/// Seeds the object store with the version bytes.
async fn seeded_object_store() -> InMemoryObjectStore {
    let store = InMemoryObjectStore::new();
    store
        .put(ObjectBucket::Datasets, &ObjectKey::new("p1/d1/content"), Bytes::from_static(CSV_CONTENT))
        .await
        .expect("seed object");
    store
}

#[tokio::test]
async fn all_checks_pass_yields_pass() {
    let store = seeded_object_store().await;
    let version = version_with_rule(Some("r1"));
    let the_rule = rule(vec![
        QualityCheck::MinSizeBytes {
            min_bytes: 1,
        },
        QualityCheck::ContentTypeEquals {
            content_type: "text/csv".to_string(),
        },
        QualityCheck::FilenameSuffix {
            suffix: ".csv".to_string(),
        },
        QualityCheck::CsvHeaderEquals {
            columns: vec!["a".to_string(), "b".to_string()],
        },
        QualityCheck::VerifyContentSha256,
    ]);

    let evaluation =
        evaluate_rule(&store, &the_rule, &version, EvaluationId::new("e1"), base_time())
            .await
            .expect("evaluation");
    assert_eq!(evaluation.status, EvaluationStatus::Pass);
    assert!(evaluation.report_object_key.is_some());
    assert!(evaluation.verify_integrity().expect("integrity"));
}

#[tokio::test]
async fn first_hard_failure_decides_fail_and_stops() {
    let store = seeded_object_store().await;
    let version = version_with_rule(Some("r1"));
    let the_rule = rule(vec![
        QualityCheck::MinSizeBytes {
            min_bytes: 10_000,
        },
        QualityCheck::VerifyContentSha256,
    ]);

    let evaluation =
        evaluate_rule(&store, &the_rule, &version, EvaluationId::new("e1"), base_time())
            .await
            .expect("evaluation");
    assert_eq!(evaluation.status, EvaluationStatus::Fail);
    let checks = evaluation.summary["checks"].as_array().expect("checks");
    assert_eq!(checks.len(), 1, "evaluation stops at the first hard failure");
}

#[tokio::test]
async fn missing_object_bytes_yield_error_verdict() {
    let store = InMemoryObjectStore::new();
    let version = version_with_rule(Some("r1"));
    let the_rule = rule(vec![QualityCheck::VerifyContentSha256]);

    let evaluation =
        evaluate_rule(&store, &the_rule, &version, EvaluationId::new("e1"), base_time())
            .await
            .expect("evaluation");
    assert_eq!(evaluation.status, EvaluationStatus::Error);
}

#[tokio::test]
async fn content_hash_mismatch_fails() {
    let store = InMemoryObjectStore::new();
    store
        .put(ObjectBucket::Datasets, &ObjectKey::new("p1/d1/content"), Bytes::from_static(b"tampered"))
        .await
        .expect("seed tampered object");
    let version = version_with_rule(Some("r1"));
    let the_rule = rule(vec![QualityCheck::VerifyContentSha256]);

    let evaluation =
        evaluate_rule(&store, &the_rule, &version, EvaluationId::new("e1"), base_time())
            .await
            .expect("evaluation");
    assert_eq!(evaluation.status, EvaluationStatus::Fail);
}

#[tokio::test]
async fn allowlist_rejects_unlisted_digest() {
    let store = seeded_object_store().await;
    let version = version_with_rule(Some("r1"));
    let the_rule = rule(vec![QualityCheck::Sha256Allowlist {
        allowed: vec!["00".repeat(32)],
    }]);

    let evaluation =
        evaluate_rule(&store, &the_rule, &version, EvaluationId::new("e1"), base_time())
            .await
            .expect("evaluation");
    assert_eq!(evaluation.status, EvaluationStatus::Fail);
}

// ============================================================================
// SECTION: Interlock
// ============================================================================

/// Inserts an evaluation verdict for the fixture version.
fn push_verdict(store: &InMemoryStore, status: EvaluationStatus, id: &str) {
    let evaluation = QualityEvaluation::new(
        EvaluationId::new(id),
        ProjectId::new("p1"),
        DatasetVersionId::new("v1"),
        QualityRuleId::new("r1"),
        status,
        base_time(),
        None,
        None,
        json!({}),
    )
    .expect("verdict fixture");
    store.insert_evaluation(&evaluation).expect("insert verdict");
}

/// Collects block/allow actions appended to the ledger.
fn gate_actions(store: &InMemoryStore) -> Vec<(String, String)> {
    store
        .list_audit(&ProjectId::new("p1"), &LedgerQuery::default())
        .expect("audit list")
        .into_iter()
        .filter(|event| event.action.starts_with("quality_gate."))
        .map(|event| {
            let reason =
                event.payload["reason"].as_str().unwrap_or_default().to_string();
            (event.action, reason)
        })
        .collect()
}

#[test]
fn unbound_version_blocks_with_no_rule() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let gate = QualityGate::new(&store, &store, &clock);
    let version = version_with_rule(None);

    let err = gate
        .enforce(&audit_info("req-1"), &version, ConsumptionContext::Download)
        .expect_err("must block");
    assert!(matches!(err, GateError::RuleNotSet(_)));
    assert_eq!(
        gate_actions(&store),
        vec![("quality_gate.block".to_string(), "no_rule".to_string())]
    );
}

#[test]
fn unevaluated_version_blocks_with_not_evaluated() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    let gate = QualityGate::new(&store, &store, &clock);
    let version = version_with_rule(Some("r1"));

    let err = gate
        .enforce(&audit_info("req-1"), &version, ConsumptionContext::RunCreate)
        .expect_err("must block");
    assert!(matches!(err, GateError::NotEvaluated(_)));
    assert_eq!(
        gate_actions(&store),
        vec![("quality_gate.block".to_string(), "not_evaluated".to_string())]
    );
}

#[test]
fn failing_verdict_blocks_with_not_pass() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    push_verdict(&store, EvaluationStatus::Fail, "e1");
    let gate = QualityGate::new(&store, &store, &clock);
    let version = version_with_rule(Some("r1"));

    let err = gate
        .enforce(&audit_info("req-1"), &version, ConsumptionContext::Download)
        .expect_err("must block");
    assert!(matches!(err, GateError::GateFailed { .. }));
    assert_eq!(
        gate_actions(&store),
        vec![("quality_gate.block".to_string(), "not_pass".to_string())]
    );
}

#[test]
fn pass_verdict_allows_and_audits() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    push_verdict(&store, EvaluationStatus::Pass, "e1");
    let gate = QualityGate::new(&store, &store, &clock);
    let version = version_with_rule(Some("r1"));

    gate.enforce(&audit_info("req-1"), &version, ConsumptionContext::Download)
        .expect("must allow");
    assert_eq!(
        gate_actions(&store),
        vec![("quality_gate.allow".to_string(), "pass".to_string())]
    );
}

#[test]
fn latest_verdict_wins() {
    let store = InMemoryStore::new();
    let clock = FixedClock::new(base_time());
    push_verdict(&store, EvaluationStatus::Fail, "e1");
    // Same evaluated_at: the higher evaluation id is the tiebreak.
    push_verdict(&store, EvaluationStatus::Pass, "e2");
    let gate = QualityGate::new(&store, &store, &clock);
    let version = version_with_rule(Some("r1"));

    gate.enforce(&audit_info("req-1"), &version, ConsumptionContext::Download)
        .expect("latest pass verdict must allow");
}
