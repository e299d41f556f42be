// crates/datapilot-core/tests/hashing.rs
// ============================================================================
// Module: Canonical Hashing Tests
// Description: Verifies RFC 8785 canonical JSON hashing behavior.
// ============================================================================
//! ## Overview
//! Ensures canonical JSON hashing is deterministic across key ordering and
//! numeric normalization, pins golden SHA-256 vectors, and checks the
//! run-contract hash separator behavior.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use datapilot_core::HashAlgorithm;
use datapilot_core::core::hashing::HashDigest;
use datapilot_core::core::hashing::SPEC_HASH_SEPARATOR;
use datapilot_core::core::hashing::canonical_json_bytes;
use datapilot_core::core::hashing::hash_bytes;
use datapilot_core::core::hashing::hash_canonical_json;
use datapilot_core::core::hashing::spec_hash;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

#[test]
fn canonical_hash_is_order_independent_for_maps() {
    let mut map_a = Map::new();
    map_a.insert("b".to_string(), json!(2));
    map_a.insert("a".to_string(), json!(1));

    let mut map_b = Map::new();
    map_b.insert("a".to_string(), json!(1));
    map_b.insert("b".to_string(), json!(2));

    let value_a = Value::Object(map_a);
    let value_b = Value::Object(map_b);

    let hash_a = hash_canonical_json(HashAlgorithm::Sha256, &value_a).expect("hash a");
    let hash_b = hash_canonical_json(HashAlgorithm::Sha256, &value_b).expect("hash b");

    assert_eq!(hash_a, hash_b);
}

#[test]
fn canonical_hash_normalizes_numeric_representation() {
    let value_a = json!(1.0);
    let value_b = json!(1);

    let hash_a = hash_canonical_json(HashAlgorithm::Sha256, &value_a).expect("hash a");
    let hash_b = hash_canonical_json(HashAlgorithm::Sha256, &value_b).expect("hash b");

    assert_eq!(hash_a, hash_b);
}

#[test]
fn canonical_round_trip_is_stable() {
    let value = json!({"z": [1, 2, {"y": null}], "a": "text", "n": 0.5});
    let first = canonical_json_bytes(&value).expect("canonical bytes");
    let reparsed: Value = serde_json::from_slice(&first).expect("reparse");
    let second = canonical_json_bytes(&reparsed).expect("canonical bytes again");
    assert_eq!(first, second, "canonical(parse(canonical(x))) must equal canonical(x)");
}

// ============================================================================
// SECTION: Golden SHA-256 Tests (Known-Value Verification)
// ============================================================================

#[test]
fn golden_hash_empty_object() {
    // SHA-256 of "{}" = 44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a
    let value = json!({});
    let digest = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hash");
    assert_eq!(
        digest.value, "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
        "Empty object hash mismatch"
    );
    assert_eq!(digest.algorithm, HashAlgorithm::Sha256);
}

#[test]
fn golden_hash_empty_array() {
    // SHA-256 of "[]" = 4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945
    let value = json!([]);
    let digest = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hash");
    assert_eq!(
        digest.value, "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945",
        "Empty array hash mismatch"
    );
}

#[test]
fn golden_hash_integer_one() {
    // SHA-256 of "1" = 6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b
    let value = json!(1);
    let digest = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hash");
    assert_eq!(
        digest.value, "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b",
        "Integer 1 hash mismatch"
    );
}

#[test]
fn golden_hash_bytes_direct() {
    // SHA-256 of "test" = 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
    let digest = hash_bytes(HashAlgorithm::Sha256, b"test");
    assert_eq!(
        digest.value, "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
        "Direct bytes hash mismatch"
    );
}

#[test]
fn golden_hash_empty_bytes() {
    // SHA-256 of empty input = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
    let digest = hash_bytes(HashAlgorithm::Sha256, b"");
    assert_eq!(
        digest.value, "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        "Empty bytes hash mismatch"
    );
}

// ============================================================================
// SECTION: Run Contract Hash
// ============================================================================

#[test]
fn spec_hash_matches_manual_concatenation() {
    let pipeline = json!({"kind": "Pipeline", "apiVersion": "animus/v1"});
    let binding = json!({"projectId": "p1", "datasetBindings": {"training": "v1"}});

    let mut manual = canonical_json_bytes(&pipeline).expect("pipeline bytes");
    manual.push(SPEC_HASH_SEPARATOR);
    manual.extend_from_slice(&canonical_json_bytes(&binding).expect("binding bytes"));
    let expected = hash_bytes(HashAlgorithm::Sha256, &manual);

    let actual = spec_hash(&pipeline, &binding).expect("spec hash");
    assert_eq!(actual, expected);
}

#[test]
fn spec_hash_distinguishes_document_boundaries() {
    // Without the separator these two splits would collide.
    let hash_a = spec_hash(&json!("ab"), &json!("c")).expect("hash a");
    let hash_b = spec_hash(&json!("a"), &json!("bc")).expect("hash b");
    assert_ne!(hash_a, hash_b);
}

#[test]
fn spec_hash_is_stable_across_key_order() {
    let binding_a = json!({"projectId": "p1", "datasetBindings": {"a": "1", "b": "2"}});
    let binding_b = json!({"datasetBindings": {"b": "2", "a": "1"}, "projectId": "p1"});
    let pipeline = json!({"kind": "Pipeline"});

    let hash_a = spec_hash(&pipeline, &binding_a).expect("hash a");
    let hash_b = spec_hash(&pipeline, &binding_b).expect("hash b");
    assert_eq!(hash_a, hash_b);
}

#[test]
fn hash_digest_produces_lowercase_hex() {
    let bytes = [0xAB, 0xCD, 0xEF, 0x12];
    let digest = HashDigest::new(HashAlgorithm::Sha256, &bytes);
    assert_eq!(digest.value, "abcdef12", "Hex must be lowercase");
    assert!(!digest.value.chars().any(char::is_uppercase), "No uppercase chars allowed");
}

#[test]
fn hash_consistency_across_calls() {
    let value = json!({"a": 1, "b": [1, 2, 3], "c": {"nested": true}});
    let hash1 = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hash1");
    let hash2 = hash_canonical_json(HashAlgorithm::Sha256, &value).expect("hash2");
    assert_eq!(hash1, hash2, "Hash must be deterministic");
}
