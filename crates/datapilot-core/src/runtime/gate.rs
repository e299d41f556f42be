// crates/datapilot-core/src/runtime/gate.rs
// ============================================================================
// Module: DataPilot Quality Gate
// Description: Rule evaluation engine and consumption interlock.
// Purpose: Block dataset consumption and run creation without a pass verdict.
// Dependencies: crate::{core, interfaces}, serde_json
// ============================================================================

//! ## Overview
//! The evaluation engine applies rule checks in document order: the first
//! hard failure aggregates into `fail`, operational failures (object store
//! I/O, decoding) into `error`, otherwise `pass`. Content checks stream the
//! object bytes and re-hash them; a digest mismatch is a hard failure.
//!
//! The interlock guards the two consumption points (dataset-version download
//! and run creation). Both the allow and the block outcomes append audit
//! events, so the ledger records every gate decision.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::AuditInfo;
use crate::core::Clock;
use crate::core::DEFAULT_HASH_ALGORITHM;
use crate::core::DatasetVersion;
use crate::core::ErrorCode;
use crate::core::EvaluationId;
use crate::core::EvaluationStatus;
use crate::core::hashing::HashError;
use crate::core::NewAuditEvent;
use crate::core::NewAuditEventParams;
use crate::core::ObjectKey;
use crate::core::QualityCheck;
use crate::core::QualityEvaluation;
use crate::core::QualityRule;
use crate::core::QualityRuleId;
use crate::core::actions;
use crate::core::hashing::canonical_json_bytes;
use crate::core::hashing::hash_bytes;
use crate::interfaces::AuditLedger;
use crate::interfaces::ObjectBucket;
use crate::interfaces::ObjectStore;
use crate::interfaces::QualityEvaluationRepository;
use crate::interfaces::RepositoryError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Quality gate interlock errors.
///
/// # Invariants
/// - Variants are stable and map 1:1 onto wire error codes.
#[derive(Debug, Error)]
pub enum GateError {
    /// The dataset version has no quality rule bound.
    #[error("quality rule not set for dataset version {0}")]
    RuleNotSet(String),
    /// No evaluation exists for (version, rule).
    #[error("dataset version {0} has not been evaluated")]
    NotEvaluated(String),
    /// The latest evaluation is not a pass verdict.
    #[error("quality gate failed for dataset version {version}: latest status {status}")]
    GateFailed {
        /// Blocked dataset version identifier.
        version: String,
        /// Latest evaluation status label.
        status: &'static str,
    },
    /// Repository failure while loading evaluations or appending audit.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    /// Canonical hashing failure while building audit events.
    #[error(transparent)]
    Hash(#[from] HashError),
}

impl GateError {
    /// Returns the wire error code for this failure.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::RuleNotSet(_) => ErrorCode::QualityRuleNotSet,
            Self::NotEvaluated(_) => ErrorCode::QualityNotEvaluated,
            Self::GateFailed {
                ..
            } => ErrorCode::QualityGateFailed,
            Self::Repository(error) => error.code(),
            Self::Hash(_) => ErrorCode::InternalError,
        }
    }
}

// ============================================================================
// SECTION: Consumption Context
// ============================================================================

/// Consumption point guarded by the interlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionContext {
    /// Dataset-version download.
    Download,
    /// Run creation referencing the version.
    RunCreate,
}

impl ConsumptionContext {
    /// Returns a stable label for the context.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::RunCreate => "run_create",
        }
    }
}

// ============================================================================
// SECTION: Interlock
// ============================================================================

/// Quality gate interlock over the evaluation repository and audit ledger.
pub struct QualityGate<'a, E, A, C> {
    /// Evaluation repository.
    evaluations: &'a E,
    /// Audit ledger receiving allow/block events.
    audit: &'a A,
    /// Injected clock for event timestamps.
    clock: &'a C,
}

impl<'a, E, A, C> QualityGate<'a, E, A, C>
where
    E: QualityEvaluationRepository,
    A: AuditLedger,
    C: Clock,
{
    /// Creates a new interlock.
    #[must_use]
    pub const fn new(evaluations: &'a E, audit: &'a A, clock: &'a C) -> Self {
        Self {
            evaluations,
            audit,
            clock,
        }
    }

    /// Enforces the gate for one dataset version at one consumption point.
    ///
    /// Appends a `quality_gate.allow` event and returns `Ok` only when the
    /// latest evaluation for the bound rule is a pass verdict; every other
    /// outcome appends a `quality_gate.block` event with its reason and
    /// returns the matching typed error.
    ///
    /// # Errors
    ///
    /// Returns [`GateError`] with the block reason, or a repository error
    /// when ledger access fails.
    pub fn enforce(
        &self,
        info: &AuditInfo,
        version: &DatasetVersion,
        context: ConsumptionContext,
    ) -> Result<(), GateError> {
        let Some(rule_id) = version.quality_rule_id.as_ref() else {
            self.append_decision(info, version, None, context, actions::QUALITY_GATE_BLOCK, "no_rule")?;
            return Err(GateError::RuleNotSet(version.id.to_string()));
        };

        let latest =
            self.evaluations.latest_evaluation(&version.project_id, &version.id, rule_id)?;
        let Some(evaluation) = latest else {
            self.append_decision(
                info,
                version,
                Some(rule_id),
                context,
                actions::QUALITY_GATE_BLOCK,
                "not_evaluated",
            )?;
            return Err(GateError::NotEvaluated(version.id.to_string()));
        };

        if evaluation.status != EvaluationStatus::Pass {
            self.append_decision(
                info,
                version,
                Some(rule_id),
                context,
                actions::QUALITY_GATE_BLOCK,
                "not_pass",
            )?;
            return Err(GateError::GateFailed {
                version: version.id.to_string(),
                status: evaluation.status.as_str(),
            });
        }

        self.append_decision(
            info,
            version,
            Some(rule_id),
            context,
            actions::QUALITY_GATE_ALLOW,
            "pass",
        )?;
        Ok(())
    }

    /// Appends one allow/block decision event.
    fn append_decision(
        &self,
        info: &AuditInfo,
        version: &DatasetVersion,
        rule_id: Option<&QualityRuleId>,
        context: ConsumptionContext,
        action: &str,
        reason: &str,
    ) -> Result<(), GateError> {
        let event = NewAuditEvent::new(NewAuditEventParams {
            project_id: version.project_id.clone(),
            occurred_at: self.clock.now(),
            info: info.clone(),
            action: action.to_string(),
            resource_type: "dataset_version".to_string(),
            resource_id: version.id.to_string(),
            payload: json!({
                "reason": reason,
                "context": context.as_str(),
                "rule_id": rule_id.map(ToString::to_string),
                "dataset_id": version.dataset_id.to_string(),
            }),
        })?;
        self.audit.append_audit(event)?;
        Ok(())
    }
}

// ============================================================================
// SECTION: Evaluation Engine
// ============================================================================

/// Outcome of one check during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    /// Check passed.
    Pass,
    /// Check failed on content or metadata.
    Fail,
    /// Check could not run (operational failure).
    Error,
}

impl CheckOutcome {
    /// Returns the stable label for the outcome.
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// Evaluates a rule against a dataset version and writes the report object.
///
/// Checks run in document order. Content-dependent checks fetch the object
/// bytes once; a fetch failure marks the check (and the evaluation) as an
/// operational `error`. The per-check summary and the final verdict are
/// written as a canonical JSON report next to the artifacts.
///
/// # Errors
///
/// Returns [`HashError`] only when canonical serialization of the report
/// fails; operational failures are captured in the verdict instead.
pub async fn evaluate_rule(
    store: &dyn ObjectStore,
    rule: &QualityRule,
    version: &DatasetVersion,
    evaluation_id: EvaluationId,
    evaluated_at: crate::core::Timestamp,
) -> Result<QualityEvaluation, HashError> {
    let mut object_bytes: Option<Result<bytes::Bytes, String>> = None;
    let mut check_reports: Vec<Value> = Vec::new();
    let mut verdict = EvaluationStatus::Pass;

    for check in &rule.checks {
        let needs_bytes = matches!(
            check,
            QualityCheck::CsvHeaderEquals { .. } | QualityCheck::VerifyContentSha256
        );
        if needs_bytes && object_bytes.is_none() {
            let fetched = store
                .get(ObjectBucket::Datasets, &version.object_key)
                .await
                .map_err(|err| err.to_string());
            object_bytes = Some(fetched);
        }

        let (outcome, detail) = apply_check(check, version, object_bytes.as_ref());
        check_reports.push(json!({
            "kind": check.kind(),
            "outcome": outcome.as_str(),
            "detail": detail,
        }));

        match outcome {
            CheckOutcome::Pass => {}
            CheckOutcome::Fail => {
                verdict = EvaluationStatus::Fail;
                break;
            }
            CheckOutcome::Error => {
                verdict = EvaluationStatus::Error;
                break;
            }
        }
    }

    let summary = json!({
        "rule_id": rule.id.to_string(),
        "status": verdict.as_str(),
        "checks": check_reports,
    });

    let report_bytes = canonical_json_bytes(&summary)?;
    let report_key = ObjectKey::new(format!(
        "quality-reports/{}/{}.json",
        version.project_id, evaluation_id
    ));
    let report = match store
        .put(ObjectBucket::Artifacts, &report_key, bytes::Bytes::from(report_bytes.clone()))
        .await
    {
        Ok(()) => {
            let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, &report_bytes);
            Some((report_key, digest))
        }
        Err(_) => None,
    };
    let (report_object_key, report_sha256) = report.map_or((None, None), |(key, digest)| {
        (Some(key), Some(digest))
    });

    QualityEvaluation::new(
        evaluation_id,
        version.project_id.clone(),
        version.id.clone(),
        rule.id.clone(),
        verdict,
        evaluated_at,
        report_object_key,
        report_sha256,
        summary,
    )
}

/// Applies one check to the version and optional object bytes.
fn apply_check(
    check: &QualityCheck,
    version: &DatasetVersion,
    object_bytes: Option<&Result<bytes::Bytes, String>>,
) -> (CheckOutcome, Value) {
    match check {
        QualityCheck::MinSizeBytes {
            min_bytes,
        } => {
            if version.size_bytes >= *min_bytes {
                (CheckOutcome::Pass, Value::Null)
            } else {
                (
                    CheckOutcome::Fail,
                    json!(format!("size {} below minimum {min_bytes}", version.size_bytes)),
                )
            }
        }
        QualityCheck::ContentTypeEquals {
            content_type,
        } => match version.metadata.get("content_type").and_then(Value::as_str) {
            Some(actual) if actual == content_type => (CheckOutcome::Pass, Value::Null),
            Some(actual) => {
                (CheckOutcome::Fail, json!(format!("content type {actual} != {content_type}")))
            }
            None => (CheckOutcome::Fail, json!("content_type metadata missing")),
        },
        QualityCheck::FilenameSuffix {
            suffix,
        } => match version.metadata.get("filename").and_then(Value::as_str) {
            Some(filename) if filename.ends_with(suffix.as_str()) => {
                (CheckOutcome::Pass, Value::Null)
            }
            Some(filename) => {
                (CheckOutcome::Fail, json!(format!("filename {filename} lacks suffix {suffix}")))
            }
            None => (CheckOutcome::Fail, json!("filename metadata missing")),
        },
        QualityCheck::RequiredMetadataKeys {
            keys,
        } => {
            let missing: Vec<&String> =
                keys.iter().filter(|key| !version.metadata.contains_key(*key)).collect();
            if missing.is_empty() {
                (CheckOutcome::Pass, Value::Null)
            } else {
                (CheckOutcome::Fail, json!(format!("missing metadata keys: {missing:?}")))
            }
        }
        QualityCheck::CsvHeaderEquals {
            columns,
        } => match object_bytes {
            Some(Ok(data)) => match csv_header(data) {
                Some(header) if header == *columns => (CheckOutcome::Pass, Value::Null),
                Some(header) => (
                    CheckOutcome::Fail,
                    json!(format!("csv header {header:?} != expected {columns:?}")),
                ),
                None => (CheckOutcome::Error, json!("object bytes are not valid utf-8 csv")),
            },
            Some(Err(message)) => (CheckOutcome::Error, json!(message.clone())),
            None => (CheckOutcome::Error, json!("object bytes unavailable")),
        },
        QualityCheck::VerifyContentSha256 => match object_bytes {
            Some(Ok(data)) => {
                let digest = hash_bytes(DEFAULT_HASH_ALGORITHM, data);
                if digest == version.content_sha256 {
                    (CheckOutcome::Pass, Value::Null)
                } else {
                    (
                        CheckOutcome::Fail,
                        json!(format!(
                            "content hash mismatch: stored {} actual {}",
                            version.content_sha256.value, digest.value
                        )),
                    )
                }
            }
            Some(Err(message)) => (CheckOutcome::Error, json!(message.clone())),
            None => (CheckOutcome::Error, json!("object bytes unavailable")),
        },
        QualityCheck::Sha256Allowlist {
            allowed,
        } => {
            if allowed.iter().any(|digest| digest == &version.content_sha256.value) {
                (CheckOutcome::Pass, Value::Null)
            } else {
                (CheckOutcome::Fail, json!("content hash not in allowlist"))
            }
        }
    }
}

/// Extracts the first CSV line as trimmed column names.
fn csv_header(data: &[u8]) -> Option<Vec<String>> {
    let text = std::str::from_utf8(data).ok()?;
    let first_line = text.lines().next()?;
    Some(first_line.split(',').map(|column| column.trim().to_string()).collect())
}
