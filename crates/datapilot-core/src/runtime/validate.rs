// crates/datapilot-core/src/runtime/validate.rs
// ============================================================================
// Module: DataPilot Specification Validators
// Description: Structural and DAG validation for pipeline and run specs.
// Purpose: Enforce explicit-presence, digest pinning, and binding closure.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Pipeline specifications carry no implicit defaults: every list-valued
//! field must be explicitly present (an empty list is permitted, absence is
//! an error). Validation walks the whole document and aggregates every issue
//! into a single error instead of stopping at the first failure.
//!
//! Run-spec validation additionally closes the binding set: the keys of
//! `datasetBindings` must equal the set of `datasetRef` values used by the
//! pipeline's steps, with no missing bindings and no extras.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::core::BackoffType;
use crate::core::PipelineSpec;
use crate::core::RunSpec;
use crate::core::StepSpec;
use crate::core::required_code;

// ============================================================================
// SECTION: Issues
// ============================================================================

/// One aggregated validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Stable wire code for the issue.
    pub code: String,
    /// Dotted path of the offending field.
    pub field: String,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    /// Builds a missing-field issue with the `<field>_required` code.
    fn required(path: impl Into<String>, field: &str) -> Self {
        Self {
            code: required_code(field),
            field: path.into(),
            message: format!("{field} must be explicitly present"),
        }
    }

    /// Builds an invalid-value issue.
    fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: "invalid_params".to_string(),
            field: path.into(),
            message: message.into(),
        }
    }
}

/// Aggregated validation failure carrying every detected issue.
#[derive(Debug, Error)]
#[error("specification validation failed with {} issue(s)", issues.len())]
pub struct ValidationError {
    /// Every detected issue, in document order.
    pub issues: Vec<ValidationIssue>,
}

// ============================================================================
// SECTION: Pipeline Validation
// ============================================================================

/// Validates a pipeline specification.
///
/// # Errors
///
/// Returns [`ValidationError`] carrying every detected issue.
pub fn validate_pipeline_spec(spec: &PipelineSpec) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    check_nonempty(&mut issues, "apiVersion", "api_version", spec.api_version.as_deref());
    check_nonempty(&mut issues, "kind", "kind", spec.kind.as_deref());
    check_nonempty(&mut issues, "specVersion", "spec_version", spec.spec_version.as_deref());

    let Some(body) = spec.spec.as_ref() else {
        issues.push(ValidationIssue::required("spec", "spec"));
        return Err(ValidationError {
            issues,
        });
    };

    let steps = match body.steps.as_deref() {
        Some([]) | None => {
            issues.push(ValidationIssue::required("spec.steps", "steps"));
            &[]
        }
        Some(steps) => steps,
    };
    let dependencies = body.dependencies.as_deref().map_or_else(
        || {
            issues.push(ValidationIssue::required("spec.dependencies", "dependencies"));
            &[][..]
        },
        |edges| edges,
    );

    let mut seen_names: BTreeSet<&str> = BTreeSet::new();
    for (index, step) in steps.iter().enumerate() {
        let path = format!("spec.steps[{index}]");
        let name = step.name.as_deref().unwrap_or_default();
        if name.is_empty() {
            issues.push(ValidationIssue::invalid(
                format!("{path}.name"),
                "step name must be non-empty",
            ));
        } else if !seen_names.insert(name) {
            issues.push(ValidationIssue::invalid(
                format!("{path}.name"),
                format!("duplicate step name: {name}"),
            ));
        }
        validate_step(&mut issues, &path, step);
    }

    for (index, edge) in dependencies.iter().enumerate() {
        let path = format!("spec.dependencies[{index}]");
        if !seen_names.contains(edge.from.as_str()) {
            issues.push(ValidationIssue::invalid(
                format!("{path}.from"),
                format!("edge references unknown step: {}", edge.from),
            ));
        }
        if !seen_names.contains(edge.to.as_str()) {
            issues.push(ValidationIssue::invalid(
                format!("{path}.to"),
                format!("edge references unknown step: {}", edge.to),
            ));
        }
        if edge.from == edge.to {
            issues.push(ValidationIssue::invalid(
                path,
                format!("self-edge on step: {}", edge.from),
            ));
        }
    }

    if issues.is_empty() && has_cycle(&seen_names, dependencies) {
        issues.push(ValidationIssue::invalid("spec.dependencies", "cycle_detected"));
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            issues,
        })
    }
}

/// Validates one step's explicit-presence and value rules.
fn validate_step(issues: &mut Vec<ValidationIssue>, path: &str, step: &StepSpec) {
    match step.image.as_deref() {
        None | Some("") => issues.push(ValidationIssue::required(format!("{path}.image"), "image")),
        Some(image) => {
            if !is_digest_pinned(image) {
                issues.push(ValidationIssue::invalid(
                    format!("{path}.image"),
                    format!("image must be digest-pinned (@sha256:<64 hex>): {image}"),
                ));
            }
        }
    }
    if step.command.is_none() {
        issues.push(ValidationIssue::required(format!("{path}.command"), "command"));
    }
    if step.args.is_none() {
        issues.push(ValidationIssue::required(format!("{path}.args"), "args"));
    }
    if step.env.is_none() {
        issues.push(ValidationIssue::required(format!("{path}.env"), "env"));
    }
    match step.inputs.as_ref() {
        None => issues.push(ValidationIssue::required(format!("{path}.inputs"), "inputs")),
        Some(inputs) => {
            if inputs.datasets.is_none() {
                issues.push(ValidationIssue::required(
                    format!("{path}.inputs.datasets"),
                    "datasets",
                ));
            }
            if inputs.artifacts.is_none() {
                issues.push(ValidationIssue::required(
                    format!("{path}.inputs.artifacts"),
                    "artifacts",
                ));
            }
        }
    }
    match step.outputs.as_ref() {
        None => issues.push(ValidationIssue::required(format!("{path}.outputs"), "outputs")),
        Some(outputs) => {
            if outputs.artifacts.is_none() {
                issues.push(ValidationIssue::required(
                    format!("{path}.outputs.artifacts"),
                    "artifacts",
                ));
            }
        }
    }
    if step.resources.is_none() {
        issues.push(ValidationIssue::required(format!("{path}.resources"), "resources"));
    }
    match step.retry_policy.as_ref() {
        None => {
            issues.push(ValidationIssue::required(format!("{path}.retryPolicy"), "retry_policy"));
        }
        Some(policy) => {
            if policy.max_attempts < 1 {
                issues.push(ValidationIssue::invalid(
                    format!("{path}.retryPolicy.maxAttempts"),
                    "maxAttempts must be at least 1",
                ));
            }
            let backoff = &policy.backoff;
            let backoff_path = format!("{path}.retryPolicy.backoff");
            if backoff.initial_seconds < 0 {
                issues.push(ValidationIssue::invalid(
                    format!("{backoff_path}.initialSeconds"),
                    "initialSeconds must be non-negative",
                ));
            }
            match backoff.backoff_type {
                BackoffType::Exponential => {
                    if backoff.max_seconds < backoff.initial_seconds {
                        issues.push(ValidationIssue::invalid(
                            format!("{backoff_path}.maxSeconds"),
                            "maxSeconds must be at least initialSeconds",
                        ));
                    }
                    if backoff.multiplier < 1.0 {
                        issues.push(ValidationIssue::invalid(
                            format!("{backoff_path}.multiplier"),
                            "multiplier must be at least 1",
                        ));
                    }
                }
                BackoffType::Fixed => {}
            }
        }
    }
}

/// Returns true when the image reference is pinned by a SHA-256 digest.
fn is_digest_pinned(image: &str) -> bool {
    let Some(at) = image.rfind("@sha256:") else {
        return false;
    };
    if at == 0 {
        return false;
    }
    let digest = &image[at + "@sha256:".len() ..];
    digest.len() == 64 && digest.bytes().all(|byte| byte.is_ascii_hexdigit() && !byte.is_ascii_uppercase())
}

// ============================================================================
// SECTION: Cycle Detection
// ============================================================================

/// Node colour for the DFS cycle walk.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    /// Not yet visited.
    White,
    /// On the current DFS stack.
    Grey,
    /// Fully explored.
    Black,
}

/// Detects a cycle with a three-colour depth-first walk.
fn has_cycle(names: &BTreeSet<&str>, edges: &[crate::core::DependencyEdge]) -> bool {
    let mut adjacency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for edge in edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
    }
    let mut colours: BTreeMap<&str, Colour> = names.iter().map(|name| (*name, Colour::White)).collect();
    for name in names {
        if colours.get(name) == Some(&Colour::White) && dfs_visit(name, &adjacency, &mut colours) {
            return true;
        }
    }
    false
}

/// Visits one node; returns true when a back edge is found.
fn dfs_visit<'a>(
    node: &'a str,
    adjacency: &BTreeMap<&'a str, Vec<&'a str>>,
    colours: &mut BTreeMap<&'a str, Colour>,
) -> bool {
    colours.insert(node, Colour::Grey);
    if let Some(next) = adjacency.get(node) {
        for target in next {
            match colours.get(target) {
                Some(Colour::Grey) => return true,
                Some(Colour::White) => {
                    if dfs_visit(target, adjacency, colours) {
                        return true;
                    }
                }
                _ => {}
            }
        }
    }
    colours.insert(node, Colour::Black);
    false
}

// ============================================================================
// SECTION: Run Spec Validation
// ============================================================================

/// Validates a run specification against its pipeline.
///
/// # Errors
///
/// Returns [`ValidationError`] carrying every detected issue.
pub fn validate_run_spec(
    run_spec: &RunSpec,
    pipeline: &PipelineSpec,
) -> Result<(), ValidationError> {
    let mut issues = Vec::new();

    check_nonempty(&mut issues, "runSpecVersion", "run_spec_version", run_spec.run_spec_version.as_deref());
    check_nonempty(&mut issues, "projectId", "project_id", run_spec.project_id.as_deref());

    match run_spec.code_ref.as_ref() {
        None => issues.push(ValidationIssue::required("codeRef", "code_ref")),
        Some(code_ref) => {
            if code_ref.repo_url.is_empty() {
                issues.push(ValidationIssue::required("codeRef.repoUrl", "repo_url"));
            }
            if code_ref.commit_sha.is_empty() {
                issues.push(ValidationIssue::required("codeRef.commitSha", "commit_sha"));
            }
        }
    }

    match run_spec.env_lock.as_ref() {
        None => issues.push(ValidationIssue::required("envLock", "env_lock")),
        Some(env_lock) => {
            match env_lock.env_hash.as_deref() {
                None | Some("") => {
                    issues.push(ValidationIssue::required("envLock.envHash", "env_hash"));
                }
                Some(_) => {}
            }
            if let Some(digests) = env_lock.image_digests.as_ref() {
                for (name, digest) in digests {
                    if name.is_empty() || digest.is_empty() {
                        issues.push(ValidationIssue::invalid(
                            "envLock.imageDigests",
                            "image digest entries must have non-empty keys and values",
                        ));
                    }
                }
            }
        }
    }

    let referenced = pipeline_dataset_refs(pipeline);
    match run_spec.dataset_bindings.as_ref() {
        None => issues.push(ValidationIssue::required("datasetBindings", "dataset_bindings")),
        Some(bindings) => {
            for dataset_ref in &referenced {
                if !bindings.contains_key(*dataset_ref) {
                    issues.push(ValidationIssue::invalid(
                        format!("datasetBindings.{dataset_ref}"),
                        format!("missing binding for datasetRef: {dataset_ref}"),
                    ));
                }
            }
            for key in bindings.keys() {
                if !referenced.contains(key.as_str()) {
                    issues.push(ValidationIssue::invalid(
                        format!("datasetBindings.{key}"),
                        format!("binding does not match any datasetRef: {key}"),
                    ));
                }
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError {
            issues,
        })
    }
}

/// Collects every `datasetRef` used by the pipeline's steps.
fn pipeline_dataset_refs(pipeline: &PipelineSpec) -> BTreeSet<&str> {
    let mut refs = BTreeSet::new();
    if let Some(steps) = pipeline.spec.as_ref().and_then(|body| body.steps.as_ref()) {
        for step in steps {
            if let Some(datasets) = step.inputs.as_ref().and_then(|inputs| inputs.datasets.as_ref())
            {
                for input in datasets {
                    refs.insert(input.dataset_ref.as_str());
                }
            }
        }
    }
    refs
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Pushes a required-field issue when the value is absent or empty.
fn check_nonempty(
    issues: &mut Vec<ValidationIssue>,
    path: &str,
    field: &str,
    value: Option<&str>,
) {
    match value {
        None | Some("") => issues.push(ValidationIssue::required(path, field)),
        Some(_) => {}
    }
}
