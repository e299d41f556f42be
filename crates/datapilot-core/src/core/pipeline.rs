// crates/datapilot-core/src/core/pipeline.rs
// ============================================================================
// Module: DataPilot Pipeline Specification
// Description: Declarative pipeline template types (steps, edges, retries).
// Purpose: Define the canonical wire shape the validators and planner consume.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A pipeline specification is the declarative execution template bound into a
//! run. The wire format is camelCase JSON. List-valued fields deserialize as
//! `Option<Vec<_>>` so the validator can distinguish an explicitly empty list
//! (permitted) from an absent field (an error): the spec forbids implicit
//! defaults.
//!
//! Backoff types are a closed enum; unknown strings fail deserialization.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Pipeline Specification
// ============================================================================

/// Declarative pipeline specification carried inside a run spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    /// API version tag.
    pub api_version: Option<String>,
    /// Document kind tag.
    pub kind: Option<String>,
    /// Specification version tag.
    pub spec_version: Option<String>,
    /// Pipeline body.
    pub spec: Option<PipelineBody>,
}

/// Pipeline body: steps and dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBody {
    /// Steps in declaration order.
    pub steps: Option<Vec<StepSpec>>,
    /// Dependency edges between steps.
    pub dependencies: Option<Vec<DependencyEdge>>,
}

/// Directed dependency edge between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    /// Upstream step name.
    pub from: String,
    /// Downstream step name.
    pub to: String,
}

// ============================================================================
// SECTION: Step Specification
// ============================================================================

/// One pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Unique step name.
    pub name: Option<String>,
    /// Digest-pinned container image reference.
    pub image: Option<String>,
    /// Container command. Must be explicitly present; may be empty.
    pub command: Option<Vec<String>>,
    /// Container arguments. Must be explicitly present; may be empty.
    pub args: Option<Vec<String>>,
    /// Step inputs.
    pub inputs: Option<StepInputs>,
    /// Step outputs.
    pub outputs: Option<StepOutputs>,
    /// Environment variables. Must be explicitly present; may be empty.
    pub env: Option<Vec<EnvVar>>,
    /// Resource requests.
    pub resources: Option<ResourceRequests>,
    /// Retry policy.
    pub retry_policy: Option<RetryPolicy>,
}

/// Step input declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInputs {
    /// Dataset inputs. Must be explicitly present; may be empty.
    pub datasets: Option<Vec<DatasetInput>>,
    /// Artifact inputs from upstream steps. Must be explicitly present.
    pub artifacts: Option<Vec<ArtifactInput>>,
}

/// Dataset input binding reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInput {
    /// Mount name inside the step.
    pub name: String,
    /// Logical dataset reference resolved through run-spec bindings.
    pub dataset_ref: String,
}

/// Artifact input produced by an upstream step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactInput {
    /// Mount name inside the step.
    pub name: String,
    /// Producing step name.
    pub from_step: String,
    /// Artifact name declared by the producing step.
    pub artifact: String,
}

/// Step output declarations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutputs {
    /// Declared output artifacts. Must be explicitly present; may be empty.
    pub artifacts: Option<Vec<ArtifactOutput>>,
}

/// Declared output artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactOutput {
    /// Artifact name.
    pub name: String,
    /// Artifact type label.
    #[serde(rename = "type")]
    pub artifact_type: String,
    /// Optional media type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Environment variable declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    pub value: String,
}

/// Resource requests for one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequests {
    /// CPU request (for example `"500m"`).
    pub cpu: String,
    /// Memory request (for example `"1Gi"`).
    pub memory: String,
    /// GPU count.
    pub gpu: u32,
}

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Retry policy for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum attempts (at least 1).
    pub max_attempts: u32,
    /// Backoff between attempts.
    pub backoff: BackoffSpec,
}

/// Backoff specification between retry attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffSpec {
    /// Backoff curve type.
    #[serde(rename = "type")]
    pub backoff_type: BackoffType,
    /// Initial delay in whole seconds.
    pub initial_seconds: i64,
    /// Maximum delay in whole seconds (0 disables the cap for fixed backoff).
    pub max_seconds: i64,
    /// Multiplier applied per attempt for exponential backoff.
    pub multiplier: f64,
}

/// Closed backoff type enum; unknown strings fail deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between attempts.
    Fixed,
    /// Exponentially growing delay, capped at `max_seconds`.
    Exponential,
}
