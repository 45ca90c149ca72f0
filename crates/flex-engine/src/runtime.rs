// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability runtime boundary.

use async_trait::async_trait;
use flex_core::ContextBundle;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured request derived from a node bundle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequest {
    /// Run the invocation belongs to.
    pub run_id: String,
    /// Node being executed.
    pub node_id: String,
    /// Capability to invoke; `None` for builder-injected nodes whose
    /// behavior is fully described by the bundle contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// 1-based invocation attempt (post-condition retries increment it).
    pub attempt: u32,
    /// Guidance accumulated from previous failed attempts.
    #[serde(default)]
    pub guidance: Vec<String>,
    /// The node bundle.
    pub bundle: ContextBundle,
}

/// Structured output returned by a capability.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityResponse {
    /// The output payload; schema-shaped but dynamically typed.
    pub output: Value,
    /// Runtime-reported metadata (timings, model info).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Errors reported by a capability runtime.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// No runtime is registered for the capability.
    #[error("no runtime available for capability '{capability_id}'")]
    Unavailable {
        /// The unresolvable capability.
        capability_id: String,
    },

    /// The invocation failed.
    #[error("capability invocation failed: {0}")]
    Invocation(String),

    /// The invocation was cancelled cooperatively.
    #[error("capability invocation cancelled")]
    Cancelled,
}

/// Executes capability invocations for the engine.
///
/// Implementations are expected to honor cooperative cancellation: when
/// the engine's token fires mid-call they should return
/// [`CapabilityError::Cancelled`] rather than keep running.
#[async_trait]
pub trait CapabilityRuntime: Send + Sync {
    /// Execute one node invocation.
    async fn invoke(&self, request: CapabilityRequest) -> Result<CapabilityResponse, CapabilityError>;
}
