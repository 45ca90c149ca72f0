// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The stable contract for the Flex run orchestrator: every other crate
//! in the workspace speaks these types.

/// Capability descriptors and the registry-facing record types.
pub mod capability;
/// The caller-facing task envelope and output contracts.
pub mod envelope;
/// Lifecycle event frames streamed to the caller.
pub mod event;
/// Plans, plan nodes, context bundles, and routing specs.
pub mod plan;
/// Debug-view redaction of sensitive keys.
pub mod redact;
/// Control-flow signals shared by the engine and the coordinator.
pub mod signal;
/// Resumable run state carried inside plan snapshots.
pub mod state;

pub use capability::{
    AgentType, AssignmentDefaults, CapabilityKind, CapabilityRecord, CapabilityStatus,
};
pub use envelope::{
    ConditionSpec, EnvelopeConstraints, EnvelopeError, EnvelopeMetadata, FacetCondition,
    OutputContract, TaskEnvelope, TaskEnvelopeBuilder, validate_envelope,
};
pub use event::{
    CompleteStatus, EmitRecord, EventFrame, EventKind, HitlRequestRecord, HitlRequestStatus,
    PlanNodeSummary, PlanPhase, PlanSummary, ReplanSummary, RunStatus,
};
pub use plan::{
    ContextBundle, FacetDirection, FacetProvenanceEntry, FlexPlan, FlexPlanNode, NodeContracts,
    NodeFacets, NodeKind, NodeProvenance, NodeStatus, PlanEdge, RouteRule, RoutingResolution,
    RoutingResult, RoutingSpec,
};
pub use signal::{EngineSignal, FacetCheckResult, ReplanReason, ValidationScope};
pub use state::PendingState;

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Current contract version string embedded in persisted run records.
///
/// # Examples
///
/// ```
/// assert_eq!(flex_core::CONTRACT_VERSION, "flex/v0.1");
/// ```
pub const CONTRACT_VERSION: &str = "flex/v0.1";

/// Errors from contract hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// The value could not be rendered as JSON.
    #[error("value is not JSON-serializable: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Hash a contract (or any serializable value) into the stable identifier
/// stored on run records, plan snapshots, and run outputs.
///
/// The digest is a SHA-256 over a stable JSON rendering: values pass
/// through `serde_json::Value`, whose maps sort keys (this workspace does
/// not enable `preserve_order`), so two structurally equal contracts hash
/// alike regardless of field declaration order. A resumed run compares
/// its envelope contract hash against the persisted `schemaHash` to
/// surface contract drift in debug views.
///
/// # Examples
///
/// ```
/// let schema = serde_json::json!({"type": "object", "required": ["variants"]});
/// let hash = flex_core::schema_hash(&schema).unwrap();
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, flex_core::schema_hash(&schema).unwrap());
/// ```
///
/// # Errors
///
/// Returns [`HashError::Serialize`] if the value cannot be serialized.
pub fn schema_hash<T: Serialize>(value: &T) -> Result<String, HashError> {
    let stable = serde_json::to_string(&serde_json::to_value(value)?)?;
    let mut hasher = Sha256::new();
    hasher.update(stable.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
