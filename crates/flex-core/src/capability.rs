// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability descriptors as stored in the registry.

use crate::envelope::{FacetCondition, OutputContract};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a capability does within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Produces new content or side effects.
    Execution,
    /// Shapes unstructured input into facets.
    Structuring,
    /// Checks produced content against expectations.
    Validation,
    /// Reshapes content between contracts.
    Transformation,
}

/// Who performs the work when a node dispatches this capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// An AI runtime invocation.
    Ai,
    /// A human assignment; the run parks in `awaiting_human`.
    Human,
}

/// Whether a capability may appear in newly planned runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityStatus {
    /// Offered to the planner.
    Active,
    /// Resolvable for resume, excluded from new drafts.
    Inactive,
}

/// Default assignment metadata for human-performed capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDefaults {
    /// Default assignee identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    /// Default role the task is offered to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Instructions shown to the assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// A registered unit of work the planner can place on a plan.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRecord {
    /// Stable identifier, e.g. `"writer.v1"`.
    pub capability_id: String,

    /// Registry version of this record.
    pub version: String,

    /// Human-readable name.
    pub display_name: String,

    /// One-line description offered to the planner.
    pub summary: String,

    /// Role within a plan.
    pub kind: CapabilityKind,

    /// Who performs the work.
    pub agent_type: AgentType,

    /// Contract the capability's input bundle should satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_contract: Option<OutputContract>,

    /// Contract the capability's output satisfies.
    pub output_contract: OutputContract,

    /// Facets this capability consumes.
    #[serde(default)]
    pub input_facets: Vec<String>,

    /// Facets this capability produces.
    #[serde(default)]
    pub output_facets: Vec<String>,

    /// Predicates enforced over the capability's output.
    #[serde(default)]
    pub post_conditions: Vec<FacetCondition>,

    /// Defaults applied when `agent_type` is [`AgentType::Human`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_defaults: Option<AssignmentDefaults>,

    /// Open metadata surfaced to the planner.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Whether the planner may use this capability.
    pub status: CapabilityStatus,
}

impl CapabilityRecord {
    /// Returns `true` when this capability is performed by a human.
    #[must_use]
    pub fn is_human(&self) -> bool {
        self.agent_type == AgentType::Human
    }

    /// Returns `true` when the planner may place this capability.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == CapabilityStatus::Active
    }
}
