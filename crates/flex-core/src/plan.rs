// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plans, plan nodes, context bundles, and routing specs.

use crate::envelope::{ConditionSpec, OutputContract};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a plan node does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Shape unstructured input into facets.
    Structuring,
    /// Fan out work into variants.
    Branch,
    /// Select the next node from route conditions.
    Routing,
    /// Invoke a capability to produce content.
    Execution,
    /// Reshape content between contracts.
    Transformation,
    /// Check produced content.
    Validation,
    /// Catch-all escalation node appended when the planner omits one.
    Fallback,
}

/// Execution status of a node, persisted per `(run_id, node_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet dispatched.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Bypassed by a routing decision.
    Skipped,
    /// Parked on a human assignment.
    AwaitingHuman,
}

/// Where a node came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NodeProvenance {
    /// Emitted by the planner draft.
    Planner,
    /// Injected by the plan builder.
    Injected {
        /// Why the builder added it (`branch`, `normalization`, `fallback`).
        reason: String,
    },
}

/// Direction a facet is declared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FacetDirection {
    /// Consumed only.
    Input,
    /// Produced only.
    Output,
    /// Both consumed and produced.
    Bidirectional,
}

impl FacetDirection {
    /// Whether a facet with this direction may be consumed.
    #[must_use]
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Input | Self::Bidirectional)
    }

    /// Whether a facet with this direction may be produced.
    #[must_use]
    pub fn accepts_output(self) -> bool {
        matches!(self, Self::Output | Self::Bidirectional)
    }
}

/// One entry of a compiled contract's provenance, used to build operator
/// prompts for HITL review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacetProvenanceEntry {
    /// Facet name.
    pub facet: String,
    /// Display title.
    pub title: String,
    /// Declared direction.
    pub direction: FacetDirection,
    /// JSON pointer into the compiled contract (`/properties/<facet>`).
    pub pointer: String,
}

/// Input/output facet names a node declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeFacets {
    /// Facets consumed by the node.
    #[serde(default)]
    pub input: Vec<String>,
    /// Facets produced by the node.
    #[serde(default)]
    pub output: Vec<String>,
}

/// Input/output contracts resolved for a node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeContracts {
    /// Contract over the node's input bundle, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<OutputContract>,
    /// Contract the node's output must satisfy.
    pub output: OutputContract,
    /// Escalation channel for fallback nodes (`hitl`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

/// A single conditional route out of a routing node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Target node id when the condition holds.
    pub to: String,
    /// Condition evaluated against the routing payload.
    pub condition: ConditionSpec,
    /// Optional display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Routing table attached to a `routing` node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingSpec {
    /// Routes evaluated in order; first match wins.
    pub routes: Vec<RouteRule>,
    /// Target when no route matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub else_to: Option<String>,
}

/// How a routing node resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoutingResolution {
    /// A route condition matched.
    Match,
    /// No route matched; the `else` target was taken.
    Else,
    /// No route matched and no `else` target exists; a re-plan is required.
    Replan,
}

/// Outcome of evaluating a routing node, carried on its `node_complete`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    /// Chosen target node id, absent when `resolution` is `replan`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_target: Option<String>,
    /// How the decision was reached.
    pub resolution: RoutingResolution,
}

/// The payload handed to a capability runtime for one node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextBundle {
    /// Run this bundle belongs to.
    pub run_id: String,
    /// Node this bundle was built for.
    pub node_id: String,
    /// The envelope objective.
    pub objective: String,
    /// Special instructions plus any retry guidance.
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Envelope inputs.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Raw policy payload, for capabilities that inspect policy hints.
    #[serde(default)]
    pub policies: Value,
    /// The node's output contract.
    pub contract: OutputContract,
    /// Facets the node declares.
    #[serde(default)]
    pub facets: NodeFacets,
    /// Provenance entries for the compiled facet contract.
    #[serde(default)]
    pub facet_provenance: Vec<FacetProvenanceEntry>,
    /// Snapshot of the run context at dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_context_snapshot: Option<Value>,
}

/// One node of a [`FlexPlan`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlexPlanNode {
    /// Unique within the plan, e.g. `writer_v1_2`.
    pub id: String,
    /// What the node does.
    pub kind: NodeKind,
    /// Capability dispatched by this node; `None` for routing/branch nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Display name of the capability (or the node itself).
    pub capability_label: String,
    /// Display label for the node.
    pub label: String,
    /// The payload handed to the capability runtime.
    pub bundle: ContextBundle,
    /// Resolved contracts.
    pub contracts: NodeContracts,
    /// Declared facets, direction-filtered.
    pub facets: NodeFacets,
    /// Where the node came from.
    pub provenance: NodeProvenance,
    /// Planner rationale lines.
    #[serde(default)]
    pub rationale: Vec<String>,
    /// Node metadata: `plannerStage`, `kind`, derived flags.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Routing table, present when `kind` is `routing`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingSpec>,
}

impl FlexPlanNode {
    /// The node's `plannerStage` metadata entry, when present.
    #[must_use]
    pub fn planner_stage(&self) -> Option<&str> {
        self.metadata.get("plannerStage").and_then(Value::as_str)
    }
}

/// A directed edge between plan nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanEdge {
    /// Source node id.
    pub from: String,
    /// Target node id.
    pub to: String,
    /// Why the edge exists (`sequence`, `route`, `route_else`).
    pub reason: String,
}

/// An ordered, versioned graph of nodes the coordinator executes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlexPlan {
    /// Run this plan belongs to.
    pub run_id: String,
    /// Monotonic per run; every re-plan strictly increases it.
    pub version: u32,
    /// When the builder assembled this plan.
    pub created_at: DateTime<Utc>,
    /// Nodes in topological (execution) order.
    pub nodes: Vec<FlexPlanNode>,
    /// Sequential and routing edges.
    #[serde(default)]
    pub edges: Vec<PlanEdge>,
    /// Plan metadata: scenario hints, planner info, replan context.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl FlexPlan {
    /// Index of a node by id.
    #[must_use]
    pub fn node_index(&self, node_id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == node_id)
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&FlexPlanNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}
