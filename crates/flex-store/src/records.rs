// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted record types.

use chrono::{DateTime, Utc};
use flex_core::{FacetCheckResult, NodeStatus, PendingState, RunStatus};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The run row: identity, status, envelope, and latest derived state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlexRunRecord {
    /// Run id.
    pub run_id: String,
    /// Conversation thread, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Lifecycle status.
    pub status: RunStatus,
    /// The envelope objective, denormalized for listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    /// The full envelope as received.
    pub envelope: Value,
    /// Hash of the envelope output contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    /// Caller metadata (client id, correlation id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Latest run-context snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snapshot: Option<Value>,
    /// Recorded result, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Version of the active plan.
    pub plan_version: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// A versioned plan snapshot row; `(run_id, plan_version)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanSnapshotRecord {
    /// Run id.
    pub run_id: String,
    /// Plan version.
    pub plan_version: u32,
    /// The full plan, serialized.
    pub snapshot: Value,
    /// Run-context facet snapshot taken with the plan.
    pub facet_snapshot: Value,
    /// Hash of the plan's output contract.
    pub schema_hash: String,
    /// Node ids not yet completed.
    #[serde(default)]
    pub pending_node_ids: Vec<String>,
    /// Resumable engine state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_state: Option<PendingState>,
    /// Plan edges, denormalized for graph views.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edges: Option<Value>,
    /// Plan metadata, denormalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_metadata: Option<Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Status of a recorded run output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunOutputStatus {
    /// Validated final output.
    Completed,
    /// Provisional output of a paused run.
    Pending,
}

/// The recorded output row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunOutputRecord {
    /// Run id.
    pub run_id: String,
    /// Plan version the output was produced under.
    pub plan_version: u32,
    /// Hash of the contract the output was validated against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    /// Final or provisional.
    pub status: RunOutputStatus,
    /// The output payload.
    pub output: Value,
    /// Facet snapshot at record time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facet_snapshot: Option<Value>,
    /// Facet provenance at record time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Value>,
    /// Goal outcomes recorded with the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_condition_results: Option<Vec<FacetCheckResult>>,
    /// First record time.
    pub recorded_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Per-node state row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeStateRecord {
    /// Run id.
    pub run_id: String,
    /// Node id.
    pub node_id: String,
    /// Capability dispatched, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Node status.
    pub status: NodeStatus,
    /// Bundle or routing context captured at dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Capability output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message, for failed nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Partial update applied by `mark_node`; populated fields overwrite.
#[derive(Debug, Clone, Default)]
pub struct NodeStatePatch {
    /// New status.
    pub status: Option<NodeStatus>,
    /// Capability id, set on first dispatch.
    pub capability_id: Option<String>,
    /// Display label.
    pub label: Option<String>,
    /// Dispatch context.
    pub context: Option<Value>,
    /// Capability output.
    pub output: Option<Value>,
    /// Error message.
    pub error: Option<String>,
    /// Dispatch time.
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeStatePatch {
    /// A patch that only sets the status.
    #[must_use]
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Status of a human task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HumanTaskStatus {
    /// Waiting for a submission.
    Pending,
    /// A submission was applied.
    Submitted,
    /// The assignee declined.
    Declined,
}

/// A task parked on a human assignment.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HumanTaskRecord {
    /// Run the task belongs to.
    pub run_id: String,
    /// The parked node.
    pub node_id: String,
    /// Capability awaiting a human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Assignee, when defaults name one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    /// Role the task is offered to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Instructions shown to the assignee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Task status.
    pub status: HumanTaskStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Filter for the pending-human-task listing.
#[derive(Debug, Clone, Default)]
pub struct HumanTaskFilter {
    /// Match the assignee.
    pub assigned_to: Option<String>,
    /// Match the role.
    pub role: Option<String>,
    /// Match the status; defaults to pending-only when unset.
    pub status: Option<HumanTaskStatus>,
}

impl HumanTaskFilter {
    /// Whether a record matches this filter.
    #[must_use]
    pub fn matches(&self, record: &HumanTaskRecord) -> bool {
        if let Some(assigned_to) = &self.assigned_to {
            if record.assigned_to.as_deref() != Some(assigned_to.as_str()) {
                return false;
            }
        }
        if let Some(role) = &self.role {
            if record.role.as_deref() != Some(role.as_str()) {
                return false;
            }
        }
        match self.status {
            Some(status) => record.status == status,
            None => record.status == HumanTaskStatus::Pending,
        }
    }
}
