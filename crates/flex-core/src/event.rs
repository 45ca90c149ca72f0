// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle event frames streamed to the caller.
//!
//! Serialized with `#[serde(tag = "type", content = "payload")]` so a frame
//! reads `{type, timestamp, runId?, nodeId?, planVersion?, payload}` on the
//! wire — the shape the SSE transport forwards verbatim.

use crate::plan::{NodeKind, NodeStatus, RoutingResult};
use crate::signal::FacetCheckResult;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persisted lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, plan not yet generated.
    Pending,
    /// Executing plan nodes.
    Running,
    /// Parked for operator review.
    AwaitingHitl,
    /// Parked on a human-assigned node.
    AwaitingHuman,
    /// Terminal: validated output recorded.
    Completed,
    /// Terminal: failed.
    Failed,
    /// Terminal: cancelled by the caller.
    Cancelled,
}

impl RunStatus {
    /// Whether this status admits a resume.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        matches!(self, Self::AwaitingHitl | Self::AwaitingHuman)
    }

    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Terminal status carried on a `complete` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompleteStatus {
    /// Output validated and recorded.
    Completed,
    /// Validation, policy, or planner failure.
    Failed,
    /// A runtime policy ended the run with a buffered emit.
    PolicyAction,
}

/// Which planning phase a planner call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    /// First plan of a run.
    Initial,
    /// Any subsequent re-plan.
    Replan,
}

/// A buffered `emit` policy action, attached to the terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmitRecord {
    /// Event name declared by the policy.
    pub event: String,
    /// Policy that produced the emit.
    pub policy_id: String,
    /// Declared payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Node summary included in `plan_generated` / `plan_updated` payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanNodeSummary {
    /// Node id.
    pub id: String,
    /// Capability the node dispatches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    /// Display label.
    pub label: String,
    /// Node kind.
    pub kind: NodeKind,
    /// Current status.
    pub status: NodeStatus,
    /// `true` for builder-injected nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_capability: Option<bool>,
    /// Selected node metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Plan summary included in `plan_generated` / `plan_updated` payloads.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    /// Run id.
    pub run_id: String,
    /// Plan version.
    pub version: u32,
    /// Per-node summaries in plan order.
    pub nodes: Vec<PlanNodeSummary>,
    /// Plan metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Why a `plan_updated` happened.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplanSummary {
    /// Trigger reason (`policy_triggered`, `goal_condition_failed`,
    /// `routing_unresolved`, `post_condition_exhausted`).
    pub reason: String,
    /// Policy that requested the re-plan, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

/// Status of a HITL request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HitlRequestStatus {
    /// Waiting on an operator.
    Pending,
    /// Operator approved / answered.
    Resolved,
    /// Operator declined.
    Denied,
}

/// A human-in-the-loop request raised by a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequestRecord {
    /// Request id.
    pub id: String,
    /// Run that raised the request.
    pub run_id: String,
    /// Which subsystem raised it (`coordinator`, `engine`, capability id).
    pub origin_agent: String,
    /// Structured request payload shown to the operator.
    pub payload: Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Node the run is parked on, when the pause is node-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_node_id: Option<String>,
    /// Prompt rendered for the operator.
    pub operator_prompt: String,
    /// Rendered summary of the pending contract, when one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_summary: Option<String>,
    /// Current status.
    pub status: HitlRequestStatus,
    /// Operator resolution payload, when resolved or denied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Value>,
}

/// The payload discriminator for [`EventFrame`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    /// First event of every run invocation.
    Start {
        /// The envelope objective.
        objective: String,
    },

    /// A planner call is about to be made.
    PlanRequested {
        /// 1-based attempt within the phase.
        attempt: u32,
        /// Which phase the call belongs to.
        phase: PlanPhase,
    },

    /// The planner draft failed validation.
    PlanRejected {
        /// Attempt that failed.
        attempt: u32,
        /// Validation errors.
        errors: Vec<String>,
    },

    /// A plan was built and persisted.
    PlanGenerated {
        /// The plan summary.
        plan: PlanSummary,
    },

    /// A re-plan replaced the active plan.
    PlanUpdated {
        /// The new plan summary.
        plan: PlanSummary,
        /// Why the re-plan happened.
        replan: ReplanSummary,
    },

    /// A node started executing.
    NodeStart {
        /// Display label.
        label: String,
        /// Node kind.
        kind: NodeKind,
        /// Capability dispatched, when any.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "capabilityId")]
        capability_id: Option<String>,
    },

    /// A node finished.
    NodeComplete {
        /// Display label.
        label: String,
        /// Node kind.
        kind: NodeKind,
        /// Capability dispatched, when any.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "capabilityId")]
        capability_id: Option<String>,
        /// Capability output, when the node produced one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        /// Routing outcome, for routing nodes.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "routingResult")]
        routing_result: Option<RoutingResult>,
        /// Post-condition outcomes, when the capability declares any.
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            rename = "postConditionResults"
        )]
        post_condition_results: Option<Vec<FacetCheckResult>>,
    },

    /// A node failed.
    NodeError {
        /// Error message.
        message: String,
    },

    /// A node parked on a human assignment.
    NodeAwaitingHuman {
        /// Capability awaiting a human.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "capabilityId")]
        capability_id: Option<String>,
        /// Assignee, when defaults name one.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "assignedTo")]
        assigned_to: Option<String>,
        /// Role the task is offered to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        /// Instructions shown to the assignee.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instructions: Option<String>,
    },

    /// A runtime policy fired.
    PolicyTriggered {
        /// Policy id, absent for the implicit default-fail arbitration.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "policyId")]
        policy_id: Option<String>,
        /// Trigger kind (`onNodeComplete`, `onStart`, `onPostConditionFailed`).
        trigger: String,
        /// Action taken (`replan`, `fail`, `emit`, `retry`).
        action: String,
        /// Retry budget, for post-condition policies.
        #[serde(default, skip_serializing_if = "Option::is_none", rename = "maxRetries")]
        max_retries: Option<u32>,
        /// Post-condition outcomes that engaged the policy.
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            rename = "postConditionResults"
        )]
        post_condition_results: Option<Vec<FacetCheckResult>>,
    },

    /// A HITL request was raised.
    HitlRequest {
        /// The request shown to the operator.
        request: HitlRequestRecord,
    },

    /// A previously pending HITL request was resolved.
    HitlResolved {
        /// Request id.
        #[serde(rename = "requestId")]
        request_id: String,
        /// Operator resolution payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<Value>,
    },

    /// The post-run goal gate found unmet conditions.
    GoalConditionFailed {
        /// All goal outcomes.
        results: Vec<FacetCheckResult>,
        /// The unmet subset.
        failed: Vec<FacetCheckResult>,
    },

    /// Output validation failed.
    ValidationError {
        /// What was being validated (`node:<id>` or `final_output`).
        scope: String,
        /// Validator messages.
        errors: Vec<String>,
    },

    /// Diagnostic line surfaced to the caller.
    Log {
        /// Severity (`info`, `warn`, `error`).
        level: String,
        /// Message text.
        message: String,
    },

    /// Terminal event of a run invocation.
    Complete {
        /// Terminal status.
        status: CompleteStatus,
        /// Final output, for completed runs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        /// Failure message, for failed runs.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Buffered `emit` policy actions.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        emits: Vec<EmitRecord>,
        /// Goal outcomes recorded with the result.
        #[serde(
            default,
            skip_serializing_if = "Option::is_none",
            rename = "goalConditionResults"
        )]
        goal_condition_results: Option<Vec<FacetCheckResult>>,
    },
}

impl EventKind {
    /// The wire name of this event type (`node_start`, `complete`, …).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::PlanRequested { .. } => "plan_requested",
            Self::PlanRejected { .. } => "plan_rejected",
            Self::PlanGenerated { .. } => "plan_generated",
            Self::PlanUpdated { .. } => "plan_updated",
            Self::NodeStart { .. } => "node_start",
            Self::NodeComplete { .. } => "node_complete",
            Self::NodeError { .. } => "node_error",
            Self::NodeAwaitingHuman { .. } => "node_awaiting_human",
            Self::PolicyTriggered { .. } => "policy_triggered",
            Self::HitlRequest { .. } => "hitl_request",
            Self::HitlResolved { .. } => "hitl_resolved",
            Self::GoalConditionFailed { .. } => "goal_condition_failed",
            Self::ValidationError { .. } => "validation_error",
            Self::Log { .. } => "log",
            Self::Complete { .. } => "complete",
        }
    }
}

/// A timestamped lifecycle event enriched by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    /// The event payload, flattened to `type` + `payload` on the wire.
    #[serde(flatten)]
    pub kind: EventKind,

    /// Emission time (RFC-3339 on the wire).
    pub timestamp: DateTime<Utc>,

    /// Run the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Node the event concerns, for node-scoped events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Active plan version, enriched by the coordinator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_version: Option<u32>,

    /// Facet provenance snippet, for HITL-facing events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facet_provenance: Option<Value>,
}

impl EventFrame {
    /// Build a frame around `kind`, timestamped now, with no enrichment.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            run_id: None,
            node_id: None,
            plan_version: None,
            facet_provenance: None,
        }
    }

    /// Attach the run id.
    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Attach the node id.
    #[must_use]
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach the active plan version.
    #[must_use]
    pub fn with_plan_version(mut self, version: u32) -> Self {
        self.plan_version = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_wire_shape_has_type_and_payload() {
        let frame = EventFrame::new(EventKind::Start {
            objective: "do it".into(),
        })
        .with_run("r-1")
        .with_plan_version(1);

        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["type"], json!("start"));
        assert_eq!(v["payload"]["objective"], json!("do it"));
        assert_eq!(v["runId"], json!("r-1"));
        assert_eq!(v["planVersion"], json!(1));
        assert!(v["timestamp"].is_string());
    }

    #[test]
    fn type_names_are_exhaustive_and_snake_case() {
        let kinds = [
            EventKind::Start {
                objective: String::new(),
            },
            EventKind::PlanRequested {
                attempt: 1,
                phase: PlanPhase::Initial,
            },
            EventKind::Log {
                level: "info".into(),
                message: String::new(),
            },
            EventKind::Complete {
                status: CompleteStatus::Completed,
                output: None,
                error: None,
                emits: vec![],
                goal_condition_results: None,
            },
        ];
        for kind in kinds {
            let name = kind.type_name().to_string();
            let v = serde_json::to_value(EventFrame::new(kind)).unwrap();
            assert_eq!(v["type"], json!(name));
        }
    }

    #[test]
    fn complete_payload_statuses() {
        for (status, expected) in [
            (CompleteStatus::Completed, "completed"),
            (CompleteStatus::Failed, "failed"),
            (CompleteStatus::PolicyAction, "policy_action"),
        ] {
            let v = serde_json::to_value(status).unwrap();
            assert_eq!(v, json!(expected));
        }
    }

    #[test]
    fn node_complete_uses_camel_case_payload_keys() {
        let frame = EventFrame::new(EventKind::NodeComplete {
            label: "route".into(),
            kind: NodeKind::Routing,
            capability_id: None,
            output: None,
            routing_result: Some(RoutingResult {
                selected_target: Some("node-success".into()),
                resolution: crate::plan::RoutingResolution::Match,
            }),
            post_condition_results: None,
        });
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            v["payload"]["routingResult"]["selectedTarget"],
            json!("node-success")
        );
        assert_eq!(v["payload"]["routingResult"]["resolution"], json!("match"));
    }

    #[test]
    fn run_status_predicates() {
        assert!(RunStatus::AwaitingHitl.is_resumable());
        assert!(RunStatus::AwaitingHuman.is_resumable());
        assert!(!RunStatus::Running.is_resumable());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }

    #[test]
    fn frame_round_trips() {
        let frame = EventFrame::new(EventKind::ValidationError {
            scope: "final_output".into(),
            errors: vec!["variants: expected at least 2 items".into()],
        })
        .with_run("r-9")
        .with_node("writer_v1_1");
        let v = serde_json::to_value(&frame).unwrap();
        let back: EventFrame = serde_json::from_value(v).unwrap();
        assert_eq!(back.kind.type_name(), "validation_error");
        assert_eq!(back.node_id.as_deref(), Some("writer_v1_1"));
    }
}
