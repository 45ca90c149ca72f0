// SPDX-License-Identifier: MIT OR Apache-2.0
//! Control-flow signals shared by the execution engine and the coordinator.
//!
//! Each way a run can leave the straight-line path is one variant here; the
//! coordinator's main loop is a match over this type rather than a chain of
//! error downcasts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of checking one facet condition (post-condition or goal).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FacetCheckResult {
    /// Facet the condition read.
    pub facet: String,
    /// Path within the facet value.
    pub path: String,
    /// Canonical (or raw) expression that was evaluated.
    pub expression: String,
    /// Whether the condition held.
    pub satisfied: bool,
    /// Value found at `path`, when it resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_value: Option<Value>,
    /// Resolution or evaluation error, when one occurred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Why a re-plan was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplanReason {
    /// An `onNodeComplete`/`onStart` policy fired with a `replan` action.
    PolicyTriggered,
    /// The post-run goal gate found unmet conditions.
    GoalConditionFailed,
    /// A routing node had no matching route and no `else` target.
    RoutingUnresolved,
    /// A post-condition exhausted its retry budget under a `replan` policy.
    PostConditionExhausted,
}

impl ReplanReason {
    /// Wire name used in `plan_updated.replan.reason`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PolicyTriggered => "policy_triggered",
            Self::GoalConditionFailed => "goal_condition_failed",
            Self::RoutingUnresolved => "routing_unresolved",
            Self::PostConditionExhausted => "post_condition_exhausted",
        }
    }
}

/// What was being validated when validation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidationScope {
    /// A node's output against its output contract.
    NodeOutput {
        /// The node in question.
        node_id: String,
    },
    /// The composed final output against the envelope contract.
    FinalOutput,
}

impl std::fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeOutput { node_id } => write!(f, "node:{node_id}"),
            Self::FinalOutput => write!(f, "final_output"),
        }
    }
}

/// A control-flow signal raised by the engine and handled by the coordinator.
///
/// Engine state (completed nodes, outputs, policy attempts) is persisted
/// *before* any of these are raised, so the coordinator never needs to
/// reconstruct it from the signal itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineSignal {
    /// The active plan must be replaced before the run can continue.
    #[error("replan requested ({})", reason.as_str())]
    ReplanRequested {
        /// Why.
        reason: ReplanReason,
        /// Policy that fired, when one did.
        policy_id: Option<String>,
        /// Trigger projection for the `policy_triggered` event.
        trigger: Option<Value>,
        /// Goal outcomes, when the reason is the goal gate.
        goal_results: Vec<FacetCheckResult>,
        /// Provisional final output composed before the gate.
        provisional_output: Option<Value>,
    },

    /// The run is parked for operator review.
    #[error("run paused for operator review (request {request_id})")]
    HitlPause {
        /// HITL request the run is parked on.
        request_id: String,
    },

    /// A human-assigned node is waiting for its submission.
    #[error("node {node_id} awaits human input")]
    AwaitingHumanInput {
        /// The parked node.
        node_id: String,
        /// Capability behind the node.
        capability_id: Option<String>,
    },

    /// The run was paused for a reason other than HITL review.
    #[error("run paused: {reason}")]
    RunPaused {
        /// Why the run paused.
        reason: String,
    },

    /// The post-run goal gate failed.
    #[error("{} of {} goal conditions unsatisfied", failed.len(), results.len())]
    GoalConditionFailed {
        /// All goal outcomes.
        results: Vec<FacetCheckResult>,
        /// The unmet subset.
        failed: Vec<FacetCheckResult>,
        /// Provisional final output composed before the gate.
        provisional_output: Option<Value>,
    },

    /// A runtime policy terminated the run.
    #[error("runtime policy '{policy_id}' failed the run: {message}")]
    RuntimePolicyFailure {
        /// The policy.
        policy_id: String,
        /// Declared failure message.
        message: String,
    },

    /// Output validation failed.
    #[error("validation failed for {scope}")]
    ValidationFailed {
        /// What was being validated.
        scope: ValidationScope,
        /// Validator messages.
        errors: Vec<String>,
    },
}

impl EngineSignal {
    /// Convenience constructor for the goal-gate signal.
    #[must_use]
    pub fn goal_failed(
        results: Vec<FacetCheckResult>,
        provisional_output: Option<Value>,
    ) -> Self {
        let failed = results
            .iter()
            .filter(|r| !r.satisfied || r.error.is_some())
            .cloned()
            .collect();
        Self::GoalConditionFailed {
            results,
            failed,
            provisional_output,
        }
    }
}
