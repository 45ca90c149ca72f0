// SPDX-License-Identifier: MIT OR Apache-2.0
//! The canonical policy model.

use flex_core::ConditionSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// When a runtime policy is considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    /// Once, before the first node executes.
    OnStart,
    /// After each node completes.
    OnNodeComplete,
    /// When a capability post-condition fails.
    OnPostConditionFailed,
}

impl TriggerKind {
    /// Wire name (`onNodeComplete`, …) used in event payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OnStart => "onStart",
            Self::OnNodeComplete => "onNodeComplete",
            Self::OnPostConditionFailed => "onPostConditionFailed",
        }
    }
}

/// Which nodes a trigger applies to. An empty selector matches every node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicySelector {
    /// Match the node's capability id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,

    /// Match the node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Match the node kind (`execution`, `validation`, …).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Match the node's `plannerStage` metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_stage: Option<String>,
}

impl PolicySelector {
    /// Whether every populated field matches the node projection.
    #[must_use]
    pub fn matches(&self, projection: &Value) -> bool {
        let field = |path: &[&str]| -> Option<&str> {
            let mut current = projection;
            for key in path {
                current = current.get(key)?;
            }
            current.as_str()
        };
        if let Some(capability_id) = &self.capability_id {
            if field(&["capabilityId"]) != Some(capability_id.as_str()) {
                return false;
            }
        }
        if let Some(node_id) = &self.node_id {
            if field(&["id"]) != Some(node_id.as_str()) {
                return false;
            }
        }
        if let Some(kind) = &self.kind {
            if field(&["kind"]) != Some(kind.as_str()) {
                return false;
            }
        }
        if let Some(stage) = &self.planner_stage {
            if field(&["metadata", "plannerStage"]) != Some(stage.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A runtime policy trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTrigger {
    /// When the trigger is considered.
    pub kind: TriggerKind,

    /// Which nodes it applies to.
    #[serde(default, skip_serializing_if = "selector_is_empty")]
    pub selector: PolicySelector,

    /// Additional condition over the node projection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionSpec>,

    /// Retry budget, for `onPostConditionFailed` triggers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

fn selector_is_empty(selector: &PolicySelector) -> bool {
    selector == &PolicySelector::default()
}

/// What a policy does when its trigger fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyAction {
    /// Request a re-plan.
    Replan {
        /// Why, surfaced in events and plan metadata.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rationale: Option<String>,
    },
    /// Terminate the run as failed.
    Fail {
        /// Failure message surfaced to the caller.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Buffer a caller-visible emit and continue.
    Emit {
        /// Event name.
        event: String,
        /// Declared payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
}

impl PolicyAction {
    /// Wire name of the action (`replan`, `fail`, `emit`).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Replan { .. } => "replan",
            Self::Fail { .. } => "fail",
            Self::Emit { .. } => "emit",
        }
    }
}

/// A declarative rule that may mutate the plan or terminate the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePolicy {
    /// Stable identifier.
    pub id: String,

    /// Disabled policies are skipped during evaluation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// When and where the policy applies.
    pub trigger: PolicyTrigger,

    /// What happens when it fires.
    pub action: PolicyAction,
}

fn default_enabled() -> bool {
    true
}

/// Topology hints for the planner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyPolicy {
    /// Requested number of parallel variants.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_count: Option<u32>,

    /// Open extension map.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Planner-facing policy knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlannerPolicy {
    /// Topology hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<TopologyPolicy>,

    /// Open extension map.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trigger_kinds_use_camel_case_on_the_wire() {
        assert_eq!(
            serde_json::to_value(TriggerKind::OnNodeComplete).unwrap(),
            json!("onNodeComplete")
        );
        assert_eq!(
            serde_json::to_value(TriggerKind::OnPostConditionFailed).unwrap(),
            json!("onPostConditionFailed")
        );
    }

    #[test]
    fn selector_matches_every_populated_field() {
        let selector = PolicySelector {
            capability_id: Some("writer.v1".into()),
            planner_stage: Some("drafting".into()),
            ..PolicySelector::default()
        };
        let hit = json!({
            "id": "writer_v1_1",
            "capabilityId": "writer.v1",
            "kind": "execution",
            "metadata": {"plannerStage": "drafting"}
        });
        let miss = json!({
            "id": "writer_v1_1",
            "capabilityId": "writer.v1",
            "metadata": {"plannerStage": "review"}
        });
        assert!(selector.matches(&hit));
        assert!(!selector.matches(&miss));
    }

    #[test]
    fn empty_selector_matches_everything() {
        assert!(PolicySelector::default().matches(&json!({"id": "x"})));
    }

    #[test]
    fn policy_round_trips_with_defaults() {
        let policy: RuntimePolicy = serde_json::from_value(json!({
            "id": "p1",
            "trigger": {"kind": "onNodeComplete"},
            "action": {"type": "replan"}
        }))
        .unwrap();
        assert!(policy.enabled);
        assert_eq!(policy.trigger.selector, PolicySelector::default());
        assert_eq!(policy.action.type_name(), "replan");

        let v = serde_json::to_value(&policy).unwrap();
        let back: RuntimePolicy = serde_json::from_value(v).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn action_wire_shape_is_tagged() {
        let action = PolicyAction::Emit {
            event: "alert".into(),
            payload: Some(json!({"level": "high"})),
        };
        let v = serde_json::to_value(&action).unwrap();
        assert_eq!(v["type"], json!("emit"));
        assert_eq!(v["event"], json!("alert"));
    }
}
