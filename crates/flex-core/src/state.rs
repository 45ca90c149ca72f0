// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resumable run state carried inside plan snapshots.

use crate::event::EmitRecord;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything the engine needs to resume a run mid-plan.
///
/// Persisted inside the plan snapshot keyed by `(run_id, version)`;
/// a resume rehydrates this verbatim so completed nodes are skipped and
/// retry counters are not double-counted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingState {
    /// Nodes already completed (or skipped) in plan order.
    #[serde(default)]
    pub completed_node_ids: Vec<String>,

    /// Raw capability outputs keyed by node id.
    #[serde(default)]
    pub node_outputs: BTreeMap<String, Value>,

    /// Per-policy retry counters (`policy_id → attempts`).
    #[serde(default)]
    pub policy_attempts: BTreeMap<String, u32>,

    /// Run-start policies already consumed this run.
    #[serde(default)]
    pub consumed_start_policies: Vec<String>,

    /// HITL clarifications counted toward the per-run limit.
    #[serde(default)]
    pub clarification_count: u32,

    /// Buffered `emit` policy actions awaiting the terminal event.
    #[serde(default)]
    pub emits: Vec<EmitRecord>,

    /// Node id the run is parked on, for `awaiting_human` runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_node_id: Option<String>,
}

impl PendingState {
    /// Whether `node_id` has already run to completion (or was skipped).
    #[must_use]
    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed_node_ids.iter().any(|id| id == node_id)
    }

    /// Record a node as done, keeping the list duplicate-free.
    pub fn mark_completed(&mut self, node_id: impl Into<String>) {
        let node_id = node_id.into();
        if !self.is_completed(&node_id) {
            self.completed_node_ids.push(node_id);
        }
    }

    /// Current attempt count for a policy.
    #[must_use]
    pub fn attempts(&self, policy_id: &str) -> u32 {
        self.policy_attempts.get(policy_id).copied().unwrap_or(0)
    }

    /// Increment and return the attempt count for a policy.
    pub fn bump_attempts(&mut self, policy_id: &str) -> u32 {
        let n = self.policy_attempts.entry(policy_id.to_string()).or_insert(0);
        *n += 1;
        *n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_completed_is_idempotent() {
        let mut state = PendingState::default();
        state.mark_completed("a_1");
        state.mark_completed("a_1");
        state.mark_completed("b_2");
        assert_eq!(state.completed_node_ids, vec!["a_1", "b_2"]);
        assert!(state.is_completed("a_1"));
        assert!(!state.is_completed("c_3"));
    }

    #[test]
    fn attempts_start_at_zero_and_bump() {
        let mut state = PendingState::default();
        assert_eq!(state.attempts("p1"), 0);
        assert_eq!(state.bump_attempts("p1"), 1);
        assert_eq!(state.bump_attempts("p1"), 2);
        assert_eq!(state.attempts("p1"), 2);
        assert_eq!(state.attempts("p2"), 0);
    }

    #[test]
    fn serde_round_trip_preserves_counters() {
        let mut state = PendingState::default();
        state.mark_completed("a_1");
        state.bump_attempts("p1");
        state.clarification_count = 2;
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["completedNodeIds"], serde_json::json!(["a_1"]));
        let back: PendingState = serde_json::from_value(v).unwrap();
        assert_eq!(back.attempts("p1"), 1);
        assert_eq!(back.clarification_count, 2);
    }
}
