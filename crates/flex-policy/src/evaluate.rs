// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime policy evaluation.
//!
//! First-match semantics: the evaluator walks `runtime[]` in declaration
//! order, skips disabled policies, and returns the first policy whose
//! trigger kind, selector, and condition all hold against the node
//! projection.

use crate::PolicyError;
use crate::model::{PolicyAction, PolicyTrigger, RuntimePolicy, TriggerKind};
use flex_condition::evaluate_condition;
use serde_json::Value;
use tracing::debug;

/// The effect a matching policy produces.
#[derive(Debug, Clone)]
pub enum RuntimeEffect {
    /// The plan must be rebuilt.
    Replan {
        /// Policy that fired.
        policy_id: String,
        /// The trigger that matched, for event payloads.
        trigger: PolicyTrigger,
        /// Declared rationale.
        rationale: Option<String>,
    },
    /// A non-replan action (`fail` or `emit`) to interpret.
    Action {
        /// The full policy.
        policy: Box<RuntimePolicy>,
    },
}

/// Evaluate `onNodeComplete` policies against a node projection.
///
/// The projection carries `id`, `capabilityId`, `kind`, and `metadata`
/// (notably `metadata.plannerStage` and
/// `metadata.runContextSnapshot.facets.*.value`).
///
/// # Errors
///
/// Returns [`PolicyError::Evaluation`] when a policy condition fails to
/// evaluate.
pub fn evaluate_runtime_effect(
    policies: &[RuntimePolicy],
    projection: &Value,
) -> Result<Option<RuntimeEffect>, PolicyError> {
    first_match(policies, TriggerKind::OnNodeComplete, projection, &[])
}

/// Evaluate `onStart` policies, skipping those already consumed this run.
///
/// # Errors
///
/// Returns [`PolicyError::Evaluation`] when a policy condition fails to
/// evaluate.
pub fn evaluate_run_start_effect(
    policies: &[RuntimePolicy],
    projection: &Value,
    consumed: &[String],
) -> Result<Option<RuntimeEffect>, PolicyError> {
    first_match(policies, TriggerKind::OnStart, projection, consumed)
}

/// Find the `onPostConditionFailed` policy covering a capability.
#[must_use]
pub fn find_post_condition_policy<'p>(
    policies: &'p [RuntimePolicy],
    capability_id: &str,
) -> Option<&'p RuntimePolicy> {
    policies.iter().find(|policy| {
        policy.enabled
            && policy.trigger.kind == TriggerKind::OnPostConditionFailed
            && policy.trigger.selector.capability_id.as_deref() == Some(capability_id)
    })
}

fn first_match(
    policies: &[RuntimePolicy],
    kind: TriggerKind,
    projection: &Value,
    consumed: &[String],
) -> Result<Option<RuntimeEffect>, PolicyError> {
    for policy in policies {
        if !policy.enabled || policy.trigger.kind != kind {
            continue;
        }
        if consumed.iter().any(|id| id == &policy.id) {
            continue;
        }
        if !policy.trigger.selector.matches(projection) {
            continue;
        }
        if let Some(condition) = &policy.trigger.condition {
            let evaluation = evaluate_condition(&condition.json_logic, projection).map_err(
                |source| PolicyError::Evaluation {
                    policy_id: policy.id.clone(),
                    source,
                },
            )?;
            if !evaluation.result {
                continue;
            }
        }
        debug!(target: "flex.policy", policy = %policy.id, kind = kind.as_str(), "policy matched");
        let effect = match &policy.action {
            PolicyAction::Replan { rationale } => RuntimeEffect::Replan {
                policy_id: policy.id.clone(),
                trigger: policy.trigger.clone(),
                rationale: rationale.clone(),
            },
            _ => RuntimeEffect::Action {
                policy: Box::new(policy.clone()),
            },
        };
        return Ok(Some(effect));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize_policies;
    use serde_json::json;

    fn policies(value: serde_json::Value) -> Vec<RuntimePolicy> {
        normalize_policies(&value).unwrap().runtime
    }

    fn projection(capability: &str, stage: &str) -> Value {
        json!({
            "id": format!("{}_1", capability.replace('.', "_")),
            "capabilityId": capability,
            "kind": "execution",
            "metadata": {
                "plannerStage": stage,
                "runContextSnapshot": {"facets": {"score": {"value": 2}}}
            }
        })
    }

    #[test]
    fn first_matching_policy_wins() {
        let ps = policies(json!({"runtime": [
            {"id": "a", "trigger": {"kind": "onNodeComplete", "selector": {"capabilityId": "other"}},
             "action": {"type": "fail"}},
            {"id": "b", "trigger": {"kind": "onNodeComplete"}, "action": {"type": "replan"}},
            {"id": "c", "trigger": {"kind": "onNodeComplete"}, "action": {"type": "fail"}}
        ]}));
        let effect = evaluate_runtime_effect(&ps, &projection("writer.v1", "draft"))
            .unwrap()
            .unwrap();
        match effect {
            RuntimeEffect::Replan { policy_id, .. } => assert_eq!(policy_id, "b"),
            RuntimeEffect::Action { .. } => panic!("expected replan from 'b'"),
        }
    }

    #[test]
    fn disabled_policies_are_skipped() {
        let ps = policies(json!({"runtime": [
            {"id": "off", "enabled": false, "trigger": {"kind": "onNodeComplete"},
             "action": {"type": "replan"}}
        ]}));
        assert!(evaluate_runtime_effect(&ps, &projection("writer.v1", "draft"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn conditions_gate_on_the_projection() {
        let ps = policies(json!({"runtime": [{
            "id": "low-score",
            "trigger": {"kind": "onNodeComplete", "condition": {
                "dsl": "metadata.runContextSnapshot.facets.score.value < 3"
            }},
            "action": {"type": "replan", "rationale": "score too low"}
        }]}));
        // score = 2 in the projection → fires.
        let effect = evaluate_runtime_effect(&ps, &projection("writer.v1", "draft")).unwrap();
        assert!(matches!(effect, Some(RuntimeEffect::Replan { .. })));

        // score = 5 → does not fire.
        let high = json!({
            "id": "n", "capabilityId": "writer.v1", "kind": "execution",
            "metadata": {"runContextSnapshot": {"facets": {"score": {"value": 5}}}}
        });
        assert!(evaluate_runtime_effect(&ps, &high).unwrap().is_none());
    }

    #[test]
    fn planner_stage_condition_from_legacy_directive() {
        let ps = policies(json!({"replanAfter": [{"stage": "drafting"}]}));
        assert!(matches!(
            evaluate_runtime_effect(&ps, &projection("x.v1", "drafting")).unwrap(),
            Some(RuntimeEffect::Replan { .. })
        ));
        assert!(evaluate_runtime_effect(&ps, &projection("x.v1", "review"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn non_replan_actions_surface_the_policy() {
        let ps = policies(json!({"runtime": [{
            "id": "alert",
            "trigger": {"kind": "onNodeComplete", "selector": {"kind": "validation"}},
            "action": {"type": "emit", "event": "qa_done", "payload": {"ok": true}}
        }]}));
        let proj = json!({"id": "qa_1", "capabilityId": "qa.v1", "kind": "validation", "metadata": {}});
        match evaluate_runtime_effect(&ps, &proj).unwrap().unwrap() {
            RuntimeEffect::Action { policy } => {
                assert_eq!(policy.id, "alert");
                assert_eq!(policy.action.type_name(), "emit");
            }
            RuntimeEffect::Replan { .. } => panic!("expected action"),
        }
    }

    #[test]
    fn run_start_effects_respect_the_consumed_set() {
        let ps = policies(json!({"runtime": [{
            "id": "boot",
            "trigger": {"kind": "onStart"},
            "action": {"type": "replan", "rationale": "warm up"}
        }]}));
        let proj = json!({"metadata": {}});
        assert!(
            evaluate_run_start_effect(&ps, &proj, &[])
                .unwrap()
                .is_some()
        );
        assert!(
            evaluate_run_start_effect(&ps, &proj, &["boot".to_string()])
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn node_complete_evaluation_ignores_start_policies() {
        let ps = policies(json!({"runtime": [{
            "id": "boot", "trigger": {"kind": "onStart"}, "action": {"type": "replan"}
        }]}));
        assert!(evaluate_runtime_effect(&ps, &projection("w.v1", "draft"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn post_condition_policy_lookup_matches_capability() {
        let ps = policies(json!({"runtime": [{
            "id": "retry-writer",
            "trigger": {"kind": "onPostConditionFailed",
                         "selector": {"capabilityId": "writer.v1"},
                         "maxRetries": 2},
            "action": {"type": "replan"}
        }]}));
        let hit = find_post_condition_policy(&ps, "writer.v1").unwrap();
        assert_eq!(hit.trigger.max_retries, Some(2));
        assert!(find_post_condition_policy(&ps, "qa.v1").is_none());
    }
}
