// SPDX-License-Identifier: MIT OR Apache-2.0
//! The policy normalizer.
//!
//! Accepts the canonical `{planner, runtime[]}` shape and every legacy
//! replan-directive field, producing one uniform model. Running the
//! normalizer over its own canonical output is a no-op.

use crate::model::{
    PlannerPolicy, PolicyAction, PolicySelector, PolicyTrigger, RuntimePolicy, TopologyPolicy,
    TriggerKind,
};
use crate::PolicyError;
use flex_condition::parse_dsl;
use flex_core::ConditionSpec;
use serde_json::{Map, Value, json};
use tracing::debug;

/// Legacy top-level fields the normalizer recognizes.
const LEGACY_DIRECTIVE_FIELDS: &[&str] = &["replanAfter", "triggerReplanAfter", "policyTriggers"];

/// Result of normalizing `envelope.policies`.
#[derive(Debug, Clone, Default)]
pub struct NormalizedPolicies {
    /// The canonical `{planner, runtime[]}` value; feeding this back into
    /// [`normalize_policies`] reproduces it exactly.
    pub canonical: Value,
    /// Planner-facing knobs.
    pub planner: Option<PlannerPolicy>,
    /// Normalized runtime policies, in declaration order.
    pub runtime: Vec<RuntimePolicy>,
    /// Whether the caller gated execution behind operator approval.
    pub requires_hitl_approval: bool,
    /// Human-readable notes about folded legacy fields.
    pub legacy_notes: Vec<String>,
    /// Names of the legacy fields that were folded.
    pub legacy_fields: Vec<String>,
}

/// Normalize a raw `envelope.policies` payload.
///
/// # Errors
///
/// Returns [`PolicyError::InvalidShape`] when the payload is not an
/// object (or null), or [`PolicyError::Condition`] when an authored DSL
/// condition fails to parse.
pub fn normalize_policies(policies: &Value) -> Result<NormalizedPolicies, PolicyError> {
    let map = match policies {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        other => {
            return Err(PolicyError::InvalidShape(format!(
                "policies must be an object, got {other}"
            )));
        }
    };

    let mut out = NormalizedPolicies::default();

    // Canonical planner block.
    let mut planner: Option<PlannerPolicy> = match map.get("planner") {
        Some(value) => Some(
            serde_json::from_value(value.clone())
                .map_err(|e| PolicyError::InvalidShape(format!("planner: {e}")))?,
        ),
        None => None,
    };

    // Canonical runtime block.
    if let Some(runtime) = map.get("runtime") {
        let policies: Vec<RuntimePolicy> = serde_json::from_value(runtime.clone())
            .map_err(|e| PolicyError::InvalidShape(format!("runtime: {e}")))?;
        out.runtime.extend(policies);
    }

    // HITL gating travels with either block.
    out.requires_hitl_approval = map
        .get("requiresHitlApproval")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    // Legacy: bare variantCount becomes a topology hint.
    if let Some(count) = map.get("variantCount").and_then(Value::as_u64) {
        let planner = planner.get_or_insert_with(PlannerPolicy::default);
        let topology = planner.topology.get_or_insert_with(TopologyPolicy::default);
        if topology.variant_count.is_none() {
            topology.variant_count = Some(count as u32);
        }
        out.legacy_fields.push("variantCount".into());
        out.legacy_notes
            .push(format!("variantCount: {count} → planner.topology.variantCount"));
    }

    // Legacy directive lists.
    for field in LEGACY_DIRECTIVE_FIELDS {
        if let Some(items) = map.get(*field).and_then(Value::as_array) {
            out.legacy_fields.push((*field).to_string());
            for item in items {
                let policy = coerce_directive(field, item)?;
                out.legacy_notes
                    .push(format!("{field}: folded directive into '{}'", policy.id));
                out.runtime.push(policy);
            }
        }
    }
    // `replan.after` nests the same directive list.
    if let Some(items) = map
        .get("replan")
        .and_then(|r| r.get("after"))
        .and_then(Value::as_array)
    {
        out.legacy_fields.push("replan.after".into());
        for item in items {
            let policy = coerce_directive("replan.after", item)?;
            out.legacy_notes
                .push(format!("replan.after: folded directive into '{}'", policy.id));
            out.runtime.push(policy);
        }
    }

    // Canonicalize every runtime condition.
    for policy in &mut out.runtime {
        canonicalize_condition(policy)?;
    }

    out.planner = planner;
    out.canonical = build_canonical(&out);
    debug!(
        target: "flex.policy",
        runtime = out.runtime.len(),
        legacy = out.legacy_fields.len(),
        "normalized policies"
    );
    Ok(out)
}

fn build_canonical(normalized: &NormalizedPolicies) -> Value {
    let mut canonical = Map::new();
    if let Some(planner) = &normalized.planner {
        canonical.insert(
            "planner".into(),
            serde_json::to_value(planner).unwrap_or(Value::Null),
        );
    }
    canonical.insert(
        "runtime".into(),
        serde_json::to_value(&normalized.runtime).unwrap_or_else(|_| json!([])),
    );
    if normalized.requires_hitl_approval {
        canonical.insert("requiresHitlApproval".into(), Value::Bool(true));
    }
    Value::Object(canonical)
}

/// Fold one legacy directive into a runtime policy.
fn coerce_directive(field: &str, item: &Value) -> Result<RuntimePolicy, PolicyError> {
    let (kind, value, condition, rationale) = match item {
        Value::String(s) => ("capability", s.clone(), None, None),
        Value::Object(map) => {
            let mut pair = None;
            for key in ["capability", "node", "kind", "stage"] {
                if let Some(v) = map.get(key).and_then(Value::as_str) {
                    pair = Some((key, v.to_string()));
                    break;
                }
            }
            let Some((kind, value)) = pair else {
                return Err(PolicyError::InvalidShape(format!(
                    "{field}: directive must name capability, node, kind, or stage"
                )));
            };
            let condition = map.get("condition").cloned();
            let rationale = map
                .get("rationale")
                .and_then(Value::as_str)
                .map(str::to_string);
            (kind, value, condition, rationale)
        }
        other => {
            return Err(PolicyError::InvalidShape(format!(
                "{field}: directive must be a string or object, got {other}"
            )));
        }
    };

    let id = sanitize_id(&format!("legacy_{kind}_{value}"));

    let mut selector = PolicySelector::default();
    let mut trigger_condition: Option<ConditionSpec> = condition
        .map(|c| coerce_condition_spec(&id, &c))
        .transpose()?;

    match kind {
        "capability" => selector.capability_id = Some(value.clone()),
        "node" => selector.node_id = Some(value.clone()),
        "kind" => selector.kind = Some(value.clone()),
        // A stage directive is expressed as a condition on node metadata.
        _ => {
            let dsl = format!("metadata.plannerStage == \"{value}\"");
            trigger_condition = Some(ConditionSpec {
                dsl: Some(dsl),
                ..ConditionSpec::default()
            });
        }
    }

    Ok(RuntimePolicy {
        id,
        enabled: true,
        description: None,
        trigger: PolicyTrigger {
            kind: TriggerKind::OnNodeComplete,
            selector,
            condition: trigger_condition,
            max_retries: None,
        },
        action: PolicyAction::Replan { rationale },
    })
}

/// Accept a directive condition as either a DSL string or a spec object.
fn coerce_condition_spec(policy_id: &str, value: &Value) -> Result<ConditionSpec, PolicyError> {
    match value {
        Value::String(dsl) => Ok(ConditionSpec {
            dsl: Some(dsl.clone()),
            ..ConditionSpec::default()
        }),
        Value::Object(_) => serde_json::from_value(value.clone())
            .map_err(|e| PolicyError::InvalidShape(format!("condition for '{policy_id}': {e}"))),
        other => Err(PolicyError::InvalidShape(format!(
            "condition for '{policy_id}' must be a string or object, got {other}"
        ))),
    }
}

/// Run a policy condition through the condition engine.
///
/// An authored `dsl` string is authoritative and must parse cleanly; bare
/// `jsonLogic` is kept as-is.
fn canonicalize_condition(policy: &mut RuntimePolicy) -> Result<(), PolicyError> {
    let Some(spec) = policy.trigger.condition.as_mut() else {
        return Ok(());
    };
    if let Some(dsl) = spec.dsl.clone() {
        let parsed = parse_dsl(&dsl, None).map_err(|source| PolicyError::Condition {
            policy_id: policy.id.clone(),
            source,
        })?;
        spec.canonical_dsl = Some(parsed.canonical);
        spec.json_logic = parsed.json_logic;
        spec.variables = parsed.variables;
        spec.warnings = parsed.warnings;
    }
    Ok(())
}

fn sanitize_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    // Collapse runs of underscores left by punctuation.
    let mut collapsed = String::with_capacity(out.len());
    let mut last_underscore = false;
    for c in out.chars() {
        if c == '_' {
            if !last_underscore {
                collapsed.push(c);
            }
            last_underscore = true;
        } else {
            collapsed.push(c);
            last_underscore = false;
        }
    }
    collapsed.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn null_policies_normalize_to_empty_runtime() {
        let n = normalize_policies(&Value::Null).unwrap();
        assert!(n.runtime.is_empty());
        assert!(n.planner.is_none());
        assert_eq!(n.canonical, json!({"runtime": []}));
    }

    #[test]
    fn non_object_policies_are_rejected() {
        assert!(normalize_policies(&json!("nope")).is_err());
        assert!(normalize_policies(&json!([1, 2])).is_err());
    }

    #[test]
    fn canonical_shape_passes_through() {
        let n = normalize_policies(&json!({
            "planner": {"topology": {"variantCount": 3}},
            "runtime": [{
                "id": "halt",
                "trigger": {"kind": "onNodeComplete", "selector": {"capabilityId": "qa.v1"}},
                "action": {"type": "fail", "message": "qa rejected"}
            }]
        }))
        .unwrap();
        assert_eq!(n.runtime.len(), 1);
        assert_eq!(
            n.planner.as_ref().unwrap().topology.as_ref().unwrap().variant_count,
            Some(3)
        );
        assert!(n.legacy_fields.is_empty());
    }

    #[test]
    fn variant_count_becomes_a_topology_hint() {
        let n = normalize_policies(&json!({"variantCount": 2})).unwrap();
        assert_eq!(
            n.planner.unwrap().topology.unwrap().variant_count,
            Some(2)
        );
        assert_eq!(n.legacy_fields, vec!["variantCount"]);
    }

    #[test]
    fn explicit_topology_wins_over_legacy_variant_count() {
        let n = normalize_policies(&json!({
            "planner": {"topology": {"variantCount": 5}},
            "variantCount": 2
        }))
        .unwrap();
        assert_eq!(n.planner.unwrap().topology.unwrap().variant_count, Some(5));
    }

    #[test]
    fn string_directive_folds_to_capability_selector() {
        let n = normalize_policies(&json!({"replanAfter": ["writer.v1"]})).unwrap();
        assert_eq!(n.runtime.len(), 1);
        let policy = &n.runtime[0];
        assert_eq!(policy.id, "legacy_capability_writer_v1");
        assert!(policy.enabled);
        assert_eq!(policy.trigger.kind, TriggerKind::OnNodeComplete);
        assert_eq!(
            policy.trigger.selector.capability_id.as_deref(),
            Some("writer.v1")
        );
        assert!(matches!(policy.action, PolicyAction::Replan { .. }));
    }

    #[test]
    fn directive_kinds_map_to_selectors() {
        let n = normalize_policies(&json!({"policyTriggers": [
            {"node": "qa_1"},
            {"kind": "validation"},
            {"stage": "drafting"}
        ]}))
        .unwrap();
        assert_eq!(n.runtime.len(), 3);
        assert_eq!(n.runtime[0].trigger.selector.node_id.as_deref(), Some("qa_1"));
        assert_eq!(n.runtime[1].trigger.selector.kind.as_deref(), Some("validation"));

        // Stage directives become conditions on node metadata.
        let stage = &n.runtime[2];
        assert_eq!(stage.id, "legacy_stage_drafting");
        let condition = stage.trigger.condition.as_ref().unwrap();
        assert_eq!(
            condition.canonical_dsl.as_deref(),
            Some("metadata.plannerStage == \"drafting\"")
        );
        assert_eq!(
            condition.json_logic,
            json!({"==": [{"var": "metadata.plannerStage"}, "drafting"]})
        );
    }

    #[test]
    fn nested_replan_after_is_recognized() {
        let n = normalize_policies(&json!({"replan": {"after": ["qa.v1"]}})).unwrap();
        assert_eq!(n.runtime.len(), 1);
        assert!(n.legacy_fields.contains(&"replan.after".to_string()));
    }

    #[test]
    fn bad_dsl_condition_raises_policy_error() {
        let err = normalize_policies(&json!({"runtime": [{
            "id": "bad",
            "trigger": {"kind": "onNodeComplete", "condition": {"dsl": "status ==", "jsonLogic": null}},
            "action": {"type": "replan"}
        }]}))
        .unwrap_err();
        assert!(matches!(err, PolicyError::Condition { .. }));
    }

    #[test]
    fn dsl_is_authoritative_over_supplied_json_logic() {
        let n = normalize_policies(&json!({"runtime": [{
            "id": "p",
            "trigger": {"kind": "onNodeComplete", "condition": {
                "dsl": "score>3",
                "jsonLogic": {"==": [1, 2]}
            }},
            "action": {"type": "replan"}
        }]}))
        .unwrap();
        let condition = n.runtime[0].trigger.condition.as_ref().unwrap();
        assert_eq!(condition.canonical_dsl.as_deref(), Some("score > 3"));
        assert_eq!(condition.json_logic, json!({">": [{"var": "score"}, 3]}));
    }

    #[test]
    fn bare_json_logic_is_kept_as_is() {
        let logic = json!({"==": [{"var": "metadata.plannerStage"}, "qa"]});
        let n = normalize_policies(&json!({"runtime": [{
            "id": "p",
            "trigger": {"kind": "onNodeComplete", "condition": {"jsonLogic": logic.clone()}},
            "action": {"type": "replan"}
        }]}))
        .unwrap();
        assert_eq!(
            n.runtime[0].trigger.condition.as_ref().unwrap().json_logic,
            logic
        );
    }

    #[test]
    fn requires_hitl_approval_is_surfaced() {
        let n = normalize_policies(&json!({"requiresHitlApproval": true})).unwrap();
        assert!(n.requires_hitl_approval);
        assert_eq!(n.canonical["requiresHitlApproval"], json!(true));
        let off = normalize_policies(&json!({"requiresHitlApproval": false})).unwrap();
        assert!(!off.requires_hitl_approval);
    }

    #[test]
    fn sanitize_collapses_punctuation() {
        assert_eq!(sanitize_id("legacy_capability_writer.v1"), "legacy_capability_writer_v1");
        assert_eq!(sanitize_id("legacy_stage_Final Review!"), "legacy_stage_final_review");
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            json!({"variantCount": 2, "replanAfter": ["writer.v1", {"stage": "qa"}]}),
            json!({
                "planner": {"topology": {"variantCount": 4}},
                "runtime": [{
                    "id": "p",
                    "trigger": {"kind": "onNodeComplete", "condition": {"dsl": "score > 3", "jsonLogic": null}},
                    "action": {"type": "emit", "event": "scored"}
                }],
                "requiresHitlApproval": true
            }),
            json!({"policyTriggers": [{"capability": "qa.v1", "rationale": "re-check"}]}),
        ];
        for input in inputs {
            let once = normalize_policies(&input).unwrap();
            let twice = normalize_policies(&once.canonical).unwrap();
            assert_eq!(twice.canonical, once.canonical, "not idempotent for {input}");
            assert!(twice.legacy_fields.is_empty());
        }
    }
}
