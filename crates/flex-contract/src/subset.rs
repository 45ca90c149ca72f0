// SPDX-License-Identifier: MIT OR Apache-2.0
//! The structural schema-subset rule.
//!
//! `is_schema_subset(source, target)` decides whether data valid under
//! `source` is structurally acceptable under `target` — the test the plan
//! builder uses to skip the normalization node.

use serde_json::Value;

/// Returns `true` iff `source` is a structural subset of `target`.
///
/// Recursively: `target.type` matches when set; every `target.required`
/// key appears in `source.required`; every `target.properties[k]` has a
/// corresponding subset in `source.properties[k]`; array `items` are a
/// subset; `minItems`/`maxItems` bounds on the target are at least as
/// tight on the source.
#[must_use]
pub fn is_schema_subset(source: &Value, target: &Value) -> bool {
    // A target without constraints accepts anything.
    let Some(target_obj) = target.as_object() else {
        return true;
    };
    if target_obj.is_empty() {
        return true;
    }
    let Some(source_obj) = source.as_object() else {
        return false;
    };

    if let Some(target_type) = target_obj.get("type") {
        if source_obj.get("type") != Some(target_type) {
            return false;
        }
    }

    if let Some(required) = target_obj.get("required").and_then(Value::as_array) {
        let source_required: Vec<&str> = source_obj
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        for key in required.iter().filter_map(Value::as_str) {
            if !source_required.contains(&key) {
                return false;
            }
        }
    }

    if let Some(target_props) = target_obj.get("properties").and_then(Value::as_object) {
        let Some(source_props) = source_obj.get("properties").and_then(Value::as_object) else {
            return target_props.is_empty();
        };
        for (key, target_prop) in target_props {
            match source_props.get(key) {
                Some(source_prop) => {
                    if !is_schema_subset(source_prop, target_prop) {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }

    if let Some(target_items) = target_obj.get("items") {
        let source_items = source_obj.get("items").unwrap_or(&Value::Null);
        if !is_schema_subset(source_items, target_items) {
            return false;
        }
    }

    // Bounds: the source must be at least as tight as the target.
    if let Some(target_min) = target_obj.get("minItems").and_then(Value::as_u64) {
        match source_obj.get("minItems").and_then(Value::as_u64) {
            Some(source_min) if source_min >= target_min => {}
            _ => return false,
        }
    }
    if let Some(target_max) = target_obj.get("maxItems").and_then(Value::as_u64) {
        match source_obj.get("maxItems").and_then(Value::as_u64) {
            Some(source_max) if source_max <= target_max => {}
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn empty_target_accepts_anything() {
        assert!(is_schema_subset(&json!({"type": "object"}), &json!({})));
        assert!(is_schema_subset(&json!(null), &json!({})));
    }

    #[test]
    fn type_must_match_when_set() {
        assert!(is_schema_subset(
            &json!({"type": "object"}),
            &json!({"type": "object"})
        ));
        assert!(!is_schema_subset(
            &json!({"type": "array"}),
            &json!({"type": "object"})
        ));
        assert!(!is_schema_subset(&json!({}), &json!({"type": "object"})));
    }

    #[test]
    fn required_keys_must_be_covered() {
        let source = json!({"type": "object", "required": ["a", "b"]});
        assert!(is_schema_subset(
            &source,
            &json!({"type": "object", "required": ["a"]})
        ));
        assert!(!is_schema_subset(
            &source,
            &json!({"type": "object", "required": ["c"]})
        ));
    }

    #[test]
    fn properties_recurse() {
        let source = json!({
            "type": "object",
            "properties": {
                "variants": {"type": "array", "minItems": 2, "items": {"type": "object"}}
            }
        });
        let target_ok = json!({
            "type": "object",
            "properties": {"variants": {"type": "array", "minItems": 2}}
        });
        let target_tighter = json!({
            "type": "object",
            "properties": {"variants": {"type": "array", "minItems": 3}}
        });
        let target_missing = json!({
            "type": "object",
            "properties": {"summary": {"type": "string"}}
        });
        assert!(is_schema_subset(&source, &target_ok));
        assert!(!is_schema_subset(&source, &target_tighter));
        assert!(!is_schema_subset(&source, &target_missing));
    }

    #[test]
    fn bounds_require_source_tightness() {
        let loose = json!({"type": "array"});
        let bounded = json!({"type": "array", "minItems": 1, "maxItems": 5});
        assert!(!is_schema_subset(&loose, &bounded));
        assert!(is_schema_subset(&bounded, &json!({"type": "array", "minItems": 1})));
        assert!(is_schema_subset(
            &json!({"type": "array", "minItems": 2, "maxItems": 3}),
            &json!({"type": "array", "minItems": 1, "maxItems": 5})
        ));
        assert!(!is_schema_subset(
            &json!({"type": "array", "maxItems": 9}),
            &json!({"type": "array", "maxItems": 5})
        ));
    }

    fn schema_strategy() -> impl Strategy<Value = serde_json::Value> {
        let leaf = prop_oneof![
            Just(json!({})),
            Just(json!({"type": "string"})),
            Just(json!({"type": "number"})),
            Just(json!({"type": "array", "minItems": 1})),
            Just(json!({"type": "array", "minItems": 2, "maxItems": 5})),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            (
                proptest::collection::btree_map("[abc]", inner, 0..3),
                proptest::bool::ANY,
            )
                .prop_map(|(props, req_first)| {
                    let required: Vec<_> = if req_first {
                        props.keys().take(1).cloned().collect()
                    } else {
                        vec![]
                    };
                    json!({
                        "type": "object",
                        "properties": props,
                        "required": required,
                    })
                })
        })
    }

    proptest! {
        /// Subset is reflexive.
        #[test]
        fn subset_is_reflexive(schema in schema_strategy()) {
            prop_assert!(is_schema_subset(&schema, &schema));
        }

        /// Subset is transitive: a ⊑ b and b ⊑ c imply a ⊑ c.
        #[test]
        fn subset_is_transitive(
            a in schema_strategy(),
            b in schema_strategy(),
            c in schema_strategy()
        ) {
            if is_schema_subset(&a, &b) && is_schema_subset(&b, &c) {
                prop_assert!(is_schema_subset(&a, &c));
            }
        }
    }
}
