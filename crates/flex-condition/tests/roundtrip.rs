// SPDX-License-Identifier: MIT OR Apache-2.0
//! Round-trip properties of the condition engine.

use flex_condition::{evaluate_condition, parse_dsl, to_dsl};
use proptest::prelude::*;
use serde_json::json;

/// Strategy producing syntactically valid DSL expressions.
fn expr_strategy() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("a.b".to_string()),
        Just("meta.stage".to_string()),
        Just("1".to_string()),
        Just("42".to_string()),
        Just("2.5".to_string()),
        Just("-3".to_string()),
        Just("true".to_string()),
        Just("false".to_string()),
        Just("null".to_string()),
        Just("\"ready\"".to_string()),
        Just("\"it's\"".to_string()),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) == ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) != ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) < ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) >= ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) && ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) || ({b})")),
            inner.prop_map(|a| format!("!({a})")),
        ]
    })
}

proptest! {
    /// `to_dsl(parse_dsl(e).json_logic) == parse_dsl(e).canonical`.
    #[test]
    fn to_dsl_matches_canonical(expr in expr_strategy()) {
        let parsed = parse_dsl(&expr, None).unwrap();
        let rendered = to_dsl(&parsed.json_logic, None).unwrap();
        prop_assert_eq!(rendered, parsed.canonical);
    }

    /// Re-parsing the canonical form is a fixpoint.
    #[test]
    fn canonical_is_stable(expr in expr_strategy()) {
        let parsed = parse_dsl(&expr, None).unwrap();
        let reparsed = parse_dsl(&parsed.canonical, None).unwrap();
        prop_assert_eq!(reparsed.canonical, parsed.canonical);
        prop_assert_eq!(reparsed.json_logic, parsed.json_logic);
    }

    /// Evaluating the original and the canonical form agree on a payload.
    #[test]
    fn evaluation_agrees_with_canonical(expr in expr_strategy()) {
        let payload = json!({"a": 1, "b": 2, "meta": {"stage": "draft"}});
        let parsed = parse_dsl(&expr, None).unwrap();
        let reparsed = parse_dsl(&parsed.canonical, None).unwrap();
        let original = evaluate_condition(&parsed.json_logic, &payload).unwrap();
        let canonical = evaluate_condition(&reparsed.json_logic, &payload).unwrap();
        prop_assert_eq!(original.result, canonical.result);
    }
}

#[test]
fn spec_round_trip_example() {
    let parsed = parse_dsl("a==1&&(b>2||a.b<3)", None).unwrap();
    assert_eq!(parsed.canonical, "a == 1 && (b > 2 || a.b < 3)");
    let rendered = to_dsl(&parsed.json_logic, None).unwrap();
    assert_eq!(rendered, parsed.canonical);

    let payload = json!({"a": 1, "b": 2});
    let direct = evaluate_condition(&parsed.json_logic, &payload).unwrap();
    let via_canonical = evaluate_condition(
        &parse_dsl(&parsed.canonical, None).unwrap().json_logic,
        &payload,
    )
    .unwrap();
    assert_eq!(direct.result, via_canonical.result);
}
