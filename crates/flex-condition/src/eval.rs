// SPDX-License-Identifier: MIT OR Apache-2.0
//! The JSON-Logic evaluator.
//!
//! Implements exactly the operators the orchestrator emits: `and`, `or`,
//! `!`, `var`, `==`, `!=`, `>`, `>=`, `<`, `<=`. `and`/`or` short-circuit,
//! `var` dot-walks the payload, numeric comparisons coerce to f64, and
//! equality is strict (no cross-type coercion).

use crate::ConditionError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Result of evaluating a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Truthiness of the root expression.
    pub result: bool,
    /// Every `var` path that was resolved, with the value found
    /// (`null` for paths missing from the payload).
    pub resolved_variables: BTreeMap<String, Value>,
}

/// A payload value during evaluation; missing paths are distinct from
/// explicit `null`s so that `missing == null` stays false.
#[derive(Debug, Clone, PartialEq)]
enum Resolved {
    Undefined,
    Present(Value),
}

impl Resolved {
    fn truthy(&self) -> bool {
        match self {
            Self::Undefined => false,
            Self::Present(v) => truthy(v),
        }
    }

    fn as_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Present(v) => to_number(v),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().unwrap_or(f64::NAN)
            }
        }
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Resolve a dotted path against a payload. Missing segments yield
/// [`Resolved::Undefined`].
fn resolve_path(payload: &Value, path: &str) -> Resolved {
    let mut current = payload;
    if path.is_empty() {
        return Resolved::Present(payload.clone());
    }
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(next) => current = next,
                None => return Resolved::Undefined,
            },
            Value::Array(items) => match segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(next) => current = next,
                None => return Resolved::Undefined,
            },
            _ => return Resolved::Undefined,
        }
    }
    Resolved::Present(current.clone())
}

fn strict_eq(lhs: &Resolved, rhs: &Resolved) -> bool {
    match (lhs, rhs) {
        (Resolved::Undefined, _) | (_, Resolved::Undefined) => false,
        (Resolved::Present(a), Resolved::Present(b)) => match (a, b) {
            // Numbers compare by value so 1 == 1.0 holds.
            (Value::Number(x), Value::Number(y)) => {
                x.as_f64().zip(y.as_f64()).is_some_and(|(x, y)| x == y)
            }
            _ => a == b,
        },
    }
}

/// Evaluate a JSON-Logic tree against a payload.
///
/// # Examples
///
/// ```
/// use serde_json::json;
///
/// let logic = json!({"and": [{">": [{"var": "score"}, 3]}, {"var": "ready"}]});
/// let eval = flex_condition::evaluate_condition(&logic, &json!({"score": 5, "ready": true})).unwrap();
/// assert!(eval.result);
/// assert_eq!(eval.resolved_variables["score"], json!(5));
/// ```
///
/// # Errors
///
/// Returns [`ConditionError::UnsupportedLogic`] when the tree uses an
/// operator outside the supported set.
pub fn evaluate_condition(logic: &Value, payload: &Value) -> Result<Evaluation, ConditionError> {
    let mut resolved = BTreeMap::new();
    let value = eval(logic, payload, &mut resolved)?;
    Ok(Evaluation {
        result: value.truthy(),
        resolved_variables: resolved,
    })
}

fn eval(
    logic: &Value,
    payload: &Value,
    resolved: &mut BTreeMap<String, Value>,
) -> Result<Resolved, ConditionError> {
    let Value::Object(map) = logic else {
        // Bare values evaluate to themselves.
        return Ok(Resolved::Present(logic.clone()));
    };
    if map.len() != 1 {
        return Ok(Resolved::Present(logic.clone()));
    }
    let (op, args) = map.iter().next().expect("single entry");
    match op.as_str() {
        "var" => {
            let path = match args {
                Value::String(s) => s.as_str(),
                Value::Array(items) => items.first().and_then(Value::as_str).ok_or_else(|| {
                    ConditionError::UnsupportedLogic {
                        message: "var argument must be a string".into(),
                    }
                })?,
                _ => {
                    return Err(ConditionError::UnsupportedLogic {
                        message: "var argument must be a string".into(),
                    });
                }
            };
            let value = resolve_path(payload, path);
            resolved.insert(
                path.to_string(),
                match &value {
                    Resolved::Undefined => Value::Null,
                    Resolved::Present(v) => v.clone(),
                },
            );
            Ok(value)
        }
        "and" => {
            let items = expect_args(op, args)?;
            let mut last = Resolved::Present(Value::Bool(true));
            for item in items {
                last = eval(item, payload, resolved)?;
                if !last.truthy() {
                    // Short-circuit on the first falsy operand.
                    return Ok(last);
                }
            }
            Ok(last)
        }
        "or" => {
            let items = expect_args(op, args)?;
            let mut last = Resolved::Present(Value::Bool(false));
            for item in items {
                last = eval(item, payload, resolved)?;
                if last.truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        "!" => {
            let inner = match args {
                Value::Array(items) if items.len() == 1 => &items[0],
                other if !other.is_array() => other,
                _ => {
                    return Err(ConditionError::UnsupportedLogic {
                        message: "'!' takes exactly one argument".into(),
                    });
                }
            };
            let value = eval(inner, payload, resolved)?;
            Ok(Resolved::Present(Value::Bool(!value.truthy())))
        }
        "==" | "!=" => {
            let (lhs, rhs) = expect_pair(op, args, payload, resolved)?;
            let eq = strict_eq(&lhs, &rhs);
            let result = if op == "==" { eq } else { !eq };
            Ok(Resolved::Present(Value::Bool(result)))
        }
        "<" | "<=" | ">" | ">=" => {
            let (lhs, rhs) = expect_pair(op, args, payload, resolved)?;
            let (l, r) = (lhs.as_number(), rhs.as_number());
            let result = match op.as_str() {
                "<" => l < r,
                "<=" => l <= r,
                ">" => l > r,
                _ => l >= r,
            };
            Ok(Resolved::Present(Value::Bool(result)))
        }
        other => Err(ConditionError::UnsupportedLogic {
            message: format!("unsupported operator '{other}'"),
        }),
    }
}

fn expect_args<'a>(op: &str, args: &'a Value) -> Result<&'a Vec<Value>, ConditionError> {
    match args {
        Value::Array(items) => Ok(items),
        _ => Err(ConditionError::UnsupportedLogic {
            message: format!("'{op}' arguments must be an array"),
        }),
    }
}

fn expect_pair(
    op: &str,
    args: &Value,
    payload: &Value,
    resolved: &mut BTreeMap<String, Value>,
) -> Result<(Resolved, Resolved), ConditionError> {
    let items = expect_args(op, args)?;
    if items.len() != 2 {
        return Err(ConditionError::UnsupportedLogic {
            message: format!("'{op}' takes exactly two arguments"),
        });
    }
    let lhs = eval(&items[0], payload, resolved)?;
    let rhs = eval(&items[1], payload, resolved)?;
    Ok((lhs, rhs))
}
