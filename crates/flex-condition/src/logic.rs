// SPDX-License-Identifier: MIT OR Apache-2.0
//! AST ↔ JSON-Logic lowering and raising.

use crate::ConditionError;
use crate::ast::{BinaryOp, Expr, Literal};
use serde_json::{Value, json};

/// Lower an AST into a JSON-Logic tree.
#[must_use]
pub fn lower(expr: &Expr) -> Value {
    match expr {
        Expr::Literal(lit) => lower_literal(lit),
        Expr::Var(path) => json!({"var": path}),
        Expr::Not(inner) => json!({"!": [lower(inner)]}),
        Expr::Binary { op, lhs, rhs } => {
            let mut map = serde_json::Map::new();
            map.insert(
                op.symbol().to_string(),
                Value::Array(vec![lower(lhs), lower(rhs)]),
            );
            Value::Object(map)
        }
        Expr::And(children) => {
            json!({"and": children.iter().map(lower).collect::<Vec<_>>()})
        }
        Expr::Or(children) => {
            json!({"or": children.iter().map(lower).collect::<Vec<_>>()})
        }
    }
}

fn lower_literal(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => json!(n),
        Literal::Float(f) => json!(f),
        Literal::Str(s) => json!(s),
        Literal::Bool(b) => json!(b),
        Literal::Null => Value::Null,
    }
}

/// Raise a JSON-Logic tree back into an AST.
///
/// Accepts the operator set the engine evaluates (`and`, `or`, `!`, `var`,
/// `==`, `!=`, `>`, `>=`, `<`, `<=`). The `var` argument may be a bare
/// string or a one-element array.
///
/// # Errors
///
/// Returns [`ConditionError::UnsupportedLogic`] for anything else.
pub fn raise(logic: &Value) -> Result<Expr, ConditionError> {
    match logic {
        Value::Null => Ok(Expr::Literal(Literal::Null)),
        Value::Bool(b) => Ok(Expr::Literal(Literal::Bool(*b))),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Expr::Literal(Literal::Int(i)))
            } else {
                Ok(Expr::Literal(Literal::Float(n.as_f64().unwrap_or(f64::NAN))))
            }
        }
        Value::String(s) => Ok(Expr::Literal(Literal::Str(s.clone()))),
        Value::Object(map) if map.len() == 1 => {
            let (op, args) = map.iter().next().expect("single entry");
            raise_operator(op, args)
        }
        other => Err(ConditionError::UnsupportedLogic {
            message: format!("cannot raise JSON-Logic fragment: {other}"),
        }),
    }
}

fn raise_operator(op: &str, args: &Value) -> Result<Expr, ConditionError> {
    match op {
        "var" => {
            let path = match args {
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .first()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| ConditionError::UnsupportedLogic {
                        message: "var argument must be a string".into(),
                    })?,
                _ => {
                    return Err(ConditionError::UnsupportedLogic {
                        message: "var argument must be a string".into(),
                    });
                }
            };
            Ok(Expr::Var(path))
        }
        "!" => {
            let inner = match args {
                Value::Array(items) if items.len() == 1 => &items[0],
                // json-logic also permits the bare-argument form.
                other if !other.is_array() => other,
                _ => {
                    return Err(ConditionError::UnsupportedLogic {
                        message: "'!' takes exactly one argument".into(),
                    });
                }
            };
            Ok(Expr::Not(Box::new(raise(inner)?)))
        }
        "and" | "or" => {
            let Value::Array(items) = args else {
                return Err(ConditionError::UnsupportedLogic {
                    message: format!("'{op}' arguments must be an array"),
                });
            };
            if items.is_empty() {
                return Err(ConditionError::UnsupportedLogic {
                    message: format!("'{op}' needs at least one argument"),
                });
            }
            let children = items.iter().map(raise).collect::<Result<Vec<_>, _>>()?;
            if children.len() == 1 {
                return Ok(children.into_iter().next().expect("one child"));
            }
            Ok(if op == "and" {
                Expr::And(children)
            } else {
                Expr::Or(children)
            })
        }
        "==" | "!=" | "<" | "<=" | ">" | ">=" => {
            let Value::Array(items) = args else {
                return Err(ConditionError::UnsupportedLogic {
                    message: format!("'{op}' arguments must be an array"),
                });
            };
            if items.len() != 2 {
                return Err(ConditionError::UnsupportedLogic {
                    message: format!("'{op}' takes exactly two arguments"),
                });
            }
            let bin_op = match op {
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Ne,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                _ => BinaryOp::Ge,
            };
            Ok(Expr::Binary {
                op: bin_op,
                lhs: Box::new(raise(&items[0])?),
                rhs: Box::new(raise(&items[1])?),
            })
        }
        other => Err(ConditionError::UnsupportedLogic {
            message: format!("unsupported operator '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn ast(input: &str) -> Expr {
        parse(&tokenize(input).unwrap(), input.len()).unwrap()
    }

    #[test]
    fn lower_produces_the_expected_tree() {
        assert_eq!(
            lower(&ast("a.b == 1 && !c")),
            json!({"and": [{"==": [{"var": "a.b"}, 1]}, {"!": [{"var": "c"}]}]})
        );
    }

    #[test]
    fn raise_inverts_lower() {
        for input in [
            "a == 1",
            "a && b && c",
            "a || (b && c)",
            "!(x >= 2.5)",
            "name != \"n/a\"",
            "flag == null",
        ] {
            let original = ast(input);
            let raised = raise(&lower(&original)).unwrap();
            assert_eq!(raised, original, "raise(lower) differs for {input}");
        }
    }

    #[test]
    fn raise_accepts_var_array_form() {
        let expr = raise(&json!({"var": ["a.b"]})).unwrap();
        assert_eq!(expr, Expr::Var("a.b".into()));
    }

    #[test]
    fn raise_accepts_bare_not_argument() {
        let expr = raise(&json!({"!": {"var": "x"}})).unwrap();
        assert_eq!(expr, Expr::Not(Box::new(Expr::Var("x".into()))));
    }

    #[test]
    fn raise_collapses_single_child_conjunction() {
        let expr = raise(&json!({"and": [{"var": "x"}]})).unwrap();
        assert_eq!(expr, Expr::Var("x".into()));
    }

    #[test]
    fn raise_rejects_wrong_arity() {
        assert!(raise(&json!({"==": [1]})).is_err());
        assert!(raise(&json!({"and": []})).is_err());
        assert!(raise(&json!({"in": [1, [1, 2]]})).is_err());
    }
}
