// SPDX-License-Identifier: MIT OR Apache-2.0
//! Variable catalogs and catalog validation.

use crate::ConditionError;
use crate::ast::{BinaryOp, Expr, Literal};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a catalog variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    /// Numeric values.
    Number,
    /// Booleans.
    Boolean,
    /// Strings.
    String,
    /// Arrays.
    Array,
}

impl VariableType {
    fn describes(self, lit: &Literal) -> bool {
        match (self, lit) {
            (Self::Number, Literal::Int(_) | Literal::Float(_)) => true,
            (Self::Boolean, Literal::Bool(_)) => true,
            (Self::String, Literal::Str(_)) => true,
            // No array literals exist in the DSL.
            _ => false,
        }
    }
}

/// One variable a condition may reference.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariableSpec {
    /// Dotted path, e.g. `metadata.plannerStage`.
    pub path: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub var_type: VariableType,
    /// Operators permitted against this variable (`==`, `<`, …).
    pub allowed_operators: Vec<String>,
}

/// The set of variables a condition may reference, with per-variable
/// operator allow-lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct VariableCatalog {
    variables: BTreeMap<String, VariableSpec>,
}

impl VariableCatalog {
    /// Build a catalog from specs; later duplicates win.
    #[must_use]
    pub fn new(specs: impl IntoIterator<Item = VariableSpec>) -> Self {
        Self {
            variables: specs
                .into_iter()
                .map(|spec| (spec.path.clone(), spec))
                .collect(),
        }
    }

    /// Look up a variable by path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&VariableSpec> {
        self.variables.get(path)
    }

    /// Validate every variable reference and operator use in `expr`.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError::UnknownVariable`],
    /// [`ConditionError::OperatorNotAllowed`], or
    /// [`ConditionError::TypeMismatch`] on the first violation found.
    pub fn validate(&self, expr: &Expr) -> Result<(), ConditionError> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Var(path) => {
                self.get(path)
                    .ok_or_else(|| ConditionError::UnknownVariable { path: path.clone() })?;
                Ok(())
            }
            Expr::Not(inner) => self.validate(inner),
            Expr::And(children) | Expr::Or(children) => {
                for child in children {
                    self.validate(child)?;
                }
                Ok(())
            }
            Expr::Binary { op, lhs, rhs } => {
                self.validate(lhs)?;
                self.validate(rhs)?;
                self.check_operator(*op, lhs)?;
                self.check_operator(*op, rhs)?;
                self.check_types(*op, lhs, rhs)
            }
        }
    }

    fn check_operator(&self, op: BinaryOp, operand: &Expr) -> Result<(), ConditionError> {
        let Expr::Var(path) = operand else {
            return Ok(());
        };
        let spec = self
            .get(path)
            .ok_or_else(|| ConditionError::UnknownVariable { path: path.clone() })?;
        if spec.allowed_operators.iter().any(|o| o == op.symbol()) {
            Ok(())
        } else {
            Err(ConditionError::OperatorNotAllowed {
                path: path.clone(),
                operator: op.symbol().to_string(),
            })
        }
    }

    fn check_types(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Result<(), ConditionError> {
        match (lhs, rhs) {
            (Expr::Var(a), Expr::Var(b)) => {
                let (Some(sa), Some(sb)) = (self.get(a), self.get(b)) else {
                    return Ok(());
                };
                if sa.var_type == sb.var_type {
                    Ok(())
                } else {
                    Err(ConditionError::TypeMismatch {
                        message: format!(
                            "'{a}' ({:?}) and '{b}' ({:?}) have different types",
                            sa.var_type, sb.var_type
                        ),
                    })
                }
            }
            (Expr::Var(path), Expr::Literal(lit)) | (Expr::Literal(lit), Expr::Var(path)) => {
                let Some(spec) = self.get(path) else {
                    return Ok(());
                };
                // Equality against null is always allowed.
                if matches!(lit, Literal::Null) && op.is_equality() {
                    return Ok(());
                }
                if spec.var_type.describes(lit) {
                    Ok(())
                } else {
                    Err(ConditionError::TypeMismatch {
                        message: format!(
                            "'{path}' ({:?}) compared to an incompatible literal",
                            spec.var_type
                        ),
                    })
                }
            }
            _ => Ok(()),
        }
    }
}
