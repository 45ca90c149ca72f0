// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! flex-condition
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The expression AST.
pub mod ast;
/// Variable catalogs and catalog validation.
pub mod catalog;
/// The deterministic canonical renderer.
pub mod canonical;
/// The JSON-Logic evaluator.
pub mod eval;
/// Tokenizer for the DSL.
pub mod lexer;
/// AST ↔ JSON-Logic lowering and raising.
pub mod logic;
/// Recursive-descent parser.
pub mod parser;

pub use ast::{BinaryOp, Expr, Literal};
pub use catalog::{VariableCatalog, VariableSpec, VariableType};
pub use eval::{Evaluation, evaluate_condition};

use serde::Serialize;
use serde_json::Value;

/// Errors raised by the condition engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    /// The expression was empty or whitespace.
    #[error("empty_expression: the expression is empty")]
    EmptyExpression,

    /// The expression could not be tokenized or parsed.
    #[error("syntax_error at {start}..{end}: {message}")]
    Syntax {
        /// What went wrong.
        message: String,
        /// Byte offset where the problem starts.
        start: usize,
        /// Byte offset where the problem ends.
        end: usize,
    },

    /// A referenced variable is not in the catalog.
    #[error("unknown_variable: '{path}' is not in the variable catalog")]
    UnknownVariable {
        /// The offending dotted path.
        path: String,
    },

    /// An operator is not in the variable's allow-list.
    #[error("operator_not_allowed: '{operator}' is not allowed for '{path}'")]
    OperatorNotAllowed {
        /// The variable.
        path: String,
        /// The operator that was used.
        operator: String,
    },

    /// Incompatible types were related.
    #[error("type_mismatch: {message}")]
    TypeMismatch {
        /// Explanation of the mismatch.
        message: String,
    },

    /// A JSON-Logic tree uses an operator outside the supported set.
    #[error("unsupported_logic: {message}")]
    UnsupportedLogic {
        /// Explanation.
        message: String,
    },
}

/// Result of parsing a DSL expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCondition {
    /// The parsed AST.
    #[serde(skip)]
    pub ast: Expr,
    /// Evaluatable JSON-Logic tree.
    pub json_logic: Value,
    /// Deterministic canonical rendering.
    pub canonical: String,
    /// Variable paths referenced, in first-use order.
    pub variables: Vec<String>,
    /// Non-fatal notes.
    pub warnings: Vec<String>,
}

/// Parse a DSL expression into its canonical and JSON-Logic forms.
///
/// When `catalog` is provided, variables and operator usage are validated
/// against it.
///
/// # Examples
///
/// ```
/// let parsed = flex_condition::parse_dsl("status == \"ready\" && score > 3", None).unwrap();
/// assert_eq!(parsed.canonical, "status == \"ready\" && score > 3");
/// assert_eq!(parsed.variables, vec!["status", "score"]);
/// ```
///
/// # Errors
///
/// Returns [`ConditionError`] on empty input, syntax errors, or catalog
/// violations.
pub fn parse_dsl(
    expr: &str,
    catalog: Option<&VariableCatalog>,
) -> Result<ParsedCondition, ConditionError> {
    if expr.trim().is_empty() {
        return Err(ConditionError::EmptyExpression);
    }
    let tokens = lexer::tokenize(expr)?;
    let ast = parser::parse(&tokens, expr.len())?;
    if let Some(catalog) = catalog {
        catalog.validate(&ast)?;
    }
    let variables = ast.variables();
    let mut warnings = Vec::new();
    if variables.is_empty() {
        warnings.push("expression references no variables".to_string());
    }
    Ok(ParsedCondition {
        canonical: canonical::render(&ast),
        json_logic: logic::lower(&ast),
        variables,
        warnings,
        ast,
    })
}

/// Raise a JSON-Logic tree into the canonical DSL rendering.
///
/// # Errors
///
/// Returns [`ConditionError::UnsupportedLogic`] when the tree uses an
/// operator outside the supported set, or catalog violations when a
/// `catalog` is provided.
pub fn to_dsl(
    json_logic: &Value,
    catalog: Option<&VariableCatalog>,
) -> Result<String, ConditionError> {
    let ast = logic::raise(json_logic)?;
    if let Some(catalog) = catalog {
        catalog.validate(&ast)?;
    }
    Ok(canonical::render(&ast))
}
