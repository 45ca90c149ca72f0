// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic canonical rendering.
//!
//! Single spaces around binary operators, unspaced `!`, parentheses only
//! where precedence demands them. Rendering the canonical string and
//! re-parsing it yields the same AST.

use crate::ast::{BinaryOp, Expr, Literal};

// Precedence tiers; higher binds tighter.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_EQ: u8 = 3;
const PREC_CMP: u8 = 4;
const PREC_UNARY: u8 = 5;
const PREC_PRIMARY: u8 = 6;

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Or(_) => PREC_OR,
        Expr::And(_) => PREC_AND,
        Expr::Binary { op, .. } if op.is_equality() => PREC_EQ,
        Expr::Binary { .. } => PREC_CMP,
        Expr::Not(_) => PREC_UNARY,
        Expr::Literal(_) | Expr::Var(_) => PREC_PRIMARY,
    }
}

/// Render `expr` to its canonical string.
#[must_use]
pub fn render(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, &mut out);
    out
}

fn write_expr(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Literal(lit) => write_literal(lit, out),
        Expr::Var(path) => out.push_str(path),
        Expr::Not(inner) => {
            out.push('!');
            write_child(inner, PREC_UNARY, out);
        }
        Expr::Binary { op, lhs, rhs } => {
            let prec = if op.is_equality() { PREC_EQ } else { PREC_CMP };
            // Left operand keeps same-precedence chains unparenthesized
            // (left associativity); the right operand needs parens at
            // equal precedence to survive a re-parse.
            write_child_min(lhs, prec, out);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            write_child(rhs, prec, out);
        }
        Expr::And(children) => write_nary(children, " && ", PREC_AND, out),
        Expr::Or(children) => write_nary(children, " || ", PREC_OR, out),
    }
}

/// Parenthesize when the child binds strictly looser.
fn write_child_min(child: &Expr, parent_prec: u8, out: &mut String) {
    if precedence(child) < parent_prec {
        out.push('(');
        write_expr(child, out);
        out.push(')');
    } else {
        write_expr(child, out);
    }
}

/// Parenthesize when the child binds looser or equally.
fn write_child(child: &Expr, parent_prec: u8, out: &mut String) {
    if precedence(child) <= parent_prec && precedence(child) < PREC_UNARY {
        out.push('(');
        write_expr(child, out);
        out.push(')');
    } else {
        write_expr(child, out);
    }
}

fn write_nary(children: &[Expr], sep: &str, prec: u8, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        // And/Or are associative, so same-precedence children were already
        // flattened; anything still at or below this tier needs parens.
        write_child_min(child, prec + 1, out);
    }
}

fn write_literal(lit: &Literal, out: &mut String) {
    match lit {
        Literal::Int(n) => out.push_str(&n.to_string()),
        Literal::Float(f) => {
            let rendered = if f.fract() == 0.0 && f.is_finite() {
                format!("{f:.1}")
            } else {
                f.to_string()
            };
            out.push_str(&rendered);
        }
        Literal::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '\t' => out.push_str("\\t"),
                    '\u{0008}' => out.push_str("\\b"),
                    '\u{000C}' => out.push_str("\\f"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        Literal::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Literal::Null => out.push_str("null"),
    }
}
