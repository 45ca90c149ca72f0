// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recursive-descent parser over the token stream.
//!
//! Precedence, low to high: `||`, `&&`, equality, comparison, unary `!`,
//! primary. `&&`/`||` parse n-ary and flattened; the binary tiers are
//! left-associative.

use crate::ConditionError;
use crate::ast::{BinaryOp, Expr, Literal};
use crate::lexer::{Token, TokenKind};

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    input_len: usize,
}

/// Parse a token stream into an [`Expr`].
///
/// `input_len` is the source length, used to span errors at end-of-input.
///
/// # Errors
///
/// Returns [`ConditionError::Syntax`] with the offending byte range.
pub fn parse(tokens: &[Token], input_len: usize) -> Result<Expr, ConditionError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len,
    };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(ConditionError::Syntax {
            message: "unexpected trailing input".into(),
            start: extra.start,
            end: extra.end,
        });
    }
    Ok(expr)
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eof_error(&self, expected: &str) -> ConditionError {
        ConditionError::Syntax {
            message: format!("unexpected end of input, expected {expected}"),
            start: self.input_len,
            end: self.input_len,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let first = self.parse_and()?;
        let mut children = vec![first];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::OrOr)) {
            self.advance();
            children.push(self.parse_and()?);
        }
        Ok(flatten_or(children))
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let first = self.parse_equality()?;
        let mut children = vec![first];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::AndAnd)) {
            self.advance();
            children.push(self.parse_equality()?);
        }
        Ok(flatten_and(children))
    }

    fn parse_equality(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::EqEq) => BinaryOp::Eq,
                Some(TokenKind::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Lt) => BinaryOp::Lt,
                Some(TokenKind::Le) => BinaryOp::Le,
                Some(TokenKind::Gt) => BinaryOp::Gt,
                Some(TokenKind::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Bang)) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let Some(token) = self.advance() else {
            return Err(self.eof_error("an expression"));
        };
        match &token.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(Literal::Int(*n))),
            TokenKind::Float(f) => Ok(Expr::Literal(Literal::Float(*f))),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s.clone()))),
            TokenKind::Bool(b) => Ok(Expr::Literal(Literal::Bool(*b))),
            TokenKind::Null => Ok(Expr::Literal(Literal::Null)),
            TokenKind::Ident(path) => Ok(Expr::Var(path.clone())),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(t) if t.kind == TokenKind::RParen => Ok(inner),
                    Some(t) => Err(ConditionError::Syntax {
                        message: "expected ')'".into(),
                        start: t.start,
                        end: t.end,
                    }),
                    None => Err(self.eof_error("')'")),
                }
            }
            _ => Err(ConditionError::Syntax {
                message: "expected a literal, variable, or '('".into(),
                start: token.start,
                end: token.end,
            }),
        }
    }
}

fn flatten_and(children: Vec<Expr>) -> Expr {
    if children.len() == 1 {
        return children.into_iter().next().expect("one child");
    }
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Expr::And(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    Expr::And(flat)
}

fn flatten_or(children: Vec<Expr>) -> Expr {
    if children.len() == 1 {
        return children.into_iter().next().expect("one child");
    }
    let mut flat = Vec::with_capacity(children.len());
    for child in children {
        match child {
            Expr::Or(inner) => flat.extend(inner),
            other => flat.push(other),
        }
    }
    Expr::Or(flat)
}
