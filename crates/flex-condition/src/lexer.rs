// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tokenizer for the condition DSL.

use crate::ConditionError;

/// A token with its source byte range.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token kind and payload.
    pub kind: TokenKind,
    /// Start byte offset.
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

/// Token kinds produced by [`tokenize`].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A dotted identifier path (`a.b.c`).
    Ident(String),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A string literal, unescaped.
    Str(String),
    /// `true` / `false`.
    Bool(bool),
    /// `null`.
    Null,
    /// `||`
    OrOr,
    /// `&&`
    AndAnd,
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `!`
    Bang,
    /// `(`
    LParen,
    /// `)`
    RParen,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Tokenize `input` into a token stream.
///
/// # Errors
///
/// Returns [`ConditionError::Syntax`] with the offending byte range on an
/// unexpected character, an unterminated string, a bad escape, or a
/// malformed number.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, start, end: i + 1 });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, start, end: i + 1 });
                i += 1;
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token { kind: TokenKind::OrOr, start, end: i + 2 });
                    i += 2;
                } else {
                    return Err(syntax("expected '||'", start, i + 1));
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token { kind: TokenKind::AndAnd, start, end: i + 2 });
                    i += 2;
                } else {
                    return Err(syntax("expected '&&'", start, i + 1));
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::EqEq, start, end: i + 2 });
                    i += 2;
                } else {
                    return Err(syntax("expected '=='", start, i + 1));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::NotEq, start, end: i + 2 });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Bang, start, end: i + 1 });
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Le, start, end: i + 2 });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, start, end: i + 1 });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, start, end: i + 2 });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, start, end: i + 1 });
                    i += 1;
                }
            }
            '"' | '\'' => {
                let (value, next) = lex_string(input, i)?;
                tokens.push(Token { kind: TokenKind::Str(value), start, end: next });
                i = next;
            }
            c if c.is_ascii_digit()
                || (c == '-' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) =>
            {
                let (kind, next) = lex_number(input, i)?;
                tokens.push(Token { kind, start, end: next });
                i = next;
            }
            c if is_ident_start(c) => {
                let (kind, next) = lex_ident(input, i)?;
                tokens.push(Token { kind, start, end: next });
                i = next;
            }
            _ => {
                return Err(syntax(
                    &format!("unexpected character '{c}'"),
                    start,
                    start + c.len_utf8(),
                ));
            }
        }
    }

    Ok(tokens)
}

fn syntax(message: &str, start: usize, end: usize) -> ConditionError {
    ConditionError::Syntax {
        message: message.to_string(),
        start,
        end,
    }
}

fn lex_string(input: &str, start: usize) -> Result<(String, usize), ConditionError> {
    let bytes = input.as_bytes();
    let quote = bytes[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let esc = bytes
                    .get(i + 1)
                    .ok_or_else(|| syntax("unterminated escape", i, i + 1))?;
                let ch = match esc {
                    b'n' => '\n',
                    b'r' => '\r',
                    b't' => '\t',
                    b'b' => '\u{0008}',
                    b'f' => '\u{000C}',
                    b'"' => '"',
                    b'\'' => '\'',
                    b'\\' => '\\',
                    other => {
                        return Err(syntax(
                            &format!("unknown escape '\\{}'", *other as char),
                            i,
                            i + 2,
                        ));
                    }
                };
                out.push(ch);
                i += 2;
            }
            b if b == quote => return Ok((out, i + 1)),
            _ => {
                // Multi-byte characters are copied verbatim.
                let c = input[i..].chars().next().expect("in-bounds char");
                out.push(c);
                i += c.len_utf8();
            }
        }
    }
    Err(syntax("unterminated string literal", start, input.len()))
}

fn lex_number(input: &str, start: usize) -> Result<(TokenKind, usize), ConditionError> {
    let bytes = input.as_bytes();
    let mut i = start;
    if bytes[i] == b'-' {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text = &input[start..i];
    let kind = if is_float {
        TokenKind::Float(
            text.parse::<f64>()
                .map_err(|_| syntax("malformed number", start, i))?,
        )
    } else {
        TokenKind::Int(
            text.parse::<i64>()
                .map_err(|_| syntax("malformed number", start, i))?,
        )
    };
    Ok((kind, i))
}

fn lex_ident(input: &str, start: usize) -> Result<(TokenKind, usize), ConditionError> {
    let mut i = start;
    let mut chars = input[start..].char_indices().peekable();

    // First segment.
    while let Some(&(off, c)) = chars.peek() {
        let at_start = off == 0;
        if (at_start && is_ident_start(c)) || (!at_start && is_ident_continue(c)) {
            chars.next();
            i = start + off + c.len_utf8();
        } else {
            break;
        }
    }

    // Dotted continuation segments.
    loop {
        let rest = &input[i..];
        let mut rest_chars = rest.chars();
        if rest_chars.next() != Some('.') {
            break;
        }
        let Some(first) = rest_chars.next() else { break };
        if !is_ident_start(first) {
            break;
        }
        let mut seg_len = 1 + first.len_utf8();
        for c in rest_chars {
            if is_ident_continue(c) {
                seg_len += c.len_utf8();
            } else {
                break;
            }
        }
        i += seg_len;
    }

    let text = &input[start..i];
    let kind = match text {
        "true" => TokenKind::Bool(true),
        "false" => TokenKind::Bool(false),
        "null" => TokenKind::Null,
        _ => TokenKind::Ident(text.to_string()),
    };
    Ok((kind, i))
}
