//! AST node types
//!
//! Provides the closed node set produced by the parser:
//! - [`Expr::Literal`] wrapping a [`QuotedString`]
//! - [`Expr::Calls`] wrapping a chain of [`FunctionCall`]s
//!
//! Nodes are immutable once built. Their `Display` output is canonical
//! expression text that parses back into an equal tree.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Expression node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Quoted string literal
    Literal(QuotedString),

    /// One or more calls joined by `.`; each call receives the previous
    /// call's result
    Calls(Vec<FunctionCall>),
}

impl Expr {
    /// Create a literal node from unescaped text
    #[inline]
    #[must_use]
    pub fn literal(text: &str) -> Self {
        Self::Literal(QuotedString::quote(text))
    }

    /// Create a single-call chain
    #[inline]
    #[must_use]
    pub fn call(call: FunctionCall) -> Self {
        Self::Calls(vec![call])
    }

    /// Literal node, if this is one
    #[inline]
    #[must_use]
    pub fn as_literal(&self) -> Option<&QuotedString> {
        match self {
            Self::Literal(q) => Some(q),
            Self::Calls(_) => None,
        }
    }

    /// Call chain, if this is one
    #[inline]
    #[must_use]
    pub fn calls(&self) -> Option<&[FunctionCall]> {
        match self {
            Self::Literal(_) => None,
            Self::Calls(calls) => Some(calls),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(q) => Display::fmt(q, f),
            Self::Calls(calls) => {
                for (i, call) in calls.iter().enumerate() {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    Display::fmt(call, f)?;
                }
                Ok(())
            }
        }
    }
}

/// Quoted string literal
///
/// Keeps the raw source text, quotes and escapes included. Escapes are
/// checked when the literal is built, so [`QuotedString::unwrap`] cannot fail.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuotedString {
    raw: String,
}

impl QuotedString {
    /// Wrap raw text the parser has already validated
    pub(crate) fn from_validated(raw: String) -> Self {
        Self { raw }
    }

    /// Build a literal whose unwrapped value is `text`
    #[must_use]
    pub fn quote(text: &str) -> Self {
        let mut raw = String::with_capacity(text.len() + 2);
        raw.push('"');
        for c in text.chars() {
            match c {
                '"' => raw.push_str("\\\""),
                '\\' => raw.push_str("\\\\"),
                '\n' => raw.push_str("\\n"),
                '\t' => raw.push_str("\\t"),
                '\r' => raw.push_str("\\r"),
                '\u{8}' => raw.push_str("\\b"),
                '\u{c}' => raw.push_str("\\f"),
                '\0' => raw.push_str("\\0"),
                c if c.is_control() => {
                    for unit in c.encode_utf16(&mut [0u16; 2]) {
                        raw.push_str(&format!("\\u{unit:04x}"));
                    }
                }
                c => raw.push(c),
            }
        }
        raw.push('"');
        Self { raw }
    }

    /// Raw source text, including the enclosing quotes
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Text with the enclosing quotes removed and escapes resolved
    #[must_use]
    pub fn unwrap(&self) -> String {
        let inner = self
            .raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&self.raw);
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('0') => out.push('\0'),
                Some('u') => {
                    let hex: String = chars.by_ref().take(4).collect();
                    let unit = u16::from_str_radix(&hex, 16).unwrap_or(0xfffd);
                    out.push(decode_unit(unit, &mut chars));
                }
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        }
        out
    }
}

/// Decode one UTF-16 unit, pulling a trailing `\uXXXX` low surrogate when needed
fn decode_unit(unit: u16, chars: &mut std::str::Chars<'_>) -> char {
    if (0xd800..0xdc00).contains(&unit) {
        let rest = chars.as_str();
        if let Some(hex) = rest.strip_prefix("\\u").and_then(|r| r.get(..4)) {
            if let Ok(low) = u16::from_str_radix(hex, 16) {
                if let Some(Ok(c)) = char::decode_utf16([unit, low]).next() {
                    chars.nth(5);
                    return c;
                }
            }
        }
        return char::REPLACEMENT_CHARACTER;
    }
    char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER)
}

impl Display for QuotedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl TryFrom<String> for QuotedString {
    type Error = ParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        match crate::parser::parse(&raw)? {
            Expr::Literal(q) => Ok(q),
            Expr::Calls(_) => Err(ParseError::UnexpectedCharacter {
                offset: 0,
                expected: "'\"'",
                found: raw.chars().next().unwrap_or(' '),
            }),
        }
    }
}

impl From<QuotedString> for String {
    fn from(q: QuotedString) -> Self {
        q.raw
    }
}

/// Function call node
///
/// `args` is `None` for a bare word (`parent`), which means any arguments
/// come from outside the expression text, and `Some(vec![])` for an explicit
/// empty list (`parent()`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCall {
    name: String,
    args: Option<Vec<Expr>>,
}

impl FunctionCall {
    /// Create call node
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, args: Option<Vec<Expr>>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Bare word with no argument list
    #[inline]
    #[must_use]
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    /// Explicit parenthesized call
    #[inline]
    #[must_use]
    pub fn with_args(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(name, Some(args))
    }

    /// Function name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Argument list, `None` for a bare word
    #[inline]
    #[must_use]
    pub fn args(&self) -> Option<&[Expr]> {
        self.args.as_deref()
    }

    /// Whether this is a bare word
    #[inline]
    #[must_use]
    pub fn is_bare(&self) -> bool {
        self.args.is_none()
    }
}

impl Display for FunctionCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(args) = &self.args {
            f.write_str("(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                Display::fmt(arg, f)?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}
