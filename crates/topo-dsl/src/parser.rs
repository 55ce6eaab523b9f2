//! Single-pass expression scanner
//!
//! Recursive descent over the characters of the input with one character of
//! lookahead. There is no backtracking: the first structural violation is
//! reported with its character offset.

use crate::ast::{Expr, FunctionCall, QuotedString};
use crate::error::ParseError;

/// Parse expression text into an AST
///
/// # Errors
/// Returns [`ParseError`] for unterminated strings, bad escapes, unmatched
/// parentheses, stray commas, empty function names and trailing input.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    parser.skip_whitespace();
    if parser.at_end() {
        return Err(ParseError::Empty);
    }
    let expr = parser.parse_expr()?;
    parser.skip_whitespace();
    match parser.peek() {
        None => Ok(expr),
        Some(found) => Err(ParseError::TrailingCharacters {
            offset: parser.pos,
            found,
        }),
    }
}

/// Characters allowed in a function name
#[inline]
#[must_use]
pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':')
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    #[inline]
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    #[inline]
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    #[inline]
    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        if self.peek() == Some('"') {
            self.parse_literal().map(Expr::Literal)
        } else {
            self.parse_chain().map(Expr::Calls)
        }
    }

    fn parse_literal(&mut self) -> Result<QuotedString, ParseError> {
        let start = self.pos;
        let mut raw = String::new();
        raw.extend(self.bump());
        loop {
            match self.bump() {
                None => return Err(ParseError::UnterminatedString { offset: start }),
                Some('"') => {
                    raw.push('"');
                    return Ok(QuotedString::from_validated(raw));
                }
                Some('\\') => {
                    let escape_at = self.pos - 1;
                    let escape = self
                        .bump()
                        .ok_or(ParseError::UnterminatedString { offset: start })?;
                    raw.push('\\');
                    raw.push(escape);
                    match escape {
                        'n' | 't' | 'r' | 'b' | 'f' | '0' | '"' | '\'' | '\\' | '/' => {}
                        'u' => self.scan_unicode_escape(escape_at, &mut raw)?,
                        other => {
                            return Err(ParseError::InvalidEscape {
                                offset: escape_at,
                                escape: other,
                            })
                        }
                    }
                }
                Some(c) => raw.push(c),
            }
        }
    }

    /// Consume the four hex digits after `\u`, pairing surrogates
    fn scan_unicode_escape(&mut self, escape_at: usize, raw: &mut String) -> Result<(), ParseError> {
        let unit = self.scan_hex4(escape_at, raw)?;
        if (0xdc00..0xe000).contains(&unit) {
            return Err(ParseError::InvalidUnicodeEscape { offset: escape_at });
        }
        if (0xd800..0xdc00).contains(&unit) {
            let low_at = self.pos;
            if self.bump() != Some('\\') || self.bump() != Some('u') {
                return Err(ParseError::InvalidUnicodeEscape { offset: escape_at });
            }
            raw.push_str("\\u");
            let low = self.scan_hex4(low_at, raw)?;
            if !(0xdc00..0xe000).contains(&low) {
                return Err(ParseError::InvalidUnicodeEscape { offset: low_at });
            }
        }
        Ok(())
    }

    fn scan_hex4(&mut self, escape_at: usize, raw: &mut String) -> Result<u16, ParseError> {
        let mut unit: u16 = 0;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16).map(|d| (c, d)))
                .ok_or(ParseError::InvalidUnicodeEscape { offset: escape_at })?;
            raw.push(digit.0);
            // four hex digits fit in u16
            unit = (unit << 4) | digit.1 as u16;
        }
        Ok(unit)
    }

    fn parse_chain(&mut self) -> Result<Vec<FunctionCall>, ParseError> {
        let mut calls = vec![self.parse_call()?];
        loop {
            // A '.' only separates calls after a closed argument list; after a
            // bare word it was already consumed as part of the name.
            let closed = calls.last().is_some_and(|c| !c.is_bare());
            self.skip_whitespace();
            if closed && self.peek() == Some('.') {
                self.pos += 1;
                self.skip_whitespace();
                calls.push(self.parse_call()?);
            } else {
                return Ok(calls);
            }
        }
    }

    fn parse_call(&mut self) -> Result<FunctionCall, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(is_identifier_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::EmptyFunctionName {
                offset: start,
                found: self.peek(),
            });
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if name.ends_with('.') {
            return Err(ParseError::DanglingDot {
                offset: self.pos - 1,
                name,
            });
        }
        if name.starts_with('.') {
            return Err(ParseError::EmptyFunctionName {
                offset: start,
                found: Some('.'),
            });
        }

        self.skip_whitespace();
        if self.peek() != Some('(') {
            return Ok(FunctionCall::bare(name));
        }
        let open = self.pos;
        self.pos += 1;
        let args = self.parse_args(open)?;
        Ok(FunctionCall::with_args(name, args))
    }

    fn parse_args(&mut self, open: usize) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        self.skip_whitespace();
        match self.peek() {
            Some(')') => {
                self.pos += 1;
                return Ok(args);
            }
            Some(',') => return Err(ParseError::StrayComma { offset: self.pos }),
            None => {
                return Err(ParseError::UnclosedParen {
                    open,
                    offset: self.pos,
                    found: None,
                })
            }
            Some(_) => {}
        }
        loop {
            args.push(self.parse_expr()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    let comma = self.pos;
                    self.pos += 1;
                    self.skip_whitespace();
                    if matches!(self.peek(), Some(',' | ')')) {
                        return Err(ParseError::StrayComma { offset: comma });
                    }
                }
                Some(')') => {
                    self.pos += 1;
                    return Ok(args);
                }
                found => {
                    return Err(ParseError::UnclosedParen {
                        open,
                        offset: self.pos,
                        found,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lit(s: &str) -> Expr {
        Expr::literal(s)
    }

    #[test]
    fn parses_component_attribute_chain() {
        let expr = parse(r#"component("db").attributeWhenReady("datastore.url")"#).unwrap();
        assert_eq!(
            expr,
            Expr::Calls(vec![
                FunctionCall::with_args("component", vec![lit("db")]),
                FunctionCall::with_args("attributeWhenReady", vec![lit("datastore.url")]),
            ])
        );
    }

    #[test]
    fn bare_word_differs_from_empty_call() {
        let bare = parse("entitySpec").unwrap();
        let empty = parse("entitySpec()").unwrap();
        assert_eq!(bare, Expr::call(FunctionCall::bare("entitySpec")));
        assert_eq!(empty, Expr::call(FunctionCall::with_args("entitySpec", vec![])));
        assert_ne!(bare, empty);
    }

    #[test]
    fn dotted_and_colon_names_are_single_tokens() {
        let expr = parse("brooklyn:sensor.lookup(\"x\")").unwrap();
        let calls = expr.calls().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "brooklyn:sensor.lookup");
    }

    #[test]
    fn dot_after_bare_word_stays_in_name() {
        let expr = parse("a.b.c").unwrap();
        assert_eq!(expr, Expr::call(FunctionCall::bare("a.b.c")));
    }

    #[test]
    fn whitespace_between_tokens_is_ignored() {
        let spaced = parse(" formatString ( \"%s-%s\" ,  \"a\" , component ( \"b\" ) . config( \"k\" ) ) ").unwrap();
        let tight = parse(r#"formatString("%s-%s","a",component("b").config("k"))"#).unwrap();
        assert_eq!(spaced, tight);
    }

    #[test]
    fn nested_calls_parse_as_arguments() {
        let expr = parse(r#"formatString("%s", component("db"))"#).unwrap();
        let calls = expr.calls().unwrap();
        let args = calls[0].args().unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[1], Expr::call(FunctionCall::with_args("component", vec![lit("db")])));
    }

    #[test]
    fn literal_keeps_raw_text_and_unwraps_escapes() {
        let expr = parse(r#""a \"quoted\" \\ path\n""#).unwrap();
        let q = expr.as_literal().unwrap();
        assert_eq!(q.raw(), r#""a \"quoted\" \\ path\n""#);
        assert_eq!(q.unwrap(), "a \"quoted\" \\ path\n");
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = parse(r#"component("db)"#).unwrap_err();
        assert_eq!(err, ParseError::UnterminatedString { offset: 10 });
    }

    #[test]
    fn missing_close_paren_reports_open_offset() {
        let err = parse(r#"component("db""#).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnclosedParen {
                open: 9,
                offset: 14,
                found: None
            }
        );
    }

    #[test]
    fn stray_commas_are_rejected() {
        assert_eq!(
            parse(r#"f("a",)"#).unwrap_err(),
            ParseError::StrayComma { offset: 5 }
        );
        assert_eq!(parse("f(,)").unwrap_err(), ParseError::StrayComma { offset: 2 });
        assert_eq!(
            parse(r#"f("a",,"b")"#).unwrap_err(),
            ParseError::StrayComma { offset: 5 }
        );
    }

    #[test]
    fn empty_function_names_are_rejected() {
        assert!(matches!(
            parse(r#"("x")"#).unwrap_err(),
            ParseError::EmptyFunctionName { offset: 0, found: Some('(') }
        ));
        assert!(matches!(
            parse(r#"component("db")."#).unwrap_err(),
            ParseError::EmptyFunctionName { offset: 16, found: None }
        ));
    }

    #[test]
    fn dangling_dot_is_rejected() {
        assert!(matches!(
            parse("parent.").unwrap_err(),
            ParseError::DanglingDot { offset: 6, .. }
        ));
    }

    #[test]
    fn trailing_characters_are_rejected() {
        assert_eq!(
            parse(r#"component("db") x"#).unwrap_err(),
            ParseError::TrailingCharacters { offset: 16, found: 'x' }
        );
        assert_eq!(
            parse(r#""a" "b""#).unwrap_err(),
            ParseError::TrailingCharacters { offset: 4, found: '"' }
        );
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert_eq!(
            parse(r#""a\qb""#).unwrap_err(),
            ParseError::InvalidEscape { offset: 2, escape: 'q' }
        );
        assert_eq!(
            parse(r#""\u12""#).unwrap_err(),
            ParseError::InvalidUnicodeEscape { offset: 1 }
        );
        assert_eq!(
            parse(r#""\udc00""#).unwrap_err(),
            ParseError::InvalidUnicodeEscape { offset: 1 }
        );
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(parse("").unwrap_err(), ParseError::Empty);
        assert_eq!(parse("   ").unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let err = parse("\"é\" x").unwrap_err();
        assert_eq!(err, ParseError::TrailingCharacters { offset: 4, found: 'x' });
    }
}
