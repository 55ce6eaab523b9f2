//! Error types for expression parsing
//!
//! Every variant carries the character offset (not byte offset) at which the
//! scanner gave up, so callers can point at the offending spot.

/// Malformed expression text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Input was empty or whitespace only
    #[error("empty expression")]
    Empty,

    /// String literal never closed
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },

    /// Unknown backslash escape inside a literal
    #[error("invalid escape '\\{escape}' at offset {offset}")]
    InvalidEscape { offset: usize, escape: char },

    /// `\u` escape not followed by four hex digits, or an unpaired surrogate
    #[error("invalid unicode escape at offset {offset}")]
    InvalidUnicodeEscape { offset: usize },

    /// A call name was expected but none was found
    #[error("expected function name at offset {offset}, found {}", describe(*found))]
    EmptyFunctionName { offset: usize, found: Option<char> },

    /// Name ends with `.`, so it is unclear whether a chained call was intended
    #[error("function name '{name}' ends with '.' at offset {offset}")]
    DanglingDot { offset: usize, name: String },

    /// `(` without its matching `)`
    #[error("missing ')' for '(' opened at offset {open}, found {} at offset {offset}", describe(*found))]
    UnclosedParen {
        open: usize,
        offset: usize,
        found: Option<char>,
    },

    /// `,` not followed by an argument
    #[error("stray ',' at offset {offset}")]
    StrayComma { offset: usize },

    /// Some other character where the grammar wanted something specific
    #[error("expected {expected} at offset {offset}, found '{found}'")]
    UnexpectedCharacter {
        offset: usize,
        expected: &'static str,
        found: char,
    },

    /// Input continues after a complete expression
    #[error("unexpected trailing '{found}' at offset {offset} after complete expression")]
    TrailingCharacters { offset: usize, found: char },
}

impl ParseError {
    /// Character offset the error refers to
    #[must_use]
    pub fn offset(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::UnterminatedString { offset }
            | Self::InvalidEscape { offset, .. }
            | Self::InvalidUnicodeEscape { offset }
            | Self::EmptyFunctionName { offset, .. }
            | Self::DanglingDot { offset, .. }
            | Self::UnclosedParen { offset, .. }
            | Self::StrayComma { offset }
            | Self::UnexpectedCharacter { offset, .. }
            | Self::TrailingCharacters { offset, .. } => *offset,
        }
    }
}

fn describe(found: Option<char>) -> String {
    match found {
        Some(c) => format!("'{c}'"),
        None => "end of input".to_string(),
    }
}
