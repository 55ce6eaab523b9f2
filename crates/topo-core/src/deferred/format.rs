//! String-producing resolvers
//!
//! `formatString` implements the printf subset blueprints use:
//! `%s %d %f %b %x %n %%`, explicit positions (`%2$s`), `-` and `0` flags,
//! width, and precision for `%s` and `%f`.
//!
//! Width and precision are capped at [`MAX_WIDTH`]. Flag and precision
//! combinations that `java.util.Formatter` rejects are rejected here too.

use super::Resolver;
use crate::error::{ResolveError, ResolveResult};
use crate::task::TaskContext;
use crate::value::{DslValue, Resolved};
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Largest width or precision a specifier may ask for
pub const MAX_WIDTH: usize = 4096;

/// Format pattern failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// Pattern ends inside a `%` specifier
    #[error("incomplete format specifier at offset {offset}")]
    Incomplete { offset: usize },

    /// Conversion character not supported
    #[error("unknown conversion '%{conversion}' at offset {offset}")]
    UnknownConversion { offset: usize, conversion: char },

    /// Explicit position `0$`
    #[error("argument positions start at 1 (offset {offset})")]
    InvalidPosition { offset: usize },

    /// Width or precision above [`MAX_WIDTH`]
    #[error("width or precision above {max} at offset {offset}", max = MAX_WIDTH)]
    WidthTooLarge { offset: usize },

    /// Precision on a conversion that takes none
    #[error("precision not allowed for '%{conversion}' at offset {offset}")]
    PrecisionNotAllowed { offset: usize, conversion: char },

    /// Flags that cannot be combined, or do not apply to the conversion
    #[error("illegal flags for '%{conversion}' at offset {offset}")]
    IllegalFlags { offset: usize, conversion: char },

    /// `-` or `0` flag without a width
    #[error("flag needs a width at offset {offset}")]
    MissingWidth { offset: usize },

    /// Fewer arguments than specifiers
    #[error("missing argument {position} for format pattern")]
    MissingArgument { position: usize },

    /// Argument cannot be converted
    #[error("argument {position} ({found}) is not valid for '%{conversion}'")]
    Mismatch {
        position: usize,
        conversion: char,
        found: String,
    },
}

#[derive(Debug, Default)]
struct Spec {
    position: Option<usize>,
    left: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: char,
}

fn digits(chars: &[char], i: &mut usize) -> Option<usize> {
    let start = *i;
    while *i < chars.len() && chars[*i].is_ascii_digit() {
        *i += 1;
    }
    if *i == start {
        return None;
    }
    // only overflow can fail here; saturate so the width cap catches it
    Some(
        chars[start..*i]
            .iter()
            .collect::<String>()
            .parse()
            .unwrap_or(usize::MAX),
    )
}

fn parse_spec(chars: &[char], i: &mut usize, offset: usize) -> Result<Spec, FormatError> {
    let mut spec = Spec::default();

    let rewind = *i;
    if let Some(n) = digits(chars, i) {
        if chars.get(*i) == Some(&'$') {
            if n == 0 {
                return Err(FormatError::InvalidPosition { offset });
            }
            spec.position = Some(n);
            *i += 1;
        } else {
            *i = rewind;
        }
    }

    while let Some(&flag) = chars.get(*i) {
        match flag {
            '-' => spec.left = true,
            '0' => spec.zero = true,
            _ => break,
        }
        *i += 1;
    }
    spec.width = digits(chars, i);
    if chars.get(*i) == Some(&'.') {
        *i += 1;
        spec.precision = Some(digits(chars, i).unwrap_or(0));
    }
    if spec.width.max(spec.precision).is_some_and(|n| n > MAX_WIDTH) {
        return Err(FormatError::WidthTooLarge { offset });
    }

    let conversion = *chars.get(*i).ok_or(FormatError::Incomplete { offset })?;
    *i += 1;
    spec.conversion = conversion;
    Ok(spec)
}

fn check_flags(spec: &Spec, offset: usize) -> Result<(), FormatError> {
    let conversion = spec.conversion;
    if spec.precision.is_some() && !matches!(conversion, 's' | 'S' | 'f') {
        return Err(FormatError::PrecisionNotAllowed { offset, conversion });
    }
    let numeric = matches!(conversion, 'd' | 'x' | 'X' | 'f');
    let line_separator_extras = conversion == 'n' && (spec.left || spec.width.is_some());
    if (spec.left && spec.zero) || (spec.zero && !numeric) || line_separator_extras {
        return Err(FormatError::IllegalFlags { offset, conversion });
    }
    if (spec.left || spec.zero) && spec.width.is_none() {
        return Err(FormatError::MissingWidth { offset });
    }
    Ok(())
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn integer_of(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from)),
        _ => None,
    }
}

fn convert(spec: &Spec, value: &Value, position: usize, offset: usize) -> Result<String, FormatError> {
    let mismatch = || FormatError::Mismatch {
        position,
        conversion: spec.conversion,
        found: value.to_string(),
    };
    let text = match spec.conversion {
        's' | 'S' => {
            let mut text = text_of(value);
            if let Some(precision) = spec.precision {
                text = text.chars().take(precision).collect();
            }
            if spec.conversion == 'S' {
                text = text.to_uppercase();
            }
            text
        }
        'd' => integer_of(value).ok_or_else(mismatch)?.to_string(),
        'x' | 'X' => {
            let n = integer_of(value).ok_or_else(mismatch)?;
            // negative values print as 64-bit two's complement
            let hex = if n < 0 {
                format!("{:x}", n as i64)
            } else {
                format!("{n:x}")
            };
            if spec.conversion == 'X' {
                hex.to_uppercase()
            } else {
                hex
            }
        }
        'f' => {
            let f = value.as_f64().ok_or_else(mismatch)?;
            format!("{f:.*}", spec.precision.unwrap_or(6))
        }
        'b' | 'B' => {
            let b = match value {
                Value::Null => false,
                Value::Bool(b) => *b,
                _ => true,
            };
            let text = b.to_string();
            if spec.conversion == 'B' {
                text.to_uppercase()
            } else {
                text
            }
        }
        conversion => return Err(FormatError::UnknownConversion { offset, conversion }),
    };
    Ok(pad(spec, text))
}

fn pad(spec: &Spec, text: String) -> String {
    let len = text.chars().count();
    let Some(width) = spec.width.filter(|w| *w > len) else {
        return text;
    };
    let fill = width - len;
    if spec.left {
        return format!("{text}{}", " ".repeat(fill));
    }
    let numeric = matches!(spec.conversion, 'd' | 'x' | 'X' | 'f');
    if spec.zero && numeric {
        let (sign, digits) = match text.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", text.as_str()),
        };
        return format!("{sign}{}{digits}", "0".repeat(fill));
    }
    format!("{}{text}", " ".repeat(fill))
}

/// Format `pattern` with `args`, printf style
///
/// Extra arguments are ignored.
///
/// # Errors
/// Malformed specifiers, missing arguments, or arguments of the wrong kind.
pub fn format_pattern(pattern: &str, args: &[Value]) -> Result<String, FormatError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut next = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let offset = i;
        i += 1;
        let spec = parse_spec(&chars, &mut i, offset)?;
        if !"%nsSdxXfbB".contains(spec.conversion) {
            return Err(FormatError::UnknownConversion {
                offset,
                conversion: spec.conversion,
            });
        }
        check_flags(&spec, offset)?;
        match spec.conversion {
            '%' => out.push_str(&pad(&spec, "%".to_string())),
            'n' => out.push('\n'),
            _ => {
                let index = match spec.position {
                    Some(position) => position - 1,
                    None => {
                        next += 1;
                        next - 1
                    }
                };
                let value = args.get(index).ok_or(FormatError::MissingArgument {
                    position: index + 1,
                })?;
                out.push_str(&convert(&spec, value, index + 1, offset)?);
            }
        }
    }
    Ok(out)
}

/// JSON form used as format input; sensors and entities render by name
fn as_format_arg(resolved: Resolved) -> Value {
    resolved.into_json()
}

fn write_call(f: &mut fmt::Formatter<'_>, name: &str, args: &[&DslValue]) -> fmt::Result {
    write!(f, "{name}(")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

async fn resolve_all(values: &[DslValue], ctx: &TaskContext) -> ResolveResult<Vec<Value>> {
    let mut resolved = Vec::with_capacity(values.len());
    for value in values {
        resolved.push(as_format_arg(value.get_async(ctx).await?));
    }
    Ok(resolved)
}

/// Concrete values of `values`, or `None` if any is deferred
pub(crate) fn concrete_all(values: &[DslValue]) -> Option<Vec<Value>> {
    values
        .iter()
        .map(|v| v.concrete().map(as_format_arg))
        .collect()
}

/// `formatString` with at least one deferred argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslFormatString {
    /// Pattern, possibly deferred
    pub pattern: DslValue,
    /// Arguments in order
    #[serde(default)]
    pub args: Vec<DslValue>,
}

impl DslFormatString {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(pattern: DslValue, args: Vec<DslValue>) -> Self {
        Self { pattern, args }
    }

    /// Pattern plus arguments, in argument order
    fn operands(&self) -> Vec<DslValue> {
        std::iter::once(self.pattern.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Format already-resolved operands (pattern first)
    pub(crate) fn apply(operands: &[Value]) -> ResolveResult<String> {
        let (pattern, args) = operands
            .split_first()
            .ok_or_else(|| ResolveError::invalid_arguments("formatString", "missing pattern"))?;
        Ok(format_pattern(&text_of(pattern), args)?)
    }
}

impl Resolver for DslFormatString {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        let operands = self.operands();
        async move {
            let values = resolve_all(&operands, &ctx).await?;
            Self::apply(&values).map(|s| Resolved::Value(Value::String(s)))
        }
        .boxed()
    }
}

impl fmt::Display for DslFormatString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&DslValue> = std::iter::once(&self.pattern).chain(&self.args).collect();
        write_call(f, "formatString", &args)
    }
}

/// `regexReplacement` with at least one deferred argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslRegexReplacement {
    /// Text to search
    pub source: DslValue,
    /// Regex pattern
    pub pattern: DslValue,
    /// Replacement, `$1` style group references allowed
    pub replacement: DslValue,
}

impl DslRegexReplacement {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(source: DslValue, pattern: DslValue, replacement: DslValue) -> Self {
        Self {
            source,
            pattern,
            replacement,
        }
    }

    fn operands(&self) -> Vec<DslValue> {
        vec![
            self.source.clone(),
            self.pattern.clone(),
            self.replacement.clone(),
        ]
    }

    /// Replace every match in already-resolved operands
    pub(crate) fn apply(operands: &[Value]) -> ResolveResult<String> {
        let [source, pattern, replacement] = operands else {
            return Err(ResolveError::invalid_arguments(
                "regexReplacement",
                format!("expected 3 arguments, got {}", operands.len()),
            ));
        };
        let regex =
            Regex::new(&text_of(pattern)).map_err(|e| ResolveError::InvalidRegex(e.to_string()))?;
        Ok(regex
            .replace_all(&text_of(source), text_of(replacement).as_str())
            .into_owned())
    }
}

impl Resolver for DslRegexReplacement {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        let operands = self.operands();
        async move {
            let values = resolve_all(&operands, &ctx).await?;
            Self::apply(&values).map(|s| Resolved::Value(Value::String(s)))
        }
        .boxed()
    }
}

impl fmt::Display for DslRegexReplacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_call(
            f,
            "regexReplacement",
            &[&self.source, &self.pattern, &self.replacement],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fmt(pattern: &str, args: &[Value]) -> String {
        format_pattern(pattern, args).unwrap()
    }

    #[test]
    fn basic_conversions() {
        assert_eq!(fmt("%s:%d", &[json!("host"), json!(8080)]), "host:8080");
        assert_eq!(fmt("%.2f", &[json!(3.14159)]), "3.14");
        assert_eq!(fmt("%f", &[json!(1)]), "1.000000");
        assert_eq!(fmt("%b %b %b", &[json!(null), json!(false), json!("x")]), "false false true");
        assert_eq!(fmt("%x %X", &[json!(255), json!(255)]), "ff FF");
        assert_eq!(fmt("100%%%n", &[]), "100%\n");
    }

    #[test]
    fn width_and_flags() {
        assert_eq!(fmt("[%5s]", &[json!("ab")]), "[   ab]");
        assert_eq!(fmt("[%-5s]", &[json!("ab")]), "[ab   ]");
        assert_eq!(fmt("[%05d]", &[json!(-42)]), "[-0042]");
        assert_eq!(fmt("[%.3s]", &[json!("abcdef")]), "[abc]");
    }

    #[test]
    fn oversized_width_is_rejected() {
        assert_eq!(
            format_pattern("%18446744073709551615s", &[json!("x")]),
            Err(FormatError::WidthTooLarge { offset: 0 })
        );
        assert_eq!(
            format_pattern("a%99999999999s", &[json!("x")]),
            Err(FormatError::WidthTooLarge { offset: 1 })
        );
        assert_eq!(
            format_pattern("%.5000f", &[json!(1.5)]),
            Err(FormatError::WidthTooLarge { offset: 0 })
        );
        assert_eq!(fmt("%4096s", &[json!("x")]).len(), MAX_WIDTH);
    }

    #[test]
    fn precision_only_on_strings_and_floats() {
        for (pattern, conversion) in [("%.2d", 'd'), ("%.1x", 'x'), ("%.3b", 'b'), ("%.1%", '%')] {
            assert_eq!(
                format_pattern(pattern, &[json!(5)]),
                Err(FormatError::PrecisionNotAllowed {
                    offset: 0,
                    conversion
                }),
                "{pattern}"
            );
        }
        assert_eq!(fmt("%.1s|%.1f", &[json!("ab"), json!(2.26)]), "a|2.3");
    }

    #[test]
    fn conflicting_flags_are_rejected() {
        assert_eq!(
            format_pattern("%-05d", &[json!(5)]),
            Err(FormatError::IllegalFlags {
                offset: 0,
                conversion: 'd'
            })
        );
        assert_eq!(
            format_pattern("%05s", &[json!("x")]),
            Err(FormatError::IllegalFlags {
                offset: 0,
                conversion: 's'
            })
        );
        assert_eq!(
            format_pattern("%-s", &[json!("x")]),
            Err(FormatError::MissingWidth { offset: 0 })
        );
    }

    #[test]
    fn explicit_positions() {
        assert_eq!(fmt("%2$s-%1$s-%2$s", &[json!("a"), json!("b")]), "b-a-b");
    }

    #[test]
    fn non_string_values_render_as_json() {
        assert_eq!(fmt("%s %s", &[json!(null), json!([1, 2])]), "null [1,2]");
    }

    #[test]
    fn extra_arguments_ignored() {
        assert_eq!(fmt("%s", &[json!("a"), json!("b")]), "a");
    }

    #[test]
    fn errors() {
        assert_eq!(
            format_pattern("%s %s", &[json!("a")]),
            Err(FormatError::MissingArgument { position: 2 })
        );
        assert_eq!(
            format_pattern("50%", &[]),
            Err(FormatError::Incomplete { offset: 2 })
        );
        assert_eq!(
            format_pattern("%q", &[json!(1)]),
            Err(FormatError::UnknownConversion {
                offset: 0,
                conversion: 'q'
            })
        );
        assert!(matches!(
            format_pattern("%d", &[json!("seven")]),
            Err(FormatError::Mismatch { position: 1, conversion: 'd', .. })
        ));
        assert_eq!(
            format_pattern("%0$s", &[json!("a")]),
            Err(FormatError::InvalidPosition { offset: 0 })
        );
    }

    #[test]
    fn regex_replacement_applies_groups() {
        let out = DslRegexReplacement::apply(&[
            json!("db-1.example.com"),
            json!(r"^([a-z]+)-(\d+)"),
            json!("$2-$1"),
        ])
        .unwrap();
        assert_eq!(out, "1-db.example.com");
    }

    #[test]
    fn invalid_regex_is_reported() {
        let err = DslRegexReplacement::apply(&[json!("x"), json!("("), json!("")]).unwrap_err();
        assert!(matches!(err, ResolveError::InvalidRegex(_)));
    }

    #[test]
    fn format_display_is_canonical() {
        let value = DslFormatString::new(DslValue::from("%s:%s"), vec![DslValue::from("a")]);
        assert_eq!(value.to_string(), r#"formatString("%s:%s", "a")"#);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn text_without_specifiers_is_unchanged(text in "[^%]{0,40}") {
                prop_assert_eq!(fmt(&text, &[]), text);
            }

            #[test]
            fn string_argument_is_inserted_verbatim(prefix in "[a-z ]{0,10}", arg in "\\PC{0,20}") {
                let out = fmt(&format!("{prefix}%s!"), &[json!(arg.clone())]);
                prop_assert_eq!(out, format!("{prefix}{arg}!"));
            }
        }
    }
}
