//! Property tests for the expression parser.
//!
//! - Canonical text of any well-formed tree parses back to the same tree.
//! - Arbitrary input never panics; failures always carry an in-range offset.
//! - Breaking a well-formed expression produces a positioned error.

use proptest::prelude::*;
use topo_dsl::{parse, Expr, FunctionCall, ParseError};

fn name() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_:]{0,6}(\\.[a-zA-Z][a-zA-Z0-9_]{0,4}){0,2}"
}

fn text() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9 ./:%-]{0,12}",
        any::<String>().prop_map(|s| s.chars().take(8).collect()),
    ]
}

fn expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        text().prop_map(|t| Expr::literal(&t)),
        name().prop_map(|n| Expr::call(FunctionCall::bare(n))),
    ];
    leaf.prop_recursive(4, 32, 4, |inner| {
        (
            prop::collection::vec((name(), prop::collection::vec(inner, 0..4)), 1..4),
            prop::option::of(name()),
        )
            .prop_map(|(links, tail)| {
                // only the last link of a chain may be a bare word
                let mut calls: Vec<FunctionCall> = links
                    .into_iter()
                    .map(|(n, args)| FunctionCall::with_args(n, args))
                    .collect();
                if let Some(t) = tail {
                    calls.push(FunctionCall::bare(t));
                }
                Expr::Calls(calls)
            })
    })
}

proptest! {
    #[test]
    fn canonical_text_reparses_to_same_tree(e in expr()) {
        let text = e.to_string();
        let reparsed = parse(&text);
        prop_assert_eq!(reparsed, Ok(e), "text: {}", text);
    }

    #[test]
    fn arbitrary_input_never_panics(input in any::<String>()) {
        if let Err(err) = parse(&input) {
            prop_assert!(err.offset() <= input.chars().count());
        }
    }

    #[test]
    fn dropping_the_closing_paren_is_reported(n in name(), arg in "[a-z]{1,6}") {
        let input = format!("{n}(\"{arg}\"");
        let err = parse(&input).unwrap_err();
        let is_unclosed = matches!(err, ParseError::UnclosedParen { .. });
        prop_assert!(is_unclosed, "got {:?}", err);
    }

    #[test]
    fn unterminated_literal_is_reported(n in name(), arg in "[a-z ]{0,6}") {
        let input = format!("{n}(\"{arg}");
        let err = parse(&input).unwrap_err();
        prop_assert_eq!(err, ParseError::UnterminatedString { offset: n.chars().count() + 1 });
    }
}

#[test]
fn ast_serializes_with_serde() {
    let expr = parse(r#"component("db").attributeWhenReady("url")"#).unwrap();
    let json = serde_json::to_string(&expr).unwrap();
    let back: Expr = serde_json::from_str(&json).unwrap();
    assert_eq!(back, expr);
}
