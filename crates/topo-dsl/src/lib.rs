//! Topo DSL - blueprint expression language
//!
//! Parses the small expression language that blueprint authors embed in a
//! plan (for example `component("db").attributeWhenReady("datastore.url")`)
//! into an immutable AST. Binding the AST to concrete functions happens in
//! `topo-core`; this crate performs no I/O and never blocks.
//!
//! # Grammar
//!
//! ```text
//! expr        := literal | call-chain
//! literal     := '"' ( escaped-char | other-char )* '"'
//! call-chain  := call ( '.' call )*
//! call        := ident-chars [ '(' arg-list? ')' ]
//! arg-list    := expr ( ',' expr )*
//! ```
//!
//! # Example
//!
//! ```
//! use topo_dsl::{parse, Expr};
//!
//! let expr = parse(r#"component("db").attributeWhenReady("datastore.url")"#).unwrap();
//! let Expr::Calls(calls) = &expr else { panic!("expected a call chain") };
//! assert_eq!(calls.len(), 2);
//! assert_eq!(calls[0].name(), "component");
//! assert_eq!(calls[1].name(), "attributeWhenReady");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod ast;
mod error;
mod parser;

pub use ast::{Expr, FunctionCall, QuotedString};
pub use error::ParseError;
pub use parser::{is_identifier_char, parse};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
