//! Error types for expression resolution
//!
//! Covers every way turning an expression into a concrete value can fail:
//! - Parse failures surfaced through the interpreter
//! - Missing ambient context for a blocking resolve
//! - Scope searches that find nothing
//! - Type and sensor lookups against the registry
//! - Interrupted waits (lock, task, attribute)

use crate::deferred::{FormatError, Scope};
use crate::entity::{EntityId, TypeLookupError};
use std::fmt;
use topo_dsl::ParseError;

/// Suspension point a wait was interrupted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitPhase {
    /// Waiting for the per-instance resolution lock
    Lock,
    /// Waiting for the submitted task to finish
    Task,
    /// Waiting for an attribute to become ready
    Attribute,
}

impl fmt::Display for WaitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Lock => "resolution lock",
            Self::Task => "resolution task",
            Self::Attribute => "attribute readiness",
        };
        f.write_str(s)
    }
}

/// Main resolution error type
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Expression text did not parse
    #[error("invalid expression '{expression}': {source}")]
    Parse {
        /// The text handed to the parser
        expression: String,
        #[source]
        source: ParseError,
    },

    /// Blocking resolve with no ambient task context
    #[error("no execution context available to resolve {0}")]
    MissingContext(String),

    /// Scope search found no entity with the plan id
    #[error("no component '{id}' in scope {scope}{}", context_suffix(.context))]
    ComponentNotFound {
        id: String,
        scope: Scope,
        context: Option<EntityId>,
    },

    /// Type registry lookup failed
    #[error("cannot look up '{name}': {source}")]
    TypeOrSensorNotFound {
        name: String,
        #[source]
        source: TypeLookupError,
    },

    /// A wait was interrupted; the lock has been released
    #[error("interrupted while waiting for {phase}")]
    Interrupted { phase: WaitPhase },

    /// No top-level function with this name
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Wrong number or kind of arguments
    #[error("invalid arguments to {function}: {message}")]
    InvalidArguments { function: String, message: String },

    /// Chained call on a value that does not support it
    #[error("cannot call {function} on {target}")]
    InvalidChain { function: String, target: String },

    /// Format pattern failure
    #[error("format failed: {0}")]
    Format(#[from] FormatError),

    /// Regex did not compile
    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    /// Entity is not (or no longer) part of the graph
    #[error("entity {0} is not managed")]
    EntityNotManaged(EntityId),

    /// Attribute did not become ready in time
    #[error("attribute {sensor} on {entity} not ready after {waited_ms}ms")]
    AttributeTimeout {
        entity: EntityId,
        sensor: String,
        waited_ms: u64,
    },

    /// Task was aborted before completing
    #[error("task {0} was cancelled")]
    TaskCancelled(String),

    /// Task panicked
    #[error("task {name} failed: {message}")]
    TaskFailed { name: String, message: String },

    /// A resolution produced a value of the wrong shape
    #[error("expected {expected}, found {found}")]
    UnexpectedResult { expected: String, found: String },
}

fn context_suffix(context: &Option<EntityId>) -> String {
    match context {
        Some(id) => format!(" (searching from {id})"),
        None => String::new(),
    }
}

impl ResolveError {
    /// Create parse error for the given text
    #[inline]
    pub fn parse(expression: impl Into<String>, source: ParseError) -> Self {
        Self::Parse {
            expression: expression.into(),
            source,
        }
    }

    /// Create invalid-arguments error
    #[inline]
    pub fn invalid_arguments(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create unexpected-result error
    #[inline]
    pub fn unexpected(expected: impl Into<String>, found: impl fmt::Display) -> Self {
        Self::UnexpectedResult {
            expected: expected.into(),
            found: found.to_string(),
        }
    }

    /// Create type-lookup error
    #[inline]
    pub fn type_lookup(name: impl Into<String>, source: TypeLookupError) -> Self {
        Self::TypeOrSensorNotFound {
            name: name.into(),
            source,
        }
    }

    /// Check if the failure came from an interrupted wait
    #[inline]
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }

    /// Check if error is retryable
    ///
    /// Only transient task and attribute failures qualify. Missing context,
    /// scope misses, lookup failures and interruptions are final.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AttributeTimeout { .. } | Self::TaskCancelled(_) | Self::TaskFailed { .. }
        )
    }
}

/// Result alias for resolution
pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_kinds_are_not_retryable() {
        let errors = [
            ResolveError::MissingContext("x".into()),
            ResolveError::ComponentNotFound {
                id: "db".into(),
                scope: Scope::Global,
                context: None,
            },
            ResolveError::type_lookup(
                "T",
                TypeLookupError::UnknownType { name: "T".into() },
            ),
            ResolveError::Interrupted {
                phase: WaitPhase::Lock,
            },
            ResolveError::parse("(", ParseError::Empty),
        ];
        for err in errors {
            assert!(!err.is_retryable(), "{err}");
        }
    }

    #[test]
    fn type_lookup_keeps_cause() {
        use std::error::Error;
        let err = ResolveError::type_lookup(
            "org.example.Missing",
            TypeLookupError::UnknownType {
                name: "org.example.Missing".into(),
            },
        );
        let source = err.source().map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("unknown type: org.example.Missing"));
    }

    #[test]
    fn not_found_names_id_and_scope() {
        let err = ResolveError::ComponentNotFound {
            id: "missing".into(),
            scope: Scope::Sibling,
            context: None,
        };
        assert_eq!(err.to_string(), "no component 'missing' in scope sibling");
    }

    #[test]
    fn interrupted_is_classified() {
        let err = ResolveError::Interrupted {
            phase: WaitPhase::Task,
        };
        assert!(err.is_interrupted());
        assert_eq!(err.to_string(), "interrupted while waiting for resolution task");
    }
}
