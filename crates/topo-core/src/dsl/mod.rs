//! Interpretation step
//!
//! Walks a parsed [`Expr`] against a [`FunctionRegistry`]:
//! - literals become [`DslValue::Value`] strings
//! - the first call of a chain is a top-level function
//! - every later call is a method on the previous call's result
//!
//! Interpretation never touches the entity graph. Anything that needs the
//! live topology comes back as a [`DslValue::Deferred`].

mod functions;

pub use functions::{Arguments, DslFunction, DslMethod, FunctionRegistry};

use crate::deferred::DeferredKind;
use crate::entity::TypeRegistry;
use crate::error::{ResolveError, ResolveResult};
use crate::value::DslValue;
use serde_json::Value;
use std::sync::Arc;
use topo_dsl::{Expr, FunctionCall};

/// Binds expressions to functions
#[derive(Debug, Clone)]
pub struct Interpreter {
    functions: Arc<FunctionRegistry>,
    types: Arc<dyn TypeRegistry>,
    source: Option<Arc<str>>,
}

impl Interpreter {
    /// Create interpreter with the built-in functions
    #[must_use]
    pub fn new(types: Arc<dyn TypeRegistry>) -> Self {
        Self {
            functions: Arc::new(FunctionRegistry::with_defaults()),
            types,
            source: None,
        }
    }

    /// Use a different function set
    #[inline]
    #[must_use]
    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    /// Expression text reported when interpretation fails
    #[inline]
    #[must_use]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Type registry used by `sensor` and `entitySpec`
    #[inline]
    #[must_use]
    pub fn types(&self) -> &Arc<dyn TypeRegistry> {
        &self.types
    }

    /// Function set
    #[inline]
    #[must_use]
    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Parse and interpret expression text
    ///
    /// # Errors
    /// [`ResolveError::Parse`] for malformed text, otherwise any
    /// interpretation failure.
    pub fn parse_and_interpret(&self, text: &str) -> ResolveResult<DslValue> {
        let expr = topo_dsl::parse(text).map_err(|e| ResolveError::parse(text, e))?;
        self.clone().with_source(text).interpret(&expr)
    }

    /// Interpret a parsed expression
    ///
    /// # Errors
    /// Unknown functions, bad arguments or invalid chains.
    pub fn interpret(&self, expr: &Expr) -> ResolveResult<DslValue> {
        self.interpret_with_args(expr, None)
    }

    /// Interpret with arguments supplied from outside the expression text
    ///
    /// `external` feeds the last call of the chain when it is a bare word;
    /// an array spreads into positional arguments. Supplying both inline and
    /// external arguments is an error.
    ///
    /// # Errors
    /// Unknown functions, bad arguments or invalid chains.
    pub fn interpret_with_args(
        &self,
        expr: &Expr,
        external: Option<Value>,
    ) -> ResolveResult<DslValue> {
        let result = self.evaluate(expr, external);
        if let Err(err) = &result {
            tracing::warn!(
                expression = self.source.as_deref().unwrap_or("<unknown>"),
                error = %err,
                "Failed to interpret expression"
            );
        }
        result
    }

    fn evaluate(&self, expr: &Expr, mut external: Option<Value>) -> ResolveResult<DslValue> {
        let calls = match expr {
            Expr::Literal(text) => return Ok(DslValue::from(text.unwrap())),
            Expr::Calls(calls) => calls,
        };
        let last = calls.len().saturating_sub(1);

        let mut value: Option<DslValue> = None;
        for (index, call) in calls.iter().enumerate() {
            let outside = if index == last { external.take() } else { None };
            let args = self.arguments(call, outside)?;
            tracing::trace!(function = call.name(), args = args.len(), "Interpreting call");
            value = Some(match value {
                None => self.call_function(call.name(), args)?,
                Some(receiver) => self.call_method(call.name(), &receiver, args)?,
            });
        }
        value.ok_or_else(|| ResolveError::invalid_arguments("<chain>", "empty call chain"))
    }

    fn arguments(&self, call: &FunctionCall, external: Option<Value>) -> ResolveResult<Arguments> {
        let values = match (call.args(), external) {
            (Some(_), Some(_)) => {
                return Err(ResolveError::invalid_arguments(
                    call.name(),
                    "arguments given both inline and externally",
                ))
            }
            (Some(args), None) => args
                .iter()
                .map(|arg| self.evaluate(arg, None))
                .collect::<ResolveResult<Vec<_>>>()?,
            (None, Some(Value::Array(items))) => items.into_iter().map(DslValue::from).collect(),
            (None, Some(value)) => vec![DslValue::from(value)],
            (None, None) => Vec::new(),
        };
        Ok(Arguments::new(call.name(), values))
    }

    fn call_function(&self, name: &str, args: Arguments) -> ResolveResult<DslValue> {
        let function = self
            .functions
            .function(name)
            .ok_or_else(|| ResolveError::UnknownFunction(name.to_string()))?;
        function(self, args)
    }

    fn call_method(&self, name: &str, receiver: &DslValue, args: Arguments) -> ResolveResult<DslValue> {
        let invalid = || ResolveError::InvalidChain {
            function: name.to_string(),
            target: receiver.to_string(),
        };
        let component = match receiver {
            DslValue::Deferred(d) if matches!(d.kind(), DeferredKind::Component(_)) => d,
            _ => return Err(invalid()),
        };
        let method = self.functions.method(name).ok_or_else(invalid)?;
        method(self, component, args)
    }
}
