//! Topo Core - deferred-expression resolution engine
//!
//! Turns blueprint expressions into values that are resolved later, on
//! demand, against a live entity topology:
//! - Interprets parsed expressions against a function registry
//! - Builds deferred values for anything that needs the live graph
//! - Resolves them as units of work on an execution context
//! - Serializes concurrent reads of one value on a per-instance lock
//!
//! # Example
//!
//! ```rust,ignore
//! use topo_core::prelude::*;
//!
//! let runtime = ExecutionRuntime::new(ResolverConfig::default())?;
//! let interpreter = Interpreter::new(types);
//! let url = interpreter.parse_and_interpret(r#"component("db").attributeWhenReady("datastore.url")"#)?;
//!
//! let ctx = runtime.context(topology).with_entity(web);
//! println!("{}", url.get_in(&ctx)?);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod deferred;
pub mod dsl;
pub mod entity;
pub mod error;
pub mod settings;
pub mod task;
pub mod value;

// Re-exports for convenience
pub use deferred::{
    find_component, format_pattern, AttributeWhenReady, DeferredKind, DeferredValue, DslComponent,
    DslConfig, DslFormatString, DslRegexReplacement, DslSensor, FormatError, Resolver, Scope,
};
pub use dsl::{Arguments, DslFunction, DslMethod, FunctionRegistry, Interpreter};
pub use entity::{
    EntityDefinition, EntityGraph, EntityId, Readiness, SensorDescriptor, SensorKind,
    StaticTypeRegistry, Topology, TypeDescriptor, TypeKind, TypeLookupError, TypeRegistry,
};
pub use error::{ResolveError, ResolveResult, WaitPhase};
pub use settings::{ConfigError, NotFoundPolicy, ResolverConfig, DEFAULT_PLAN_ID_KEY};
pub use task::{
    ContextGuard, ExecutionContext, ExecutionRuntime, Interrupt, StatsSnapshot, Task, TaskContext,
    TaskHandle, TokioExecutionContext,
};
pub use value::{DslValue, EntitySpec, Resolved};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Topo Core
    pub use crate::{
        DeferredValue, DslValue, EntityDefinition, EntityGraph, EntityId, ExecutionRuntime,
        Interpreter, Resolved, ResolveError, ResolveResult, ResolverConfig, Scope,
        StaticTypeRegistry, TaskContext, Topology, TypeDescriptor, TypeRegistry,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
