//! Deferred values
//!
//! A [`DeferredValue`] is an expression that has been interpreted but not
//! evaluated. Every read builds a fresh task from the value's
//! [`DeferredKind`], submits it to the execution context and waits for it.
//! Nothing is cached. Reads of one instance are serialized on a
//! per-instance lock; distinct instances never wait on each other.
//!
//! # Example
//!
//! ```rust,ignore
//! let value = interpreter.parse_and_interpret(r#"component("db").attributeWhenReady("datastore.url")"#)?;
//! let _guard = ctx.enter();
//! let url = value.get()?;
//! ```

mod attribute;
mod component;
mod format;

pub use attribute::{AttributeWhenReady, DslConfig, DslSensor};
pub use component::{find_component, DslComponent, Scope};
pub use format::{format_pattern, DslFormatString, DslRegexReplacement, FormatError};
pub(crate) use format::concrete_all;

use crate::error::{ResolveError, ResolveResult, WaitPhase};
use crate::task::{Interrupt, Task, TaskContext};
use crate::value::Resolved;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Build operation of a deferred value
pub trait Resolver: fmt::Display + Send + Sync {
    /// Body of one resolution, run as a unit of work with `ctx` bound
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>>;
}

type TaskFactory =
    Arc<dyn Fn(TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> + Send + Sync>;

/// Host-supplied build operation; never persisted
#[derive(Clone)]
pub struct CustomResolver {
    name: String,
    factory: TaskFactory,
}

impl fmt::Debug for CustomResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomResolver")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CustomResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}()", self.name)
    }
}

impl Resolver for CustomResolver {
    fn build(&self, ctx: TaskContext) -> BoxFuture<'static, ResolveResult<Resolved>> {
        (self.factory)(ctx)
    }
}

/// Closed set of build operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeferredKind {
    /// Scope search for an entity
    Component(DslComponent),
    /// Wait for an attribute on an entity
    AttributeWhenReady(AttributeWhenReady),
    /// Read a config key of an entity
    Config(DslConfig),
    /// Sensor declared on an entity's type
    Sensor(DslSensor),
    /// Format once all arguments are resolved
    FormatString(DslFormatString),
    /// Regex replace once all arguments are resolved
    RegexReplacement(DslRegexReplacement),
    /// Host-supplied build operation
    #[serde(skip)]
    Custom(CustomResolver),
}

impl DeferredKind {
    fn resolver(&self) -> &dyn Resolver {
        match self {
            Self::Component(r) => r,
            Self::AttributeWhenReady(r) => r,
            Self::Config(r) => r,
            Self::Sensor(r) => r,
            Self::FormatString(r) => r,
            Self::RegexReplacement(r) => r,
            Self::Custom(r) => r,
        }
    }
}

/// Per-instance single-flight lock, recreated on clone and deserialize
#[derive(Debug, Default)]
struct ResolutionLock(Mutex<()>);

impl Clone for ResolutionLock {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl ResolutionLock {
    async fn acquire(&self, what: &DeferredValue) -> MutexGuard<'_, ()> {
        match self.0.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(value = %what, "Resolution in flight, waiting for lock");
                self.0.lock().await
            }
        }
    }

    async fn acquire_interruptibly(
        &self,
        what: &DeferredValue,
        interrupt: &Interrupt,
    ) -> ResolveResult<MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            () = interrupt.interrupted() => {
                tracing::debug!(value = %what, "Interrupted before acquiring resolution lock");
                Err(ResolveError::Interrupted { phase: WaitPhase::Lock })
            }
            guard = self.acquire(what) => Ok(guard),
        }
    }
}

/// Interpreted, unevaluated expression
///
/// Shared as `Arc<DeferredValue>`. Cloning yields an independent instance
/// with its own lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "DeferredKind", into = "DeferredKind")]
pub struct DeferredValue {
    kind: DeferredKind,
    lock: ResolutionLock,
}

impl From<DeferredKind> for DeferredValue {
    fn from(kind: DeferredKind) -> Self {
        Self::new(kind)
    }
}

impl From<DeferredValue> for DeferredKind {
    fn from(value: DeferredValue) -> Self {
        value.kind
    }
}

impl DeferredValue {
    /// Wrap a build operation
    #[inline]
    #[must_use]
    pub fn new(kind: DeferredKind) -> Self {
        Self {
            kind,
            lock: ResolutionLock::default(),
        }
    }

    /// Deferred value backed by a host-supplied function
    ///
    /// The function is called once per resolution, inside the unit of work.
    /// Such values cannot be serialized.
    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolveResult<Resolved>> + Send + 'static,
    {
        Self::new(DeferredKind::Custom(CustomResolver {
            name: name.into(),
            factory: Arc::new(move |ctx| f(ctx).boxed()),
        }))
    }

    /// Build operation
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &DeferredKind {
        &self.kind
    }

    /// Fresh unit of work for one resolution
    #[must_use]
    pub fn new_task(&self, ctx: &TaskContext) -> Task {
        Task::new(self.to_string(), ctx.clone(), self.kind.resolver().build(ctx.clone()))
    }

    /// Resolve against the ambient context, blocking the calling thread
    ///
    /// Must not be called from an execution-context worker thread; code
    /// running inside a unit of work uses [`DeferredValue::resolve_async`].
    /// Raising the calling thread's [`Interrupt`] aborts the wait.
    ///
    /// # Errors
    /// [`ResolveError::MissingContext`] when no context is ambient, an
    /// interruption, or whatever the unit of work failed with.
    pub fn resolve(&self) -> ResolveResult<Resolved> {
        self.block_on_resolution(None, &Interrupt::current())
    }

    /// Resolve against `ctx`, blocking the calling thread
    ///
    /// # Errors
    /// An interruption, or whatever the unit of work failed with.
    pub fn resolve_in(&self, ctx: &TaskContext) -> ResolveResult<Resolved> {
        self.block_on_resolution(Some(ctx), &Interrupt::current())
    }

    /// Resolve against `ctx`, blocking until done or `interrupt` is raised
    ///
    /// # Errors
    /// An interruption, or whatever the unit of work failed with.
    pub fn resolve_with(&self, ctx: &TaskContext, interrupt: &Interrupt) -> ResolveResult<Resolved> {
        self.block_on_resolution(Some(ctx), interrupt)
    }

    /// Resolve from inside a unit of work
    ///
    /// Same lock and submission as the blocking forms. Dropping the future
    /// cancels the submitted task and releases the lock.
    ///
    /// # Errors
    /// Whatever the unit of work failed with.
    pub async fn resolve_async(&self, ctx: &TaskContext) -> ResolveResult<Resolved> {
        let _guard = self.lock.acquire(self).await;
        ctx.executor().submit(self.new_task(ctx)).await
    }

    fn block_on_resolution(
        &self,
        ctx: Option<&TaskContext>,
        interrupt: &Interrupt,
    ) -> ResolveResult<Resolved> {
        futures::executor::block_on(async {
            let _guard = self.lock.acquire_interruptibly(self, interrupt).await?;
            let ctx = match ctx {
                Some(ctx) => ctx.clone(),
                None => TaskContext::current()
                    .ok_or_else(|| ResolveError::MissingContext(self.to_string()))?,
            };
            let handle = ctx.executor().submit(self.new_task(&ctx));
            handle.join_interruptibly(interrupt).await
        })
    }
}

/// Canonical expression text that rebuilds this value
impl fmt::Display for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.kind.resolver(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_context_on_bare_thread() {
        let value = DeferredValue::from_fn("answer", |_ctx| async { Ok(Resolved::Value(json!(42))) });
        let err = std::thread::spawn(move || value.resolve()).join().unwrap().unwrap_err();
        assert!(matches!(err, ResolveError::MissingContext(_)));
    }

    #[test]
    fn interrupted_before_lock_does_no_work() {
        let value = DeferredValue::from_fn("answer", |_ctx| async { Ok(Resolved::Value(json!(42))) });
        let interrupt = Interrupt::current();
        interrupt.interrupt();
        let err = value.resolve().unwrap_err();
        interrupt.clear();
        assert!(matches!(
            err,
            ResolveError::Interrupted {
                phase: WaitPhase::Lock
            }
        ));
    }

    #[test]
    fn custom_values_do_not_serialize() {
        let value = DeferredValue::from_fn("answer", |_ctx| async { Ok(Resolved::Value(json!(42))) });
        assert!(serde_json::to_string(&value).is_err());
        assert_eq!(value.to_string(), "answer()");
    }
}
