//! Resolution context
//!
//! A [`TaskContext`] is the explicit (entity, executor) pair a unit of work
//! runs with. It is captured when the task is built and installed as a
//! task-local while the task body runs. Threads outside the executor can
//! enter a context with [`TaskContext::enter`].

use super::{ExecutionContext, Task, TaskHandle};
use crate::entity::{EntityGraph, EntityId};
use crate::error::{ResolveError, ResolveResult};
use crate::settings::ResolverConfig;
use crate::value::Resolved;
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

tokio::task_local! {
    static CURRENT: TaskContext;
}

thread_local! {
    static ENTERED: RefCell<Vec<TaskContext>> = const { RefCell::new(Vec::new()) };
}

/// Entity, graph and executor a resolution runs against
#[derive(Debug, Clone)]
pub struct TaskContext {
    entity: Option<EntityId>,
    graph: Arc<dyn EntityGraph>,
    executor: Arc<dyn ExecutionContext>,
    config: Arc<ResolverConfig>,
}

impl TaskContext {
    /// Context with no entity and default config
    #[must_use]
    pub fn new(graph: Arc<dyn EntityGraph>, executor: Arc<dyn ExecutionContext>) -> Self {
        Self {
            entity: None,
            graph,
            executor,
            config: Arc::new(ResolverConfig::default()),
        }
    }

    /// Same context, bound to another entity
    #[inline]
    #[must_use]
    pub fn with_entity(&self, entity: EntityId) -> Self {
        Self {
            entity: Some(entity),
            ..self.clone()
        }
    }

    /// Set resolver config
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: Arc<ResolverConfig>) -> Self {
        self.config = config;
        self
    }

    /// Context entity, if bound
    #[inline]
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Context entity, failing when unbound
    ///
    /// # Errors
    /// [`ResolveError::MissingContext`] when no entity is bound.
    pub fn require_entity(&self, what: &dyn std::fmt::Display) -> ResolveResult<EntityId> {
        self.entity
            .ok_or_else(|| ResolveError::MissingContext(format!("{what} (no context entity)")))
    }

    /// Entity graph
    #[inline]
    #[must_use]
    pub fn graph(&self) -> &Arc<dyn EntityGraph> {
        &self.graph
    }

    /// Executor tasks are submitted to
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn ExecutionContext> {
        &self.executor
    }

    /// Resolver config
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Build a task bound to this context and submit it
    pub fn submit<F>(&self, name: impl Into<String>, body: F) -> TaskHandle
    where
        F: Future<Output = ResolveResult<Resolved>> + Send + 'static,
    {
        self.executor.submit(Task::new(name, self.clone(), body))
    }

    /// Ambient context: the running task's, else the one entered on this thread
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT
            .try_with(Clone::clone)
            .ok()
            .or_else(|| ENTERED.with(|stack| stack.borrow().last().cloned()))
    }

    /// Make this the ambient context of the calling thread until the guard drops
    #[must_use = "the context is left as soon as the guard is dropped"]
    pub fn enter(&self) -> ContextGuard {
        ENTERED.with(|stack| stack.borrow_mut().push(self.clone()));
        ContextGuard {
            _not_send: PhantomData,
        }
    }

    /// Run `future` with this as the task-local context
    pub(crate) fn scope<F: Future>(self, future: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(self, future)
    }
}

/// Leaves an entered context on drop
#[derive(Debug)]
pub struct ContextGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        ENTERED.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
