//! Units of work and the executor contract
//!
//! Provides:
//! - [`Task`]: a named, boxed resolution body with its captured context
//! - [`ExecutionContext`]: where tasks are submitted
//! - [`TaskHandle`]: awaitable, cancellable handle to a submitted task
//! - [`Interrupt`]: per-thread flag that makes blocking waits interruptible

mod context;
mod interrupt;
mod runtime;

pub use context::{ContextGuard, TaskContext};
pub use interrupt::Interrupt;
pub use runtime::{ExecutionRuntime, ExecutorStats, StatsSnapshot, TokioExecutionContext};

use crate::error::{ResolveError, ResolveResult, WaitPhase};
use crate::value::Resolved;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};

/// Boxed body of a unit of work
pub type TaskFuture = BoxFuture<'static, ResolveResult<Resolved>>;

/// Unit of work, built fresh for every resolution
pub struct Task {
    name: String,
    context: TaskContext,
    body: TaskFuture,
}

impl Task {
    /// Create task
    pub fn new<F>(name: impl Into<String>, context: TaskContext, body: F) -> Self
    where
        F: Future<Output = ResolveResult<Resolved>> + Send + 'static,
    {
        Self {
            name: name.into(),
            context,
            body: body.boxed(),
        }
    }

    /// Task name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context the task runs with
    #[inline]
    #[must_use]
    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    /// Split into name, context and body
    #[must_use]
    pub fn into_parts(self) -> (String, TaskContext, TaskFuture) {
        (self.name, self.context, self.body)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("entity", &self.context.entity())
            .finish_non_exhaustive()
    }
}

/// Scheduler tasks are submitted to
///
/// Implementations own their worker threads. Blocking resolution must not
/// be started from one of those threads.
pub trait ExecutionContext: Send + Sync + fmt::Debug {
    /// Start running a task, returning a handle to its outcome
    fn submit(&self, task: Task) -> TaskHandle;
}

/// Handle to a submitted task
///
/// Awaiting the handle yields the task's outcome. Dropping a handle whose
/// task has not finished aborts the task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    join: JoinHandle<ResolveResult<Resolved>>,
    stats: Option<Arc<ExecutorStats>>,
}

impl TaskHandle {
    /// Wrap a spawned tokio task
    #[must_use]
    pub fn new(name: impl Into<String>, join: JoinHandle<ResolveResult<Resolved>>) -> Self {
        Self {
            name: name.into(),
            join,
            stats: None,
        }
    }

    pub(crate) fn observed_by(mut self, stats: Arc<ExecutorStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Task name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the task has finished
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request cancellation; best effort
    pub fn cancel(&self) {
        self.join.abort();
    }

    /// Wait for the outcome, cancelling the task if `interrupt` is raised
    ///
    /// # Errors
    /// The task's own failure, or [`ResolveError::Interrupted`] with
    /// [`WaitPhase::Task`].
    pub async fn join_interruptibly(mut self, interrupt: &Interrupt) -> ResolveResult<Resolved> {
        tokio::select! {
            biased;
            () = interrupt.interrupted() => {
                tracing::debug!(task = %self.name, "Interrupted while waiting for task, cancelling");
                self.cancel();
                Err(ResolveError::Interrupted { phase: WaitPhase::Task })
            }
            result = &mut self => result,
        }
    }

    fn map_join_error(&self, err: JoinError) -> ResolveError {
        if err.is_cancelled() {
            if let Some(stats) = &self.stats {
                stats.record_cancelled();
            }
            return ResolveError::TaskCancelled(self.name.clone());
        }
        let message = match err.try_into_panic() {
            Ok(payload) => panic_message(payload.as_ref()),
            Err(err) => err.to_string(),
        };
        if let Some(stats) = &self.stats {
            stats.record_failed();
        }
        tracing::error!(task = %self.name, %message, "Task panicked");
        ResolveError::TaskFailed {
            name: self.name.clone(),
            message,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

impl Future for TaskHandle {
    type Output = ResolveResult<Resolved>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.join).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(err)) => Poll::Ready(Err(self.map_join_error(err))),
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if !self.join.is_finished() {
            self.join.abort();
        }
    }
}
