//! Tokio-backed execution context
//!
//! [`TokioExecutionContext`] spawns tasks on a runtime handle and keeps
//! submission counters. [`ExecutionRuntime`] owns a multi-threaded runtime
//! for hosts that do not bring their own.

use super::{ExecutionContext, Task, TaskContext, TaskHandle};
use crate::entity::EntityGraph;
use crate::settings::ResolverConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};

/// Executor counters
#[derive(Debug, Default)]
pub struct ExecutorStats {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of [`ExecutorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Tasks submitted
    pub submitted: u64,
    /// Tasks that returned `Ok`
    pub completed: u64,
    /// Tasks that returned `Err` or panicked
    pub failed: u64,
    /// Tasks aborted before finishing
    pub cancelled: u64,
}

impl ExecutorStats {
    /// Copy the current counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }
}

/// Execution context spawning onto a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioExecutionContext {
    handle: Handle,
    stats: Arc<ExecutorStats>,
}

impl TokioExecutionContext {
    /// Spawn onto the given runtime
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            stats: Arc::new(ExecutorStats::default()),
        }
    }

    /// Spawn onto the runtime the caller is running in, if any
    #[must_use]
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Submission counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl ExecutionContext for TokioExecutionContext {
    fn submit(&self, task: Task) -> TaskHandle {
        let (name, context, body) = task.into_parts();
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(task = %name, entity = ?context.entity(), "Submitting task");

        let stats = Arc::clone(&self.stats);
        let task_name = name.clone();
        let join = self.handle.spawn(context.scope(async move {
            let result = body.await;
            match &result {
                Ok(_) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(task = %task_name, "Task completed");
                }
                Err(err) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(task = %task_name, error = %err, "Task failed");
                }
            }
            result
        }));
        TaskHandle::new(name, join).observed_by(Arc::clone(&self.stats))
    }
}

/// Owned multi-threaded runtime plus its execution context
#[derive(Debug)]
pub struct ExecutionRuntime {
    runtime: Runtime,
    executor: Arc<TokioExecutionContext>,
    config: Arc<ResolverConfig>,
}

impl ExecutionRuntime {
    /// Start a runtime sized by `config.worker_threads`
    ///
    /// # Errors
    /// The runtime could not be built.
    pub fn new(config: ResolverConfig) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("topo-worker")
            .enable_all()
            .build()?;
        let executor = Arc::new(TokioExecutionContext::new(runtime.handle().clone()));
        tracing::info!(workers = config.worker_threads, "Execution runtime started");
        Ok(Self {
            runtime,
            executor,
            config: Arc::new(config),
        })
    }

    /// Execution context for submitting tasks
    #[inline]
    #[must_use]
    pub fn executor(&self) -> Arc<TokioExecutionContext> {
        Arc::clone(&self.executor)
    }

    /// Runtime handle
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Resolver config the runtime was started with
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Arc<ResolverConfig> {
        &self.config
    }

    /// Context over `graph` using this runtime's executor and config
    #[must_use]
    pub fn context(&self, graph: Arc<dyn EntityGraph>) -> TaskContext {
        TaskContext::new(graph, self.executor.clone()).with_config(Arc::clone(&self.config))
    }

    /// Submission counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.executor.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityDefinition, Topology, TypeDescriptor};
    use crate::error::ResolveError;
    use crate::task::Interrupt;
    use crate::value::Resolved;
    use serde_json::json;
    use std::time::Duration;

    fn runtime() -> (ExecutionRuntime, TaskContext) {
        let runtime = ExecutionRuntime::new(ResolverConfig::default().with_worker_threads(2)).unwrap();
        let topology = Arc::new(Topology::new());
        let app = topology.create_application(EntityDefinition::new(Arc::new(
            TypeDescriptor::entity("org.example.App"),
        )));
        let ctx = runtime.context(topology).with_entity(app);
        (runtime, ctx)
    }

    #[test]
    fn submitted_task_sees_its_context() {
        let (runtime, ctx) = runtime();
        let expected = ctx.entity().map(|e| e.to_string());
        let handle = ctx.submit("probe", async {
            let current = TaskContext::current().and_then(|c| c.entity());
            Ok(Resolved::Value(json!(current.map(|e| e.to_string()))))
        });
        let result = futures::executor::block_on(handle).unwrap();
        assert_eq!(result, Resolved::Value(json!(expected)));
        assert_eq!(runtime.stats().submitted, 1);
    }

    #[test]
    fn failures_are_counted() {
        let (runtime, ctx) = runtime();
        let handle = ctx.submit("boom", async {
            Err::<Resolved, _>(ResolveError::UnknownFunction("boom".into()))
        });
        let err = futures::executor::block_on(handle).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownFunction(_)));
        assert_eq!(runtime.stats().failed, 1);
    }

    #[test]
    fn panics_become_task_failed() {
        let (_runtime, ctx) = runtime();
        let explode = true;
        let handle = ctx.submit("panics", async move {
            if explode {
                panic!("exploded");
            }
            Ok(Resolved::Value(json!(null)))
        });
        let err = futures::executor::block_on(handle).unwrap_err();
        match err {
            ResolveError::TaskFailed { name, message } => {
                assert_eq!(name, "panics");
                assert_eq!(message, "exploded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn interrupt_cancels_running_task() {
        let (runtime, ctx) = runtime();
        let handle = ctx.submit("sleeper", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Resolved::Value(json!(null)))
        });
        let interrupt = Interrupt::new();
        let remote = interrupt.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.interrupt();
        });
        let err = futures::executor::block_on(handle.join_interruptibly(&interrupt)).unwrap_err();
        assert!(err.is_interrupted());
        assert_eq!(runtime.stats().completed, 0);
    }

    #[test]
    fn entered_context_is_ambient_on_thread() {
        let (_runtime, ctx) = runtime();
        assert!(TaskContext::current().is_none());
        {
            let _guard = ctx.enter();
            assert_eq!(TaskContext::current().and_then(|c| c.entity()), ctx.entity());
        }
        assert!(TaskContext::current().is_none());
    }
}
