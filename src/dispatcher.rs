// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The task submitter.
//!
//! [`Dispatcher::submit`] takes an operation name, a request and an executor
//! closure (the blocking remote call), enqueues a unit of work on the pool
//! and returns an [`OperationHandle`] immediately. The
//! [`submit_with_handler`](Dispatcher::submit_with_handler) overload attaches
//! a [`CompletionHandler`] to the same handle before the unit becomes
//! eligible for execution, so the callback can never be missed by an early
//! completion.

use crate::constants::{
    DEFAULT_AFFINITY_TTL_SECS, DEFAULT_WORKER_COUNT, MAX_WORKER_QUEUE_CAPACITY,
};
use crate::error::{OperationError, SubmitError};
use crate::handle::{CompletionHandler, OperationHandle};
use crate::worker_pool::{ShutdownMode, Submission, WorkerMetrics, WorkerPool};
use futures::FutureExt;
use log::{debug, error};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Pool sizing and routing knobs. The defaults suit a client making
/// occasional blocking remote calls; latency-sensitive deployments should
/// size `workers` to their target concurrency.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers; pool-wide concurrency bound.
    pub workers: usize,
    /// Bounded capacity of each worker's queue.
    pub queue_capacity: usize,
    /// Time-to-live for routing-key affinity entries.
    pub affinity_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            queue_capacity: MAX_WORKER_QUEUE_CAPACITY,
            affinity_ttl: Duration::from_secs(DEFAULT_AFFINITY_TTL_SECS),
        }
    }
}

/// Accepts units of work and hands back operation handles.
///
/// Submission is constant-time and never runs the executor on the submitting
/// task: the unit is enqueued and some worker later runs it to completion,
/// resolves the handle, and fires the attached callback (if any).
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            pool: WorkerPool::new(config.workers, config.queue_capacity, config.affinity_ttl),
        }
    }

    /// Submit one operation. Returns a pending [`OperationHandle`]
    /// immediately; the executor runs later on a worker.
    ///
    /// `operation` is the wire name, used for logging. `routing_key` opts
    /// into worker affinity: submissions sharing a live key execute in
    /// submission order.
    pub fn submit<R, S, F, Fut>(
        &self,
        operation: &'static str,
        routing_key: Option<&str>,
        request: R,
        executor: F,
    ) -> Result<OperationHandle<S>, SubmitError>
    where
        R: Send + 'static,
        S: Send + Sync + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, OperationError>> + Send + 'static,
    {
        self.submit_inner(operation, routing_key, request, executor, None)
    }

    /// Like [`submit`](Dispatcher::submit), with a completion handler that is
    /// invoked exactly once on a worker after the operation reaches its
    /// terminal state. Cancellation reaches the failure branch as
    /// [`OperationError::Cancelled`].
    pub fn submit_with_handler<R, S, F, Fut>(
        &self,
        operation: &'static str,
        routing_key: Option<&str>,
        request: R,
        executor: F,
        handler: CompletionHandler<S>,
    ) -> Result<OperationHandle<S>, SubmitError>
    where
        R: Send + 'static,
        S: Send + Sync + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, OperationError>> + Send + 'static,
    {
        self.submit_inner(operation, routing_key, request, executor, Some(handler))
    }

    fn submit_inner<R, S, F, Fut>(
        &self,
        operation: &'static str,
        routing_key: Option<&str>,
        request: R,
        executor: F,
        handler: Option<CompletionHandler<S>>,
    ) -> Result<OperationHandle<S>, SubmitError>
    where
        R: Send + 'static,
        S: Send + Sync + 'static,
        F: FnOnce(R) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, OperationError>> + Send + 'static,
    {
        let handle = OperationHandle::new(operation);
        if let Some(handler) = handler {
            // Attached before enqueue: the unit cannot complete first.
            handle.attach_handler(handler);
        }

        let run_handle = handle.clone();
        let run = Box::new(move || {
            async move {
                let outcome = match AssertUnwindSafe(executor(request)).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => Err(OperationError::Internal {
                        message: panic_message(panic),
                    }),
                };
                let errored = outcome.is_err();
                if let Err(err) = &outcome {
                    error!("operation {} failed ({}): {}", operation, err.tag(), err);
                }
                run_handle.complete(outcome);
                errored
            }
            .boxed()
        });

        let abort_handle = handle.clone();
        let abort = Box::new(move |err: OperationError| abort_handle.complete(Err(err)));

        self.pool
            .dispatch(routing_key, Submission::new(handle.cancel_token(), run, abort))?;
        debug!("submitted {}", operation);
        Ok(handle)
    }

    /// Wind down the pool; see [`ShutdownMode`]. Subsequent submissions fail
    /// fast with [`SubmitError::ShutDown`].
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.pool.shutdown(mode).await;
    }

    /// Pool-wide concurrency bound.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Point-in-time counters for every worker.
    pub fn worker_metrics(&self) -> Vec<WorkerMetrics> {
        self.pool.worker_metrics()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::OperationStatus;

    fn small() -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            workers: 2,
            queue_capacity: 8,
            affinity_ttl: Duration::from_secs(1),
        })
    }

    #[tokio::test]
    async fn submit_returns_pending_handle_immediately() {
        let dispatcher = small();
        let handle = dispatcher
            .submit("SlowOp", None, (), |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, OperationError>("done".to_string())
            })
            .unwrap();
        assert_eq!(handle.poll(), OperationStatus::Pending);
        assert_eq!(handle.wait().await, Ok("done".to_string()));
    }

    #[tokio::test]
    async fn executor_panic_surfaces_as_internal_fault() {
        let dispatcher = small();
        let handle = dispatcher
            .submit("BuggyOp", None, (), |_| async {
                if true {
                    panic!("executor bug");
                }
                Ok::<(), OperationError>(())
            })
            .unwrap();
        match handle.wait().await {
            Err(OperationError::Internal { message }) => assert_eq!(message, "executor bug"),
            other => panic!("expected internal fault, got {:?}", other.map(|_| ())),
        }

        // The worker that absorbed the panic still serves new units.
        let handle = dispatcher
            .submit("HealthyOp", None, 21u32, |n| async move {
                Ok::<_, OperationError>(n * 2)
            })
            .unwrap();
        assert_eq!(handle.wait().await, Ok(42));
    }
}
