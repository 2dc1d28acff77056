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

//! Bounded worker pool executing type-erased units of work.
//!
//! Each worker is a tokio task with its own bounded FIFO queue and runs one
//! unit at a time, so pool-wide concurrency equals the worker count. Routing
//! uses least-loaded selection, with optional routing-key affinity: units
//! sharing a key land on the same worker (and therefore execute in
//! submission order) while the affinity entry is live.

use crate::error::{OperationError, SubmitError};
use dashmap::DashMap;
use futures::future::BoxFuture;
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// How the pool winds down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting submissions; queued and in-flight units finish.
    Graceful,
    /// Stop accepting submissions; queued units are failed as cancelled and
    /// in-flight units are abandoned at their next await point, their
    /// handles resolved as cancelled.
    Forced,
}

pub(crate) type RunFn = Box<dyn FnOnce() -> BoxFuture<'static, bool> + Send>;
pub(crate) type AbortFn = Box<dyn FnOnce(OperationError) + Send>;

/// One type-erased unit of work. `run` executes the unit and resolves its
/// handle, returning whether it resolved to a failure; `abort` resolves the
/// handle without running the unit. Exactly one of the two is ever invoked.
pub(crate) struct Submission {
    cancelled: Arc<AtomicBool>,
    run: RunFn,
    abort: AbortFn,
}

impl Submission {
    pub(crate) fn new(cancelled: Arc<AtomicBool>, run: RunFn, abort: AbortFn) -> Self {
        Self {
            cancelled,
            run,
            abort,
        }
    }

    fn cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn abort(self, err: OperationError) {
        (self.abort)(err);
    }
}

enum Job {
    Run(Submission),
    /// Queue drain marker; the worker exits when it reaches one.
    Drain,
}

/// Forced-shutdown signal shared by all workers.
struct ForceStop {
    engaged: AtomicBool,
    notify: Notify,
}

#[derive(Clone)]
struct WorkerHandle {
    id: usize,
    tx: mpsc::Sender<Job>,
    inflight: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

/// Point-in-time counters for one worker.
#[derive(Debug, Serialize)]
pub struct WorkerMetrics {
    pub worker_id: usize,
    pub inflight: usize,
    pub queue_len: usize,
    pub capacity: usize,
    pub errors: usize,
    pub cancelled: usize,
}

impl WorkerHandle {
    fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Relaxed)
    }

    fn metrics(&self) -> WorkerMetrics {
        WorkerMetrics {
            worker_id: self.id,
            inflight: self.inflight(),
            queue_len: self.tx.max_capacity() - self.tx.capacity(),
            capacity: self.tx.max_capacity(),
            errors: self.errors.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Worker pool with least-loaded selection and routing-key affinity.
pub(crate) struct WorkerPool {
    workers: Vec<WorkerHandle>,
    affinity: DashMap<String, (usize, Instant)>,
    affinity_ttl: Duration,
    accepting: AtomicBool,
    force: Arc<ForceStop>,
    drain: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(
        worker_count: usize,
        queue_capacity: usize,
        affinity_ttl: Duration,
    ) -> Arc<Self> {
        let force = Arc::new(ForceStop {
            engaged: AtomicBool::new(false),
            notify: Notify::new(),
        });
        let (workers, tasks) = spawn_workers(worker_count.max(1), queue_capacity, &force);
        info!(
            "worker pool started: {} workers, queue capacity {}",
            workers.len(),
            queue_capacity
        );
        Arc::new(Self {
            workers,
            affinity: DashMap::new(),
            affinity_ttl,
            accepting: AtomicBool::new(true),
            force,
            drain: Mutex::new(tasks),
        })
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn choose_least_loaded_worker(&self) -> usize {
        self.workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.inflight() + (w.tx.max_capacity() - w.tx.capacity()))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn choose_worker_idx(&self, routing_key: Option<&str>) -> usize {
        let now = Instant::now();
        self.affinity.retain(|_, v| v.1 > now);

        if let Some(key) = routing_key {
            if let Some(entry) = self.affinity.get(key) {
                if entry.value().1 > now {
                    debug!(
                        "routing key {} hits affinity for worker {}",
                        key,
                        entry.value().0
                    );
                    return entry.value().0;
                }
            }
        }

        let idx = self.choose_least_loaded_worker();
        debug!(
            "worker {} selected, current inflight {}",
            idx,
            self.workers[idx].inflight()
        );
        if let Some(key) = routing_key {
            self.affinity
                .insert(key.to_string(), (idx, now + self.affinity_ttl));
        }
        idx
    }

    /// Enqueue a unit. Constant time: `try_send`, never blocks. Fails fast if
    /// the pool no longer accepts work or the chosen queue is full.
    pub(crate) fn dispatch(
        &self,
        routing_key: Option<&str>,
        submission: Submission,
    ) -> Result<(), SubmitError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SubmitError::ShutDown);
        }
        let idx = self.choose_worker_idx(routing_key);
        let worker = &self.workers[idx];

        match worker.tx.try_send(Job::Run(submission)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                worker.errors.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::Saturated)
            }
            Err(TrySendError::Closed(_)) => Err(SubmitError::ShutDown),
        }
    }

    /// Wind down the pool. New submissions are rejected immediately; see
    /// [`ShutdownMode`] for what happens to queued and in-flight units.
    /// Idempotent; a second call just waits for the drain to finish.
    pub(crate) async fn shutdown(&self, mode: ShutdownMode) {
        self.accepting.store(false, Ordering::Release);
        if mode == ShutdownMode::Forced {
            self.force.engaged.store(true, Ordering::Release);
            self.force.notify.notify_waiters();
        }

        for worker in &self.workers {
            if worker.tx.send(Job::Drain).await.is_err() {
                debug!("worker {} queue already closed", worker.id);
            }
        }

        let tasks = {
            let mut guard = self.drain.lock().await;
            std::mem::take(&mut *guard)
        };
        for task in tasks {
            if task.await.is_err() {
                error!("worker task panicked during shutdown");
            }
        }
        info!("worker pool shut down ({:?})", mode);
    }

    pub(crate) fn worker_metrics(&self) -> Vec<WorkerMetrics> {
        self.workers.iter().map(|w| w.metrics()).collect()
    }
}

/// Spawn `count` workers, each a tokio task draining its own bounded queue,
/// one unit at a time.
fn spawn_workers(
    count: usize,
    queue_capacity: usize,
    force: &Arc<ForceStop>,
) -> (Vec<WorkerHandle>, Vec<JoinHandle<()>>) {
    let mut workers = Vec::with_capacity(count);
    let mut tasks = Vec::with_capacity(count);

    for id in 0..count {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity);
        let inflight = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));

        let worker_inflight = Arc::clone(&inflight);
        let worker_errors = Arc::clone(&errors);
        let worker_cancelled = Arc::clone(&cancelled);
        let force = Arc::clone(force);

        tasks.push(tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let submission = match job {
                    Job::Drain => break,
                    Job::Run(submission) => submission,
                };

                // Register for the forced-stop signal before checking the
                // flag, so a shutdown landing in between is not lost.
                let force_interrupt = force.notify.notified();
                if force.engaged.load(Ordering::Acquire) || submission.cancel_requested() {
                    submission.abort(OperationError::Cancelled);
                    worker_cancelled.fetch_add(1, Ordering::Relaxed);
                    debug!("worker {} skipped a cancelled unit", id);
                    continue;
                }

                worker_inflight.fetch_add(1, Ordering::Relaxed);
                let Submission { run, abort, .. } = submission;
                tokio::select! {
                    errored = run() => {
                        if errored {
                            worker_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    _ = force_interrupt => {
                        abort(OperationError::Cancelled);
                        worker_cancelled.fetch_add(1, Ordering::Relaxed);
                        debug!("worker {} abandoned an in-flight unit on forced shutdown", id);
                    }
                }
                worker_inflight.fetch_sub(1, Ordering::Relaxed);
            }
            // A dispatch that passed the accepting check concurrently with
            // shutdown can land a unit behind the drain marker. Close the
            // queue so no further sends succeed, then abort everything still
            // buffered; otherwise those handles would never resolve.
            rx.close();
            while let Ok(job) = rx.try_recv() {
                if let Job::Run(submission) = job {
                    submission.abort(OperationError::Cancelled);
                    worker_cancelled.fetch_add(1, Ordering::Relaxed);
                    debug!("worker {} aborted a unit enqueued behind the drain marker", id);
                }
            }
            debug!("worker {} drained and exited", id);
        }));

        workers.push(WorkerHandle {
            id,
            tx,
            inflight,
            errors,
            cancelled,
        });
    }

    (workers, tasks)
}
