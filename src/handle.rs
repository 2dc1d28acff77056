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

//! Operation handles and completion callbacks.
//!
//! An [`OperationHandle<S>`] is handed back by the dispatcher at submission
//! time and resolves exactly once to the operation's outcome. Callers can
//! `wait()` on it (repeatedly, the outcome is stable), `poll()` it, or
//! request best-effort cancellation. A [`CompletionHandler<S>`] attached at
//! submission time is invoked exactly once, on the worker, after the
//! terminal state is stored and before waiters are woken.

use crate::error::OperationError;
use log::{debug, error};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;

/// Non-blocking snapshot of a handle's state, as returned by
/// [`OperationHandle::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus<S> {
    Pending,
    Completed(S),
    Failed(OperationError),
}

impl<S> OperationStatus<S> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Two-branch completion callback: exactly one branch runs, exactly once,
/// after the operation reaches a terminal state. Cancellation is routed to
/// the failure branch with [`OperationError::Cancelled`].
pub struct CompletionHandler<S> {
    on_success: Box<dyn FnOnce(&S) + Send>,
    on_failure: Box<dyn FnOnce(&OperationError) + Send>,
}

impl<S> CompletionHandler<S> {
    pub fn new(
        on_success: impl FnOnce(&S) + Send + 'static,
        on_failure: impl FnOnce(&OperationError) + Send + 'static,
    ) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_failure: Box::new(on_failure),
        }
    }

    fn dispatch(self, outcome: &Result<S, OperationError>) {
        match outcome {
            Ok(response) => (self.on_success)(response),
            Err(err) => (self.on_failure)(err),
        }
    }
}

struct Shared<S> {
    operation: &'static str,
    outcome: OnceLock<Result<S, OperationError>>,
    notify: Notify,
    cancel_requested: Arc<AtomicBool>,
    handler: Mutex<Option<CompletionHandler<S>>>,
}

/// Handle to one submitted operation.
///
/// Cheap to clone; all clones observe the same underlying cell. The terminal
/// transition happens exactly once, performed by the worker pool.
pub struct OperationHandle<S> {
    shared: Arc<Shared<S>>,
}

impl<S> Clone for OperationHandle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> OperationHandle<S> {
    pub(crate) fn new(operation: &'static str) -> Self {
        Self {
            shared: Arc::new(Shared {
                operation,
                outcome: OnceLock::new(),
                notify: Notify::new(),
                cancel_requested: Arc::new(AtomicBool::new(false)),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Wire name of the operation this handle tracks.
    pub fn operation(&self) -> &'static str {
        self.shared.operation
    }

    pub fn is_terminal(&self) -> bool {
        self.shared.outcome.get().is_some()
    }

    /// Whether cancellation has been requested (terminal or not).
    pub fn cancel_requested(&self) -> bool {
        self.shared.cancel_requested.load(Ordering::Acquire)
    }

    /// Request cancellation. Returns `false` if the operation already reached
    /// a terminal state. Best-effort: only guaranteed to take effect if a
    /// worker has not yet dequeued the unit; an in-flight unit runs to
    /// completion regardless.
    pub fn request_cancellation(&self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.shared.cancel_requested.store(true, Ordering::Release);
        debug!("cancellation requested for {}", self.shared.operation);
        true
    }

    /// Shared cancellation flag, checked by the worker before dequeue-run.
    pub(crate) fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.cancel_requested)
    }

    /// Attach the completion handler. Must happen before the unit becomes
    /// eligible for execution; the submitter guarantees this by attaching
    /// prior to enqueue.
    pub(crate) fn attach_handler(&self, handler: CompletionHandler<S>) {
        let mut slot = self
            .shared
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(handler);
    }

    /// Store the terminal outcome, run the completion handler, then wake
    /// waiters. The handler runs strictly after the terminal store and
    /// strictly before `notify_waiters`, so a task returning from [`wait`]
    /// observes the callback as already run (or running).
    ///
    /// Idempotent: a second completion attempt is ignored.
    ///
    /// [`wait`]: OperationHandle::wait
    pub(crate) fn complete(&self, outcome: Result<S, OperationError>) {
        if self.shared.outcome.set(outcome).is_err() {
            debug!(
                "duplicate completion ignored for {}",
                self.shared.operation
            );
            return;
        }
        let handler = self
            .shared
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handler) = handler {
            // The outcome was just stored and never unset.
            if let Some(outcome) = self.shared.outcome.get() {
                if catch_unwind(AssertUnwindSafe(|| handler.dispatch(outcome))).is_err() {
                    error!(
                        "completion handler for {} panicked; outcome unaffected",
                        self.shared.operation
                    );
                }
            }
        }
        self.shared.notify.notify_waiters();
    }
}

impl<S: Clone> OperationHandle<S> {
    /// Wait for the terminal outcome. Safe to call repeatedly and from
    /// multiple tasks; every call returns the same outcome.
    pub async fn wait(&self) -> Result<S, OperationError> {
        loop {
            // Register interest before checking, so a completion that lands
            // between the check and the await still wakes us.
            let notified = self.shared.notify.notified();
            if let Some(outcome) = self.shared.outcome.get() {
                return outcome.clone();
            }
            notified.await;
        }
    }

    /// Wait up to `limit` for the terminal outcome. `None` means the handle
    /// is still pending when the limit elapsed; its state is untouched and
    /// the underlying unit keeps running. Callers needing a hard deadline
    /// should pair this with [`request_cancellation`].
    ///
    /// [`request_cancellation`]: OperationHandle::request_cancellation
    pub async fn wait_timeout(&self, limit: Duration) -> Option<Result<S, OperationError>> {
        tokio::time::timeout(limit, self.wait()).await.ok()
    }

    /// Non-blocking state snapshot.
    pub fn poll(&self) -> OperationStatus<S> {
        match self.shared.outcome.get() {
            None => OperationStatus::Pending,
            Some(Ok(response)) => OperationStatus::Completed(response.clone()),
            Some(Err(err)) => OperationStatus::Failed(err.clone()),
        }
    }
}
