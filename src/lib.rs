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

//! # Async Operation Dispatcher
//!
//! An asynchronous **client-side operation dispatcher** built on top of [`tokio`].
//!
//! This crate is the dispatch core under a generated SDK client: every remote
//! operation is submitted as a unit of work, executed on a bounded worker
//! pool, and observed through a future-style handle with an optional
//! exactly-once completion callback. It provides:
//!
//! - **Constant-time submission** returning a pending [`handle::OperationHandle`]
//! - **Bounded worker pool** (one unit per worker at a time) with
//!   **least-loaded selection** and **routing-key affinity** with TTL
//! - **Exactly-once completion callbacks** on a worker, never on the
//!   submitting task
//! - **Best-effort cancellation** and graceful/forced shutdown
//! - **Worker-level metrics** (in-flight units, queue usage, errors,
//!   cancellations)
//!
//! ## Core Concepts
//!
//! - [`dispatcher::Dispatcher`] accepts a request plus an executor closure
//!   (the blocking remote call) and enqueues it; `submit_with_handler`
//!   additionally attaches a [`handle::CompletionHandler`] before the unit
//!   becomes runnable.
//! - [`handle::OperationHandle`] resolves exactly once to a response or an
//!   [`error::OperationError`]; supports `wait`, `wait_timeout`, `poll`, and
//!   `request_cancellation`.
//! - [`service_client!`] generates typed per-operation wrappers (one
//!   future-returning method and one callback overload each) from a table.
//!
//! ## Example
//!
//! ```rust,no_run
//! use async_operation_dispatcher::dispatcher::{Dispatcher, DispatcherConfig};
//! use async_operation_dispatcher::error::OperationError;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let dispatcher = Dispatcher::new(DispatcherConfig::default());
//!
//!     // Submit a unit of work; get a handle back immediately.
//!     let handle = dispatcher.submit("Echo", None, "hello".to_string(), |req| async move {
//!         Ok::<_, OperationError>(format!("echo: {}", req))
//!     })?;
//!
//!     // Block only when the caller chooses to.
//!     let response = handle.wait().await?;
//!     println!("Response: {}", response);
//!     Ok(())
//! }
//! ```
//!
//! ## When to Use
//!
//! - Building **SDK-style async clients** whose operations all share one
//!   submit/execute/complete shape
//! - Adding **bounded concurrency**, **per-key ordering**, and **fail-fast
//!   backpressure** on top of raw [`tokio::spawn`]
//! - Collecting per-worker **metrics** for observability
//!
//! ## Limitations
//!
//! - Cancellation is cooperative: once a worker has begun a unit, it runs to
//!   completion (forced shutdown is the only interruption).
//! - No internal retry or backoff; transport failures are surfaced for the
//!   caller's own policy.
//!
//! ## License
//!
//! Licensed under [Apache 2.0](https://www.apache.org/licenses/LICENSE-2.0).
mod constants;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod worker_pool;
