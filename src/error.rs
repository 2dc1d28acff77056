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

use thiserror::Error;

/// Why a submitted operation did not produce a response.
///
/// Every failure an operation can experience after submission is funneled
/// through this type, via [`OperationHandle`](crate::handle::OperationHandle)
/// and the failure branch of any attached
/// [`CompletionHandler`](crate::handle::CompletionHandler). Failures detected
/// *before* submission are [`SubmitError`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Connectivity problem talking to the remote endpoint; the request may
    /// never have reached it. Safe for the caller to retry per its own policy.
    #[error("transport failure: {message}")]
    Transport { message: String },

    /// The endpoint processed the request and reported an application-level
    /// fault. `code` and `message` are the service's own, passed through
    /// verbatim.
    #[error("service fault [{code}]: {message}")]
    ServiceFault { code: String, message: String },

    /// The unit of work never ran: cancellation was requested before a worker
    /// dequeued it, or the pool was shut down with it still queued.
    #[error("operation cancelled")]
    Cancelled,

    /// The executor itself misbehaved (panicked). A bug in the transport
    /// layer, not a remote failure.
    #[error("internal dispatch fault: {message}")]
    Internal { message: String },
}

impl OperationError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn service_fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceFault {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short classification tag, used in logs and worker metrics.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::ServiceFault { .. } => "service_fault",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Fail-fast submission errors, surfaced synchronously from `submit` before
/// any handle exists. Never delivered through a handle or callback.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request failed local validation; nothing was enqueued.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The dispatcher has been shut down and accepts no new work.
    #[error("dispatcher is shut down")]
    ShutDown,

    /// The selected worker's queue is full. Submission is constant-time and
    /// never blocks on a full queue; back off and resubmit.
    #[error("worker queue is full")]
    Saturated,
}
