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

//! Typed client wrappers over the generic dispatcher.
//!
//! Generated SDKs of this shape repeat one future-returning method plus one
//! callback overload per remote operation, a hundred times over. Here that
//! surface is produced from a table: [`service_client!`] takes one row per
//! operation and emits a transport trait (the remote-call seam) and a client
//! struct whose per-operation methods validate the request synchronously and
//! delegate to [`Dispatcher::submit`] / [`submit_with_handler`].
//!
//! [`Dispatcher::submit`]: crate::dispatcher::Dispatcher::submit
//! [`submit_with_handler`]: crate::dispatcher::Dispatcher::submit_with_handler

use crate::error::OperationError;
use futures::future::BoxFuture;

/// What a transport returns for one remote call.
pub type TransportFuture<S> = BoxFuture<'static, Result<S, OperationError>>;

/// Request-side hooks consumed by generated client methods.
pub trait OperationRequest {
    /// Local validation, run synchronously before anything is enqueued.
    /// A failure surfaces as [`SubmitError::InvalidRequest`], never through
    /// the operation handle.
    ///
    /// [`SubmitError::InvalidRequest`]: crate::error::SubmitError::InvalidRequest
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    /// Routing key for worker affinity. Requests naming the same key execute
    /// in submission order while the affinity entry is live; `None` routes
    /// least-loaded.
    fn routing_key(&self) -> Option<&str> {
        None
    }
}

/// Generate a typed service client from an operation table.
///
/// One row per operation:
///
/// ```text
/// "WireName" => transport_fn, future_fn, handler_fn : RequestType => ResponseType;
/// ```
///
/// emits on the transport trait `fn transport_fn(&self, RequestType) ->
/// TransportFuture<ResponseType>`, and on the client the two uniform entry
/// points `future_fn(request)` and `handler_fn(request, completion_handler)`,
/// both returning `Result<OperationHandle<ResponseType>, SubmitError>`.
/// Request types must implement [`OperationRequest`].
#[macro_export]
macro_rules! service_client {
    (
        $(#[$client_meta:meta])*
        pub client $client:ident over trait $transport:ident {
            $(
                $(#[$op_meta:meta])*
                $wire:literal => $transport_fn:ident, $future_fn:ident, $handler_fn:ident :
                    $request:ty => $response:ty;
            )+
        }
    ) => {
        /// Remote call executor seam: one blocking remote call per operation.
        /// The dispatcher treats each call as opaque; scheduling and result
        /// propagation are its only concerns.
        pub trait $transport: Send + Sync + 'static {
            $(
                fn $transport_fn(
                    &self,
                    request: $request,
                ) -> $crate::client::TransportFuture<$response>;
            )+
        }

        $(#[$client_meta])*
        pub struct $client<T: $transport> {
            dispatcher: ::std::sync::Arc<$crate::dispatcher::Dispatcher>,
            transport: ::std::sync::Arc<T>,
        }

        impl<T: $transport> ::std::clone::Clone for $client<T> {
            fn clone(&self) -> Self {
                Self {
                    dispatcher: ::std::sync::Arc::clone(&self.dispatcher),
                    transport: ::std::sync::Arc::clone(&self.transport),
                }
            }
        }

        impl<T: $transport> $client<T> {
            pub fn new(
                dispatcher: ::std::sync::Arc<$crate::dispatcher::Dispatcher>,
                transport: ::std::sync::Arc<T>,
            ) -> Self {
                Self {
                    dispatcher,
                    transport,
                }
            }

            pub fn dispatcher(&self) -> &::std::sync::Arc<$crate::dispatcher::Dispatcher> {
                &self.dispatcher
            }

            $(
                $(#[$op_meta])*
                pub fn $future_fn(
                    &self,
                    request: $request,
                ) -> ::std::result::Result<
                    $crate::handle::OperationHandle<$response>,
                    $crate::error::SubmitError,
                > {
                    $crate::client::OperationRequest::validate(&request)
                        .map_err($crate::error::SubmitError::InvalidRequest)?;
                    let routing_key = $crate::client::OperationRequest::routing_key(&request)
                        .map(::std::string::String::from);
                    let transport = ::std::sync::Arc::clone(&self.transport);
                    self.dispatcher.submit(
                        $wire,
                        routing_key.as_deref(),
                        request,
                        move |request| transport.$transport_fn(request),
                    )
                }

                pub fn $handler_fn(
                    &self,
                    request: $request,
                    handler: $crate::handle::CompletionHandler<$response>,
                ) -> ::std::result::Result<
                    $crate::handle::OperationHandle<$response>,
                    $crate::error::SubmitError,
                > {
                    $crate::client::OperationRequest::validate(&request)
                        .map_err($crate::error::SubmitError::InvalidRequest)?;
                    let routing_key = $crate::client::OperationRequest::routing_key(&request)
                        .map(::std::string::String::from);
                    let transport = ::std::sync::Arc::clone(&self.transport);
                    self.dispatcher.submit_with_handler(
                        $wire,
                        routing_key.as_deref(),
                        request,
                        move |request| transport.$transport_fn(request),
                        handler,
                    )
                }
            )+
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::error::SubmitError;
    use futures::FutureExt;
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct PingRequest {
        target: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct PingResult {
        target: String,
    }

    impl OperationRequest for PingRequest {
        fn validate(&self) -> Result<(), String> {
            if self.target.is_empty() {
                return Err("target must not be empty".to_string());
            }
            Ok(())
        }

        fn routing_key(&self) -> Option<&str> {
            Some(&self.target)
        }
    }

    crate::service_client! {
        pub client PingClient over trait PingTransport {
            "Ping" => ping, ping_async, ping_async_with_handler :
                PingRequest => PingResult;
        }
    }

    struct EchoTransport;

    impl PingTransport for EchoTransport {
        fn ping(&self, request: PingRequest) -> TransportFuture<PingResult> {
            async move {
                Ok(PingResult {
                    target: request.target,
                })
            }
            .boxed()
        }
    }

    fn client() -> PingClient<EchoTransport> {
        PingClient::new(
            Arc::new(Dispatcher::new(DispatcherConfig::default())),
            Arc::new(EchoTransport),
        )
    }

    #[tokio::test]
    async fn generated_method_round_trips() {
        let handle = client()
            .ping_async(PingRequest {
                target: "node-1".to_string(),
            })
            .unwrap();
        assert_eq!(
            handle.wait().await,
            Ok(PingResult {
                target: "node-1".to_string()
            })
        );
        assert_eq!(handle.operation(), "Ping");
    }

    #[tokio::test]
    async fn validation_failure_is_synchronous() {
        let err = client().ping_async(PingRequest {
            target: String::new(),
        });
        match err {
            Err(SubmitError::InvalidRequest(msg)) => {
                assert_eq!(msg, "target must not be empty");
            }
            _ => panic!("expected a synchronous validation error"),
        }
    }
}
