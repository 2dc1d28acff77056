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

//! Device-fleet management client on top of the dispatcher.
//!
//! The `service_client!` table below plays the role of a generated SDK
//! surface: three operations, each with a future-returning method and a
//! callback overload. The transport is an in-process simulation so the demo
//! runs without a real endpoint.

use async_operation_dispatcher::client::{OperationRequest, TransportFuture};
use async_operation_dispatcher::dispatcher::{Dispatcher, DispatcherConfig};
use async_operation_dispatcher::error::OperationError;
use async_operation_dispatcher::handle::CompletionHandler;
use async_operation_dispatcher::service_client;
use async_operation_dispatcher::worker_pool::ShutdownMode;
use env_logger::Env;
use futures::FutureExt;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DescribeNodesRequest {
    pub status_filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DescribeNodesResult {
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SendCommandRequest {
    pub node_id: String,
    pub command: String,
}

#[derive(Debug, Clone)]
pub struct SendCommandResult {
    pub command_id: String,
}

#[derive(Debug, Clone)]
pub struct GetCommandStatusRequest {
    pub node_id: String,
    pub command_id: String,
}

#[derive(Debug, Clone)]
pub struct GetCommandStatusResult {
    pub status: String,
}

impl OperationRequest for DescribeNodesRequest {}

impl OperationRequest for SendCommandRequest {
    fn validate(&self) -> Result<(), String> {
        if self.node_id.is_empty() {
            return Err("node_id must not be empty".to_string());
        }
        if self.command.is_empty() {
            return Err("command must not be empty".to_string());
        }
        Ok(())
    }

    // Commands for one node execute in submission order.
    fn routing_key(&self) -> Option<&str> {
        Some(&self.node_id)
    }
}

impl OperationRequest for GetCommandStatusRequest {
    fn validate(&self) -> Result<(), String> {
        if self.command_id.is_empty() {
            return Err("command_id must not be empty".to_string());
        }
        Ok(())
    }

    fn routing_key(&self) -> Option<&str> {
        Some(&self.node_id)
    }
}

service_client! {
    /// Client for a simulated device-fleet management service.
    pub client FleetClient over trait FleetTransport {
        "DescribeNodes" => describe_nodes, describe_nodes_async, describe_nodes_async_with_handler :
            DescribeNodesRequest => DescribeNodesResult;
        "SendCommand" => send_command, send_command_async, send_command_async_with_handler :
            SendCommandRequest => SendCommandResult;
        "GetCommandStatus" => get_command_status, get_command_status_async, get_command_status_async_with_handler :
            GetCommandStatusRequest => GetCommandStatusResult;
    }
}

/// In-process stand-in for the wire transport: fixed latency, a couple of
/// canned fault paths.
struct SimulatedTransport {
    latency: Duration,
}

impl FleetTransport for SimulatedTransport {
    fn describe_nodes(&self, request: DescribeNodesRequest) -> TransportFuture<DescribeNodesResult> {
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            let node_ids = ["node-1", "node-2", "node-3"]
                .iter()
                .filter(|_| request.status_filter.as_deref() != Some("offline"))
                .map(|id| id.to_string())
                .collect();
            Ok(DescribeNodesResult { node_ids })
        }
        .boxed()
    }

    fn send_command(&self, request: SendCommandRequest) -> TransportFuture<SendCommandResult> {
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            if request.node_id == "node-down" {
                return Err(OperationError::transport("connection timed out"));
            }
            if request.command == "format" {
                return Err(OperationError::service_fault(
                    "UnsupportedCommand",
                    "command is not allowed on managed nodes",
                ));
            }
            Ok(SendCommandResult {
                command_id: format!("cmd-{}-{}", request.node_id, request.command.len()),
            })
        }
        .boxed()
    }

    fn get_command_status(
        &self,
        request: GetCommandStatusRequest,
    ) -> TransportFuture<GetCommandStatusResult> {
        let latency = self.latency;
        async move {
            tokio::time::sleep(latency).await;
            let _ = request.command_id;
            Ok(GetCommandStatusResult {
                status: "Succeeded".to_string(),
            })
        }
        .boxed()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let num_cpus = std::thread::available_parallelism()?;
    info!("number of CPUs available: {}", num_cpus);

    let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig {
        workers: num_cpus.into(),
        ..DispatcherConfig::default()
    }));
    let client = FleetClient::new(
        Arc::clone(&dispatcher),
        Arc::new(SimulatedTransport {
            latency: Duration::from_millis(30),
        }),
    );

    // Future style: submit, do other work, then wait.
    let describe = client.describe_nodes_async(DescribeNodesRequest {
        status_filter: None,
    })?;
    let nodes = describe.wait().await?;
    info!("fleet has {} nodes: {:?}", nodes.node_ids.len(), nodes.node_ids);

    // Callback style: the handler fires exactly once, on a worker.
    let reboot = client.send_command_async_with_handler(
        SendCommandRequest {
            node_id: "node-1".to_string(),
            command: "reboot".to_string(),
        },
        CompletionHandler::new(
            |resp: &SendCommandResult| info!("reboot accepted as {}", resp.command_id),
            |err| warn!("reboot rejected: {}", err),
        ),
    )?;
    let reboot_result = reboot.wait().await?;

    // A service fault comes back through the same channel, verbatim.
    let bad = client.send_command_async(SendCommandRequest {
        node_id: "node-2".to_string(),
        command: "format".to_string(),
    })?;
    if let Err(err) = bad.wait().await {
        warn!("as expected: {}", err);
    }

    // Cancellation is best-effort; this one is usually in flight already.
    let status = client.get_command_status_async(GetCommandStatusRequest {
        node_id: "node-1".to_string(),
        command_id: reboot_result.command_id.clone(),
    })?;
    if status.request_cancellation() {
        info!("cancellation requested for {}", status.operation());
    }
    match status.wait().await {
        Ok(resp) => info!("command status: {}", resp.status),
        Err(err) if err.is_cancelled() => info!("status poll cancelled before it ran"),
        Err(err) => warn!("status poll failed: {}", err),
    }

    info!(
        "worker metrics: {}",
        serde_json::to_string_pretty(&dispatcher.worker_metrics())?
    );

    dispatcher.shutdown(ShutdownMode::Graceful).await;
    Ok(())
}
