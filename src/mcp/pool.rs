//! Server pool (C4): start all configured servers, build the namespaced tool
//! catalogue, and shut everything down together.

use super::client::{ClientState, ServerClient};
use super::sse::SseTransport;
use super::stdio::{StdioTransport, StdioTransportConfig};
use crate::config::ServerSpec;
use crate::llm::Tool;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No MCP servers could be started.")]
    NoServersStarted,
}

pub struct ServerPool {
    clients: HashMap<String, Arc<ServerClient>>,
}

impl ServerPool {
    /// Starts every non-disabled entry concurrently. A client that fails to
    /// start is logged and skipped — a partial pool is acceptable. Only when
    /// at least one entry was configured (and not disabled) and *none* came
    /// up do we surface the sentinel error; an entirely-disabled (or empty)
    /// configuration is a valid zero-tool pool, not an error.
    pub async fn start_all(specs: Vec<ServerSpec>, tool_timeout_secs: u64) -> Result<Self, PoolError> {
        if specs.is_empty() {
            return Ok(Self {
                clients: HashMap::new(),
            });
        }

        let tool_timeout = Duration::from_secs(tool_timeout_secs.max(1));
        let attempted = specs.len();

        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            let timeout = tool_timeout;
            handles.push(tokio::spawn(async move { build_and_start(spec, timeout).await }));
        }

        let mut clients = HashMap::new();
        for handle in handles {
            if let Ok(Some((name, client))) = handle.await {
                clients.insert(name, client);
            }
        }

        if attempted > 0 && clients.is_empty() {
            return Err(PoolError::NoServersStarted);
        }

        Ok(Self { clients })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServerClient>> {
        self.clients.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.clients.keys().map(|s| s.as_str()).collect()
    }

    /// Builds the flat, namespaced tool catalogue by calling `tools/list` on
    /// every ready client concurrently.
    pub async fn discover_tools(&self) -> Vec<Tool> {
        let mut catalogue = Vec::new();
        for (name, client) in &self.clients {
            if client.state().await != ClientState::Ready {
                continue;
            }
            for tool in client.list_tools().await {
                catalogue.push(Tool {
                    name: format!("{}_{}", name, tool.name),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                    full_description: None,
                });
            }
        }
        catalogue
    }

    pub async fn call_tool(&self, server: &str, tool: &str, args: Value) -> Option<Value> {
        let client = self.clients.get(server)?;
        Some(client.call_tool(tool, args).await)
    }

    pub async fn shutdown(&self) {
        let stops = self.clients.values().map(|c| c.stop());
        futures::future::join_all(stops).await;
    }
}

async fn build_and_start(
    spec: ServerSpec,
    tool_timeout: Duration,
) -> Option<(String, Arc<ServerClient>)> {
    let (name, transport_result): (String, Result<Arc<dyn super::transport::McpTransport>, super::transport::McpError>) =
        match spec {
            ServerSpec::Stdio {
                name,
                command,
                args,
                env,
                cwd,
            } => {
                let transport = StdioTransport::spawn(
                    &command,
                    &args,
                    &env,
                    cwd.as_deref(),
                    StdioTransportConfig::default(),
                )
                .await
                .map(|t| Arc::new(t) as Arc<dyn super::transport::McpTransport>);
                (name, transport)
            }
            ServerSpec::Sse { name, url, headers } => {
                let transport = SseTransport::connect(&url, &headers)
                    .await
                    .map(|t| Arc::new(t) as Arc<dyn super::transport::McpTransport>);
                (name, transport)
            }
        };

    let transport = match transport_result {
        Ok(t) => t,
        Err(err) => {
            crate::log(format!("[pool] failed to start server '{}': {}", name, err));
            return None;
        }
    };

    let client = Arc::new(ServerClient::new(name.clone(), transport, tool_timeout));
    if client.start().await {
        Some((name, client))
    } else {
        crate::log(format!("[pool] server '{}' failed handshake, skipping", name));
        None
    }
}
