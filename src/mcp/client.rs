//! Server client (C3): handshake, request/response correlation, tool
//! discovery and invocation, lifecycle for one MCP server.

use super::protocol::{
    InboundMessage, JsonRpcErrorBody, JsonRpcErrorReply, JsonRpcNotification, JsonRpcRequest,
    RpcOutcome, ToolDescriptor, ToolsListResult, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use super::transport::{McpError, McpTransport};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;

const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_TOOLS_TIMEOUT: Duration = Duration::from_secs(10);
const TOOL_CALL_WARN_AFTER: Duration = Duration::from_secs(5);
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(3600);

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<RpcOutcome>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unstarted,
    Starting,
    Ready,
    ShuttingDown,
    Stopped,
}

pub struct ServerClient {
    pub name: String,
    transport: Arc<dyn McpTransport>,
    next_id: AtomicI64,
    pending: PendingMap,
    tools: RwLock<Vec<ToolDescriptor>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    state: RwLock<ClientState>,
    shutdown: AtomicBool,
    cleanup_lock: Mutex<()>,
    tool_timeout: Duration,
}

impl ServerClient {
    pub fn new(name: impl Into<String>, transport: Arc<dyn McpTransport>, tool_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            transport,
            next_id: AtomicI64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
            tools: RwLock::new(Vec::new()),
            receive_task: Mutex::new(None),
            state: RwLock::new(ClientState::Unstarted),
            shutdown: AtomicBool::new(false),
            cleanup_lock: Mutex::new(()),
            tool_timeout,
        }
    }

    fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.clone()
    }

    /// Launches the receive task, performs the MCP handshake. Never panics or
    /// propagates an error out; failures are reported as `Ok(false)`.
    pub async fn start(&self) -> bool {
        *self.state.write().await = ClientState::Starting;
        self.spawn_receive_task().await;

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"sampling": {}},
            "clientInfo": {"name": "dolphin-orchestrator", "version": env!("CARGO_PKG_VERSION")},
        });

        match self
            .send_request("initialize", Some(params), INITIALIZE_TIMEOUT)
            .await
        {
            Ok(_) => {
                let _ = self.send_notification("notifications/initialized", None).await;
                *self.state.write().await = ClientState::Ready;
                crate::log(format!("[mcp:{}] initialized", self.name));
                true
            }
            Err(err) => {
                crate::log(format!("[mcp:{}] initialize failed: {}", self.name, err));
                *self.state.write().await = ClientState::Stopped;
                false
            }
        }
    }

    pub async fn list_tools(&self) -> Vec<ToolDescriptor> {
        match self
            .send_request("tools/list", None, LIST_TOOLS_TIMEOUT)
            .await
        {
            Ok(value) => {
                let parsed: ToolsListResult = serde_json::from_value(value).unwrap_or_default();
                *self.tools.write().await = parsed.tools.clone();
                parsed.tools
            }
            Err(err) => {
                crate::log(format!("[mcp:{}] list_tools failed: {}", self.name, err));
                Vec::new()
            }
        }
    }

    /// Returns the raw `result` value on success, or a structured
    /// `{"error": "..."}` object on timeout/RPC failure — never an `Err`.
    pub async fn call_tool(&self, tool: &str, args: Value) -> Value {
        let params = serde_json::json!({"name": tool, "arguments": args});
        let warn_name = self.name.clone();
        let warn_tool = tool.to_string();

        let fut = self.send_request("tools/call", Some(params), self.tool_timeout);
        tokio::pin!(fut);

        let mut warned = false;
        loop {
            tokio::select! {
                result = &mut fut => {
                    return match result {
                        Ok(value) => value,
                        Err(err) => serde_json::json!({"error": err.to_string()}),
                    };
                }
                _ = tokio::time::sleep(TOOL_CALL_WARN_AFTER), if !warned => {
                    warned = true;
                    crate::log(format!(
                        "[mcp:{}] tool '{}' still running after {}s",
                        warn_name, warn_tool, TOOL_CALL_WARN_AFTER.as_secs()
                    ));
                }
            }
        }
    }

    /// Idempotent, serialized by `cleanup_lock`.
    pub async fn stop(&self) {
        let _guard = self.cleanup_lock.lock().await;
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.write().await = ClientState::ShuttingDown;

        let _ = self.send_notification("shutdown", None).await;
        let _ = self.transport.close().await;

        if let Some(handle) = self.receive_task.lock().await.take() {
            handle.abort();
        }

        *self.state.write().await = ClientState::Stopped;
        crate::log(format!("[mcp:{}] stopped", self.name));
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;
        if let Err(err) = self.transport.send_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(RpcOutcome::Result(value))) => Ok(value),
            Ok(Ok(RpcOutcome::Error(err))) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout(method.to_string()))
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notification)?;
        self.transport.send_line(&line).await
    }

    async fn spawn_receive_task(&self) {
        let transport = self.transport.clone();
        let pending = self.pending.clone();
        let name = self.name.clone();

        let handle = tokio::spawn(async move {
            loop {
                match transport.recv_line().await {
                    Ok(Some(line)) => {
                        Self::dispatch_inbound(&transport, &pending, &name, &line).await;
                    }
                    Ok(None) => {
                        log::debug!("[mcp:{}] transport closed", name);
                        break;
                    }
                    Err(err) => {
                        log::debug!("[mcp:{}] recv error: {}", name, err);
                        break;
                    }
                }
            }
        });

        *self.receive_task.lock().await = Some(handle);
    }

    async fn dispatch_inbound(
        transport: &Arc<dyn McpTransport>,
        pending: &PendingMap,
        name: &str,
        line: &str,
    ) {
        let parsed: InboundMessage = match serde_json::from_str(line) {
            Ok(m) => m,
            Err(err) => {
                log::debug!("[mcp:{}] malformed inbound line: {}", name, err);
                return;
            }
        };

        if parsed.is_response() {
            if let Some(id) = parsed.request_id() {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let outcome = if let Some(err) = parsed.error {
                        RpcOutcome::Error(err)
                    } else {
                        RpcOutcome::Result(parsed.result.unwrap_or(Value::Null))
                    };
                    let _ = tx.send(outcome);
                }
            }
            return;
        }

        if parsed.is_server_request() {
            let reply = JsonRpcErrorReply {
                jsonrpc: "2.0",
                id: parsed.id.unwrap_or(Value::Null),
                error: JsonRpcErrorBody {
                    code: METHOD_NOT_FOUND,
                    message: "method not implemented".to_string(),
                },
            };
            if let Ok(line) = serde_json::to_string(&reply) {
                let _ = transport.send_line(&line).await;
            }
            return;
        }
        // Notification: discarded.
    }
}
