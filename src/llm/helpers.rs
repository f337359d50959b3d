//! Helper functions for common LLM interaction patterns
//!
//! This module provides high-level helpers that wrap common patterns
//! like chat loops with tool execution.

use super::{LLMProvider, LoopStep, Message, Tool, ToolCall, ToolResult};
use crate::log;
use crate::mcp::ServerPool;
use crate::router::route_tool_call;
use crate::spill::SpillConfig;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Tool executor function type
///
/// Takes a ToolCall and returns a Future that resolves to a Result<String, String>
/// - Ok(String) for successful execution with output
/// - Err(String) for execution errors
pub type ToolExecutor =
    Box<dyn Fn(ToolCall) -> Pin<Box<dyn Future<Output = Result<String, String>> + Send>> + Send>;

/// Event callback for streaming content
///
/// Called when the LLM generates text content
pub type ContentCallback = Box<dyn Fn(&str) + Send>;

/// Callback for when tool calls are requested
///
/// Called before tool execution, allows for logging/UI updates
pub type ToolCallCallback = Box<dyn Fn(&[ToolCall]) + Send>;

/// Callback for when tool results are ready
///
/// Called after tool execution, before submitting to LLM
pub type ToolResultCallback = Box<dyn Fn(&[ToolResult]) + Send>;

/// Configuration for chat_loop_with_tools
pub struct ChatLoopConfig<'a> {
    /// MCP server pool backing namespaced tool calls (preferred dispatch path).
    pub pool: Option<&'a ServerPool>,
    /// Spill configuration applied to results routed through `pool`.
    pub spill_config: SpillConfig,
    /// Tool executors by tool name, consulted when `pool` has no match
    /// (or is absent). Mainly useful in tests.
    pub tool_executors: HashMap<String, ToolExecutor>,
    /// Optional callback for streaming content
    pub on_content: Option<ContentCallback>,
    /// Optional callback when tool calls are requested
    pub on_tool_calls: Option<ToolCallCallback>,
    /// Optional callback when tool results are ready
    pub on_tool_results: Option<ToolResultCallback>,
    /// Optional callback for thinking content (Claude, o1, etc.)
    pub on_thinking: Option<ContentCallback>,
    /// Maximum number of tool call rounds (default: 10)
    pub max_rounds: usize,
}

impl<'a> ChatLoopConfig<'a> {
    /// Create a new configuration
    pub fn new() -> Self {
        Self {
            pool: None,
            spill_config: SpillConfig::default(),
            tool_executors: HashMap::new(),
            on_content: None,
            on_tool_calls: None,
            on_tool_results: None,
            on_thinking: None,
            max_rounds: 10,
        }
    }

    /// Route tool calls through an MCP server pool (§4.5/§C5).
    pub fn with_pool(mut self, pool: &'a ServerPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Override the spill threshold applied to pool-routed results.
    pub fn with_spill_config(mut self, spill_config: SpillConfig) -> Self {
        self.spill_config = spill_config;
        self
    }

    /// Register a tool executor, consulted when no server pool owns the name.
    pub fn with_tool<F, Fut>(mut self, name: impl Into<String>, executor: F) -> Self
    where
        F: Fn(ToolCall) -> Fut + Send + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        self.tool_executors
            .insert(name.into(), Box::new(move |call| Box::pin(executor(call))));
        self
    }

    /// Set content callback
    pub fn on_content<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + 'static,
    {
        self.on_content = Some(Box::new(callback));
        self
    }

    /// Set tool call callback
    pub fn on_tool_calls<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[ToolCall]) + Send + 'static,
    {
        self.on_tool_calls = Some(Box::new(callback));
        self
    }

    /// Set tool result callback
    pub fn on_tool_results<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[ToolResult]) + Send + 'static,
    {
        self.on_tool_results = Some(Box::new(callback));
        self
    }

    /// Set thinking callback
    pub fn on_thinking<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) + Send + 'static,
    {
        self.on_thinking = Some(Box::new(callback));
        self
    }

    /// Set maximum rounds
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

impl<'a> Default for ChatLoopConfig<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// Response from chat_loop_with_tools
#[derive(Debug, Clone)]
pub struct ChatLoopResponse {
    /// Final content from the LLM
    pub content: String,
    /// Total token usage
    pub usage: super::TokenUsage,
    /// All tool calls made during the conversation
    pub all_tool_calls: Vec<ToolCall>,
    /// Number of rounds executed
    pub rounds: usize,
}

/// High-level helper for running a chat loop with automatic tool execution
///
/// Drives `provider.chat_loop()` to completion: streams content to callbacks,
/// executes each requested tool call (via the MCP server pool when set, then
/// falling back to any registered executor), and submits the results back
/// to the provider until it reports `Done` or the round cap is hit.
pub async fn chat_loop_with_tools<P: LLMProvider>(
    provider: &P,
    messages: Vec<Message>,
    tools: Vec<Tool>,
    config: ChatLoopConfig<'_>,
) -> Result<ChatLoopResponse, super::ProviderError> {
    log("Start chat_loop_with_tools");

    for (idx, msg) in messages.iter().enumerate() {
        log(format!("  [input:{}]  {}", idx + 1, msg));
    }

    let mut handle = provider.chat_loop(messages, Some(tools)).await?;

    let mut full_content = String::new();
    let mut all_tool_calls = Vec::new();
    let mut rounds = 0;
    let mut total_usage = super::TokenUsage::default();

    loop {
        let event_result = handle.next().await;

        let event = match event_result {
            Some(Ok(e)) => e,
            Some(Err(e)) => return Err(e),
            None => {
                log("[error] chat_loop ended unexpectedly");
                return Err(super::ProviderError::ApiError(
                    "Chat loop ended unexpectedly".to_string(),
                ));
            }
        };

        match event {
            LoopStep::Thinking(thought) => {
                log(format!("[thinking] {}", truncate_for_log(&thought)));
                if let Some(ref callback) = config.on_thinking {
                    callback(&thought);
                }
            }
            LoopStep::Content(text) => {
                log(format!("[content] {}", truncate_for_log(&text)));
                full_content.push_str(&text);
                if let Some(ref callback) = config.on_content {
                    callback(&text);
                }
            }
            LoopStep::ToolCallsRequested {
                tool_calls,
                content,
            } => {
                rounds += 1;
                log(format!(
                    "[tool_calls] round={} content={}",
                    rounds,
                    truncate_for_log(&content)
                ));
                for call in &tool_calls {
                    log(format!("  [call] {} -> {}", call.id, call.name));
                }

                if rounds > config.max_rounds {
                    log(format!(
                        "[error] max rounds exceeded ({})",
                        config.max_rounds
                    ));
                    return Err(super::ProviderError::ApiError(format!(
                        "Maximum rounds ({}) exceeded",
                        config.max_rounds
                    )));
                }

                if !content.is_empty() {
                    full_content.push_str(&content);
                }

                if let Some(ref callback) = config.on_tool_calls {
                    callback(&tool_calls);
                }

                let mut results = Vec::new();
                for call in &tool_calls {
                    all_tool_calls.push(call.clone());
                    results.push(execute_one(&config, call).await);
                }

                if let Some(ref callback) = config.on_tool_results {
                    callback(&results);
                }

                for result in &results {
                    let tag = if result.is_error {
                        "[result:error]"
                    } else {
                        "[result]"
                    };
                    log(format!(
                        "{} {} {}",
                        tag,
                        result.tool_call_id,
                        truncate_for_log(&result.content)
                    ));
                }

                handle.submit_tool_results(results)?;
            }
            LoopStep::ToolResultsReceived { .. } => {
                log("[results_received]");
            }
            LoopStep::Done {
                content,
                total_usage: usage,
                finish_reason,
                ..
            } => {
                log(format!(
                    "[done] reason={:?} in={} out={}",
                    finish_reason, usage.input_tokens, usage.output_tokens
                ));

                total_usage.input_tokens += usage.input_tokens;
                total_usage.output_tokens += usage.output_tokens;
                total_usage.cached_tokens += usage.cached_tokens;

                if !content.is_empty() && content != full_content {
                    full_content = content;
                }

                return Ok(ChatLoopResponse {
                    content: full_content,
                    usage: total_usage,
                    all_tool_calls,
                    rounds,
                });
            }
        }
    }
}

async fn execute_one(config: &ChatLoopConfig<'_>, call: &ToolCall) -> ToolResult {
    if let Some(pool) = config.pool {
        log(format!("[exec:pool] {} ({})", call.id, call.name));
        let message = route_tool_call(pool, call, config.spill_config).await;
        return ToolResult {
            tool_call_id: call.id.clone(),
            is_error: message.content.contains("\"error\""),
            content: message.content,
        };
    }

    if let Some(executor) = config.tool_executors.get(&call.name) {
        log(format!("[exec] {} ({})", call.id, call.name));
        return match executor(call.clone()).await {
            Ok(output) => ToolResult {
                tool_call_id: call.id.clone(),
                content: output,
                is_error: false,
            },
            Err(error) => ToolResult {
                tool_call_id: call.id.clone(),
                content: error,
                is_error: true,
            },
        };
    }

    log(format!(
        "[error] missing executor: {} ({})",
        call.id, call.name
    ));
    ToolResult {
        tool_call_id: call.id.clone(),
        content: format!("Tool '{}' not registered", call.name),
        is_error: true,
    }
}

fn truncate_for_log(text: &str) -> String {
    const LIMIT: usize = 120;
    let mut result = String::new();
    for (i, ch) in text.chars().enumerate() {
        if i >= LIMIT {
            result.push_str("...");
            return result;
        }
        result.push(ch);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ChatLoopConfig::new()
            .with_tool("test", |_call| async { Ok("result".to_string()) })
            .with_max_rounds(5);

        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.tool_executors.len(), 1);
        assert!(config.tool_executors.contains_key("test"));
    }
}
