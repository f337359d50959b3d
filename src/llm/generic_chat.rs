//! Chat-Completions-style provider for OpenAI-compatible endpoints that are
//! not OpenAI itself: Ollama, LM Studio, Azure OpenAI, and anything else
//! speaking the same `/chat/completions` wire format against a different
//! base URL. Structurally this mirrors `openai.rs`'s streaming request/parse
//! loop; it differs in carrying its own endpoint and an optional
//! `api-version` query parameter (Azure) instead of hardcoding OpenAI's host.

use crate::llm::provider::*;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Provider implementation for OpenAI-compatible Chat Completions endpoints.
#[derive(Clone)]
pub struct GenericChatProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    api_version: Option<String>,
    config: Arc<RwLock<ProviderConfig>>,
    state: Arc<RwLock<ProviderState>>,
    history: Arc<RwLock<Vec<Message>>>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GenericTool>>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Clone)]
struct GenericTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: GenericFunction,
}

#[derive(Debug, Serialize, Clone)]
struct GenericFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "role")]
enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<GenericToolCall>>,
    },
    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GenericToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: String,
    function: GenericFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct GenericFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[allow(dead_code)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    tool_type: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl GenericChatProvider {
    /// `base_url` should point at the provider root, e.g.
    /// `http://localhost:11434/v1` (Ollama) or
    /// `https://<resource>.openai.azure.com/openai/deployments/<deployment>`
    /// (Azure, combined with `api_version`).
    pub fn with_base_url(
        model: String,
        api_key: Option<String>,
        base_url: String,
        api_version: Option<String>,
    ) -> Result<Self, ProviderError> {
        if base_url.trim().is_empty() {
            return Err(ProviderError::ConfigError(
                "base_url must not be empty".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            config: Arc::new(RwLock::new(ProviderConfig::default())),
            state: Arc::new(RwLock::new(ProviderState::default())),
            history: Arc::new(RwLock::new(Vec::new())),
        })
    }

    fn endpoint(&self) -> String {
        let mut url = format!("{}/chat/completions", self.base_url);
        if let Some(version) = &self.api_version {
            url.push_str(&format!("?api-version={}", version));
        }
        url
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) if self.api_version.is_some() => req.header("api-key", key.clone()),
            Some(key) => req.header("Authorization", format!("Bearer {}", key)),
            None => req,
        }
    }

    fn convert_message(msg: &Message) -> ChatMessage {
        match msg.role {
            Role::System | Role::Developer => ChatMessage::System {
                content: msg.content.clone(),
            },
            Role::User => ChatMessage::User {
                content: msg.content.clone(),
            },
            Role::Assistant => {
                let tool_calls = msg.tool_calls.as_ref().map(|calls| {
                    calls
                        .iter()
                        .map(|tc| GenericToolCall {
                            id: tc.id.clone(),
                            tool_type: "function".to_string(),
                            function: GenericFunctionCall {
                                name: tc.name.clone(),
                                arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                            },
                        })
                        .collect()
                });
                ChatMessage::Assistant {
                    content: Some(msg.content.clone()),
                    tool_calls,
                }
            }
            Role::Tool | Role::Function => ChatMessage::Tool {
                content: msg.content.clone(),
                tool_call_id: msg.tool_call_id.clone().unwrap_or_default(),
            },
        }
    }

    fn convert_tools(tools: &[Tool]) -> Vec<GenericTool> {
        tools
            .iter()
            .map(|t| GenericTool {
                tool_type: "function".to_string(),
                function: GenericFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl LLMProvider for GenericChatProvider {
    fn create(model: String, api_key: String) -> Result<Self, ProviderError> {
        // The single-argument `create` constructor has no slot for a base
        // URL; callers that need one should use `with_base_url` directly.
        // Defaulting here targets the common local case (Ollama).
        Self::with_base_url(
            model,
            if api_key.is_empty() { None } else { Some(api_key) },
            "http://localhost:11434/v1".to_string(),
            None,
        )
    }

    fn state(&self) -> ProviderState {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    fn config(&self) -> ProviderConfig {
        self.config.read().map(|c| c.clone()).unwrap_or_default()
    }

    fn update_config(&self, f: impl FnOnce(&mut ProviderConfig)) {
        if let Ok(mut config) = self.config.write() {
            f(&mut config);
        }
    }

    async fn chat(
        &self,
        prompt: &str,
    ) -> Result<
        Pin<Box<dyn futures::Stream<Item = Result<StreamChunk, ProviderError>> + Send>>,
        ProviderError,
    > {
        let cfg = self.config();
        let mut messages = vec![];
        if let Some(system_prompt) = &cfg.system_prompt {
            messages.push(ChatMessage::System {
                content: system_prompt.clone(),
            });
        }
        messages.push(ChatMessage::User {
            content: prompt.to_string(),
        });

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(cfg.temperature),
            top_p: cfg.top_p,
            max_tokens: Some(cfg.max_tokens),
            stream: true,
            stream_options: Some(StreamOptions { include_usage: true }),
            tools: None,
        };

        let response = self
            .apply_auth(self.client.post(self.endpoint()))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::ApiError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::ApiError(format!("HTTP {}: {}", status, error_text)));
        }

        let byte_stream = response.bytes_stream();
        let event_stream = byte_stream.eventsource();
        let state = self.state.clone();
        let mut full_content = String::new();

        let output_stream = async_stream::stream! {
            futures::pin_mut!(event_stream);
            while let Some(event_result) = event_stream.next().await {
                match event_result {
                    Ok(event) => {
                        if event.data == "[DONE]" {
                            break;
                        }
                        match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                            Ok(chunk) => {
                                if chunk.choices.is_empty() && chunk.usage.is_some() {
                                    let usage = chunk.usage.unwrap();
                                    let token_usage = TokenUsage {
                                        input_tokens: usage.prompt_tokens,
                                        output_tokens: usage.completion_tokens,
                                        cached_tokens: 0,
                                    };
                                    if let Ok(mut s) = state.write() {
                                        s.input_tokens += token_usage.input_tokens as u64;
                                        s.output_tokens += token_usage.output_tokens as u64;
                                        s.request_count += 1;
                                        s.last_request_time = Some(std::time::SystemTime::now());
                                    }
                                    yield Ok(StreamChunk::Done {
                                        finish_reason: FinishReason::Stop,
                                        usage: token_usage,
                                        full_content: full_content.clone(),
                                    });
                                    continue;
                                }
                                for choice in chunk.choices {
                                    if let Some(content) = choice.delta.content {
                                        full_content.push_str(&content);
                                        yield Ok(StreamChunk::Content(content));
                                    }
                                    let _ = choice.finish_reason;
                                }
                            }
                            Err(e) => {
                                yield Err(ProviderError::ApiError(format!("Failed to parse chunk: {}", e)));
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(ProviderError::ApiError(format!("Stream error: {}", e)));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(output_stream))
    }

    async fn chat_loop(
        &self,
        history: Vec<Message>,
        tools: Option<Vec<Tool>>,
    ) -> Result<ChatLoopHandle, ProviderError> {
        let (tool_result_tx, mut tool_result_rx) =
            tokio::sync::mpsc::unbounded_channel::<ToolResultSubmission>();
        let (event_tx, event_rx) =
            tokio::sync::mpsc::unbounded_channel::<Result<LoopStep, ProviderError>>();

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let api_version = self.api_version.clone();
        let endpoint = self.endpoint();
        let model = self.model.clone();
        let cfg = self.config();
        let state = self.state.clone();
        let provider_history = self.history.clone();

        let mut messages: Vec<ChatMessage> = history.iter().map(Self::convert_message).collect();
        let generic_tools = tools.as_ref().map(|t| Self::convert_tools(t));
        let mut current_history = history.clone();

        tokio::spawn(async move {
            loop {
                let request = ChatCompletionRequest {
                    model: model.clone(),
                    messages: messages.clone(),
                    temperature: if generic_tools.is_some() { None } else { Some(cfg.temperature) },
                    top_p: cfg.top_p,
                    max_tokens: Some(cfg.max_tokens),
                    stream: true,
                    stream_options: Some(StreamOptions { include_usage: true }),
                    tools: generic_tools.clone(),
                };

                let mut builder = client.post(&endpoint).header("Content-Type", "application/json");
                builder = match (&api_key, &api_version) {
                    (Some(key), Some(_)) => builder.header("api-key", key.clone()),
                    (Some(key), None) => builder.header("Authorization", format!("Bearer {}", key)),
                    (None, _) => builder,
                };

                let response = match builder.json(&request).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = event_tx.send(Err(ProviderError::ApiError(e.to_string())));
                        break;
                    }
                };

                if !response.status().is_success() {
                    let status = response.status();
                    let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                    let _ = event_tx.send(Err(ProviderError::ApiError(format!("HTTP {}: {}", status, error_text))));
                    break;
                }

                let byte_stream = response.bytes_stream();
                let event_stream = byte_stream.eventsource();

                let mut tool_call_assembler = ToolCallAssembler::new();
                let mut content_accumulator = String::new();
                let mut current_finish_reason = None;
                let mut tool_call_index_to_id: std::collections::HashMap<usize, String> =
                    std::collections::HashMap::new();
                let mut completed_tool_calls: Option<Vec<ToolCall>> = None;

                futures::pin_mut!(event_stream);

                while let Some(event_result) = event_stream.next().await {
                    match event_result {
                        Ok(event) => {
                            if event.data == "[DONE]" {
                                break;
                            }
                            match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                                Ok(chunk) => {
                                    if chunk.choices.is_empty() && chunk.usage.is_some() {
                                        let usage = chunk.usage.unwrap();
                                        let token_usage = TokenUsage {
                                            input_tokens: usage.prompt_tokens,
                                            output_tokens: usage.completion_tokens,
                                            cached_tokens: 0,
                                        };
                                        if let Ok(mut s) = state.write() {
                                            s.input_tokens += token_usage.input_tokens as u64;
                                            s.output_tokens += token_usage.output_tokens as u64;
                                            s.request_count += 1;
                                            s.last_request_time = Some(std::time::SystemTime::now());
                                        }

                                        let tool_calls = std::mem::replace(&mut tool_call_assembler, ToolCallAssembler::new())
                                            .into_tool_calls();

                                        if !tool_calls.is_empty() {
                                            completed_tool_calls = Some(tool_calls.clone());
                                            let _ = event_tx.send(Ok(LoopStep::ToolCallsRequested {
                                                tool_calls,
                                                content: content_accumulator.clone(),
                                            }));
                                        } else {
                                            let _ = event_tx.send(Ok(LoopStep::Done {
                                                content: content_accumulator.clone(),
                                                finish_reason: FinishReason::Stop,
                                                total_usage: token_usage,
                                                all_tool_calls: vec![],
                                            }));
                                        }
                                        continue;
                                    }

                                    for choice in chunk.choices {
                                        if let Some(content) = choice.delta.content {
                                            content_accumulator.push_str(&content);
                                            let _ = event_tx.send(Ok(LoopStep::Content(content)));
                                        }

                                        if let Some(tool_calls) = choice.delta.tool_calls {
                                            for delta in tool_calls {
                                                if let Some(id) = &delta.id {
                                                    tool_call_index_to_id.insert(delta.index, id.clone());
                                                }
                                                if let Some(id) = tool_call_index_to_id.get(&delta.index) {
                                                    tool_call_assembler.process_delta(
                                                        id.clone(),
                                                        delta.function.as_ref().and_then(|f| f.name.clone()),
                                                        delta.function.as_ref().and_then(|f| f.arguments.clone()),
                                                    );
                                                }
                                            }
                                        }

                                        if let Some(finish_reason) = choice.finish_reason {
                                            current_finish_reason = Some(finish_reason);
                                        }
                                    }
                                }
                                Err(e) => {
                                    let _ = event_tx.send(Err(ProviderError::ApiError(format!("Failed to parse chunk: {}", e))));
                                    return;
                                }
                            }
                        }
                        Err(e) => {
                            let _ = event_tx.send(Err(ProviderError::ApiError(format!("Stream error: {}", e))));
                            return;
                        }
                    }
                }

                if current_finish_reason.as_deref() == Some("tool_calls") {
                    match tool_result_rx.recv().await {
                        Some(submission) => {
                            let tool_calls = completed_tool_calls.take().unwrap_or_default();

                            messages.push(ChatMessage::Assistant {
                                content: if content_accumulator.is_empty() {
                                    None
                                } else {
                                    Some(content_accumulator.clone())
                                },
                                tool_calls: Some(
                                    tool_calls
                                        .iter()
                                        .map(|tc| GenericToolCall {
                                            id: tc.id.clone(),
                                            tool_type: "function".to_string(),
                                            function: GenericFunctionCall {
                                                name: tc.name.clone(),
                                                arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                                            },
                                        })
                                        .collect(),
                                ),
                            });

                            current_history.push(Message {
                                role: Role::Assistant,
                                content: content_accumulator.clone(),
                                tool_call_id: None,
                                tool_calls: Some(tool_calls.clone()),
                            });

                            let result_count = submission.results.len();
                            let _ = event_tx.send(Ok(LoopStep::ToolResultsReceived { count: result_count }));

                            for result in submission.results.clone() {
                                messages.push(ChatMessage::Tool {
                                    content: result.content.clone(),
                                    tool_call_id: result.tool_call_id.clone(),
                                });
                                current_history.push(Message {
                                    role: Role::Tool,
                                    content: result.content,
                                    tool_call_id: Some(result.tool_call_id),
                                    tool_calls: None,
                                });
                            }

                            content_accumulator.clear();
                            tool_call_assembler = ToolCallAssembler::new();
                            tool_call_index_to_id.clear();
                            #[allow(unused_assignments)]
                            {
                                current_finish_reason = None;
                            }

                            continue;
                        }
                        None => break,
                    }
                } else {
                    break;
                }
            }

            if let Ok(mut hist) = provider_history.write() {
                *hist = current_history;
            }
        });

        Ok(ChatLoopHandle::new(event_rx, tool_result_tx))
    }

    fn prompt_cache(&mut self, _cache_prompt: String) -> Result<(), ProviderError> {
        Err(ProviderError::CachingNotSupported)
    }

    async fn compact(&self, _history: Vec<Message>) -> Result<Vec<Message>, ProviderError> {
        Err(ProviderError::ApiError(
            "Compaction is not supported by generic chat-completions endpoints".to_string(),
        ))
    }

    fn get_history(&self) -> Vec<Message> {
        self.history.read().map(|h| h.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_targets_chat_completions() {
        let provider = GenericChatProvider::with_base_url(
            "llama3".to_string(),
            None,
            "http://localhost:11434/v1".to_string(),
            None,
        )
        .unwrap();
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn endpoint_includes_api_version_for_azure() {
        let provider = GenericChatProvider::with_base_url(
            "gpt-4o".to_string(),
            Some("key".to_string()),
            "https://example.openai.azure.com/openai/deployments/gpt-4o".to_string(),
            Some("2024-06-01".to_string()),
        )
        .unwrap();
        assert!(provider.endpoint().ends_with("?api-version=2024-06-01"));
    }

    #[test]
    fn rejects_empty_base_url() {
        let result = GenericChatProvider::with_base_url("m".to_string(), None, String::new(), None);
        assert!(result.is_err());
    }

    #[test]
    fn get_history_initially_empty() {
        let provider = GenericChatProvider::with_base_url(
            "m".to_string(),
            None,
            "http://localhost:11434/v1".to_string(),
            None,
        )
        .unwrap();
        assert_eq!(provider.get_history().len(), 0);
    }
}
