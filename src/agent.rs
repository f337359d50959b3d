//! Interaction entry points (C10): one-shot and conversational façade over
//! the server pool (C4), provider adapters (C7), and the orchestration loop
//! (C8). Grounded in the teacher's `chat_loop_with_tools` driver, generalized
//! to select a provider from config instead of being called with one fixed
//! in place.

use crate::auth::AuthProvider;
use crate::config::{ConfigError, McpConfig, ModelEntry, ModelsConfig};
use crate::llm::{
    chat_loop_with_tools, AnthropicProvider, ChatLoopConfig, GenericChatProvider, LLMProvider,
    Message, OpenAIProvider, ProviderConfig, ProviderError, Role, Tool,
};
use crate::log;
use crate::mcp::{PoolError, ServerPool};
use crate::spill::SpillConfig;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not start any MCP server: {0}")]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("no API key available for provider '{0}'")]
    MissingApiKey(String),
    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),
    #[error("failed to read system message file '{path}': {source}")]
    SystemMessageFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write interaction log: {0}")]
    LogWrite(#[from] std::io::Error),
}

/// Runtime dispatch across the three concrete adapters (§4.7A). `LLMProvider`
/// itself is not object-safe (`update_config` is generic), so this enum is
/// the seam the orchestration loop drives instead of a `dyn` trait object.
pub enum AnyProvider {
    OpenAI(OpenAIProvider),
    Anthropic(AnthropicProvider),
    Generic(GenericChatProvider),
}

#[async_trait::async_trait]
impl LLMProvider for AnyProvider {
    fn create(_model: String, _api_key: String) -> Result<Self, ProviderError> {
        Err(ProviderError::ConfigError(
            "AnyProvider must be constructed via agent::build_provider".to_string(),
        ))
    }

    fn state(&self) -> crate::llm::ProviderState {
        match self {
            AnyProvider::OpenAI(p) => p.state(),
            AnyProvider::Anthropic(p) => p.state(),
            AnyProvider::Generic(p) => p.state(),
        }
    }

    fn config(&self) -> ProviderConfig {
        match self {
            AnyProvider::OpenAI(p) => p.config(),
            AnyProvider::Anthropic(p) => p.config(),
            AnyProvider::Generic(p) => p.config(),
        }
    }

    fn update_config(&self, f: impl FnOnce(&mut ProviderConfig)) {
        match self {
            AnyProvider::OpenAI(p) => p.update_config(f),
            AnyProvider::Anthropic(p) => p.update_config(f),
            AnyProvider::Generic(p) => p.update_config(f),
        }
    }

    async fn chat(
        &self,
        prompt: &str,
    ) -> Result<
        std::pin::Pin<Box<dyn futures::Stream<Item = Result<crate::llm::StreamChunk, ProviderError>> + Send>>,
        ProviderError,
    > {
        match self {
            AnyProvider::OpenAI(p) => p.chat(prompt).await,
            AnyProvider::Anthropic(p) => p.chat(prompt).await,
            AnyProvider::Generic(p) => p.chat(prompt).await,
        }
    }

    async fn chat_loop(
        &self,
        history: Vec<Message>,
        tools: Option<Vec<Tool>>,
    ) -> Result<crate::llm::ChatLoopHandle, ProviderError> {
        match self {
            AnyProvider::OpenAI(p) => p.chat_loop(history, tools).await,
            AnyProvider::Anthropic(p) => p.chat_loop(history, tools).await,
            AnyProvider::Generic(p) => p.chat_loop(history, tools).await,
        }
    }

    fn prompt_cache(&mut self, cache_prompt: String) -> Result<(), ProviderError> {
        match self {
            AnyProvider::OpenAI(p) => p.prompt_cache(cache_prompt),
            AnyProvider::Anthropic(p) => p.prompt_cache(cache_prompt),
            AnyProvider::Generic(p) => p.prompt_cache(cache_prompt),
        }
    }

    async fn compact(&self, history: Vec<Message>) -> Result<Vec<Message>, ProviderError> {
        match self {
            AnyProvider::OpenAI(p) => p.compact(history).await,
            AnyProvider::Anthropic(p) => p.compact(history).await,
            AnyProvider::Generic(p) => p.compact(history).await,
        }
    }

    fn get_history(&self) -> Vec<Message> {
        match self {
            AnyProvider::OpenAI(p) => p.get_history(),
            AnyProvider::Anthropic(p) => p.get_history(),
            AnyProvider::Generic(p) => p.get_history(),
        }
    }
}

/// Resolves an API key: explicit config value, then environment, then the
/// credential store, in that order.
fn resolve_api_key(entry: &ModelEntry, env_var: &str, provider_name: &str, auth: &dyn AuthProvider) -> Option<String> {
    entry
        .api_key
        .clone()
        .or_else(|| std::env::var(env_var).ok())
        .or_else(|| auth.token(provider_name))
}

/// Builds the concrete adapter for a selected model entry (§4.7A).
pub fn build_provider(entry: &ModelEntry, auth: &dyn AuthProvider) -> Result<AnyProvider, AgentError> {
    let reasoning = entry.is_reasoning || crate::llm::looks_like_reasoning_model(&entry.model);

    let provider = match entry.provider.as_str() {
        "openai" => {
            let api_key = resolve_api_key(entry, "OPENAI_API_KEY", "openai", auth)
                .ok_or_else(|| AgentError::MissingApiKey("openai".to_string()))?;
            AnyProvider::OpenAI(OpenAIProvider::new(entry.model.clone(), api_key)?)
        }
        "openai-responses" => {
            let api_key = resolve_api_key(entry, "OPENAI_API_KEY", "openai", auth)
                .ok_or_else(|| AgentError::MissingApiKey("openai".to_string()))?;
            AnyProvider::OpenAI(OpenAIProvider::new(entry.model.clone(), api_key)?.with_responses_api())
        }
        "anthropic" => {
            let api_key = resolve_api_key(entry, "ANTHROPIC_API_KEY", "anthropic", auth)
                .ok_or_else(|| AgentError::MissingApiKey("anthropic".to_string()))?;
            AnyProvider::Anthropic(AnthropicProvider::new(entry.model.clone(), api_key)?)
        }
        "azure" => {
            let api_key = resolve_api_key(entry, "AZURE_OPENAI_API_KEY", "azure", auth)
                .ok_or_else(|| AgentError::MissingApiKey("azure".to_string()))?;
            let base_url = entry
                .base_url
                .clone()
                .or_else(|| std::env::var("AZURE_OPENAI_API_ENDPOINT").ok())
                .ok_or_else(|| AgentError::MissingApiKey("azure (base_url)".to_string()))?;
            let api_version = std::env::var("AZURE_OPENAI_API_VERSION").ok();
            AnyProvider::Generic(GenericChatProvider::with_base_url(
                entry.model.clone(),
                Some(api_key),
                base_url,
                api_version,
            )?)
        }
        "ollama" | "lmstudio" | "generic-chat" => {
            let base_url = entry
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434/v1".to_string());
            let api_key = resolve_api_key(entry, "OPENAI_API_KEY", entry.provider.as_str(), auth);
            AnyProvider::Generic(GenericChatProvider::with_base_url(
                entry.model.clone(),
                api_key,
                base_url,
                None,
            )?)
        }
        other => return Err(AgentError::UnsupportedProvider(other.to_string())),
    };

    provider.update_config(|cfg| {
        cfg.is_reasoning = reasoning;
        cfg.reasoning_effort = entry.reasoning_effort.clone();
        if let Some(t) = entry.temperature {
            cfg.temperature = t;
        }
        if let Some(m) = entry.max_tokens {
            cfg.max_tokens = m;
        }
    });

    Ok(provider)
}

/// Assembles the seed system messages (§4.8 step 3), including the fix for
/// the dropped `systemMessageFile` read.
pub fn seed_system_messages(entry: &ModelEntry) -> Result<Vec<Message>, AgentError> {
    let mut messages = Vec::new();
    let role = if entry.is_reasoning { Role::Developer } else { Role::System };

    if let Some(text) = &entry.system_message {
        messages.push(Message {
            role: role.clone(),
            content: text.clone(),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    for path in &entry.system_message_files {
        let content = std::fs::read_to_string(path).map_err(|source| AgentError::SystemMessageFile {
            path: path.clone(),
            source,
        })?;
        messages.push(Message {
            role: role.clone(),
            content: format!("File: {}\n{}", path, content),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    if let Some(path) = &entry.system_message_file {
        let content = std::fs::read_to_string(path).map_err(|source| AgentError::SystemMessageFile {
            path: path.clone(),
            source,
        })?;
        messages.push(Message {
            role: role.clone(),
            content,
            tool_call_id: None,
            tool_calls: None,
        });
    }

    if messages.is_empty() {
        messages.push(Message {
            role,
            content: "You are a helpful assistant.".to_string(),
            tool_call_id: None,
            tool_calls: None,
        });
    }

    Ok(messages)
}

/// One interaction's configuration, assembled by the CLI (A1) or any other
/// embedder.
pub struct AgentConfig {
    pub models: ModelsConfig,
    pub mcp: McpConfig,
    pub requested_model: Option<String>,
    pub log_messages_path: Option<PathBuf>,
    pub max_rounds: usize,
    pub spill_config: SpillConfig,
}

/// The running façade for one process lifetime: one selected model, one
/// server pool, reused across turns in `--chat` mode.
pub struct Agent {
    provider: AnyProvider,
    pool: ServerPool,
    entry: ModelEntry,
    tools: Vec<Tool>,
    log_messages_path: Option<PathBuf>,
    max_rounds: usize,
    spill_config: SpillConfig,
}

impl Agent {
    pub async fn start(config: AgentConfig, auth: &dyn AuthProvider) -> Result<Self, AgentError> {
        let entry = config.models.select(config.requested_model.as_deref())?.clone();
        let provider = build_provider(&entry, auth)?;

        let specs = config.mcp.clone().into_specs()?;
        let pool = ServerPool::start_all(specs, config.mcp.tool_timeout).await?;
        let tools = pool.discover_tools().await;
        log(format!(
            "[agent] model='{}' provider='{}' tools={} servers={}",
            entry.model,
            entry.provider,
            tools.len(),
            pool.server_names().len()
        ));

        Ok(Self {
            provider,
            pool,
            entry,
            tools,
            log_messages_path: config.log_messages_path,
            max_rounds: config.max_rounds,
            spill_config: config.spill_config,
        })
    }

    /// Runs one user query to completion (§4.8 steps 3-6) and returns the
    /// final assistant text. When `quiet` is false, tool calls and their
    /// results are echoed to stderr as they happen.
    pub async fn run_once(&self, query: &str, quiet: bool) -> Result<String, AgentError> {
        let mut messages = seed_system_messages(&self.entry)?;
        messages.push(Message {
            role: Role::User,
            content: query.to_string(),
            tool_call_id: None,
            tool_calls: None,
        });

        let mut loop_config = ChatLoopConfig::new()
            .with_pool(&self.pool)
            .with_spill_config(self.spill_config)
            .with_max_rounds(self.max_rounds);

        if !quiet {
            loop_config = loop_config
                .on_tool_calls(|calls| {
                    for call in calls {
                        eprintln!("-> {} {}", call.name, call.arguments);
                    }
                })
                .on_tool_results(|results| {
                    for result in results {
                        eprintln!("<- {}", result.content);
                    }
                });
        }

        let response = chat_loop_with_tools(&self.provider, messages.clone(), self.tools.clone(), loop_config).await?;

        if let Some(path) = &self.log_messages_path {
            self.append_interaction_log(path, &messages, response.content.as_str())?;
        }

        Ok(response.content)
    }

    fn append_interaction_log(
        &self,
        path: &PathBuf,
        seed_messages: &[Message],
        final_content: &str,
    ) -> Result<(), AgentError> {
        let mut logged = seed_messages.to_vec();
        logged.push(Message {
            role: Role::Assistant,
            content: final_content.to_string(),
            tool_call_id: None,
            tool_calls: None,
        });

        let line = serde_json::json!({
            "messages": logged,
            "functions": self.tools,
        });

        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(&line).unwrap_or_default())?;
        Ok(())
    }

    /// Runs the multi-step reasoner (C9) over one query instead of the
    /// direct tool-calling loop.
    pub async fn run_reasoning(
        &self,
        query: &str,
        config: crate::reasoning::ReasoningConfig,
    ) -> (bool, String) {
        crate::reasoning::run_query(&self.provider, &self.pool, &self.tools, query, config, |trace| {
            log(format!("[reasoning] {}", trace));
        })
        .await
    }

    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn model_entry(&self) -> &ModelEntry {
        &self.entry
    }
}

pub fn default_auth() -> Arc<dyn AuthProvider> {
    Arc::new(crate::auth::FileCredentialStore::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(provider: &str) -> ModelEntry {
        ModelEntry {
            title: None,
            model: "gpt-4o".to_string(),
            provider: provider.to_string(),
            default: true,
            system_message: None,
            system_message_file: None,
            system_message_files: vec![],
            is_reasoning: false,
            reasoning_effort: None,
            api_key: Some("test-key".to_string()),
            base_url: None,
            temperature: None,
            max_tokens: None,
        }
    }

    struct NoAuth;
    impl AuthProvider for NoAuth {
        fn token(&self, _provider: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn seeds_default_system_message_when_none_configured() {
        let messages = seed_system_messages(&entry("openai")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "You are a helpful assistant.");
    }

    #[test]
    fn seeds_explicit_system_message() {
        let mut e = entry("openai");
        e.system_message = Some("Be terse.".to_string());
        let messages = seed_system_messages(&e).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Be terse.");
    }

    #[test]
    fn unsupported_provider_errors() {
        let e = entry("made-up-provider");
        let result = build_provider(&e, &NoAuth);
        assert!(matches!(result, Err(AgentError::UnsupportedProvider(_))));
    }

    #[test]
    fn missing_api_key_errors() {
        let mut e = entry("openai");
        e.api_key = None;
        std::env::remove_var("OPENAI_API_KEY");
        let result = build_provider(&e, &NoAuth);
        assert!(matches!(result, Err(AgentError::MissingApiKey(_))));
    }
}
