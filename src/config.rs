//! Ambient config loading (A2): server pool and model configuration documents.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not found")]
    NotFound(PathBuf),
    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: anyhow_compat::ParseError,
    },
    #[error("ambiguous server entry '{0}': both url and command given without an explicit transport")]
    AmbiguousTransport(String),
    #[error("No suitable model found in provider_config.")]
    NoSuitableModel,
}

/// A tiny local stand-in so `ConfigError::Parse` can carry either a JSON or
/// YAML parse failure behind one `source` without pulling in `anyhow`.
pub mod anyhow_compat {
    use std::fmt;

    #[derive(Debug)]
    pub enum ParseError {
        Json(serde_json::Error),
        Yaml(serde_yaml::Error),
    }

    impl fmt::Display for ParseError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ParseError::Json(e) => write!(f, "{}", e),
                ParseError::Yaml(e) => write!(f, "{}", e),
            }
        }
    }

    impl std::error::Error for ParseError {}
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    #[serde(alias = "mcp_servers")]
    pub mcp_servers: HashMap<String, RawServerEntry>,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout: u64,
}

fn default_tool_timeout() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawServerEntry {
    #[serde(default)]
    pub transport: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
}

/// A server entry resolved to exactly one transport kind.
#[derive(Debug, Clone)]
pub enum ServerSpec {
    Stdio {
        name: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    },
    Sse {
        name: String,
        url: String,
        headers: HashMap<String, String>,
    },
}

impl RawServerEntry {
    pub fn resolve(self, name: &str) -> Result<Option<ServerSpec>, ConfigError> {
        if self.disabled {
            crate::log(format!("[config] server '{}' is disabled, skipping", name));
            return Ok(None);
        }

        let transport = match self.transport.as_deref() {
            Some(t) => Some(t),
            None => match (&self.url, &self.command) {
                (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTransport(name.to_string())),
                (Some(_), None) => Some("sse"),
                (None, Some(_)) => Some("stdio"),
                (None, None) => None,
            },
        };

        match transport {
            Some("stdio") | None if self.command.is_some() => Ok(Some(ServerSpec::Stdio {
                name: name.to_string(),
                command: self.command.unwrap(),
                args: self.args,
                env: self.env,
                cwd: self.cwd,
            })),
            Some("sse") if self.url.is_some() => Ok(Some(ServerSpec::Sse {
                name: name.to_string(),
                url: self.url.unwrap(),
                headers: self.headers,
            })),
            _ => Err(ConfigError::AmbiguousTransport(name.to_string())),
        }
    }
}

impl McpConfig {
    pub fn into_specs(self) -> Result<Vec<ServerSpec>, ConfigError> {
        let mut specs = Vec::new();
        for (name, entry) in self.mcp_servers {
            if let Some(spec) = entry.resolve(&name)? {
                specs.push(spec);
            }
        }
        Ok(specs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    #[serde(default)]
    pub title: Option<String>,
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub system_message_file: Option<String>,
    #[serde(default)]
    pub system_message_files: Vec<String>,
    #[serde(default)]
    pub is_reasoning: bool,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ModelsConfig {
    /// Exact match on `model` or `title` -> `default:true` entry -> first
    /// entry -> `ConfigError::NoSuitableModel`.
    pub fn select(&self, requested: Option<&str>) -> Result<&ModelEntry, ConfigError> {
        if let Some(name) = requested {
            if let Some(found) = self
                .models
                .iter()
                .find(|m| m.model == name || m.title.as_deref() == Some(name))
            {
                return Ok(found);
            }
        }
        if let Some(default) = self.models.iter().find(|m| m.default) {
            return Ok(default);
        }
        self.models.first().ok_or(ConfigError::NoSuitableModel)
    }
}

pub fn load_mcp_config(path: &Path) -> Result<McpConfig, ConfigError> {
    load_document(path)
}

pub fn load_models_config(path: &Path) -> Result<ModelsConfig, ConfigError> {
    load_document(path)
}

fn load_document<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound(path.to_path_buf()))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );

    if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: anyhow_compat::ParseError::Yaml(e),
        })
    } else {
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: anyhow_compat::ParseError::Json(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_exact_model_name() {
        let cfg = ModelsConfig {
            models: vec![
                ModelEntry {
                    title: Some("fast".into()),
                    model: "gpt-4o-mini".into(),
                    provider: "openai".into(),
                    default: false,
                    system_message: None,
                    system_message_file: None,
                    system_message_files: vec![],
                    is_reasoning: false,
                    reasoning_effort: None,
                    api_key: None,
                    base_url: None,
                    temperature: None,
                    max_tokens: None,
                },
                ModelEntry {
                    title: Some("smart".into()),
                    model: "gpt-4o".into(),
                    provider: "openai".into(),
                    default: true,
                    system_message: None,
                    system_message_file: None,
                    system_message_files: vec![],
                    is_reasoning: false,
                    reasoning_effort: None,
                    api_key: None,
                    base_url: None,
                    temperature: None,
                    max_tokens: None,
                },
            ],
        };

        assert_eq!(cfg.select(Some("gpt-4o-mini")).unwrap().model, "gpt-4o-mini");
        assert_eq!(cfg.select(Some("fast")).unwrap().model, "gpt-4o-mini");
        assert_eq!(cfg.select(None).unwrap().model, "gpt-4o");
    }

    #[test]
    fn errors_when_nothing_matches_and_no_default() {
        let cfg = ModelsConfig { models: vec![] };
        assert!(matches!(cfg.select(None), Err(ConfigError::NoSuitableModel)));
    }

    #[test]
    fn rejects_ambiguous_transport() {
        let entry = RawServerEntry {
            transport: None,
            command: Some("node".into()),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            url: Some("http://localhost:1234".into()),
            headers: HashMap::new(),
            disabled: false,
        };
        assert!(matches!(
            entry.resolve("both"),
            Err(ConfigError::AmbiguousTransport(_))
        ));
    }

    #[test]
    fn disabled_entry_resolves_to_none() {
        let entry = RawServerEntry {
            transport: None,
            command: Some("node".into()),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            disabled: true,
        };
        assert!(entry.resolve("srv").unwrap().is_none());
    }
}
