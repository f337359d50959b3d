//! Credential collaborator interface (§6, "Persisted OAuth credentials").
//!
//! The core never negotiates or refreshes tokens; it only reads whatever a
//! provider's own login flow already wrote to disk, through this trait. The
//! one implementation here reads the flat `{users, default}` shape described
//! in the spec and returns the `default` entry's token, if any.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub trait AuthProvider: Send + Sync {
    /// Returns the bearer token for `provider`, if a credentials file exists
    /// and carries a usable `default` entry.
    fn token(&self, provider: &str) -> Option<String>;
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    #[allow(dead_code)]
    users: HashMap<String, CredentialEntry>,
    #[serde(default)]
    default: Option<CredentialEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct CredentialEntry {
    token: String,
}

/// Reads `~/.dolphin/<provider>_credentials.json`. No refresh, no negotiation
/// — a missing or unreadable file simply yields `None`.
pub struct FileCredentialStore {
    home: PathBuf,
}

impl FileCredentialStore {
    pub fn new(home: PathBuf) -> Self {
        Self { home }
    }

    /// Resolves from the `HOME` environment variable, falling back to `.`
    /// when unset (matching `stdio::expand_home`'s own fallback).
    pub fn from_env() -> Self {
        let home = std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."));
        Self::new(home)
    }

    fn credentials_path(&self, provider: &str) -> PathBuf {
        self.home
            .join(".dolphin")
            .join(format!("{}_credentials.json", provider))
    }

    fn read(&self, path: &Path) -> Option<CredentialsFile> {
        let text = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }
}

impl AuthProvider for FileCredentialStore {
    fn token(&self, provider: &str) -> Option<String> {
        let path = self.credentials_path(provider);
        let file = self.read(&path)?;
        file.default.map(|entry| entry.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_none() {
        let store = FileCredentialStore::new(PathBuf::from("/nonexistent-dolphin-home"));
        assert_eq!(store.token("openai"), None);
    }

    #[test]
    fn reads_default_entry() {
        let dir = tempfile::tempdir().unwrap();
        let dolphin_dir = dir.path().join(".dolphin");
        std::fs::create_dir_all(&dolphin_dir).unwrap();
        std::fs::write(
            dolphin_dir.join("openai_credentials.json"),
            r#"{"users": {}, "default": {"token": "sk-test"}}"#,
        )
        .unwrap();

        let store = FileCredentialStore::new(dir.path().to_path_buf());
        assert_eq!(store.token("openai"), Some("sk-test".to_string()));
    }

    #[test]
    fn missing_default_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let dolphin_dir = dir.path().join(".dolphin");
        std::fs::create_dir_all(&dolphin_dir).unwrap();
        std::fs::write(dolphin_dir.join("anthropic_credentials.json"), r#"{"users": {}}"#).unwrap();

        let store = FileCredentialStore::new(dir.path().to_path_buf());
        assert_eq!(store.token("anthropic"), None);
    }
}
