// YAML configuration for the clarity CLI

use crate::digest::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_TEMPERATURE};
use crate::mail::{DEFAULT_QUERY, MailAccount};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Overrides `ai.api_key` when set
pub const AI_API_KEY_ENV: &str = "CLARITY_AI_API_KEY";

const REDACTED: &str = "********";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorKind {
    #[default]
    None,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    pub kind: MirrorKind,
    pub path: Option<PathBuf>,
    pub poll_interval_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            kind: MirrorKind::None,
            path: None,
            poll_interval_ms: 2000,
        }
    }
}

impl MirrorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub query: String,
    pub accounts: Vec<MailAccount>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            query: DEFAULT_QUERY.to_string(),
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Settings file contents
///
/// ```yaml
/// store_dir: ~/.local/share/clarity
/// mirror:
///   kind: directory
///   path: ~/Sync/clarity
///   poll_interval_ms: 2000
/// mail:
///   query: newer_than:1d
///   accounts:
///     - name: personal
///       token: ya29...
/// ai:
///   api_key: csk-...
///   model: llama3.1-8b
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store_dir: PathBuf,
    pub mirror: MirrorConfig,
    pub mail: MailConfig,
    pub ai: AiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            mirror: MirrorConfig::default(),
            mail: MailConfig::default(),
            ai: AiConfig::default(),
        }
    }
}

impl Config {
    /// `<config dir>/clarity/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("clarity").join("config.yaml"))
    }

    /// Load from `path`, or the default location. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path).context(format!("Failed to read config {}", path.display()))?;
        let config = Self::from_yaml(&raw).context(format!("Failed to parse config {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply environment overrides on top of the file values
    pub fn with_env(self) -> Self {
        self.with_api_key_override(std::env::var(AI_API_KEY_ENV).ok())
    }

    fn with_api_key_override(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|key| !key.is_empty()) {
            self.ai.api_key = Some(key);
        }
        self
    }

    /// Copy safe to print: tokens and keys masked
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.ai.api_key.is_some() {
            config.ai.api_key = Some(REDACTED.to_string());
        }
        for account in &mut config.mail.accounts {
            if account.token.is_some() {
                account.token = Some(REDACTED.to_string());
            }
        }
        config
    }
}

/// `<data dir>/clarity`, or `./.clarity` when no data dir is known
pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("clarity"))
        .unwrap_or_else(|| PathBuf::from(".clarity"))
}
