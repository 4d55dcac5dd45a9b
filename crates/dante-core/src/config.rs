use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DanteError, Result};
use crate::types::AgentType;

pub const ENV_BACKEND_URL: &str = "DANTE_BACKEND_URL";
pub const ENV_BACKEND_KEY: &str = "DANTE_BACKEND_KEY";
pub const ENV_FLOW_HOST: &str = "DANTE_FLOW_HOST";
pub const ENV_FLOW_ID: &str = "DANTE_FLOW_ID";
pub const ENV_FLOW_ID_NOTARIAL: &str = "DANTE_FLOW_ID_NOTARIAL";
pub const ENV_FLOW_API_KEY: &str = "DANTE_FLOW_API_KEY";

/// Top-level configuration for Dante.
///
/// Loaded from `~/.dante/config.toml` by default. The same file serves the
/// backend (`dante serve`) and the chat client; each reads the sections it
/// needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DanteConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub flow: FlowConfig,
    #[serde(default)]
    pub sender: SenderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl DanteConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DanteConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay the `DANTE_*` environment variables on top of file values.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_BACKEND_URL) {
            self.client.backend_url = v;
        }
        if let Some(v) = get(ENV_BACKEND_KEY) {
            self.client.backend_key = v;
        }
        if let Some(v) = get(ENV_FLOW_HOST) {
            self.flow.host = v;
        }
        if let Some(v) = get(ENV_FLOW_ID) {
            self.flow.flow_id = v;
        }
        if let Some(v) = get(ENV_FLOW_ID_NOTARIAL) {
            self.flow.notarial_flow_id = Some(v);
        }
        if let Some(v) = get(ENV_FLOW_API_KEY) {
            self.flow.api_key = Some(v);
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database, avatars and the client cache.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.dante/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl GeneralConfig {
    /// The data directory with a leading `~` expanded to the home directory.
    pub fn data_path(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }
}

/// Expand `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// Backend HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Public key every client request must present in the `apikey` header.
    pub public_key: String,
    /// Externally reachable base URL, used to build confirmation and
    /// recovery links and avatar URLs.
    pub public_url: String,
    /// Largest accepted avatar upload.
    pub max_avatar_bytes: usize,
    /// Requests per second allowed on protected routes.
    pub rate_limit_per_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3040,
            public_key: "dante-public-key".to_string(),
            public_url: "http://127.0.0.1:3040".to_string(),
            max_avatar_bytes: 2 * 1024 * 1024,
            rate_limit_per_sec: 50,
        }
    }
}

/// Authentication policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether sign-in requires a confirmed email address.
    pub require_email_confirmation: bool,
    /// Lifetime of an access token.
    pub session_ttl_hours: u32,
    /// Lifetime of a password recovery link.
    pub recovery_ttl_minutes: u32,
    /// Minimum accepted password length.
    pub min_password_len: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            require_email_confirmation: true,
            session_ttl_hours: 168,
            recovery_ttl_minutes: 60,
            min_password_len: crate::validation::MIN_PASSWORD_LEN,
        }
    }
}

/// Where the chat client finds the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `http://127.0.0.1:3040`.
    pub backend_url: String,
    /// Public key sent in the `apikey` header.
    pub backend_key: String,
}

/// External conversational flow engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Flow engine host URL.
    pub host: String,
    /// Flow id used for the registry specialist.
    pub flow_id: String,
    /// Flow id for the notarial specialist; falls back to `flow_id`.
    pub notarial_flow_id: Option<String>,
    /// Optional `x-api-key` header value.
    pub api_key: Option<String>,
    /// Upper bound on a single flow call. Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            flow_id: String::new(),
            notarial_flow_id: None,
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// Persistence sender retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub initial_backoff_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
        }
    }
}

/// Chat behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Characters of the first message kept in a derived session title.
    pub title_max_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            title_max_chars: 50,
        }
    }
}

/// Fully resolved client settings. Every required value is present.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub backend_url: String,
    pub backend_key: String,
    pub flow_host: String,
    pub flow_id: String,
    pub notarial_flow_id: Option<String>,
    pub flow_api_key: Option<String>,
    pub flow_timeout_secs: u64,
}

impl ClientSettings {
    /// Resolve client settings from a config whose env overrides are already
    /// applied. Fails naming the first missing variable.
    pub fn resolve(config: &DanteConfig) -> Result<Self> {
        fn required(value: &str, var: &str) -> Result<String> {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(DanteError::Config(format!(
                    "{} is not set (environment or config file)",
                    var
                )));
            }
            Ok(trimmed.trim_end_matches('/').to_string())
        }

        Ok(Self {
            backend_url: required(&config.client.backend_url, ENV_BACKEND_URL)?,
            backend_key: required(&config.client.backend_key, ENV_BACKEND_KEY)?,
            flow_host: required(&config.flow.host, ENV_FLOW_HOST)?,
            flow_id: required(&config.flow.flow_id, ENV_FLOW_ID)?,
            notarial_flow_id: config
                .flow
                .notarial_flow_id
                .clone()
                .filter(|id| !id.trim().is_empty()),
            flow_api_key: config
                .flow
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            flow_timeout_secs: config.flow.timeout_secs,
        })
    }

    /// Flow id that serves the given agent type.
    pub fn flow_id_for(&self, agent: AgentType) -> &str {
        match agent {
            AgentType::Notarial => self.notarial_flow_id.as_deref().unwrap_or(&self.flow_id),
            AgentType::Registral => &self.flow_id,
        }
    }
}
