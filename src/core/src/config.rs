use serde::Deserialize;

use crate::paths::mnemo_config_path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MnemoConfig {
    pub version: u32,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub chat: ChatConfig,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            version: 1,
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl MnemoConfig {
    /// Load `~/.mnemo/config.toml`, falling back to defaults when absent.
    pub fn load() -> Result<Self, String> {
        let path = mnemo_config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path).map_err(|e| format!("read config.toml: {e}"))?;
        toml::from_str(&raw).map_err(|e| format!("parse config.toml: {e}"))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the chat backend.
    pub base_url: String,
    pub connect_timeout_secs: u64,
    /// Timeout for plain (non-streaming) requests.
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8600".to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Title assigned to threads created without one.
    pub default_thread_title: String,
    /// Capacity of the session update channel.
    pub update_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_thread_title: "New conversation".to_string(),
            update_buffer: 256,
        }
    }
}
