use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, ValetError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Any OpenAI-compatible endpoint works here.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
            base_url: default_llm_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
}

fn default_redirect_uri() -> String {
    "http://localhost:8080/oauth/callback".to_string()
}

fn default_callback_port() -> u16 {
    8080
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            callback_port: default_callback_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "valet.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Messages of recent history included in each completion request.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Refresh the access token this many seconds before its actual expiry.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: i64,
    /// Extra attempts for read-only tools on retryable remote failures.
    #[serde(default = "default_remote_retry_max")]
    pub remote_retry_max: u32,
    /// Overall deadline for one chat turn.
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_history_window() -> usize {
    12
}

fn default_refresh_margin() -> i64 {
    60
}

fn default_remote_retry_max() -> u32 {
    1
}

fn default_turn_timeout() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            refresh_margin_secs: default_refresh_margin(),
            remote_retry_max: default_remote_retry_max(),
            turn_timeout_secs: default_turn_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Config {
    /// Load config: defaults → valet.toml → env vars (env wins).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ValetError::Config(format!("failed to read config: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| ValetError::Config(format!("failed to parse config: {e}")))?
        } else {
            Self::default()
        };

        if let Ok(v) = std::env::var("VALET_LLM_API_KEY") {
            config.llm.api_key = v;
        }
        if let Ok(v) = std::env::var("VALET_GOOGLE_CLIENT_ID") {
            config.google.client_id = v;
        }
        if let Ok(v) = std::env::var("VALET_GOOGLE_CLIENT_SECRET") {
            config.google.client_secret = v;
        }

        Ok(config)
    }
}
