//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (default `~/.tilde/config.json`) and environment.
//! Every field has a default, so a missing file or section is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::protocol::{IdentifyProperties, Intents};
use crate::gateway::DEFAULT_HANDLER_QUEUE;
use crate::http::{HttpClient, Url, DEFAULT_READ_BUFFER_SIZE};
use crate::rest::{RestClient, DEFAULT_API_BASE};
use crate::tls::TlsConfig;
use crate::websocket::{WebSocketFactory, DEFAULT_RETRIES};

/// Env var holding the bot token; wins over `gateway.token`.
pub const TOKEN_ENV: &str = "DISCORD_CLIENT_TOKEN";
/// Env var overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "TILDE_CONFIG_PATH";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

/// Gateway connection and identify settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// WebSocket URL (default `wss://gateway.discord.gg/?v=10&encoding=json`).
    #[serde(default = "default_gateway_url")]
    pub url: String,

    /// Intent names, e.g. `["GUILD_MESSAGES", "MESSAGE_CONTENT"]`.
    #[serde(default = "default_intents")]
    pub intents: Vec<String>,

    /// Extra connect attempts after a timeout (default 5).
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Capacity of the dispatch handler queue.
    #[serde(default = "default_handler_queue")]
    pub handler_queue: usize,

    #[serde(default = "default_identify_name")]
    pub browser: String,

    #[serde(default = "default_identify_name")]
    pub device: String,

    /// Bot token. Overridden by DISCORD_CLIENT_TOKEN env.
    #[serde(default)]
    pub token: Option<String>,
}

/// HTTP client and REST settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    /// Base URL for REST calls (default `https://discord.com/api/v10`).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Bytes per socket read while accumulating a response.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_intents() -> Vec<String> {
    ["GUILD_MESSAGES", "DIRECT_MESSAGES", "MESSAGE_CONTENT"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_handler_queue() -> usize {
    DEFAULT_HANDLER_QUEUE
}

fn default_identify_name() -> String {
    "tilde".to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            intents: default_intents(),
            retries: default_retries(),
            connect_timeout_secs: default_connect_timeout_secs(),
            handler_queue: default_handler_queue(),
            browser: default_identify_name(),
            device: default_identify_name(),
            token: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl GatewayConfig {
    /// Parsed intent set; unknown names are an error.
    pub fn intents(&self) -> Result<Intents> {
        Intents::from_names(&self.intents)
            .map_err(|name| anyhow::anyhow!("unknown gateway intent: {}", name))
    }

    pub fn properties(&self) -> IdentifyProperties {
        IdentifyProperties::new(self.browser.clone(), self.device.clone())
    }

    /// Connection factory for the configured gateway URL.
    pub fn factory(&self, tls: TlsConfig) -> Result<WebSocketFactory> {
        let url = Url::parse(&self.url)
            .with_context(|| format!("parsing gateway url {}", self.url))?;
        let factory = WebSocketFactory::from_url(&url)
            .with_context(|| format!("building connection factory for {}", self.url))?;
        Ok(factory
            .with_retries(self.retries)
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_tls(tls))
    }
}

impl HttpConfig {
    pub fn client(&self, tls: TlsConfig) -> HttpClient {
        HttpClient::new(tls).with_read_buffer_size(self.read_buffer_size)
    }

    pub fn rest(&self, tls: TlsConfig) -> RestClient {
        RestClient::new(self.api_base.clone(), self.client(tls))
    }
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Resolve the bot token: env DISCORD_CLIENT_TOKEN overrides config.
pub fn resolve_token(config: &Config) -> Option<String> {
    std::env::var(TOKEN_ENV)
        .ok()
        .and_then(|s| non_empty(&s))
        .or_else(|| config.gateway.token.as_deref().and_then(non_empty))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV).map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".tilde").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from `path`, the default path, or TILDE_CONFIG_PATH. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
