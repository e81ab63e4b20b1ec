use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::ClientConfig;
use crate::paths::parlor_config_path;

pub const CONFIG_VERSION: u32 = 1;

/// On-disk configuration (`config.toml`). Every section and key is optional;
/// missing values fall back to [`ClientConfig::default`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParlorConfig {
    pub version: u32,
    pub endpoints: EndpointsConfig,
    pub transport: TransportConfig,
    pub chat: ChatConfig,
}

impl Default for ParlorConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            endpoints: EndpointsConfig::default(),
            transport: TransportConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl ParlorConfig {
    /// Load from the default location. A missing file is not an error.
    pub fn load() -> Result<Self, String> {
        Self::load_from(&parlor_config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| format!("read config.toml: {e}"))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let cfg: Self = toml::from_str(raw).map_err(|e| format!("parse config.toml: {e}"))?;
        if cfg.version != CONFIG_VERSION {
            return Err(format!(
                "config.toml version {} is not supported (expected {CONFIG_VERSION})",
                cfg.version
            ));
        }
        Ok(cfg)
    }

    pub fn config_path() -> Result<PathBuf, String> {
        parlor_config_path()
    }

    /// Overlay file values on the built-in defaults.
    pub fn to_client_config(&self) -> ClientConfig {
        let defaults = ClientConfig::default();
        let ms = Duration::from_millis;
        ClientConfig {
            graphql_url: self.endpoints.graphql_url.clone(),
            ws_url: self.endpoints.ws_url.clone(),
            connect_timeout: self
                .transport
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: self
                .transport
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            reconnect_base_delay: self
                .transport
                .reconnect_base_delay_ms
                .map(ms)
                .unwrap_or(defaults.reconnect_base_delay),
            reconnect_max_delay: self
                .transport
                .reconnect_max_delay_ms
                .map(ms)
                .unwrap_or(defaults.reconnect_max_delay),
            thinking_delay: ms(self.chat.thinking_delay_min_ms)..ms(self.chat.thinking_delay_max_ms),
            preview_chars: self.chat.preview_chars,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub graphql_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub reconnect_base_delay_ms: Option<u64>,
    pub reconnect_max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub thinking_delay_min_ms: u64,
    pub thinking_delay_max_ms: u64,
    pub preview_chars: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            thinking_delay_min_ms: 1000,
            thinking_delay_max_ms: 3000,
            preview_chars: 50,
        }
    }
}
