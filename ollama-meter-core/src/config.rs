use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::trace_fields::{EnvSource, ProcessEnv};

pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";
pub const ENV_METERING_API_KEY: &str = "REVENIUM_METERING_API_KEY";
pub const ENV_METERING_BASE_URL: &str = "REVENIUM_METERING_BASE_URL";
pub const ENV_LOG_LEVEL: &str = "REVENIUM_LOG_LEVEL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct OllamaCfg {
    #[serde(default = "default_ollama_base")]
    pub base_url: String,
}

impl Default for OllamaCfg {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base(),
        }
    }
}

fn default_ollama_base() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MeteringCfg {
    /// Metering API key. Only ever read from `REVENIUM_METERING_API_KEY`.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_metering_base")]
    pub base_url: String,
    /// Records waiting for submission beyond this are dropped with a warning.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for MeteringCfg {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_metering_base(),
            queue_capacity: default_queue_capacity(),
            enabled: default_enabled(),
        }
    }
}

fn default_metering_base() -> String {
    "https://api.revenium.ai".to_string()
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_enabled() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 60000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaCfg,
    #[serde(default)]
    pub metering: MeteringCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::MeterError::from)?;
        let s =
            std::str::from_utf8(&bytes).map_err(|e| crate::error::MeterError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::MeterError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::MeterError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::MeterError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::MeterError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env(&ProcessEnv);
        cfg
    }

    /// Environment values win over whatever the file said.
    pub fn apply_env(&mut self, env: &dyn EnvSource) {
        if let Some(host) = env.var(ENV_OLLAMA_HOST) {
            self.ollama.base_url = normalize_host(&host);
        }
        if let Some(key) = env.var(ENV_METERING_API_KEY) {
            self.metering.api_key = Some(SecretString::new(key.into()));
        }
        if let Some(base) = env.var(ENV_METERING_BASE_URL) {
            self.metering.base_url = base.trim_end_matches('/').to_string();
        }
    }
}

// OLLAMA_HOST is commonly given as a bare "host:port".
fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}
