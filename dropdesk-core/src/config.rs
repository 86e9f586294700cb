use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::DropdeskError;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct DropdeskConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub connection: RetryPolicy,
    #[serde(default)]
    pub sessions: SessionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    /// Default tracing level; `RUST_LOG` directives still apply on top.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Parsed `log_level`, INFO when unrecognised.
    pub fn level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    #[serde(default)]
    pub seed_on_start: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Falls back to `OPENAI_API_KEY` when empty.
    pub api_key: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 512,
            timeout_secs: 30,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        if !self.api_key.is_empty() {
            return Some(self.api_key.clone());
        }
        std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionsConfig {
    pub reaper_enabled: bool,
    pub reaper_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            reaper_enabled: true,
            reaper_interval_secs: 60,
            idle_timeout_secs: 30 * 60,
        }
    }
}

impl DropdeskConfig {
    /// Load from a TOML file, then apply `DROPDESK__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, DropdeskError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("DROPDESK").separator("__"))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    /// Minimal config for `--memory` dev mode and tests.
    pub fn in_memory() -> Self {
        Self {
            service: ServiceConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                seed_on_start: true,
            },
            http: HttpConfig::default(),
            llm: LlmConfig::default(),
            connection: RetryPolicy::default(),
            sessions: SessionsConfig::default(),
        }
    }
}
