//! Configuration loading
//!
//! ```toml
//! [orchestrator]
//! request_timeout_secs = 300
//!
//! [[models]]
//! id = "gpt-4o-mini"
//! [[models.endpoints]]
//! provider = "openai"
//! host = "https://api.openai.com/v1"
//! api_key = "env:OPENAI_API_KEY"
//! ```

use crate::util::errors::{ChorusError, ChorusResult};
use chorus_core_types::EndpointConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix marking an API key to be read from the environment.
pub const ENV_KEY_PREFIX: &str = "env:";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChorusConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Whole-request limit per slot; 0 disables it.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Longest silence allowed between two body chunks.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Capacity of the chat event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_event_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// 0 disables the background sweeper.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

fn default_cache_max_size() -> usize {
    256
}

fn default_cache_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// A model id and its redundant endpoints, tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl ChorusConfig {
    /// `<config_dir>/chorus/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chorus").join("config.toml"))
    }

    pub fn load(path: &Path) -> ChorusResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChorusError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        debug!("Loading config: path={}", path.display());
        Self::from_toml_str(&content)
    }

    /// Parses, resolves `env:` keys and validates.
    pub fn from_toml_str(content: &str) -> ChorusResult<Self> {
        let mut config: ChorusConfig = toml::from_str(content)?;
        config.resolve_env_keys(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replaces `env:NAME` api keys through `lookup`. Unset variables leave an
    /// empty key, which local endpoints accept and hosted ones reject at
    /// request time.
    pub fn resolve_env_keys(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for model in &mut self.models {
            for endpoint in &mut model.endpoints {
                let Some(name) = endpoint.api_key.strip_prefix(ENV_KEY_PREFIX) else {
                    continue;
                };
                let name = name.trim().to_string();
                endpoint.api_key = match lookup(&name) {
                    Some(value) => value,
                    None => {
                        warn!("API key variable is not set: model={}, variable={}", model.id, name);
                        String::new()
                    }
                };
            }
        }
    }

    pub fn validate(&self) -> ChorusResult<()> {
        if self.cache.max_size == 0 {
            return Err(ChorusError::Config("cache.max_size must be positive".to_string()));
        }
        if self.orchestrator.event_buffer == 0 {
            return Err(ChorusError::Config("orchestrator.event_buffer must be positive".to_string()));
        }
        if self.orchestrator.idle_timeout_secs == 0 {
            return Err(ChorusError::Config("orchestrator.idle_timeout_secs must be positive".to_string()));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.id.trim().is_empty() {
                return Err(ChorusError::Config("model id must not be empty".to_string()));
            }
            if !seen.insert(model.id.as_str()) {
                return Err(ChorusError::Config(format!("duplicate model id '{}'", model.id)));
            }
            for (index, endpoint) in model.endpoints.iter().enumerate() {
                if endpoint.host.trim().is_empty() {
                    return Err(ChorusError::Config(format!(
                        "model '{}' endpoint {} has an empty host",
                        model.id, index
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn model(&self, id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|model| model.id == id)
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|model| model.id.clone()).collect()
    }
}
