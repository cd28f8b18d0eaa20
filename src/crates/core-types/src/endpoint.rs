use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(alias = "open_ai")]
    Openai,
    #[serde(alias = "azure")]
    AzureOpenai,
    Anthropic,
    /// Local runtime speaking NDJSON.
    Ollama,
    /// Hosted bot platform (`bot_id`/`user_id` conversation API).
    CustomBot,
}

/// One redundant API endpoint for a model. Immutable value object.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub provider: ProviderKind,
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default URL. Supports `{host}`, `{model}`
    /// and `{api_version}` placeholders.
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

impl EndpointConfig {
    pub fn new(provider: ProviderKind, host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            host: host.into(),
            api_key: api_key.into(),
            url_template: None,
            api_version: None,
            bot_id: None,
            user_id: None,
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = Some(template.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_bot(mut self, bot_id: impl Into<String>, user_id: Option<String>) -> Self {
        self.bot_id = Some(bot_id.into());
        self.user_id = user_id;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Host without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("provider", &self.provider)
            .field("host", &self.host)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("url_template", &self.url_template)
            .field("api_version", &self.api_version)
            .field("bot_id", &self.bot_id)
            .field("user_id", &self.user_id)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}
