use chorus_core_types::{EndpointConfig, StreamFraming};
use serde_json::Value;

/// Fully built provider HTTP request. Always a `POST` with a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    /// Framing the provider is expected to answer with.
    pub framing: StreamFraming,
}

impl ProviderRequest {
    pub fn new(url: String, body: Value, framing: StreamFraming) -> Self {
        Self {
            url,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body,
            framing,
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn with_extra_headers(mut self, config: &EndpointConfig) -> Self {
        for (name, value) in &config.extra_headers {
            self.headers.push((name.clone(), value.clone()));
        }
        self
    }
}

/// Expands `{host}`, `{model}` and `{api_version}` in a URL template.
pub fn expand_url_template(template: &str, config: &EndpointConfig, model: &str, api_version: &str) -> String {
    template
        .replace("{host}", config.base_url())
        .replace("{model}", &urlencoding::encode(model))
        .replace("{api_version}", &urlencoding::encode(api_version))
}

/// URL for a request: the configured template if present, else `default_template`.
pub(crate) fn resolve_url(config: &EndpointConfig, default_template: &str, model: &str, api_version: &str) -> String {
    let template = config.url_template.as_deref().unwrap_or(default_template);
    expand_url_template(template, config, model, api_version)
}
