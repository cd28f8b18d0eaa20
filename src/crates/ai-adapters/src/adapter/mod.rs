//! Endpoint adapters
//!
//! One tagged variant per provider family. Each variant owns its request shape
//! and its typed extraction function; nothing at the call site inspects raw
//! provider JSON.

mod anthropic;
mod custom_bot;
mod ndjson;
mod openai;

use crate::request::ProviderRequest;
use anyhow::Result;
use chorus_core_types::{
    CanonicalRequest, DeltaEvent, EndpointConfig, ProviderKind, StreamFraming, UsageDelta,
};
use serde_json::Value;

/// Canonical fields pulled out of one provider stream event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub usage: Option<UsageDelta>,
    pub error: Option<String>,
}

impl ExtractedDelta {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.as_deref().map_or(true, str::is_empty)
            && self.reasoning.as_deref().map_or(true, str::is_empty)
            && self.usage.map_or(true, |usage| usage.is_empty())
            && self.error.is_none()
    }

    /// Appends one event per populated field: content, reasoning, usage, error.
    pub fn into_events(self, out: &mut Vec<DeltaEvent>) {
        if let Some(content) = self.content.filter(|text| !text.is_empty()) {
            out.push(DeltaEvent::Content(content));
        }
        if let Some(reasoning) = self.reasoning.filter(|text| !text.is_empty()) {
            out.push(DeltaEvent::Reasoning(reasoning));
        }
        if let Some(usage) = self.usage.filter(|usage| !usage.is_empty()) {
            out.push(DeltaEvent::Usage(usage));
        }
        if let Some(error) = self.error {
            out.push(DeltaEvent::ProviderError(error));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAdapter {
    /// OpenAI chat completions, including Azure deployments.
    OpenAiStyle,
    AnthropicStyle,
    /// Local runtimes answering with newline-delimited JSON.
    NdjsonStyle,
    CustomBotStyle,
}

impl EndpointAdapter {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Openai | ProviderKind::AzureOpenai => Self::OpenAiStyle,
            ProviderKind::Anthropic => Self::AnthropicStyle,
            ProviderKind::Ollama => Self::NdjsonStyle,
            ProviderKind::CustomBot => Self::CustomBotStyle,
        }
    }

    /// Framing this provider family answers with.
    pub fn framing(self) -> StreamFraming {
        match self {
            Self::NdjsonStyle => StreamFraming::Ndjson,
            Self::OpenAiStyle | Self::AnthropicStyle | Self::CustomBotStyle => StreamFraming::Sse,
        }
    }

    pub fn build_request(
        self,
        request: &CanonicalRequest,
        config: &EndpointConfig,
    ) -> Result<ProviderRequest> {
        if request.messages.is_empty() {
            anyhow::bail!("request for model '{}' has no messages", request.model);
        }
        if config.base_url().is_empty() {
            anyhow::bail!("endpoint for model '{}' has an empty host", request.model);
        }
        let built = match self {
            Self::OpenAiStyle => openai::build_request(request, config),
            Self::AnthropicStyle => anthropic::build_request(request, config),
            Self::NdjsonStyle => ndjson::build_request(request, config),
            Self::CustomBotStyle => custom_bot::build_request(request, config),
        }?;
        Ok(built.with_extra_headers(config))
    }

    /// Never fails: an event of an unexpected shape yields an empty delta.
    pub fn extract_delta(self, event: Option<&str>, payload: &Value) -> ExtractedDelta {
        match self {
            Self::OpenAiStyle => openai::extract_delta(payload),
            Self::AnthropicStyle => anthropic::extract_delta(event, payload),
            Self::NdjsonStyle => ndjson::extract_delta(payload),
            Self::CustomBotStyle => custom_bot::extract_delta(event, payload),
        }
    }
}
