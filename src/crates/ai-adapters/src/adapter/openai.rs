use super::ExtractedDelta;
use crate::request::{resolve_url, ProviderRequest};
use crate::types::openai::{extract_api_error_message, OpenAIStreamChunk};
use anyhow::Result;
use chorus_core_types::{CanonicalRequest, ChatMessage, EndpointConfig, ProviderKind, StreamFraming};
use log::{trace, warn};
use serde::Deserialize;
use serde_json::{json, Value};

const OPENAI_URL_TEMPLATE: &str = "{host}/chat/completions";
const AZURE_URL_TEMPLATE: &str = "{host}/deployments/{model}/chat/completions?api-version={api_version}";
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";
/// First Azure api-version that accepts `stream_options`.
const AZURE_STREAM_USAGE_SINCE: &str = "2024-09-01";

fn azure_accepts_stream_options(api_version: &str) -> bool {
    api_version
        .get(..AZURE_STREAM_USAGE_SINCE.len())
        .map_or(false, |date| date >= AZURE_STREAM_USAGE_SINCE)
}

fn convert_message(message: &ChatMessage) -> Value {
    match &message.image {
        Some(image) => json!({
            "role": message.role.as_str(),
            "content": [
                {"type": "text", "text": message.content},
                {"type": "image_url", "image_url": {"url": image.url}},
            ],
        }),
        None => json!({
            "role": message.role.as_str(),
            "content": message.content,
        }),
    }
}

pub(super) fn build_request(request: &CanonicalRequest, config: &EndpointConfig) -> Result<ProviderRequest> {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().map(convert_message).collect::<Vec<_>>(),
        "stream": request.stream,
    });
    let azure_api_version = (config.provider == ProviderKind::AzureOpenai)
        .then(|| config.api_version.as_deref().unwrap_or(DEFAULT_AZURE_API_VERSION));
    // Older Azure api-versions reject unknown arguments with a 400.
    if request.stream && azure_api_version.map_or(true, azure_accepts_stream_options) {
        body["stream_options"] = json!({"include_usage": true});
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    let built = if let Some(api_version) = azure_api_version {
        let url = resolve_url(config, AZURE_URL_TEMPLATE, &request.model, api_version);
        ProviderRequest::new(url, body, StreamFraming::Sse).header("api-key", config.api_key.clone())
    } else {
        let url = resolve_url(config, OPENAI_URL_TEMPLATE, &request.model, "");
        let built = ProviderRequest::new(url, body, StreamFraming::Sse);
        if config.api_key.is_empty() {
            built
        } else {
            built.header("Authorization", format!("Bearer {}", config.api_key))
        }
    };
    Ok(built.header("Accept", "text/event-stream"))
}

pub(super) fn extract_delta(payload: &Value) -> ExtractedDelta {
    if let Some(api_error_message) = extract_api_error_message(payload) {
        warn!("OpenAI stream carried an error envelope: {}", api_error_message);
        return ExtractedDelta::error(api_error_message);
    }

    let mut chunk = match OpenAIStreamChunk::deserialize(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Skipping OpenAI stream event with unexpected shape: {}", e);
            return ExtractedDelta::default();
        }
    };
    if let Some(reason) = chunk.choices.first().and_then(|choice| choice.finish_reason.as_deref()) {
        trace!("OpenAI finish_reason={}", reason);
    }

    let (content, reasoning) = chunk.first_delta();
    ExtractedDelta {
        content,
        reasoning,
        usage: chunk.take_usage(),
        error: None,
    }
}
