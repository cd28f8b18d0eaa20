use super::ExtractedDelta;
use crate::request::{resolve_url, ProviderRequest};
use crate::types::ollama::OllamaChunk;
use anyhow::Result;
use chorus_core_types::{CanonicalRequest, ChatMessage, EndpointConfig, StreamFraming};
use log::warn;
use serde::Deserialize;
use serde_json::{json, Value};

const OLLAMA_URL_TEMPLATE: &str = "{host}/api/chat";

fn convert_message(message: &ChatMessage) -> Value {
    let mut converted = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if let Some(image) = &message.image {
        match image.as_base64() {
            Some((_, data)) => converted["images"] = json!([data]),
            None => warn!("Local runtime only accepts inline images; dropping image url={}", image.url),
        }
    }
    converted
}

pub(super) fn build_request(request: &CanonicalRequest, config: &EndpointConfig) -> Result<ProviderRequest> {
    let mut body = json!({
        "model": request.model,
        "messages": request.messages.iter().map(convert_message).collect::<Vec<_>>(),
        "stream": request.stream,
    });

    let mut options = serde_json::Map::new();
    if let Some(temperature) = request.temperature {
        options.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        options.insert("num_predict".to_string(), json!(max_tokens));
    }
    if !options.is_empty() {
        body["options"] = Value::Object(options);
    }

    let url = resolve_url(config, OLLAMA_URL_TEMPLATE, &request.model, "");
    let built = ProviderRequest::new(url, body, StreamFraming::Ndjson).header("Accept", "application/x-ndjson");
    if config.api_key.is_empty() {
        Ok(built)
    } else {
        Ok(built.header("Authorization", format!("Bearer {}", config.api_key)))
    }
}

pub(super) fn extract_delta(payload: &Value) -> ExtractedDelta {
    let chunk = match OllamaChunk::deserialize(payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Skipping NDJSON line with unexpected shape: {}", e);
            return ExtractedDelta::default();
        }
    };
    if let Some(error) = chunk.error.clone() {
        return ExtractedDelta::error(error);
    }

    let usage = chunk.usage();
    let (content, reasoning) = match chunk.message {
        Some(message) => (message.content, message.thinking),
        None => (chunk.response, None),
    };
    ExtractedDelta {
        content,
        reasoning,
        usage,
        error: None,
    }
}
