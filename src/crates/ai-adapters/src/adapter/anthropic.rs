use super::ExtractedDelta;
use crate::request::{resolve_url, ProviderRequest};
use crate::types::anthropic::{AnthropicSSEError, ContentBlockDelta, Delta, MessageDelta, MessageStart};
use anyhow::Result;
use chorus_core_types::{CanonicalRequest, ChatMessage, EndpointConfig, MessageRole, StreamFraming, UsageDelta};
use log::{error, trace};
use serde::Deserialize;
use serde_json::{json, Value};

const ANTHROPIC_URL_TEMPLATE: &str = "{host}/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

fn convert_message(message: &ChatMessage) -> Value {
    let Some(image) = &message.image else {
        return json!({"role": message.role.as_str(), "content": message.content});
    };
    let source = match image.as_base64() {
        Some((media_type, data)) => json!({"type": "base64", "media_type": media_type, "data": data}),
        None => json!({"type": "url", "url": image.url}),
    };
    json!({
        "role": message.role.as_str(),
        "content": [
            {"type": "image", "source": source},
            {"type": "text", "text": message.content},
        ],
    })
}

pub(super) fn build_request(request: &CanonicalRequest, config: &EndpointConfig) -> Result<ProviderRequest> {
    let messages = request
        .messages
        .iter()
        .filter(|message| message.role != MessageRole::System)
        .map(convert_message)
        .collect::<Vec<_>>();
    if messages.is_empty() {
        anyhow::bail!("anthropic request for model '{}' has only system messages", request.model);
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "stream": request.stream,
    });
    if let Some(system) = request.system_text() {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    let url = resolve_url(config, ANTHROPIC_URL_TEMPLATE, &request.model, "");
    Ok(ProviderRequest::new(url, body, StreamFraming::Sse)
        .header("x-api-key", config.api_key.clone())
        .header("anthropic-version", ANTHROPIC_VERSION)
        .header("Accept", "text/event-stream"))
}

fn parse<'a, T: Deserialize<'a>>(event_type: &str, payload: &'a Value) -> Option<T> {
    match T::deserialize(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Anthropic SSE parsing error: event={}, error={}", event_type, e);
            None
        }
    }
}

/// Events carry their kind in `type`; the SSE `event:` name is only used when
/// the payload omits it.
pub(super) fn extract_delta(event: Option<&str>, payload: &Value) -> ExtractedDelta {
    let Some(event_type) = payload.get("type").and_then(Value::as_str).or(event) else {
        return ExtractedDelta::default();
    };
    trace!("Anthropic SSE: type={}", event_type);

    match event_type {
        "content_block_delta" => {
            let Some(block) = parse::<ContentBlockDelta>(event_type, payload) else {
                return ExtractedDelta::default();
            };
            match block.delta {
                Delta::TextDelta { text } => ExtractedDelta {
                    content: Some(text),
                    ..Default::default()
                },
                Delta::ThinkingDelta { thinking } => ExtractedDelta {
                    reasoning: Some(thinking),
                    ..Default::default()
                },
                Delta::Unknown => ExtractedDelta::default(),
            }
        }
        "message_start" => {
            let usage = parse::<MessageStart>(event_type, payload).and_then(|start| start.message.usage);
            ExtractedDelta {
                usage: usage.map(UsageDelta::from),
                ..Default::default()
            }
        }
        "message_delta" => {
            let usage = parse::<MessageDelta>(event_type, payload).and_then(|delta| delta.usage);
            ExtractedDelta {
                usage: usage.map(UsageDelta::from),
                ..Default::default()
            }
        }
        "error" => match parse::<AnthropicSSEError>(event_type, payload) {
            Some(sse_error) => ExtractedDelta::error(String::from(sse_error.error)),
            None => ExtractedDelta::error("Anthropic stream reported an error"),
        },
        _ => ExtractedDelta::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core_types::ImageRef;

    #[test]
    fn lifts_system_messages_and_defaults_max_tokens() {
        let mut user = ChatMessage::user("describe");
        user.image = Some(ImageRef::new("data:image/png;base64,QUJD"));
        let request = CanonicalRequest::new("claude-test", vec![ChatMessage::system("be terse"), user]);
        let config = EndpointConfig::new(chorus_core_types::ProviderKind::Anthropic, "https://api.example.com/v1", "ak");

        let built = build_request(&request, &config).unwrap();
        assert_eq!(built.url, "https://api.example.com/v1/messages");
        assert_eq!(built.header_value("x-api-key"), Some("ak"));
        assert_eq!(built.header_value("anthropic-version"), Some(ANTHROPIC_VERSION));
        assert_eq!(built.body["system"], json!("be terse"));
        assert_eq!(built.body["max_tokens"], json!(DEFAULT_MAX_TOKENS));
        assert_eq!(built.body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(built.body["messages"][0]["content"][0]["source"]["media_type"], json!("image/png"));
    }

    #[test]
    fn extracts_text_thinking_and_usage() {
        let text = extract_delta(None, &json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "text_delta", "text": "Hi"}
        }));
        assert_eq!(text.content.as_deref(), Some("Hi"));

        let thinking = extract_delta(None, &json!({
            "type": "content_block_delta", "index": 0,
            "delta": {"type": "thinking_delta", "thinking": "hmm"}
        }));
        assert_eq!(thinking.reasoning.as_deref(), Some("hmm"));

        let start = extract_delta(None, &json!({
            "type": "message_start",
            "message": {"id": "msg_1", "usage": {"input_tokens": 9, "output_tokens": 1}}
        }));
        assert_eq!(start.usage.unwrap().prompt_tokens, Some(9));

        let end = extract_delta(None, &json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 30}
        }));
        let usage = end.usage.unwrap();
        assert_eq!(usage.prompt_tokens, None);
        assert_eq!(usage.completion_tokens, Some(30));
    }

    #[test]
    fn error_event_becomes_provider_error() {
        let delta = extract_delta(Some("error"), &json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }));
        assert_eq!(delta.error.as_deref(), Some("overloaded_error: Overloaded"));
    }

    #[test]
    fn ping_and_stop_events_are_empty() {
        assert!(extract_delta(Some("ping"), &json!({"type": "ping"})).is_empty());
        assert!(extract_delta(None, &json!({"type": "message_stop"})).is_empty());
    }
}
