use super::ExtractedDelta;
use crate::request::{resolve_url, ProviderRequest};
use crate::types::coze::{
    BotChat, BotErrorDetail, BotMessage, EVENT_CHAT_COMPLETED, EVENT_CHAT_FAILED, EVENT_ERROR,
    EVENT_MESSAGE_DELTA,
};
use anyhow::Result;
use chorus_core_types::{CanonicalRequest, ChatMessage, EndpointConfig, MessageRole, StreamFraming, UsageDelta};
use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};

const BOT_URL_TEMPLATE: &str = "{host}/v3/chat";
const DEFAULT_USER_ID: &str = "chorus";

fn convert_message(message: &ChatMessage) -> Value {
    match &message.image {
        Some(image) => {
            let parts = json!([
                {"type": "text", "text": message.content},
                {"type": "image", "file_url": image.url},
            ]);
            json!({
                "role": message.role.as_str(),
                "content": parts.to_string(),
                "content_type": "object_string",
            })
        }
        None => json!({
            "role": message.role.as_str(),
            "content": message.content,
            "content_type": "text",
        }),
    }
}

pub(super) fn build_request(request: &CanonicalRequest, config: &EndpointConfig) -> Result<ProviderRequest> {
    // The bot's persona is configured on the platform; system messages have no slot here.
    let additional_messages = request
        .messages
        .iter()
        .filter(|message| {
            let keep = message.role != MessageRole::System;
            if !keep {
                debug!("Dropping system message for bot request: model={}", request.model);
            }
            keep
        })
        .map(convert_message)
        .collect::<Vec<_>>();

    let bot_id = config.bot_id.as_deref().unwrap_or(&request.model);
    if bot_id.trim().is_empty() {
        anyhow::bail!("bot endpoint has no bot id");
    }
    let user_id = config.user_id.as_deref().unwrap_or(DEFAULT_USER_ID);

    let body = json!({
        "bot_id": bot_id,
        "user_id": user_id,
        "stream": request.stream,
        "additional_messages": additional_messages,
    });

    let url = resolve_url(config, BOT_URL_TEMPLATE, &request.model, "");
    Ok(ProviderRequest::new(url, body, StreamFraming::Sse)
        .header("Authorization", format!("Bearer {}", config.api_key))
        .header("Accept", "text/event-stream"))
}

fn message_delta(payload: &Value) -> ExtractedDelta {
    let Ok(message) = BotMessage::deserialize(payload) else {
        return ExtractedDelta::default();
    };
    if message.message_type.is_some() && !message.is_answer() {
        return ExtractedDelta::default();
    }
    ExtractedDelta {
        content: message.content,
        reasoning: message.reasoning_content,
        ..Default::default()
    }
}

/// Bot platforms reuse payload shapes across events (a completed message
/// repeats the full answer), so the SSE event name decides what to read.
pub(super) fn extract_delta(event: Option<&str>, payload: &Value) -> ExtractedDelta {
    match event {
        Some(EVENT_MESSAGE_DELTA) => message_delta(payload),
        Some(EVENT_CHAT_COMPLETED) => {
            let usage = BotChat::deserialize(payload).ok().and_then(|chat| chat.usage);
            ExtractedDelta {
                usage: usage.map(UsageDelta::from),
                ..Default::default()
            }
        }
        Some(EVENT_CHAT_FAILED) => {
            let detail = BotChat::deserialize(payload)
                .ok()
                .and_then(|chat| chat.last_error)
                .unwrap_or_default();
            ExtractedDelta::error(detail.describe())
        }
        Some(EVENT_ERROR) => {
            let detail = BotErrorDetail::deserialize(payload).unwrap_or_default();
            ExtractedDelta::error(detail.describe())
        }
        Some(_) => ExtractedDelta::default(),
        // Without an event name only an explicit answer chunk is trusted.
        None => match payload.get("type").and_then(Value::as_str) {
            Some("answer") => message_delta(payload),
            _ => ExtractedDelta::default(),
        },
    }
}
