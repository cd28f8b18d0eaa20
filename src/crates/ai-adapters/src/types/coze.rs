use chorus_core_types::UsageDelta;
use serde::Deserialize;

pub const EVENT_MESSAGE_DELTA: &str = "conversation.message.delta";
pub const EVENT_CHAT_COMPLETED: &str = "conversation.chat.completed";
pub const EVENT_CHAT_FAILED: &str = "conversation.chat.failed";
pub const EVENT_ERROR: &str = "error";

/// `conversation.message.*` payload.
#[derive(Debug, Default, Deserialize)]
pub struct BotMessage {
    #[serde(rename = "type", default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl BotMessage {
    pub fn is_answer(&self) -> bool {
        self.message_type.as_deref() == Some("answer")
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BotUsage {
    #[serde(default)]
    pub token_count: Option<u32>,
    #[serde(default)]
    pub output_count: Option<u32>,
    #[serde(default)]
    pub input_count: Option<u32>,
}

impl From<BotUsage> for UsageDelta {
    fn from(usage: BotUsage) -> Self {
        Self {
            prompt_tokens: usage.input_count,
            completion_tokens: usage.output_count,
            total_tokens: usage.token_count,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BotErrorDetail {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl BotErrorDetail {
    pub fn describe(&self) -> String {
        match (self.code, self.msg.as_deref()) {
            (Some(code), Some(msg)) => format!("{} (code {})", msg, code),
            (None, Some(msg)) => msg.to_string(),
            (Some(code), None) => format!("bot platform error code {}", code),
            (None, None) => "bot platform error".to_string(),
        }
    }
}

/// `conversation.chat.*` payload.
#[derive(Debug, Default, Deserialize)]
pub struct BotChat {
    #[serde(default)]
    pub usage: Option<BotUsage>,
    #[serde(default)]
    pub last_error: Option<BotErrorDetail>,
}
