use chorus_core_types::UsageDelta;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
pub struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<OpenAIUsage> for UsageDelta {
    fn from(usage: OpenAIUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    /// DeepSeek-style reasoning field.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// OpenRouter-style reasoning field.
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One `chat.completion.chunk` SSE payload.
#[derive(Debug, Default, Deserialize)]
pub struct OpenAIStreamChunk {
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<OpenAIUsage>,
}

impl OpenAIStreamChunk {
    /// `(content, reasoning)` of the first choice.
    pub fn first_delta(&mut self) -> (Option<String>, Option<String>) {
        let Some(delta) = self.choices.first_mut().and_then(|choice| choice.delta.take()) else {
            return (None, None);
        };
        let reasoning = delta.reasoning_content.or(delta.reasoning);
        (delta.content, reasoning)
    }

    pub fn take_usage(&mut self) -> Option<UsageDelta> {
        self.usage.take().map(UsageDelta::from)
    }
}

/// Error message carried by an `{"error": ...}` envelope, if present.
pub fn extract_api_error_message(event_json: &Value) -> Option<String> {
    let error = event_json.get("error")?;
    if error.is_null() {
        return None;
    }
    if let Some(message) = error.get("message").and_then(|value| value.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}
