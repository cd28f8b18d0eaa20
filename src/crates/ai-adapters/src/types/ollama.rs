use chorus_core_types::UsageDelta;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct OllamaMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub thinking: Option<String>,
}

/// One NDJSON line from `/api/chat` (or `/api/generate`, which uses `response`).
#[derive(Debug, Default, Deserialize)]
pub struct OllamaChunk {
    #[serde(default)]
    pub message: Option<OllamaMessage>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl OllamaChunk {
    /// Counters are only reported on the final (`done`) line.
    pub fn usage(&self) -> Option<UsageDelta> {
        if !self.done || (self.prompt_eval_count.is_none() && self.eval_count.is_none()) {
            return None;
        }
        Some(UsageDelta {
            prompt_tokens: self.prompt_eval_count,
            completion_tokens: self.eval_count,
            total_tokens: None,
        })
    }
}
