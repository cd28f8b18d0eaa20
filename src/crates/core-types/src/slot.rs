use serde::{Deserialize, Serialize};

/// Lifecycle status of a response slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Streaming,
    Success,
    Error,
    Cancelled,
}

impl SlotStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Streaming => 1,
            Self::Success | Self::Error | Self::Cancelled => 2,
        }
    }

    /// Forward-only transitions. `pending -> success` is not allowed: a
    /// successful response always streams first.
    pub fn can_transition_to(self, next: SlotStatus) -> bool {
        if self == Self::Pending && next == Self::Success {
            return false;
        }
        next.rank() > self.rank()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotErrorKind {
    Network,
    Http,
    Provider,
    Stream,
    Timeout,
    Config,
}

/// Last error observed by a slot, shown in place of content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotError {
    pub kind: SlotErrorKind,
    pub message: String,
    /// HTTP status for `Http` errors.
    #[serde(default)]
    pub status: Option<u16>,
}

impl SlotError {
    pub fn new(kind: SlotErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: SlotErrorKind::Http,
            message: message.into(),
            status: Some(status),
        }
    }
}

impl std::fmt::Display for SlotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "{:?} {}: {}", self.kind, status, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// How a slot's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum TerminalStatus {
    Success,
    Error(SlotError),
    Cancelled,
}

impl TerminalStatus {
    pub fn slot_status(&self) -> SlotStatus {
        match self {
            Self::Success => SlotStatus::Success,
            Self::Error(_) => SlotStatus::Error,
            Self::Cancelled => SlotStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Partial usage report. Providers split counters across events (prompt
/// tokens at stream start, completion tokens at the end), so only populated
/// fields overwrite the accumulated counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageDelta {
    #[serde(default)]
    pub prompt_tokens: Option<u32>,
    #[serde(default)]
    pub completion_tokens: Option<u32>,
    #[serde(default)]
    pub total_tokens: Option<u32>,
}

impl UsageDelta {
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
    }
}

impl TokenUsage {
    pub fn apply(&mut self, delta: &UsageDelta) {
        if let Some(prompt) = delta.prompt_tokens {
            self.prompt_tokens = prompt;
        }
        if let Some(completion) = delta.completion_tokens {
            self.completion_tokens = completion;
        }
        self.total_tokens = match delta.total_tokens {
            Some(total) => total,
            None => self.prompt_tokens.saturating_add(self.completion_tokens),
        };
    }
}

/// Snapshot of one response slot as seen by readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotState {
    pub status: SlotStatus,
    pub content: String,
    pub reasoning: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub last_error: Option<SlotError>,
    /// Incremented every time the slot is retried.
    pub generation: u64,
    #[serde(default)]
    pub started_at_ms: Option<i64>,
    #[serde(default)]
    pub finished_at_ms: Option<i64>,
}

impl SlotState {
    pub fn pending(generation: u64) -> Self {
        Self {
            status: SlotStatus::Pending,
            content: String::new(),
            reasoning: String::new(),
            usage: None,
            last_error: None,
            generation,
            started_at_ms: None,
            finished_at_ms: None,
        }
    }
}
