use crate::slot::UsageDelta;
use serde::{Deserialize, Serialize};

/// Wire framing of a streaming response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFraming {
    /// `data:`-prefixed lines, terminated by a `[DONE]` sentinel.
    Sse,
    /// One JSON document per line, terminated by connection close.
    Ndjson,
}

impl StreamFraming {
    /// Framing declared by a `Content-Type` header, if it names one.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let content_type = content_type.to_ascii_lowercase();
        if content_type.contains("ndjson") {
            Some(Self::Ndjson)
        } else if content_type.contains("text/event-stream") {
            Some(Self::Sse)
        } else {
            None
        }
    }
}

/// One incremental update decoded from a response stream.
///
/// Transient: produced by the decoder and consumed exactly once by the
/// dispatcher that owns the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DeltaEvent {
    Content(String),
    Reasoning(String),
    Usage(UsageDelta),
    /// Well-formed error envelope received inside a successful stream.
    ProviderError(String),
    Done,
}

impl DeltaEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}
