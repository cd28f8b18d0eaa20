//! Error types for the core library.

use chorus_core_types::{SlotError, SlotErrorKind};
use thiserror::Error;

pub type ChorusResult<T> = Result<T, ChorusError>;

#[derive(Debug, Clone, Error)]
pub enum ChorusError {
    /// Connection, DNS or transport failure before a response arrived.
    #[error("network error: {0}")]
    Network(String),

    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    /// Well-formed error reported inside a successful stream.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl ChorusError {
    /// Whether the fallback chain should move on to the next endpoint:
    /// transport failures and 5xx responses only.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChorusError::Network(_) => true,
            ChorusError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn to_slot_error(&self) -> SlotError {
        match self {
            ChorusError::Network(message) => SlotError::new(SlotErrorKind::Network, message.clone()),
            ChorusError::Http { status, body } => SlotError::http(*status, body.clone()),
            ChorusError::Provider(message) => SlotError::new(SlotErrorKind::Provider, message.clone()),
            ChorusError::Stream(message) | ChorusError::Parse(message) => {
                SlotError::new(SlotErrorKind::Stream, message.clone())
            }
            ChorusError::Timeout(message) => SlotError::new(SlotErrorKind::Timeout, message.clone()),
            ChorusError::Cancelled => SlotError::new(SlotErrorKind::Stream, "cancelled"),
            ChorusError::Config(message)
            | ChorusError::NotFound(message)
            | ChorusError::Validation(message) => SlotError::new(SlotErrorKind::Config, message.clone()),
        }
    }
}

impl From<reqwest::Error> for ChorusError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChorusError::Network(format!("request timeout: {}", err))
        } else if err.is_connect() {
            ChorusError::Network(format!("connection failed: {}", err))
        } else {
            ChorusError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChorusError {
    fn from(err: serde_json::Error) -> Self {
        ChorusError::Parse(err.to_string())
    }
}

impl From<toml::de::Error> for ChorusError {
    fn from(err: toml::de::Error) -> Self {
        ChorusError::Config(err.to_string())
    }
}

impl From<std::io::Error> for ChorusError {
    fn from(err: std::io::Error) -> Self {
        ChorusError::Config(err.to_string())
    }
}
