//! Chorus shared DTOs
//!
//! Plain data passed between the adapters, the orchestration core and whatever
//! front end consumes slot updates. No I/O and no async here.

pub mod delta;
pub mod endpoint;
pub mod slot;
pub mod turn;

pub use delta::{DeltaEvent, StreamFraming};
pub use endpoint::{EndpointConfig, ProviderKind};
pub use slot::{
    SlotError, SlotErrorKind, SlotState, SlotStatus, TerminalStatus, TokenUsage, UsageDelta,
};
pub use turn::{CanonicalRequest, ChatMessage, ImageRef, MessageRole, Turn};
