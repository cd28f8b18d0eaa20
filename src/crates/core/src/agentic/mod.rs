//! Agentic layer - response slots, orchestration, events

pub mod events;
pub mod orchestrator;
pub mod render;
pub mod slot;

pub use events::{ChatEvent, EventHub, SlotEvent, SlotEventKind, SlotOutcome, TurnOutcome};
pub use orchestrator::{ChatOrchestrator, CompletionHook, SubmittedTurn};
pub use render::RenderMetadata;
pub use slot::{ResponseSlot, SlotWriter};
