//! Multi-model orchestration
//!
//! One response slot and one concurrently running fallback chain per target
//! model; turn completion is an all-settled join over the slots.

mod manager;
mod scheduler;
mod types;

pub use manager::ChatOrchestrator;
pub use types::{CompletionHook, SubmittedTurn};
