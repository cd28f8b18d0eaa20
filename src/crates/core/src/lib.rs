// Chorus Core Library - streaming multi-model chat orchestration
// Layers: Util -> Infrastructure -> Service -> Agentic

pub mod agentic; // Response slots, orchestrator, chat events
pub mod infrastructure; // Dispatcher, fallback chain, resource manager, response cache
pub mod service; // Configuration
pub mod util; // Errors and helpers

pub use util::errors::{ChorusError, ChorusResult};

pub use agentic::{
    ChatEvent, ChatOrchestrator, CompletionHook, RenderMetadata, ResponseSlot, SlotEvent,
    SlotEventKind, SlotOutcome, SlotWriter, SubmittedTurn, TurnOutcome,
};
pub use infrastructure::{FallbackChain, RequestDispatcher, ResourceKind, ResourceManager, ResponseCache};
pub use service::{CacheConfig, ChorusConfig, ModelConfig, OrchestratorConfig};

pub use chorus_core_types as types;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CORE_NAME: &str = "Chorus Core";
