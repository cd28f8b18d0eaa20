//! Infrastructure layer - AI request execution, resource registry, caching

pub mod ai;
pub mod resource_manager;
pub mod response_cache;

pub use ai::{FallbackChain, RequestDispatcher};
pub use resource_manager::{HandleId, ResourceKind, ResourceManager};
pub use response_cache::ResponseCache;
