//! AI request execution: one dispatcher per request, chained over endpoints

pub mod dispatcher;
pub mod fallback;

pub use dispatcher::RequestDispatcher;
pub use fallback::{AttemptOutcome, AttemptRecord, FallbackChain, FallbackReport};
