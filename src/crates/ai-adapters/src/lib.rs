//! Provider protocol adapters
//!
//! Translates canonical chat requests into provider HTTP requests and decodes
//! streamed response bodies (SSE or NDJSON) into canonical delta events.
//! Transport-agnostic: callers hand in raw body bytes however they got them.

pub mod adapter;
pub mod request;
pub mod stream;
pub mod types;

pub use adapter::{EndpointAdapter, ExtractedDelta};
pub use request::ProviderRequest;
pub use stream::{DecodeStats, DecoderState, StreamDecoder};
