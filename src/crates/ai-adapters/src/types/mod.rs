//! Typed provider stream payloads
//!
//! Every field is optional: a payload missing fields still deserializes, and
//! only a document of an entirely different shape fails (callers treat that as
//! an empty delta).

pub mod anthropic;
pub mod coze;
pub mod ollama;
pub mod openai;
