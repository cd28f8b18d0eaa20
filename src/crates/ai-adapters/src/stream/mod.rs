//! Incremental response-body decoding

mod decoder;

pub use decoder::{DecodeStats, DecoderState, StreamDecoder, DONE_SENTINEL};
