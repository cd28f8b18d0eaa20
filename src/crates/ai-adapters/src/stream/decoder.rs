use crate::adapter::EndpointAdapter;
use chorus_core_types::{DeltaEvent, StreamFraming};
use log::{trace, warn};
use serde_json::Value;

/// End-of-stream marker of SSE chat streams.
pub const DONE_SENTINEL: &str = "[DONE]";
/// Bot platforms send the sentinel JSON-quoted.
const QUOTED_DONE_SENTINEL: &str = "\"[DONE]\"";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingData,
    Emitting,
    /// Sentinel seen or transport closed.
    Done,
    /// Cancelled externally.
    Aborted,
}

impl DecoderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Complete lines taken off the buffer.
    pub lines: u64,
    /// Lines that were decoded: SSE `data:` lines, or non-empty NDJSON lines.
    pub data_lines: u64,
    pub parse_errors: u64,
    pub events: u64,
}

/// Turns raw body chunks into delta events.
///
/// Chunk boundaries are arbitrary: bytes are buffered until a full `\n`
/// terminated line is available, so at most one partial line is ever carried
/// over between `feed` calls.
pub struct StreamDecoder {
    framing: StreamFraming,
    adapter: EndpointAdapter,
    buffer: Vec<u8>,
    /// Name from the last SSE `event:` line, cleared at record boundaries.
    event_name: Option<String>,
    state: DecoderState,
    stats: DecodeStats,
}

impl StreamDecoder {
    pub fn new(framing: StreamFraming, adapter: EndpointAdapter) -> Self {
        Self {
            framing,
            adapter,
            buffer: Vec::new(),
            event_name: None,
            state: DecoderState::AwaitingData,
            stats: DecodeStats::default(),
        }
    }

    pub fn framing(&self) -> StreamFraming {
        self.framing
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Bytes of the incomplete trailing line currently held.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DeltaEvent> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned();
            consumed = end + 1;

            self.state = DecoderState::Emitting;
            self.process_line(&line, &mut out);
            if self.state == DecoderState::Done {
                break;
            }
            self.state = DecoderState::AwaitingData;
        }

        if self.state == DecoderState::Done {
            self.buffer.clear();
        } else {
            self.buffer.drain(..consumed);
        }
        self.stats.events += out.len() as u64;
        out
    }

    /// Transport closed: decodes any unterminated trailing line, then emits
    /// `Done`. Returns nothing if the stream already ended or was aborted.
    pub fn finish(&mut self) -> Vec<DeltaEvent> {
        let mut out = Vec::new();
        if self.state.is_terminal() {
            return out;
        }

        if !self.buffer.is_empty() {
            let line = String::from_utf8_lossy(&self.buffer).into_owned();
            self.buffer.clear();
            if !line.trim().is_empty() {
                trace!("Decoding unterminated trailing line: {} bytes", line.len());
            }
            self.state = DecoderState::Emitting;
            self.process_line(&line, &mut out);
        }

        if self.state != DecoderState::Done {
            out.push(DeltaEvent::Done);
            self.state = DecoderState::Done;
        }
        self.stats.events += out.len() as u64;
        out
    }

    /// Stops decoding; later `feed`/`finish` calls emit nothing.
    pub fn abort(&mut self) {
        if !self.state.is_terminal() {
            self.state = DecoderState::Aborted;
        }
        self.buffer.clear();
    }

    fn process_line(&mut self, raw: &str, out: &mut Vec<DeltaEvent>) {
        self.stats.lines += 1;
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        match self.framing {
            StreamFraming::Sse => self.process_sse_line(line, out),
            StreamFraming::Ndjson => self.process_ndjson_line(line, out),
        }
    }

    fn process_sse_line(&mut self, line: &str, out: &mut Vec<DeltaEvent>) {
        if line.is_empty() {
            self.event_name = None;
            return;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event_name = Some(name.trim().to_string());
            return;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            return;
        };
        let payload = payload.trim();
        self.stats.data_lines += 1;

        if payload == DONE_SENTINEL || payload == QUOTED_DONE_SENTINEL {
            out.push(DeltaEvent::Done);
            self.state = DecoderState::Done;
            return;
        }
        self.decode_json(payload, out);
    }

    fn process_ndjson_line(&mut self, line: &str, out: &mut Vec<DeltaEvent>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.stats.data_lines += 1;
        self.decode_json(line, out);
    }

    fn decode_json(&mut self, payload: &str, out: &mut Vec<DeltaEvent>) {
        let json: Value = match serde_json::from_str(payload) {
            Ok(json) => json,
            Err(e) => {
                self.stats.parse_errors += 1;
                warn!("Skipping malformed stream line: error={}, data={}", e, payload);
                return;
            }
        };
        self.adapter
            .extract_delta(self.event_name.as_deref(), &json)
            .into_events(out);
    }
}
