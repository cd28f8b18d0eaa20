//! Request dispatcher
//!
//! Executes one provider request and streams its body into one response slot.
//! Every network await is raced against the slot's cancellation token, so no
//! I/O continues once a stop has been requested.
//!
//! Return contract: `Ok` means the slot has been driven to a terminal status
//! (success, an error surfaced mid-stream, or cancellation). `Err` means the
//! request failed before any body was streamed and the slot is untouched, so
//! the caller may try another endpoint.

use crate::agentic::slot::SlotWriter;
use crate::infrastructure::resource_manager::{HandleId, ResourceKind, ResourceManager};
use crate::util::errors::{ChorusError, ChorusResult};
use crate::util::truncate_chars;
use chorus_ai_adapters::{EndpointAdapter, ProviderRequest, StreamDecoder};
use chorus_core_types::{DeltaEvent, SlotError, SlotErrorKind, StreamFraming, TerminalStatus};
use futures::StreamExt;
use log::{debug, error, trace, warn};
use reqwest::header::CONTENT_TYPE;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY_CHARS: usize = 2000;

pub struct RequestDispatcher {
    client: reqwest::Client,
    idle_timeout: Duration,
    resources: Arc<ResourceManager>,
}

impl RequestDispatcher {
    pub fn new(client: reqwest::Client, resources: Arc<ResourceManager>, idle_timeout: Duration) -> Self {
        Self {
            client,
            idle_timeout,
            resources,
        }
    }

    /// HTTP client shared by every dispatch. No overall request timeout:
    /// streams are bounded by the idle timeout and the orchestrator's
    /// request timer instead.
    pub fn build_client(connect_timeout: Duration) -> ChorusResult<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ChorusError::Config(format!("failed to build http client: {}", e)))
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub async fn run(
        &self,
        request: &ProviderRequest,
        adapter: EndpointAdapter,
        writer: &SlotWriter,
        cancel: &CancellationToken,
    ) -> ChorusResult<TerminalStatus> {
        let token = cancel.child_token();
        let handle = self.resources.register_cancellation(writer.scope(), &token);

        let result = self.dispatch(request, adapter, writer, &token).await;

        self.resources.release_one(handle);
        result
    }

    async fn dispatch(
        &self,
        request: &ProviderRequest,
        adapter: EndpointAdapter,
        writer: &SlotWriter,
        token: &CancellationToken,
    ) -> ChorusResult<TerminalStatus> {
        if token.is_cancelled() {
            return Ok(cancelled(writer));
        }
        debug!(
            "Dispatching request: slot_id={}, generation={}, url={}",
            writer.slot_id(),
            writer.generation(),
            request.url
        );

        let body = serde_json::to_vec(&request.body)?;
        let mut builder = self.client.post(&request.url).body(body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(cancelled(writer)),
            sent = builder.send() => sent?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(cancelled(writer)),
                text = tokio::time::timeout(self.idle_timeout, response.text()) => match text {
                    Ok(text) => text.unwrap_or_default(),
                    Err(_) => {
                        warn!(
                            "Error body stalled, giving up on it: slot_id={}, status={}",
                            writer.slot_id(),
                            status.as_u16()
                        );
                        String::new()
                    }
                },
            };
            warn!(
                "Provider returned error status: slot_id={}, status={}, url={}",
                writer.slot_id(),
                status.as_u16(),
                request.url
            );
            return Err(ChorusError::Http {
                status: status.as_u16(),
                body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
            });
        }

        let framing = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(StreamFraming::from_content_type)
            .unwrap_or(request.framing);
        trace!("Response framing: slot_id={}, framing={:?}", writer.slot_id(), framing);

        writer.begin_streaming();
        let watchdog = IdleWatchdog::arm(&self.resources, writer.scope(), self.idle_timeout, token);
        let mut decoder = StreamDecoder::new(framing, adapter);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    decoder.abort();
                    return Ok(watchdog.cancelled(writer));
                }
                next = stream.next() => next,
            };
            watchdog.touch();

            let (events, ended) = match next {
                Some(Ok(bytes)) => (decoder.feed(&bytes), false),
                None => (decoder.finish(), true),
                Some(Err(e)) => {
                    decoder.abort();
                    error!("Stream transport error: slot_id={}, error={}", writer.slot_id(), e);
                    let error = SlotError::new(SlotErrorKind::Network, format!("stream interrupted: {}", e));
                    return Ok(failed(writer, error));
                }
            };

            for event in events {
                if token.is_cancelled() {
                    decoder.abort();
                    return Ok(watchdog.cancelled(writer));
                }
                match event {
                    DeltaEvent::Done => {
                        let stats = decoder.stats();
                        debug!(
                            "Stream completed: slot_id={}, lines={}, events={}, parse_errors={}",
                            writer.slot_id(),
                            stats.lines,
                            stats.events,
                            stats.parse_errors
                        );
                        writer.finish(TerminalStatus::Success);
                        return Ok(TerminalStatus::Success);
                    }
                    DeltaEvent::ProviderError(message) => {
                        decoder.abort();
                        warn!("Provider reported stream error: slot_id={}, error={}", writer.slot_id(), message);
                        return Ok(failed(writer, SlotError::new(SlotErrorKind::Provider, message)));
                    }
                    delta => {
                        writer.apply(&delta);
                    }
                }
            }

            if ended {
                writer.finish(TerminalStatus::Success);
                return Ok(TerminalStatus::Success);
            }
        }
    }
}

/// Cancels a streaming dispatch once no body chunk has arrived for the idle
/// timeout. Registered as a timer under the slot scope and released on drop.
struct IdleWatchdog {
    resources: Arc<ResourceManager>,
    handle: HandleId,
    last_activity: Arc<Mutex<Instant>>,
    fired: Arc<AtomicBool>,
    idle: Duration,
}

impl IdleWatchdog {
    fn arm(resources: &Arc<ResourceManager>, scope: String, idle: Duration, token: &CancellationToken) -> Self {
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let fired = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let last_activity = last_activity.clone();
            let fired = fired.clone();
            let token = token.clone();
            async move {
                loop {
                    let deadline = read_instant(&last_activity) + idle;
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                    if read_instant(&last_activity).elapsed() >= idle {
                        fired.store(true, Ordering::SeqCst);
                        token.cancel();
                        return;
                    }
                }
            }
        });
        let handle = resources.register_task(scope, ResourceKind::Timer, task);

        Self {
            resources: resources.clone(),
            handle,
            last_activity,
            fired,
            idle,
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    /// Same terminal path as a user stop; only the log line differs.
    fn cancelled(&self, writer: &SlotWriter) -> TerminalStatus {
        if self.fired.load(Ordering::SeqCst) {
            warn!(
                "Stream idle, cancelling: slot_id={}, generation={}, idle_secs={}",
                writer.slot_id(),
                writer.generation(),
                self.idle.as_secs()
            );
        }
        cancelled(writer)
    }
}

impl Drop for IdleWatchdog {
    fn drop(&mut self) {
        self.resources.release_one(self.handle);
    }
}

fn read_instant(instant: &Mutex<Instant>) -> Instant {
    *instant.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn cancelled(writer: &SlotWriter) -> TerminalStatus {
    debug!("Dispatch cancelled: slot_id={}, generation={}", writer.slot_id(), writer.generation());
    writer.finish(TerminalStatus::Cancelled);
    TerminalStatus::Cancelled
}

fn failed(writer: &SlotWriter, error: SlotError) -> TerminalStatus {
    let status = TerminalStatus::Error(error);
    writer.finish(status.clone());
    status
}
