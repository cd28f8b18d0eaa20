//! Retry/fallback chain over redundant endpoints of one model

use super::dispatcher::RequestDispatcher;
use crate::agentic::slot::SlotWriter;
use crate::util::errors::ChorusError;
use chorus_ai_adapters::EndpointAdapter;
use chorus_core_types::{
    CanonicalRequest, EndpointConfig, ProviderKind, SlotError, SlotErrorKind, TerminalStatus,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The endpoint drove the slot to this terminal status.
    Completed(TerminalStatus),
    /// Failed before streaming; `retryable` says whether the chain moved on.
    Failed { error: SlotError, retryable: bool },
    /// Request could not be built for this endpoint.
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub endpoint_index: usize,
    pub host: String,
    pub provider: ProviderKind,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackReport {
    pub status: TerminalStatus,
    pub attempts: Vec<AttemptRecord>,
}

impl FallbackReport {
    fn new(status: TerminalStatus, attempts: Vec<AttemptRecord>) -> Self {
        Self { status, attempts }
    }
}

pub struct FallbackChain {
    dispatcher: Arc<RequestDispatcher>,
}

impl FallbackChain {
    pub fn new(dispatcher: Arc<RequestDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<RequestDispatcher> {
        &self.dispatcher
    }

    /// Tries `configs` in order until one of them settles the slot. Network
    /// failures and 5xx responses advance to the next endpoint; anything else
    /// stops the chain. Always leaves the slot in a terminal status.
    pub async fn attempt(
        &self,
        request: &CanonicalRequest,
        configs: &[EndpointConfig],
        writer: &SlotWriter,
        cancel: &CancellationToken,
    ) -> FallbackReport {
        let mut attempts = Vec::with_capacity(configs.len());

        if configs.is_empty() {
            let error = SlotError::new(
                SlotErrorKind::Config,
                format!("no endpoints configured for model '{}'", request.model),
            );
            warn!("Slot has no endpoints: slot_id={}, model={}", writer.slot_id(), request.model);
            writer.finish(TerminalStatus::Error(error.clone()));
            return FallbackReport::new(TerminalStatus::Error(error), attempts);
        }

        let mut last_error = None;
        for (index, config) in configs.iter().enumerate() {
            if cancel.is_cancelled() {
                writer.finish(TerminalStatus::Cancelled);
                return FallbackReport::new(TerminalStatus::Cancelled, attempts);
            }

            let mut record = AttemptRecord {
                endpoint_index: index,
                host: config.host.clone(),
                provider: config.provider,
                outcome: AttemptOutcome::Skipped(String::new()),
            };

            let adapter = EndpointAdapter::for_provider(config.provider);
            let provider_request = match adapter.build_request(request, config) {
                Ok(provider_request) => provider_request,
                Err(e) => {
                    warn!(
                        "Skipping endpoint with invalid configuration: slot_id={}, endpoint_index={}, error={}",
                        writer.slot_id(),
                        index,
                        e
                    );
                    last_error = Some(ChorusError::Config(e.to_string()).to_slot_error());
                    record.outcome = AttemptOutcome::Skipped(e.to_string());
                    attempts.push(record);
                    continue;
                }
            };

            debug!(
                "Attempting endpoint: slot_id={}, endpoint_index={}, provider={:?}, host={}",
                writer.slot_id(),
                index,
                config.provider,
                config.host
            );
            match self.dispatcher.run(&provider_request, adapter, writer, cancel).await {
                Ok(status) => {
                    record.outcome = AttemptOutcome::Completed(status.clone());
                    attempts.push(record);
                    return FallbackReport::new(status, attempts);
                }
                Err(error) => {
                    let retryable = error.is_retryable();
                    let slot_error = error.to_slot_error();
                    record.outcome = AttemptOutcome::Failed {
                        error: slot_error.clone(),
                        retryable,
                    };
                    attempts.push(record);
                    last_error = Some(slot_error);

                    if !retryable {
                        warn!(
                            "Endpoint failed with non-retryable error: slot_id={}, endpoint_index={}, error={}",
                            writer.slot_id(),
                            index,
                            error
                        );
                        break;
                    }
                    info!(
                        "Endpoint failed, falling back: slot_id={}, endpoint_index={}, remaining={}, error={}",
                        writer.slot_id(),
                        index,
                        configs.len() - index - 1,
                        error
                    );
                }
            }
        }

        if cancel.is_cancelled() {
            writer.finish(TerminalStatus::Cancelled);
            return FallbackReport::new(TerminalStatus::Cancelled, attempts);
        }

        let error = last_error.unwrap_or_else(|| {
            SlotError::new(SlotErrorKind::Network, "all endpoints failed")
        });
        writer.finish(TerminalStatus::Error(error.clone()));
        FallbackReport::new(TerminalStatus::Error(error), attempts)
    }
}
