use super::scheduler::{spawn_settlement, spawn_slot};
use super::types::{render_key, turn_scope, CompletionHook, SubmittedTurn, TurnRecord};
use crate::agentic::events::{ChatEvent, EventHub, SlotOutcome, TurnOutcome};
use crate::agentic::render::RenderMetadata;
use crate::agentic::slot::{slot_scope, ResponseSlot, SlotWriter};
use crate::infrastructure::ai::{FallbackChain, RequestDispatcher};
use crate::infrastructure::resource_manager::ResourceManager;
use crate::infrastructure::response_cache::ResponseCache;
use crate::service::config::{CacheConfig, ChorusConfig, OrchestratorConfig};
use crate::util::errors::{ChorusError, ChorusResult};
use crate::util::now_ms;
use chorus_core_types::{CanonicalRequest, EndpointConfig, TerminalStatus, Turn};
use dashmap::DashMap;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const RENDER_CACHE_SCOPE: &str = "cache:render";

/// Fans turns out to their target models and tracks every response slot.
///
/// Explicitly constructed; share it as `Arc<ChatOrchestrator>`. Operations
/// that start work (`submit_turn`, `retry_response`) spawn Tokio tasks and
/// must run inside a runtime.
pub struct ChatOrchestrator {
    pub(super) catalog: DashMap<String, Arc<Vec<EndpointConfig>>>,
    pub(super) slots: DashMap<String, Arc<ResponseSlot>>,
    pub(super) requests: DashMap<String, Arc<CanonicalRequest>>,
    pub(super) turns: DashMap<String, Arc<TurnRecord>>,
    pub(super) chain: FallbackChain,
    pub(super) resources: Arc<ResourceManager>,
    pub(super) events: EventHub,
    pub(super) render_cache: Arc<ResponseCache<String, RenderMetadata>>,
    pub(super) request_timeout: Option<Duration>,
    pub(super) completion_hook: Option<CompletionHook>,
    pub(super) shutdown: CancellationToken,
    sweep_interval: Option<Duration>,
    sweeper_started: AtomicBool,
}

impl ChatOrchestrator {
    pub fn new(orchestrator: &OrchestratorConfig, cache: &CacheConfig) -> ChorusResult<Self> {
        let resources = Arc::new(ResourceManager::new());
        let client = RequestDispatcher::build_client(orchestrator.connect_timeout())?;
        let dispatcher = Arc::new(RequestDispatcher::new(
            client,
            resources.clone(),
            orchestrator.idle_timeout(),
        ));

        Ok(Self {
            catalog: DashMap::new(),
            slots: DashMap::new(),
            requests: DashMap::new(),
            turns: DashMap::new(),
            chain: FallbackChain::new(dispatcher),
            resources,
            events: EventHub::new(orchestrator.event_buffer),
            render_cache: Arc::new(ResponseCache::new(cache.max_size, cache.ttl())),
            request_timeout: orchestrator.request_timeout(),
            completion_hook: None,
            shutdown: CancellationToken::new(),
            sweep_interval: cache.sweep_interval(),
            sweeper_started: AtomicBool::new(false),
        })
    }

    /// Builds an orchestrator with every configured model registered.
    pub fn from_config(config: &ChorusConfig) -> ChorusResult<Self> {
        config.validate()?;
        let orchestrator = Self::new(&config.orchestrator, &config.cache)?;
        for model in &config.models {
            orchestrator.register_model(model.id.clone(), model.endpoints.clone());
        }
        Ok(orchestrator)
    }

    pub fn with_completion_hook(mut self, hook: impl Fn(&TurnOutcome) + Send + Sync + 'static) -> Self {
        self.completion_hook = Some(Arc::new(hook));
        self
    }

    /// Registers (or replaces) the ordered endpoint list of a model.
    pub fn register_model(&self, model_id: impl Into<String>, endpoints: Vec<EndpointConfig>) {
        let model_id = model_id.into();
        debug!("Model registered: model={}, endpoints={}", model_id, endpoints.len());
        self.catalog.insert(model_id, Arc::new(endpoints));
    }

    pub fn models(&self) -> Vec<String> {
        let mut models = self.catalog.iter().map(|entry| entry.key().clone()).collect::<Vec<_>>();
        models.sort();
        models
    }

    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Creates one pending slot per distinct target model and starts every
    /// slot concurrently. Returns before any request is sent.
    pub fn submit_turn(self: &Arc<Self>, turn: Turn) -> ChorusResult<SubmittedTurn> {
        let mut seen = HashSet::new();
        let models = turn
            .target_models
            .iter()
            .map(|model| model.trim())
            .filter(|model| !model.is_empty() && seen.insert(model.to_string()))
            .map(str::to_string)
            .collect::<Vec<_>>();
        if models.is_empty() {
            return Err(ChorusError::Validation("turn has no target models".to_string()));
        }
        if turn.text.trim().is_empty() && turn.image.is_none() {
            return Err(ChorusError::Validation("turn has neither text nor image".to_string()));
        }

        self.ensure_sweeper();

        let turn_id = format!("turn-{}", uuid::Uuid::new_v4());
        let mut slots = Vec::with_capacity(models.len());
        for model in &models {
            let slot = ResponseSlot::new(turn_id.clone(), model.clone(), self.events.clone());
            self.requests
                .insert(slot.id().to_string(), Arc::new(turn.to_canonical_request(model)));
            self.slots.insert(slot.id().to_string(), slot.clone());
            slots.push(slot);
        }

        let slot_ids = slots.iter().map(|slot| slot.id().to_string()).collect::<Vec<_>>();
        self.turns
            .insert(turn_id.clone(), Arc::new(TurnRecord::new(slot_ids, now_ms())));
        info!("Turn submitted: turn_id={}, models={}", turn_id, models.join(","));

        for slot in &slots {
            spawn_slot(self, slot.writer());
        }
        spawn_settlement(self, &turn_id);

        Ok(SubmittedTurn { turn_id, slots })
    }

    /// Cancels one slot's in-flight request. Siblings are not affected.
    /// Returns false if the slot had already finished.
    pub fn stop_response(&self, slot_id: &str) -> ChorusResult<bool> {
        let slot = self.require_slot(slot_id)?;
        let generation = slot.generation();
        // Mark the slot first: once the token fires the dispatcher races to do it.
        let stopped = slot.writer().finish(TerminalStatus::Cancelled);
        let released = self.resources.release_scope(&slot_scope(slot_id, generation));
        info!(
            "Stop requested: slot_id={}, generation={}, released={}, stopped={}",
            slot_id, generation, released, stopped
        );
        Ok(stopped)
    }

    pub fn stop_turn(&self, turn_id: &str) -> ChorusResult<usize> {
        let slots = self.slots_for_turn(turn_id)?;
        let mut stopped = 0;
        for slot in slots {
            if self.stop_response(slot.id())? {
                stopped += 1;
            }
        }
        Ok(stopped)
    }

    /// Cancels any in-flight attempt and re-runs the fallback chain for this
    /// slot only, as a new generation. Returns the new generation.
    pub fn retry_response(self: &Arc<Self>, slot_id: &str) -> ChorusResult<u64> {
        let slot = self.require_slot(slot_id)?;
        let record = self
            .turns
            .get(slot.turn_id())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChorusError::NotFound(format!("Turn not found: {}", slot.turn_id())))?;

        // Bump the generation first so the old run can no longer write.
        let previous = slot.generation();
        let (writer, was_settled) = {
            let _guard = record
                .settle_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let writer = slot.reset();
            let was_settled = record.outcome.send_replace(None).is_some();
            (writer, was_settled)
        };
        self.resources.release_scope(&slot_scope(slot_id, previous));
        let generation = writer.generation();
        info!("Retry requested: slot_id={}, generation={}", slot_id, generation);

        spawn_slot(self, writer);
        if was_settled {
            spawn_settlement(self, slot.turn_id());
        }
        Ok(generation)
    }

    pub fn slot(&self, slot_id: &str) -> Option<Arc<ResponseSlot>> {
        self.slots.get(slot_id).map(|entry| entry.value().clone())
    }

    fn require_slot(&self, slot_id: &str) -> ChorusResult<Arc<ResponseSlot>> {
        self.slot(slot_id)
            .ok_or_else(|| ChorusError::NotFound(format!("Slot not found: {}", slot_id)))
    }

    pub fn slots_for_turn(&self, turn_id: &str) -> ChorusResult<Vec<Arc<ResponseSlot>>> {
        let record = self
            .turns
            .get(turn_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChorusError::NotFound(format!("Turn not found: {}", turn_id)))?;
        Ok(record.slot_ids.iter().filter_map(|id| self.slot(id)).collect())
    }

    /// Latest settled outcome, `None` while any slot is still running.
    pub fn turn_outcome(&self, turn_id: &str) -> Option<TurnOutcome> {
        self.turns
            .get(turn_id)
            .and_then(|entry| entry.value().outcome.borrow().clone())
    }

    /// Waits for the all-settled join of a turn.
    pub async fn wait_for_turn(&self, turn_id: &str) -> ChorusResult<TurnOutcome> {
        let mut rx = self
            .turns
            .get(turn_id)
            .map(|entry| entry.value().outcome.subscribe())
            .ok_or_else(|| ChorusError::NotFound(format!("Turn not found: {}", turn_id)))?;

        let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        // The sender only goes away when the turn is released.
        outcome.ok_or(ChorusError::Cancelled)
    }

    /// Checks, under the turn's settle lock, that every slot is terminal and
    /// records the outcome.
    pub(super) fn commit_outcome(&self, turn_id: &str) -> Option<TurnOutcome> {
        let record = self.turns.get(turn_id).map(|entry| entry.value().clone())?;
        let _guard = record
            .settle_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut slots = Vec::with_capacity(record.slot_ids.len());
        for slot_id in &record.slot_ids {
            let slot = self.slot(slot_id)?;
            let state = slot.snapshot();
            if !state.status.is_terminal() {
                return None;
            }
            slots.push(SlotOutcome {
                slot_id: slot_id.clone(),
                model_id: slot.model_id().to_string(),
                status: state.status,
                error: state.last_error,
                usage: state.usage,
                generation: state.generation,
            });
        }

        let outcome = TurnOutcome {
            turn_id: turn_id.to_string(),
            slots,
            settled_at_ms: now_ms(),
        };
        record.outcome.send_replace(Some(outcome.clone()));
        Some(outcome)
    }

    /// Render metadata of a finished slot, computed once per generation.
    /// `None` while the slot is still pending or streaming.
    pub fn render_metadata(&self, slot_id: &str) -> ChorusResult<Option<RenderMetadata>> {
        let slot = self.require_slot(slot_id)?;
        let state = slot.snapshot();
        if !state.status.is_terminal() {
            return Ok(None);
        }
        let key = render_key(slot_id, state.generation);
        if let Some(metadata) = self.render_cache.get(&key) {
            return Ok(Some(metadata));
        }
        let metadata = RenderMetadata::from_state(&state);
        self.render_cache.set(key, metadata.clone());
        Ok(Some(metadata))
    }

    pub(super) fn cache_render_metadata(&self, writer: &SlotWriter) {
        if !writer.is_current() {
            return;
        }
        let state = writer.slot().snapshot();
        if state.status.is_terminal() {
            self.render_cache.set(
                render_key(writer.slot_id(), state.generation),
                RenderMetadata::from_state(&state),
            );
        }
    }

    /// Stops and forgets a turn: slots, requests, cached metadata and every
    /// resource registered for it.
    pub fn release_turn(&self, turn_id: &str) -> ChorusResult<()> {
        let (_, record) = self
            .turns
            .remove(turn_id)
            .ok_or_else(|| ChorusError::NotFound(format!("Turn not found: {}", turn_id)))?;

        self.resources.release_scope(&turn_scope(turn_id));
        for slot_id in &record.slot_ids {
            if let Some((_, slot)) = self.slots.remove(slot_id) {
                self.resources.release_prefix(&format!("slot:{}#", slot_id));
                slot.writer().finish(TerminalStatus::Cancelled);
            }
            self.requests.remove(slot_id);
            let prefix = format!("{}#", slot_id);
            self.render_cache.remove_where(|key| key.starts_with(&prefix));
        }
        debug!("Turn released: turn_id={}, slots={}", turn_id, record.slot_ids.len());
        Ok(())
    }

    /// Cancels everything in flight and releases every resource.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.slots.iter() {
            entry.value().writer().finish(TerminalStatus::Cancelled);
        }
        let released = self.resources.release_all();
        info!("Orchestrator shut down: released_resources={}", released);
    }

    fn ensure_sweeper(&self) {
        let Some(interval) = self.sweep_interval else {
            return;
        };
        if !self.sweeper_started.swap(true, Ordering::SeqCst) {
            self.render_cache
                .start_sweeper(&self.resources, RENDER_CACHE_SCOPE, interval);
        }
    }
}
