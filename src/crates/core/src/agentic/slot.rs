//! Response slots
//!
//! A slot is the per-model view of one turn. State lives in a watch channel:
//! readers take lock-free snapshots or subscribe, and the only writer is the
//! `SlotWriter` handed to the running dispatcher. A writer is bound to one
//! generation; once the slot is retried, writes from the old generation are
//! ignored.

use crate::agentic::events::{ChatEvent, EventHub, SlotEvent, SlotEventKind};
use crate::util::now_ms;
use chorus_core_types::{DeltaEvent, SlotState, SlotStatus, TerminalStatus, TokenUsage};
use log::trace;
use std::sync::Arc;
use tokio::sync::watch;

pub fn slot_scope(slot_id: &str, generation: u64) -> String {
    format!("slot:{}#{}", slot_id, generation)
}

pub struct ResponseSlot {
    id: String,
    turn_id: String,
    model_id: String,
    state: watch::Sender<SlotState>,
    events: EventHub,
}

impl ResponseSlot {
    pub fn new(turn_id: impl Into<String>, model_id: impl Into<String>, events: EventHub) -> Arc<Self> {
        let (state, _) = watch::channel(SlotState::pending(0));
        Arc::new(Self {
            id: format!("slot-{}", uuid::Uuid::new_v4()),
            turn_id: turn_id.into(),
            model_id: model_id.into(),
            state,
            events,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn snapshot(&self) -> SlotState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SlotStatus {
        self.state.borrow().status
    }

    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    pub fn subscribe(&self) -> watch::Receiver<SlotState> {
        self.state.subscribe()
    }

    /// Resolves once the current generation reaches a terminal status.
    pub async fn wait_terminal(&self) -> SlotState {
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|state| state.status.is_terminal()).await {
            Ok(state) => Some((*state).clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.snapshot())
    }

    /// Writer bound to the current generation.
    pub fn writer(self: &Arc<Self>) -> SlotWriter {
        SlotWriter {
            slot: self.clone(),
            generation: self.generation(),
        }
    }

    /// Starts a new generation with fresh pending state and returns its
    /// writer. Writers of earlier generations go stale.
    pub(crate) fn reset(self: &Arc<Self>) -> SlotWriter {
        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = state.generation + 1;
            *state = SlotState::pending(generation);
        });
        self.publish(
            generation,
            SlotEventKind::StatusChanged {
                status: SlotStatus::Pending,
                error: None,
            },
        );
        SlotWriter {
            slot: self.clone(),
            generation,
        }
    }

    fn publish(&self, generation: u64, kind: SlotEventKind) {
        self.events.publish(ChatEvent::Slot(SlotEvent {
            slot_id: self.id.clone(),
            turn_id: self.turn_id.clone(),
            model_id: self.model_id.clone(),
            generation,
            kind,
            timestamp: now_ms(),
        }));
    }
}

impl std::fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("id", &self.id)
            .field("turn_id", &self.turn_id)
            .field("model_id", &self.model_id)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

/// Single writer of one slot generation.
#[derive(Clone)]
pub struct SlotWriter {
    slot: Arc<ResponseSlot>,
    generation: u64,
}

impl SlotWriter {
    pub fn slot(&self) -> &Arc<ResponseSlot> {
        &self.slot
    }

    pub fn slot_id(&self) -> &str {
        self.slot.id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resource scope owning this generation's abort signal and timers.
    pub fn scope(&self) -> String {
        slot_scope(self.slot.id(), self.generation)
    }

    /// False once the slot has moved on to a newer generation.
    pub fn is_current(&self) -> bool {
        self.slot.generation() == self.generation
    }

    pub fn status(&self) -> SlotStatus {
        self.slot.status()
    }

    /// Applies `update` if this writer is current; the update returns the
    /// event to publish, or `None` when nothing changed.
    fn mutate(&self, update: impl FnOnce(&mut SlotState) -> Option<SlotEventKind>) -> bool {
        let mut published = None;
        self.slot.state.send_if_modified(|state| {
            if state.generation != self.generation {
                return false;
            }
            published = update(state);
            published.is_some()
        });
        match published {
            Some(kind) => {
                self.slot.publish(self.generation, kind);
                true
            }
            None => false,
        }
    }

    fn transition(&self, next: SlotStatus, terminal: Option<&TerminalStatus>) -> bool {
        let changed = self.mutate(|state| {
            if !state.status.can_transition_to(next) {
                return None;
            }
            let now = now_ms();
            state.status = next;
            if next == SlotStatus::Streaming {
                state.started_at_ms = Some(now);
            }
            let error = match terminal {
                Some(TerminalStatus::Error(error)) => Some(error.clone()),
                _ => None,
            };
            if next.is_terminal() {
                state.finished_at_ms = Some(now);
                state.last_error = error.clone();
            }
            Some(SlotEventKind::StatusChanged { status: next, error })
        });
        if changed {
            trace!(
                "Slot status changed: slot_id={}, generation={}, status={:?}",
                self.slot.id,
                self.generation,
                next
            );
        }
        changed
    }

    pub fn begin_streaming(&self) -> bool {
        self.transition(SlotStatus::Streaming, None)
    }

    /// Applies one content, reasoning or usage delta while streaming. `Done`
    /// and provider errors end the run and go through `finish`.
    pub fn apply(&self, delta: &DeltaEvent) -> bool {
        match delta {
            DeltaEvent::Content(text) => self.mutate(|state| {
                if state.status != SlotStatus::Streaming || text.is_empty() {
                    return None;
                }
                state.content.push_str(text);
                Some(SlotEventKind::ContentAppended { text: text.clone() })
            }),
            DeltaEvent::Reasoning(text) => self.mutate(|state| {
                if state.status != SlotStatus::Streaming || text.is_empty() {
                    return None;
                }
                state.reasoning.push_str(text);
                Some(SlotEventKind::ReasoningAppended { text: text.clone() })
            }),
            DeltaEvent::Usage(usage) => self.mutate(|state| {
                if state.status != SlotStatus::Streaming || usage.is_empty() {
                    return None;
                }
                let merged = state.usage.get_or_insert_with(TokenUsage::default);
                merged.apply(usage);
                Some(SlotEventKind::UsageUpdated { usage: *merged })
            }),
            DeltaEvent::ProviderError(_) | DeltaEvent::Done => false,
        }
    }

    /// Moves the slot to its terminal status. Returns false when the slot was
    /// already terminal or this writer is stale.
    pub fn finish(&self, status: TerminalStatus) -> bool {
        self.transition(status.slot_status(), Some(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core_types::{SlotError, SlotErrorKind, UsageDelta};

    fn slot() -> (Arc<ResponseSlot>, EventHub) {
        let hub = EventHub::new(64);
        (ResponseSlot::new("turn-1", "model-a", hub.clone()), hub)
    }

    #[test]
    fn streams_and_accumulates() {
        let (slot, _hub) = slot();
        let writer = slot.writer();
        assert!(!writer.apply(&DeltaEvent::Content("early".into())));
        assert!(writer.begin_streaming());
        writer.apply(&DeltaEvent::Reasoning("think".into()));
        writer.apply(&DeltaEvent::Content("Hel".into()));
        writer.apply(&DeltaEvent::Content("lo".into()));
        writer.apply(&DeltaEvent::Usage(UsageDelta {
            prompt_tokens: Some(3),
            completion_tokens: Some(2),
            total_tokens: None,
        }));
        assert!(writer.finish(TerminalStatus::Success));

        let state = slot.snapshot();
        assert_eq!(state.status, SlotStatus::Success);
        assert_eq!(state.content, "Hello");
        assert_eq!(state.reasoning, "think");
        assert_eq!(state.usage.unwrap().total_tokens, 5);
        assert!(state.started_at_ms.is_some());
        assert!(state.finished_at_ms.is_some());
    }

    #[test]
    fn terminal_state_is_final() {
        let (slot, _hub) = slot();
        let writer = slot.writer();
        writer.begin_streaming();
        writer.apply(&DeltaEvent::Content("partial".into()));
        assert!(writer.finish(TerminalStatus::Cancelled));

        assert!(!writer.apply(&DeltaEvent::Content(" more".into())));
        assert!(!writer.finish(TerminalStatus::Success));
        assert!(!writer.begin_streaming());
        let state = slot.snapshot();
        assert_eq!(state.status, SlotStatus::Cancelled);
        assert_eq!(state.content, "partial");
    }

    #[test]
    fn pending_cannot_jump_to_success() {
        let (slot, _hub) = slot();
        let writer = slot.writer();
        assert!(!writer.finish(TerminalStatus::Success));
        assert!(writer.finish(TerminalStatus::Error(SlotError::new(SlotErrorKind::Network, "refused"))));
        let state = slot.snapshot();
        assert_eq!(state.status, SlotStatus::Error);
        assert_eq!(state.last_error.unwrap().kind, SlotErrorKind::Network);
    }

    #[test]
    fn stale_writer_cannot_touch_new_generation() {
        let (slot, _hub) = slot();
        let old = slot.writer();
        old.begin_streaming();
        old.apply(&DeltaEvent::Content("first try".into()));

        let fresh = slot.reset();
        assert_eq!(fresh.generation(), 1);
        assert!(!old.is_current());
        assert!(!old.apply(&DeltaEvent::Content("late".into())));
        assert!(!old.finish(TerminalStatus::Success));

        let state = slot.snapshot();
        assert_eq!(state.status, SlotStatus::Pending);
        assert_eq!(state.content, "");
        assert_eq!(state.generation, 1);
        assert!(fresh.begin_streaming());
    }

    #[tokio::test]
    async fn events_follow_mutations_in_order() {
        let (slot, hub) = slot();
        let mut rx = hub.subscribe();
        let writer = slot.writer();
        writer.begin_streaming();
        writer.apply(&DeltaEvent::Content("a".into()));
        writer.finish(TerminalStatus::Success);

        let mut kinds = Vec::new();
        for _ in 0..3 {
            match rx.recv().await.unwrap() {
                ChatEvent::Slot(event) => {
                    assert_eq!(event.slot_id, slot.id());
                    kinds.push(event.kind);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
        assert_eq!(
            kinds,
            vec![
                SlotEventKind::StatusChanged {
                    status: SlotStatus::Streaming,
                    error: None
                },
                SlotEventKind::ContentAppended { text: "a".into() },
                SlotEventKind::StatusChanged {
                    status: SlotStatus::Success,
                    error: None
                },
            ]
        );
    }

    #[tokio::test]
    async fn wait_terminal_resolves_on_finish() {
        let (slot, _hub) = slot();
        let writer = slot.writer();
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.wait_terminal().await })
        };
        writer.begin_streaming();
        writer.apply(&DeltaEvent::Content("x".into()));
        writer.finish(TerminalStatus::Success);

        let state = waiter.await.unwrap();
        assert_eq!(state.status, SlotStatus::Success);
        assert_eq!(state.content, "x");
    }
}
