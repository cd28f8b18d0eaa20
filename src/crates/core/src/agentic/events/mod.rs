//! Event Layer
//!
//! Slot change notifications and turn completion, fanned out to any number of
//! subscribers over a broadcast channel.

use chorus_core_types::{SlotError, SlotStatus, TokenUsage};
use log::trace;
use serde::Serialize;
use tokio::sync::broadcast;

pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotEventKind {
    StatusChanged {
        status: SlotStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<SlotError>,
    },
    ContentAppended { text: String },
    ReasoningAppended { text: String },
    UsageUpdated { usage: TokenUsage },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotEvent {
    pub slot_id: String,
    pub turn_id: String,
    pub model_id: String,
    pub generation: u64,
    #[serde(flatten)]
    pub kind: SlotEventKind,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotOutcome {
    pub slot_id: String,
    pub model_id: String,
    pub status: SlotStatus,
    pub error: Option<SlotError>,
    pub usage: Option<TokenUsage>,
    pub generation: u64,
}

/// All-settled result of one turn: every slot reached a terminal status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub turn_id: String,
    pub slots: Vec<SlotOutcome>,
    pub settled_at_ms: i64,
}

impl TurnOutcome {
    pub fn succeeded(&self) -> usize {
        self.count(SlotStatus::Success)
    }

    pub fn failed(&self) -> usize {
        self.count(SlotStatus::Error)
    }

    pub fn cancelled(&self) -> usize {
        self.count(SlotStatus::Cancelled)
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded() == self.slots.len()
    }

    fn count(&self, status: SlotStatus) -> usize {
        self.slots.iter().filter(|slot| slot.status == status).count()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChatEvent {
    Slot(SlotEvent),
    TurnSettled(TurnOutcome),
}

/// Broadcast fan-out. Publishing never blocks the writer; a subscriber that
/// falls behind by more than the buffer sees `Lagged` and can resync from a
/// slot snapshot.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ChatEvent) {
        if self.sender.send(event).is_err() {
            trace!("Chat event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(status: SlotStatus) -> SlotOutcome {
        SlotOutcome {
            slot_id: format!("slot-{:?}", status),
            model_id: "m".to_string(),
            status,
            error: None,
            usage: None,
            generation: 0,
        }
    }

    #[test]
    fn turn_outcome_counts() {
        let turn = TurnOutcome {
            turn_id: "t".to_string(),
            slots: vec![
                outcome(SlotStatus::Success),
                outcome(SlotStatus::Error),
                outcome(SlotStatus::Success),
                outcome(SlotStatus::Cancelled),
            ],
            settled_at_ms: 0,
        };
        assert_eq!(turn.succeeded(), 2);
        assert_eq!(turn.failed(), 1);
        assert_eq!(turn.cancelled(), 1);
        assert!(!turn.all_succeeded());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let hub = EventHub::new(4);
        hub.publish(ChatEvent::TurnSettled(TurnOutcome {
            turn_id: "t".to_string(),
            slots: vec![],
            settled_at_ms: 0,
        }));

        let mut rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        hub.publish(ChatEvent::TurnSettled(TurnOutcome {
            turn_id: "t2".to_string(),
            slots: vec![],
            settled_at_ms: 0,
        }));
        match rx.recv().await.unwrap() {
            ChatEvent::TurnSettled(outcome) => assert_eq!(outcome.turn_id, "t2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn slot_event_serializes_flat() {
        let event = SlotEvent {
            slot_id: "s".to_string(),
            turn_id: "t".to_string(),
            model_id: "m".to_string(),
            generation: 1,
            kind: SlotEventKind::ContentAppended { text: "hi".to_string() },
            timestamp: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "content_appended");
        assert_eq!(json["text"], "hi");
        assert_eq!(json["slotId"], "s");
    }
}
