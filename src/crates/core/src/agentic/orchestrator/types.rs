use crate::agentic::events::TurnOutcome;
use crate::agentic::slot::ResponseSlot;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Consumer-owned callback run once per settled turn (and again when a retry
/// settles it anew).
pub type CompletionHook = Arc<dyn Fn(&TurnOutcome) + Send + Sync>;

/// Returned by `submit_turn` before any request has been sent.
#[derive(Debug, Clone)]
pub struct SubmittedTurn {
    pub turn_id: String,
    /// One slot per distinct target model, in submission order.
    pub slots: Vec<Arc<ResponseSlot>>,
}

impl SubmittedTurn {
    pub fn slot_for_model(&self, model_id: &str) -> Option<&Arc<ResponseSlot>> {
        self.slots.iter().find(|slot| slot.model_id() == model_id)
    }

    pub fn slot_ids(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.id().to_string()).collect()
    }
}

pub(crate) struct TurnRecord {
    pub slot_ids: Vec<String>,
    /// `None` until every slot is terminal; reset by a retry.
    pub outcome: watch::Sender<Option<TurnOutcome>>,
    /// Serializes "all slots terminal, publish outcome" against retries.
    pub settle_lock: Mutex<()>,
    pub created_at_ms: i64,
}

impl TurnRecord {
    pub fn new(slot_ids: Vec<String>, created_at_ms: i64) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            slot_ids,
            outcome,
            settle_lock: Mutex::new(()),
            created_at_ms,
        }
    }
}

pub(crate) fn turn_scope(turn_id: &str) -> String {
    format!("turn:{}", turn_id)
}

pub(crate) fn render_key(slot_id: &str, generation: u64) -> String {
    format!("{}#{}", slot_id, generation)
}
