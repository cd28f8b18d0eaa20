use super::manager::ChatOrchestrator;
use super::types::turn_scope;
use crate::agentic::events::ChatEvent;
use crate::agentic::slot::SlotWriter;
use crate::infrastructure::resource_manager::ResourceKind;
use chorus_core_types::TerminalStatus;
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Starts one slot generation. The abort signal (and the request timer, if
/// any) are registered under the generation's scope before the task exists,
/// so a stop issued right after submission always finds them.
pub(super) fn spawn_slot(orchestrator: &Arc<ChatOrchestrator>, writer: SlotWriter) {
    let scope = writer.scope();
    let token = orchestrator.shutdown.child_token();
    orchestrator.resources.register_cancellation(scope.clone(), &token);

    if let Some(timeout) = orchestrator.request_timeout {
        let timer_writer = writer.clone();
        let timer_token = token.clone();
        // Expiry takes the same path as a user stop.
        orchestrator.resources.schedule_timeout(scope, timeout, move || {
            let stopped = timer_writer.finish(TerminalStatus::Cancelled);
            timer_token.cancel();
            warn!(
                "Request timed out, cancelling: slot_id={}, generation={}, timeout_secs={}, stopped={}",
                timer_writer.slot_id(),
                timer_writer.generation(),
                timeout.as_secs(),
                stopped
            );
        });
    }

    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        run_slot(&orchestrator, writer, token).await;
    });
}

async fn run_slot(orchestrator: &ChatOrchestrator, writer: SlotWriter, token: CancellationToken) {
    let slot_id = writer.slot_id().to_string();
    let model_id = writer.slot().model_id().to_string();
    debug!(
        "Slot run started: slot_id={}, model={}, generation={}",
        slot_id,
        model_id,
        writer.generation()
    );

    let configs = orchestrator
        .catalog
        .get(&model_id)
        .map(|entry| entry.value().clone())
        .unwrap_or_default();
    let request = orchestrator.requests.get(&slot_id).map(|entry| entry.value().clone());

    match request {
        Some(request) => {
            let report = orchestrator.chain.attempt(&request, &configs, &writer, &token).await;
            debug!(
                "Slot run finished: slot_id={}, generation={}, status={:?}, attempts={}",
                slot_id,
                writer.generation(),
                report.status.slot_status(),
                report.attempts.len()
            );
        }
        None => {
            warn!("Slot has no request, it was released: slot_id={}", slot_id);
            writer.finish(TerminalStatus::Cancelled);
        }
    }

    orchestrator.resources.release_scope(&writer.scope());
    orchestrator.cache_render_metadata(&writer);
}

/// Watches a turn until every slot is terminal, then publishes the outcome.
/// Registered as a listener under the turn scope.
pub(super) fn spawn_settlement(orchestrator: &Arc<ChatOrchestrator>, turn_id: &str) {
    let token = orchestrator.shutdown.child_token();
    let cancel = token.clone();
    let handle = orchestrator
        .resources
        .register(turn_scope(turn_id), ResourceKind::Listener, move || cancel.cancel());

    let orchestrator = orchestrator.clone();
    let turn_id = turn_id.to_string();
    tokio::spawn(async move {
        watch_settlement(&orchestrator, &turn_id, &token).await;
        orchestrator.resources.release_one(handle);
    });
}

async fn watch_settlement(orchestrator: &ChatOrchestrator, turn_id: &str, token: &CancellationToken) {
    loop {
        let Ok(slots) = orchestrator.slots_for_turn(turn_id) else {
            return;
        };
        let settled = join_all(slots.iter().map(|slot| slot.wait_terminal()));
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Turn settlement watch cancelled: turn_id={}", turn_id);
                return;
            }
            _ = settled => {}
        }

        // A retry may have reopened a slot after its wait resolved.
        let Some(outcome) = orchestrator.commit_outcome(turn_id) else {
            continue;
        };
        info!(
            "Turn settled: turn_id={}, success={}, error={}, cancelled={}",
            turn_id,
            outcome.succeeded(),
            outcome.failed(),
            outcome.cancelled()
        );
        orchestrator.events.publish(ChatEvent::TurnSettled(outcome.clone()));
        if let Some(hook) = &orchestrator.completion_hook {
            if catch_unwind(AssertUnwindSafe(|| hook(&outcome))).is_err() {
                error!("Turn completion hook panicked: turn_id={}", turn_id);
            }
        }
        return;
    }
}
