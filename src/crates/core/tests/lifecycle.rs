mod common;

use std::time::Duration;

use chorus_core::types::{SlotStatus, Turn};
use chorus_core::{ChatEvent, ChorusError, OrchestratorConfig, ResourceKind};
use common::{build, eventually, orchestrator, test_configs, wait_turn, MockProvider, SLOW_TICKS};

fn turn(models: &[&str]) -> Turn {
    Turn::new("hi", models.iter().map(|m| m.to_string()).collect())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_one_slot_leaves_siblings_streaming() {
    let mock = MockProvider::start().await;
    let chat = orchestrator(vec![
        ("first", vec![mock.openai("slow")]),
        ("second", vec![mock.openai("slow")]),
    ]);

    let submitted = chat.submit_turn(turn(&["first", "second"])).unwrap();
    let first = submitted.slot_for_model("first").unwrap().clone();
    let second = submitted.slot_for_model("second").unwrap().clone();
    assert!(eventually(|| !first.snapshot().content.is_empty()).await);

    assert!(chat.stop_response(first.id()).unwrap());
    let frozen = first.snapshot();
    assert_eq!(frozen.status, SlotStatus::Cancelled);
    assert!(frozen.last_error.is_none());

    let outcome = wait_turn(&chat, &submitted.turn_id).await;
    assert_eq!(outcome.cancelled(), 1);
    assert_eq!(outcome.succeeded(), 1);
    assert_eq!(first.snapshot().content, frozen.content);
    assert_eq!(second.snapshot().content, "tick ".repeat(SLOW_TICKS));

    // Stopping an already finished slot is a no-op.
    assert!(!chat.stop_response(first.id()).unwrap());
    assert!(!chat.stop_response(second.id()).unwrap());
    assert!(matches!(chat.stop_response("slot-missing"), Err(ChorusError::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_before_response_headers_cancels_promptly() {
    let mock = MockProvider::start().await;
    let chat = orchestrator(vec![("stuck", vec![mock.openai("hang")])]);

    let submitted = chat.submit_turn(turn(&["stuck"])).unwrap();
    let slot = submitted.slots[0].clone();
    assert!(eventually(|| mock.hits("hang") == 1).await);
    assert_eq!(slot.status(), SlotStatus::Pending);

    chat.stop_response(slot.id()).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(2), chat.wait_for_turn(&submitted.turn_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.cancelled(), 1);
    assert!(eventually(|| chat.resources().active_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_turn_cancels_every_running_slot() {
    let mock = MockProvider::start().await;
    let chat = orchestrator(vec![
        ("first", vec![mock.openai("slow")]),
        ("second", vec![mock.openai("hang")]),
    ]);

    let submitted = chat.submit_turn(turn(&["first", "second"])).unwrap();
    assert!(eventually(|| mock.hits("slow") == 1 && mock.hits("hang") == 1).await);

    assert_eq!(chat.stop_turn(&submitted.turn_id).unwrap(), 2);
    let outcome = wait_turn(&chat, &submitted.turn_id).await;
    assert_eq!(outcome.cancelled(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_after_failure_starts_a_new_generation() {
    let mock = MockProvider::start().await;
    let chat = orchestrator(vec![("flaky", vec![mock.openai("flaky")]), ("steady", vec![mock.openai("ok")])]);
    let mut events = chat.subscribe();

    let submitted = chat.submit_turn(turn(&["flaky", "steady"])).unwrap();
    let flaky = submitted.slot_for_model("flaky").unwrap().clone();
    let steady = submitted.slot_for_model("steady").unwrap().clone();

    let first = wait_turn(&chat, &submitted.turn_id).await;
    assert_eq!(first.failed(), 1);
    assert_eq!(flaky.snapshot().last_error.unwrap().status, Some(503));
    let steady_before = steady.snapshot();

    let generation = chat.retry_response(flaky.id()).unwrap();
    assert_eq!(generation, 1);
    assert!(chat.turn_outcome(&submitted.turn_id).is_none());

    let second = wait_turn(&chat, &submitted.turn_id).await;
    assert!(second.all_succeeded());
    let retried = flaky.snapshot();
    assert_eq!(retried.generation, 1);
    assert_eq!(retried.content, "Hello from flaky");
    assert!(retried.last_error.is_none());
    assert_eq!(steady.snapshot(), steady_before);
    assert_eq!(mock.hits("ok"), 1);

    let mut settled = 0;
    while settled < 2 {
        if let ChatEvent::TurnSettled(outcome) = events.recv().await.unwrap() {
            assert_eq!(outcome.turn_id, submitted.turn_id);
            settled += 1;
        }
    }
    let metadata = chat.render_metadata(flaky.id()).unwrap().unwrap();
    assert_eq!(metadata.char_count, "Hello from flaky".len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_while_streaming_discards_the_old_generation() {
    let mock = MockProvider::start().await;
    let chat = orchestrator(vec![("slow", vec![mock.openai("slow")])]);

    let submitted = chat.submit_turn(turn(&["slow"])).unwrap();
    let slot = submitted.slots[0].clone();
    assert!(eventually(|| slot.snapshot().content.len() >= "tick ".len() * 3).await);

    assert_eq!(chat.retry_response(slot.id()).unwrap(), 1);
    let state = slot.snapshot();
    assert_eq!(state.generation, 1);
    assert!(state.content.len() < "tick ".len() * 3);

    let outcome = wait_turn(&chat, &submitted.turn_id).await;
    assert_eq!(outcome.slots[0].generation, 1);
    assert_eq!(slot.snapshot().content, "tick ".repeat(SLOW_TICKS));
    assert_eq!(mock.hits("slow"), 2);
    assert!(eventually(|| chat.resources().active_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_reports_every_running_slot_as_stopped() {
    let mock = MockProvider::start().await;
    let chat = orchestrator(vec![("stuck", vec![mock.openai("hang")])]);

    for round in 0..10 {
        let submitted = chat.submit_turn(turn(&["stuck"])).unwrap();
        let slot = submitted.slots[0].clone();
        assert!(eventually(|| mock.hits("hang") == round + 1).await);

        assert!(chat.stop_response(slot.id()).unwrap(), "round {}", round);
        assert_eq!(slot.status(), SlotStatus::Cancelled);
        wait_turn(&chat, &submitted.turn_id).await;
        chat.release_turn(&submitted.turn_id).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_timeout_cancels_the_slot() {
    let mock = MockProvider::start().await;
    let (mut orchestrator_config, cache_config) = test_configs();
    orchestrator_config.request_timeout_secs = 1;
    let chat = build(orchestrator_config, cache_config, vec![("stuck", vec![mock.openai("hang")])]);

    let submitted = chat.submit_turn(turn(&["stuck"])).unwrap();
    assert_eq!(chat.resources().kind_count(ResourceKind::Timer), 1);

    let outcome = wait_turn(&chat, &submitted.turn_id).await;
    assert_eq!(outcome.cancelled(), 1);
    assert_eq!(outcome.failed(), 0);
    let state = submitted.slots[0].snapshot();
    assert_eq!(state.status, SlotStatus::Cancelled);
    assert!(state.last_error.is_none());
    assert!(eventually(|| chat.resources().active_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finished_request_clears_its_timer() {
    let mock = MockProvider::start().await;
    let (mut orchestrator_config, cache_config) = test_configs();
    orchestrator_config.request_timeout_secs = 30;
    let chat = build(orchestrator_config, cache_config, vec![("alpha", vec![mock.openai("ok")])]);

    let submitted = chat.submit_turn(turn(&["alpha"])).unwrap();
    assert!(wait_turn(&chat, &submitted.turn_id).await.all_succeeded());
    assert!(eventually(|| chat.resources().kind_count(ResourceKind::Timer) == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_stream_is_cancelled_and_keeps_partial_content() {
    let mock = MockProvider::start().await;
    let (_, cache_config) = test_configs();
    let orchestrator_config = OrchestratorConfig {
        idle_timeout_secs: 1,
        ..test_configs().0
    };
    let chat = build(orchestrator_config, cache_config, vec![("stall", vec![mock.openai("stall")])]);

    let submitted = chat.submit_turn(turn(&["stall"])).unwrap();
    assert!(eventually(|| chat.resources().kind_count(ResourceKind::Timer) == 1).await);
    let outcome = wait_turn(&chat, &submitted.turn_id).await;
    assert_eq!(outcome.cancelled(), 1);

    let state = submitted.slots[0].snapshot();
    assert_eq!(state.content, "partial");
    assert!(state.last_error.is_none());
    assert!(eventually(|| chat.resources().active_count() == 0).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_cancels_everything_in_flight() {
    let mock = MockProvider::start().await;
    let (orchestrator_config, mut cache_config) = test_configs();
    cache_config.sweep_interval_secs = 60;
    let chat = build(
        orchestrator_config,
        cache_config,
        vec![("slow", vec![mock.openai("slow")]), ("stuck", vec![mock.openai("hang")])],
    );

    let submitted = chat.submit_turn(turn(&["slow", "stuck"])).unwrap();
    assert!(eventually(|| mock.hits("slow") == 1 && mock.hits("hang") == 1).await);
    assert!(chat.resources().scope_count("cache:render") == 1);

    chat.shutdown();
    for slot in &submitted.slots {
        assert_eq!(slot.status(), SlotStatus::Cancelled);
    }
    assert!(eventually(|| chat.resources().active_count() == 0).await);
}
