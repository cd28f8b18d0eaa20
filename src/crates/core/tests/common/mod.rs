#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chorus_core::types::{EndpointConfig, ProviderKind};
use chorus_core::{CacheConfig, ChatOrchestrator, OrchestratorConfig, TurnOutcome};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Hit {
    pub route: String,
    pub headers: HeaderMap,
    pub body: Value,
}

#[derive(Clone, Default)]
pub struct MockState {
    hits: Arc<Mutex<Vec<Hit>>>,
}

impl MockState {
    fn record(&self, route: &str, headers: &HeaderMap, body: &Value) -> usize {
        let mut hits = self.hits.lock().unwrap();
        hits.push(Hit {
            route: route.to_string(),
            headers: headers.clone(),
            body: body.clone(),
        });
        hits.iter().filter(|hit| hit.route == route).count()
    }
}

/// In-process provider speaking the wire formats the adapters expect.
pub struct MockProvider {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockProvider {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new()
            .route("/ok/chat/completions", post(ok_handler))
            .route("/fail500/chat/completions", post(fail500_handler))
            .route("/fail500-stall/chat/completions", post(fail500_stall_handler))
            .route("/fail401/chat/completions", post(fail401_handler))
            .route("/flaky/chat/completions", post(flaky_handler))
            .route("/slow/chat/completions", post(slow_handler))
            .route("/hang/chat/completions", post(hang_handler))
            .route("/stall/chat/completions", post(stall_handler))
            .route("/provider-error/chat/completions", post(provider_error_handler))
            .route("/azure/deployments/:deployment/chat/completions", post(azure_handler))
            .route("/ndjson/api/chat", post(ndjson_handler))
            .route("/anthropic/messages", post(anthropic_handler))
            .route("/bot/v3/chat", post(bot_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    /// Host for an endpoint config; adapters append their own path.
    pub fn host(&self, prefix: &str) -> String {
        format!("http://{}/{}", self.addr, prefix)
    }

    pub fn openai(&self, prefix: &str) -> EndpointConfig {
        EndpointConfig::new(ProviderKind::Openai, self.host(prefix), "sk-test")
    }

    pub fn hits(&self, route: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .filter(|hit| hit.route == route)
            .count()
    }

    pub fn last_hit(&self, route: &str) -> Option<Hit> {
        self.state
            .hits
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|hit| hit.route == route)
            .cloned()
    }
}

/// Endpoint on a port nobody listens on: the connection is refused.
pub async fn dead_endpoint() -> EndpointConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    EndpointConfig::new(ProviderKind::Openai, format!("http://{}/v1", addr), "sk-dead")
}

pub fn test_configs() -> (OrchestratorConfig, CacheConfig) {
    let orchestrator = OrchestratorConfig {
        request_timeout_secs: 0,
        idle_timeout_secs: 30,
        connect_timeout_secs: 5,
        event_buffer: 4096,
    };
    let cache = CacheConfig {
        max_size: 32,
        ttl_secs: 600,
        sweep_interval_secs: 0,
    };
    (orchestrator, cache)
}

pub fn orchestrator(models: Vec<(&str, Vec<EndpointConfig>)>) -> Arc<ChatOrchestrator> {
    let (orchestrator, cache) = test_configs();
    build(orchestrator, cache, models)
}

pub fn build(
    orchestrator: OrchestratorConfig,
    cache: CacheConfig,
    models: Vec<(&str, Vec<EndpointConfig>)>,
) -> Arc<ChatOrchestrator> {
    let built = ChatOrchestrator::new(&orchestrator, &cache).unwrap();
    for (model, endpoints) in models {
        built.register_model(model, endpoints);
    }
    Arc::new(built)
}

pub async fn wait_turn(orchestrator: &ChatOrchestrator, turn_id: &str) -> TurnOutcome {
    tokio::time::timeout(Duration::from_secs(10), orchestrator.wait_for_turn(turn_id))
        .await
        .expect("turn should settle")
        .expect("turn should be known")
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn model_of(body: &Value) -> String {
    body.get("model")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

fn openai_chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": content}}]
        })
    )
}

fn openai_usage(prompt: u32, completion: u32) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "object": "chat.completion.chunk",
            "choices": [],
            "usage": {"prompt_tokens": prompt, "completion_tokens": completion, "total_tokens": prompt + completion}
        })
    )
}

fn streamed(content_type: &'static str, frames: Vec<String>, delay: Duration) -> Response {
    let body = stream::iter(frames).then(move |frame| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(frame)
    });
    ([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response()
}

fn sse(frames: Vec<String>) -> Response {
    streamed("text/event-stream", frames, Duration::from_millis(5))
}

fn ok_frames(model: &str) -> Vec<String> {
    vec![
        openai_chunk("Hello"),
        openai_chunk(" from "),
        openai_chunk(model),
        openai_usage(7, 3),
        "data: [DONE]\n\n".to_string(),
    ]
}

async fn ok_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("ok", &headers, &body);
    sse(ok_frames(&model_of(&body)))
}

async fn fail500_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("fail500", &headers, &body);
    (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response()
}

/// 500 whose error body never finishes.
async fn fail500_stall_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("fail500-stall", &headers, &body);
    let first = stream::iter(vec![Ok::<_, Infallible>("upstream ".to_string())]);
    let body = first.chain(stream::pending());
    (StatusCode::INTERNAL_SERVER_ERROR, Body::from_stream(body)).into_response()
}

async fn fail401_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("fail401", &headers, &body);
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"message": "invalid api key", "type": "invalid_request_error"}})),
    )
        .into_response()
}

/// Fails the first call with a 503, then behaves like `ok`.
async fn flaky_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if state.record("flaky", &headers, &body) == 1 {
        return (StatusCode::SERVICE_UNAVAILABLE, "warming up").into_response();
    }
    sse(ok_frames(&model_of(&body)))
}

pub const SLOW_TICKS: usize = 40;

/// `SLOW_TICKS` chunks of "tick " over about a second.
async fn slow_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("slow", &headers, &body);
    let mut frames = (0..SLOW_TICKS).map(|_| openai_chunk("tick ")).collect::<Vec<_>>();
    frames.push("data: [DONE]\n\n".to_string());
    streamed("text/event-stream", frames, Duration::from_millis(25))
}

/// Holds the response headers back for five seconds.
async fn hang_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("hang", &headers, &body);
    tokio::time::sleep(Duration::from_secs(5)).await;
    sse(ok_frames(&model_of(&body)))
}

/// One chunk, then silence without closing the connection.
async fn stall_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("stall", &headers, &body);
    let first = stream::iter(vec![Ok::<_, Infallible>(openai_chunk("partial"))]);
    let body = first.chain(stream::pending());
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(body)).into_response()
}

async fn provider_error_handler(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("provider-error", &headers, &body);
    sse(vec![
        openai_chunk("Partial answer"),
        format!("data: {}\n\n", json!({"error": {"message": "quota exceeded", "type": "insufficient_quota"}})),
        openai_chunk(" never delivered"),
        "data: [DONE]\n\n".to_string(),
    ])
}

async fn azure_handler(
    State(state): State<MockState>,
    Path(deployment): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    state.record("azure", &headers, &body);
    sse(ok_frames(&deployment))
}

async fn ndjson_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("ndjson", &headers, &body);
    let model = model_of(&body);
    let frames = vec![
        format!("{}\n", json!({"model": model, "message": {"role": "assistant", "content": "", "thinking": "local thought"}, "done": false})),
        format!("{}\n", json!({"model": model, "message": {"role": "assistant", "content": "Local "}, "done": false})),
        format!("{}\n", json!({"model": model, "message": {"role": "assistant", "content": "answer"}, "done": false})),
        // Last line without a trailing newline: flushed when the body ends.
        json!({"model": model, "message": {"role": "assistant", "content": ""}, "done": true, "prompt_eval_count": 12, "eval_count": 4}).to_string(),
    ];
    streamed("application/x-ndjson", frames, Duration::from_millis(5))
}

async fn anthropic_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("anthropic", &headers, &body);
    let event = |name: &str, data: Value| format!("event: {}\ndata: {}\n\n", name, data);
    sse(vec![
        event("message_start", json!({"type": "message_start", "message": {"id": "msg_1", "usage": {"input_tokens": 21, "output_tokens": 1}}})),
        event("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
        event("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Considering"}})),
        event("ping", json!({"type": "ping"})),
        event("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "Bonjour"}})),
        event("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 9}})),
        event("message_stop", json!({"type": "message_stop"})),
    ])
}

async fn bot_handler(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("bot", &headers, &body);
    let event = |name: &str, data: Value| format!("event:{}\ndata:{}\n\n", name, data);
    sse(vec![
        event("conversation.chat.created", json!({"id": "chat-1", "status": "created"})),
        event("conversation.message.delta", json!({"role": "assistant", "type": "answer", "content": "Bot "})),
        event("conversation.message.delta", json!({"role": "assistant", "type": "answer", "content": "reply"})),
        event("conversation.message.completed", json!({"role": "assistant", "type": "answer", "content": "Bot reply"})),
        event("conversation.message.completed", json!({"role": "assistant", "type": "follow_up", "content": "Anything else?"})),
        event("conversation.chat.completed", json!({"id": "chat-1", "status": "completed", "usage": {"token_count": 15, "output_count": 5, "input_count": 10}})),
        "event:done\ndata:\"[DONE]\"\n\n".to_string(),
    ])
}
