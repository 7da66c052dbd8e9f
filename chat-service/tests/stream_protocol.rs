//! End-to-end tests for the event stream protocol: gate, server-side
//! emission, and client-side dispatch over a real socket.
//!
//! These run without external services: policies come from the static
//! store, conversations live in memory, and the provider is scripted.

use async_trait::async_trait;
use axum::Router;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::post;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_service::access::{CourseAccessGate, IdentityClaims, IdentityVerifier};
use chat_service::models::CoursePolicy;
use chat_service::services::orchestrator::{ChatOrchestrator, ChatTurnContext, TurnOutcome};
use chat_service::services::providers::mock::MockTextProvider;
use chat_service::services::{InMemoryConversationStore, PipelineOrchestrator, StaticPolicyStore};
use chat_service::startup::{AppState, router};
use chat_service::stream::events::{
    AgentEventsUpdateEvent, ContextsMetadataEvent, DoneEvent, FinalTokensEvent, InitializingEvent,
    RetrievalStageEvent, SelectionStageEvent, StageStatus, StreamEvent, ToolStageEvent,
    ToolsUpdateEvent,
};
use chat_service::stream::server::EventSink;
use chat_service::stream::{ChatStreamClient, StreamCallbacks, StreamRequest, StreamSummary};
use service_core::error::AppError;

const JWT_SECRET: &str = "test-secret";

fn policies() -> Vec<CoursePolicy> {
    vec![
        CoursePolicy::new("cs101", "owner@example.edu")
            .with_admin("admin@example.edu")
            .with_approved("student@example.edu"),
        CoursePolicy::new("sec501", "owner@example.edu")
            .with_approved("student@example.edu")
            .private(),
    ]
}

fn bearer_for(email: &str) -> String {
    let claims = IdentityClaims {
        sub: uuid::Uuid::new_v4().to_string(),
        email: email.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Spawn the service on a loopback port with the given orchestrator.
async fn spawn_app(
    orchestrator: Arc<dyn ChatOrchestrator>,
) -> (String, Arc<InMemoryConversationStore>) {
    let store = Arc::new(InMemoryConversationStore::new());
    let state = AppState {
        gate: CourseAccessGate::new(Arc::new(StaticPolicyStore::new(policies()))),
        identity: IdentityVerifier::new(JWT_SECRET),
        conversations: store.clone(),
        orchestrator,
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server died");
    });

    (format!("http://{}", addr), store)
}

/// Records every dispatched callback in order.
#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
    answer: Mutex<String>,
}

impl Recorder {
    fn push(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn answer(&self) -> String {
        self.answer.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamCallbacks for Recorder {
    async fn on_initializing(&self, _event: &InitializingEvent) {
        self.push("initializing");
    }
    async fn on_selection_start(&self, _event: &SelectionStageEvent) {
        self.push("selection_start");
    }
    async fn on_selection_done(&self, _event: &SelectionStageEvent) {
        self.push("selection_done");
    }
    async fn on_retrieval_start(&self, _event: &RetrievalStageEvent) {
        self.push("retrieval_start");
    }
    async fn on_retrieval_done(&self, _event: &RetrievalStageEvent) {
        self.push("retrieval_done");
    }
    async fn on_tool_start(&self, event: &ToolStageEvent) {
        self.push(format!("tool_start:{}", event.tool_name));
    }
    async fn on_tool_done(&self, event: &ToolStageEvent) {
        self.push(format!("tool_done:{}", event.tool_name));
    }
    async fn on_agent_events(&self, _event: &AgentEventsUpdateEvent) {
        self.push("agent_events");
    }
    async fn on_tools_update(&self, _event: &ToolsUpdateEvent) {
        self.push("tools_update");
    }
    async fn on_contexts_metadata(&self, _event: &ContextsMetadataEvent) {
        self.push("contexts_metadata");
    }
    async fn on_token(&self, event: &FinalTokensEvent) {
        self.answer.lock().unwrap().push_str(&event.delta);
        self.push(if event.done { "token_done" } else { "token" });
    }
    async fn on_done(&self, _event: &DoneEvent) {
        self.push("done");
    }
    async fn on_error(&self, message: &str, _recoverable: bool) {
        self.push(format!("error:{}", message));
    }
}

fn chat_request(base: &str, email: Option<&str>, body: serde_json::Value) -> StreamRequest {
    StreamRequest {
        url: format!("{}/courses/chat", base),
        bearer_token: email.map(bearer_for),
        body,
    }
}

#[tokio::test]
async fn chat_stream_dispatches_lifecycle_in_order() {
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::new(
        MockTextProvider::with_reasoning(),
    )));
    let (base, _store) = spawn_app(orchestrator).await;

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            chat_request(
                &base,
                Some("student@example.edu"),
                json!({ "courseName": "cs101", "content": "What is a monad?" }),
            ),
            &recorder,
        )
        .await;

    let entries = recorder.entries();
    assert_eq!(entries.first().map(String::as_str), Some("initializing"));
    assert_eq!(entries.get(1).map(String::as_str), Some("selection_start"));
    assert_eq!(entries.get(2).map(String::as_str), Some("selection_done"));
    assert_eq!(entries.last().map(String::as_str), Some("done"));

    // exactly one terminal event, no errors
    assert_eq!(entries.iter().filter(|e| *e == "done").count(), 1);
    assert!(!entries.iter().any(|e| e.starts_with("error:")));

    // token deltas arrive normalized, reasoning span intact
    assert_eq!(
        recorder.answer(),
        "<think>thinking it through</think>the answer"
    );
}

#[tokio::test]
async fn completed_turn_is_persisted() {
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::new(MockTextProvider::new())));
    let (base, store) = spawn_app(orchestrator).await;

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            chat_request(
                &base,
                Some("student@example.edu"),
                json!({ "courseName": "cs101", "content": "hello" }),
            ),
            &recorder,
        )
        .await;

    assert_eq!(recorder.entries().last().map(String::as_str), Some("done"));

    use chat_service::services::ConversationStore;
    let conversations = store.list("cs101", "student@example.edu").await.unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].message_count, 2);
}

#[tokio::test]
async fn unauthenticated_chat_reports_one_error() {
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::new(MockTextProvider::new())));
    let (base, _store) = spawn_app(orchestrator).await;

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            chat_request(&base, None, json!({ "courseName": "cs101", "content": "hi" })),
            &recorder,
        )
        .await;

    let entries = recorder.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].starts_with("error:"));
    assert!(entries[0].contains("Authentication required"));
}

#[tokio::test]
async fn missing_course_reports_bad_request_error() {
    let orchestrator = Arc::new(PipelineOrchestrator::new(Arc::new(MockTextProvider::new())));
    let (base, _store) = spawn_app(orchestrator).await;

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            chat_request(&base, Some("student@example.edu"), json!({ "content": "hi" })),
            &recorder,
        )
        .await;

    let entries = recorder.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("No course specified"));
}

/// Orchestration failure becomes a terminal Error event on the stream.
struct FailingOrchestrator;

#[async_trait]
impl ChatOrchestrator for FailingOrchestrator {
    async fn run(&self, _ctx: &ChatTurnContext, sink: &EventSink) -> Result<TurnOutcome, AppError> {
        sink.emit(&StreamEvent::FinalTokens(FinalTokensEvent {
            delta: "partial".to_string(),
            done: false,
        }))
        .await;
        Err(AppError::BadGateway("upstream fell over".to_string()))
    }
}

#[tokio::test]
async fn orchestration_failure_is_a_terminal_error_event() {
    let (base, _store) = spawn_app(Arc::new(FailingOrchestrator)).await;

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            chat_request(
                &base,
                Some("student@example.edu"),
                json!({ "courseName": "cs101", "content": "hi" }),
            ),
            &recorder,
        )
        .await;

    let entries = recorder.entries();
    assert_eq!(entries.first().map(String::as_str), Some("initializing"));
    assert_eq!(entries.get(1).map(String::as_str), Some("token"));
    assert!(entries.last().unwrap().starts_with("error:"));
    assert!(!entries.iter().any(|e| e == "done"));
}

/// Emits the tool/agent/context event shapes the default pipeline never
/// produces, so client dispatch of every variant is covered.
struct ScriptedOrchestrator;

#[async_trait]
impl ChatOrchestrator for ScriptedOrchestrator {
    async fn run(&self, _ctx: &ChatTurnContext, sink: &EventSink) -> Result<TurnOutcome, AppError> {
        sink.emit(&StreamEvent::ToolStage(ToolStageEvent {
            step_number: 1,
            status: StageStatus::Running,
            tool_name: "wolfram".to_string(),
            readable_tool_name: "Wolfram Alpha".to_string(),
            output_text: None,
            output_image_urls: None,
            error_message: None,
        }))
        .await;
        sink.emit(&StreamEvent::ToolStage(ToolStageEvent {
            step_number: 1,
            status: StageStatus::Done,
            tool_name: "wolfram".to_string(),
            readable_tool_name: "Wolfram Alpha".to_string(),
            output_text: Some("42".to_string()),
            output_image_urls: None,
            error_message: None,
        }))
        .await;
        sink.emit(&StreamEvent::AgentEventsUpdate(AgentEventsUpdateEvent {
            agent_events: vec![json!({"kind": "tool_call"})],
            message_id: "m1".to_string(),
        }))
        .await;
        sink.emit(&StreamEvent::ToolsUpdate(ToolsUpdateEvent {
            tools: vec![json!({"name": "wolfram"})],
            message_id: "m1".to_string(),
        }))
        .await;
        sink.emit(&StreamEvent::ContextsMetadata(ContextsMetadataEvent {
            message_id: "m1".to_string(),
            contexts_metadata: vec![json!({"source": "week3.pdf"})],
            total_contexts: 1,
        }))
        .await;

        Ok(TurnOutcome {
            answer: "42".to_string(),
            summary: StreamSummary {
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: "complete".to_string(),
            },
        })
    }
}

#[tokio::test]
async fn every_event_variant_dispatches_to_its_callback() {
    let (base, _store) = spawn_app(Arc::new(ScriptedOrchestrator)).await;

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            chat_request(
                &base,
                Some("student@example.edu"),
                json!({ "courseName": "cs101", "content": "hi" }),
            ),
            &recorder,
        )
        .await;

    assert_eq!(
        recorder.entries(),
        vec![
            "initializing",
            "tool_start:wolfram",
            "tool_done:wolfram",
            "agent_events",
            "tools_update",
            "contexts_metadata",
            "done",
        ]
    );
}

/// Trickles tokens slowly so a mid-stream abort has something to cancel.
struct SlowOrchestrator;

#[async_trait]
impl ChatOrchestrator for SlowOrchestrator {
    async fn run(&self, _ctx: &ChatTurnContext, sink: &EventSink) -> Result<TurnOutcome, AppError> {
        for i in 0..100 {
            sink.emit(&StreamEvent::FinalTokens(FinalTokensEvent {
                delta: format!("t{} ", i),
                done: false,
            }))
            .await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(TurnOutcome {
            answer: String::new(),
            summary: StreamSummary {
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: "complete".to_string(),
            },
        })
    }
}

#[tokio::test]
async fn abort_terminates_silently_without_further_callbacks() {
    let (base, _store) = spawn_app(Arc::new(SlowOrchestrator)).await;

    let client = Arc::new(ChatStreamClient::new());
    let recorder = Arc::new(Recorder::default());

    let run_client = client.clone();
    let run_recorder = recorder.clone();
    let run_base = base.clone();
    let handle = tokio::spawn(async move {
        run_client
            .run(
                chat_request(
                    &run_base,
                    Some("student@example.edu"),
                    json!({ "courseName": "cs101", "content": "hi" }),
                ),
                run_recorder.as_ref(),
            )
            .await;
    });

    // Let a few tokens through, then cancel
    tokio::time::sleep(Duration::from_millis(150)).await;
    client.abort();
    handle.await.unwrap();

    let entries = recorder.entries();
    assert!(entries.iter().any(|e| e == "token"));
    assert!(!entries.iter().any(|e| e == "done"));
    assert!(!entries.iter().any(|e| e.starts_with("error:")));

    // No callbacks trickle in after the abort returned
    let settled = entries.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.entries().len(), settled);
}

/// A minimal two-frame stream dispatches exactly once per frame, in order.
async fn two_frames() -> impl IntoResponse {
    let body = concat!(
        "data: {\"type\":\"Initializing\",\"messageId\":\"m1\",\"conversationId\":\"c1\",",
        "\"assistantMessageId\":\"m2\"}\n\n",
        "data: {\"type\":\"Done\",\"conversationId\":\"c1\",\"finalMessageId\":\"m2\",",
        "\"summary\":{\"inputTokens\":1,\"outputTokens\":2,\"finishReason\":\"complete\"}}\n\n",
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

#[tokio::test]
async fn two_frame_stream_dispatches_each_callback_once() {
    let app = Router::new().route("/stream", post(two_frames));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            StreamRequest {
                url: format!("http://{}/stream", addr),
                bearer_token: None,
                body: json!({}),
            },
            &recorder,
        )
        .await;

    assert_eq!(recorder.entries(), vec!["initializing", "done"]);
}

/// Frames without a recognized `type` are skipped without any callback.
async fn mystery_frames() -> impl IntoResponse {
    let body = concat!(
        "data: {\"type\":\"Mystery\",\"x\":1}\n\n",
        "data: not-json\n\n",
        "data: {\"type\":\"Done\",\"conversationId\":\"c1\",\"finalMessageId\":\"m1\",",
        "\"summary\":{\"inputTokens\":0,\"outputTokens\":0,\"finishReason\":\"complete\"}}\n\n",
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], body)
}

#[tokio::test]
async fn unrecognized_frames_are_skipped() {
    let app = Router::new().route("/stream", post(mystery_frames));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ChatStreamClient::new();
    let recorder = Recorder::default();
    client
        .run(
            StreamRequest {
                url: format!("http://{}/stream", addr),
                bearer_token: None,
                body: json!({}),
            },
            &recorder,
        )
        .await;

    assert_eq!(recorder.entries(), vec!["done"]);
}
