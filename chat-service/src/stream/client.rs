//! Consumer side of the event protocol.
//!
//! Reads the server-push byte stream, reassembles `\n\n`-terminated
//! frames, decodes each `data: ` line, and dispatches events to typed
//! callbacks. Cancellation is explicit and silent: an aborted run invokes
//! no further callbacks and never reports the abort as an error.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::events::{
    AgentEventsUpdateEvent, ContextsMetadataEvent, DoneEvent, FinalTokensEvent, InitializingEvent,
    RetrievalStageEvent, SelectionStageEvent, StageStatus, StreamEvent, ToolStageEvent,
    ToolsUpdateEvent,
};

/// Per-event-type callbacks. All default to no-ops so consumers implement
/// only what they render.
#[async_trait]
pub trait StreamCallbacks: Send + Sync {
    async fn on_initializing(&self, _event: &InitializingEvent) {}
    async fn on_selection_start(&self, _event: &SelectionStageEvent) {}
    async fn on_selection_done(&self, _event: &SelectionStageEvent) {}
    async fn on_retrieval_start(&self, _event: &RetrievalStageEvent) {}
    async fn on_retrieval_done(&self, _event: &RetrievalStageEvent) {}
    async fn on_tool_start(&self, _event: &ToolStageEvent) {}
    async fn on_tool_done(&self, _event: &ToolStageEvent) {}
    async fn on_agent_events(&self, _event: &AgentEventsUpdateEvent) {}
    async fn on_tools_update(&self, _event: &ToolsUpdateEvent) {}
    async fn on_contexts_metadata(&self, _event: &ContextsMetadataEvent) {}
    async fn on_token(&self, _event: &FinalTokensEvent) {}
    async fn on_done(&self, _event: &DoneEvent) {}
    async fn on_error(&self, _message: &str, _recoverable: bool) {}
}

/// One streaming request.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: String,
    pub bearer_token: Option<String>,
    pub body: Value,
}

/// Streaming chat consumer. Owns at most one in-flight request; starting
/// a new run aborts the previous one.
pub struct ChatStreamClient {
    http: reqwest::Client,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for ChatStreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStreamClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cancel: Mutex::new(None),
        }
    }

    /// Cancel the in-flight run, if any. The aborted run terminates
    /// silently without further callbacks.
    pub fn abort(&self) {
        let token = self.cancel.lock().expect("cancel lock poisoned").take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Issue the request and dispatch decoded events until the stream
    /// ends, an error occurs, or the run is aborted.
    pub async fn run(&self, request: StreamRequest, callbacks: &dyn StreamCallbacks) {
        let token = CancellationToken::new();
        {
            let mut guard = self.cancel.lock().expect("cancel lock poisoned");
            if let Some(previous) = guard.replace(token.clone()) {
                previous.cancel();
            }
        }

        self.run_inner(&token, request, callbacks).await;

        // Leave the slot alone if a newer run already replaced us.
        if !token.is_cancelled() {
            let mut guard = self.cancel.lock().expect("cancel lock poisoned");
            *guard = None;
        }
    }

    async fn run_inner(
        &self,
        token: &CancellationToken,
        request: StreamRequest,
        callbacks: &dyn StreamCallbacks,
    ) {
        let mut builder = self.http.post(&request.url).json(&request.body);
        if let Some(bearer) = &request.bearer_token {
            builder = builder.bearer_auth(bearer);
        }

        let response = tokio::select! {
            _ = token.cancelled() => return,
            result = builder.send() => match result {
                Ok(response) => response,
                Err(e) => {
                    callbacks.on_error(&format!("Request failed: {}", e), false).await;
                    return;
                }
            },
        };

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| {
                    body.get("error")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            callbacks.on_error(&message, false).await;
            return;
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return,
                chunk = stream.next() => chunk,
            };

            let bytes = match chunk {
                None => return,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    callbacks
                        .on_error(&format!("Stream read failed: {}", e), false)
                        .await;
                    return;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // A read may carry several frames; a trailing partial frame
            // stays buffered for the next read.
            while let Some(frame_end) = buffer.find("\n\n") {
                let frame = buffer[..frame_end].to_string();
                buffer.drain(..frame_end + 2);

                for line in frame.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let event = match serde_json::from_str::<StreamEvent>(data) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::debug!("skipping undecodable frame: {}", e);
                            continue;
                        }
                    };

                    if token.is_cancelled() {
                        return;
                    }
                    dispatch(callbacks, &event).await;

                    // Let the runtime breathe between dispatches under a
                    // tight event burst.
                    tokio::task::yield_now().await;
                }
            }
        }
    }
}

async fn dispatch(callbacks: &dyn StreamCallbacks, event: &StreamEvent) {
    match event {
        StreamEvent::Initializing(e) => callbacks.on_initializing(e).await,
        StreamEvent::SelectionStage(e) => match e.status {
            StageStatus::Running => callbacks.on_selection_start(e).await,
            StageStatus::Done => callbacks.on_selection_done(e).await,
        },
        StreamEvent::RetrievalStage(e) => match e.status {
            StageStatus::Running => callbacks.on_retrieval_start(e).await,
            StageStatus::Done => callbacks.on_retrieval_done(e).await,
        },
        StreamEvent::ToolStage(e) => match e.status {
            StageStatus::Running => callbacks.on_tool_start(e).await,
            StageStatus::Done => callbacks.on_tool_done(e).await,
        },
        StreamEvent::AgentEventsUpdate(e) => callbacks.on_agent_events(e).await,
        StreamEvent::ToolsUpdate(e) => callbacks.on_tools_update(e).await,
        StreamEvent::ContextsMetadata(e) => callbacks.on_contexts_metadata(e).await,
        StreamEvent::FinalTokens(e) => callbacks.on_token(e).await,
        StreamEvent::Done(e) => callbacks.on_done(e).await,
        StreamEvent::Error(e) => callbacks.on_error(&e.message, e.recoverable).await,
    }
}
