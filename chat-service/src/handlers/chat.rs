//! The streaming chat endpoint.
//!
//! Authorizes the caller for the course, opens the event stream, and runs
//! the orchestrator on a dedicated task. The response commits as soon as
//! the stream opens; every failure after that point travels as a terminal
//! `Error` event, never as an HTTP status.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

use crate::access::{AccessLevel, RequiredAccess};
use crate::models::{Conversation, ConversationMessage};
use crate::services::ConversationStore;
use crate::services::orchestrator::{ChatOrchestrator, ChatTurnContext};
use crate::services::providers::ChatMessage;
use crate::startup::AppState;
use crate::stream::events::{DoneEvent, ErrorEvent, InitializingEvent, StreamEvent};
use crate::stream::server::{EventSink, sse_response};
use service_core::error::AppError;

/// Sink buffer; a slow consumer backpressures the orchestrator here.
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChatStreamRequest {
    #[validate(length(min = 1, message = "content is required"))]
    pub content: String,

    /// Continue an existing conversation; a new one is created otherwise.
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// When present, the turn asks for retrieval over course material.
    #[serde(default)]
    pub retrieval_query: Option<String>,

    #[serde(default)]
    pub title: Option<String>,
}

/// Stream one chat turn as lifecycle events.
///
/// POST /courses/chat
#[tracing::instrument(skip_all, fields(course))]
pub async fn chat_stream(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let identity = state.identity.identify(&headers)?;
    let course = state
        .gate
        .authorize(
            &Method::POST,
            &query,
            Some(&body),
            &headers,
            &identity,
            &RequiredAccess::Always(AccessLevel::Any),
        )
        .await?;
    tracing::Span::current().record("course", course.course_name.as_str());

    let req: ChatStreamRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e)))?;
    req.validate()?;

    let user_email = course.identity.email.clone().ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
    })?;

    // Load or create the conversation; callers only see their own
    let conversation = match &req.conversation_id {
        Some(id) => state
            .conversations
            .find(id)
            .await?
            .filter(|c| c.course_name == course.course_name && c.user_email == user_email)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Conversation '{}' not found", id))
            })?,
        None => {
            let conversation = Conversation::new(
                course.course_name.clone(),
                user_email.clone(),
                req.title.clone(),
            );
            state.conversations.insert(&conversation).await?;
            conversation
        }
    };

    let user_message = ConversationMessage {
        role: "user".to_string(),
        content: req.content.clone(),
        timestamp: Utc::now(),
    };
    state
        .conversations
        .add_message(&conversation.conversation_id, &user_message, 0, 0)
        .await?;

    let mut history: Vec<ChatMessage> = conversation
        .messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role.clone(),
            content: m.content.clone(),
        })
        .collect();
    history.push(ChatMessage::user(req.content.clone()));

    let ctx = ChatTurnContext {
        course_name: course.course_name,
        user_email,
        conversation_id: conversation.conversation_id,
        message_id: uuid::Uuid::new_v4().to_string(),
        assistant_message_id: uuid::Uuid::new_v4().to_string(),
        history,
        retrieval_query: req.retrieval_query,
    };

    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let orchestrator = state.orchestrator.clone();
    let store = state.conversations.clone();

    tokio::spawn(async move {
        sink.emit(&StreamEvent::Initializing(InitializingEvent {
            message_id: ctx.message_id.clone(),
            conversation_id: ctx.conversation_id.clone(),
            assistant_message_id: ctx.assistant_message_id.clone(),
        }))
        .await;

        match orchestrator.run(&ctx, &sink).await {
            Ok(outcome) => {
                let assistant_message = ConversationMessage {
                    role: "assistant".to_string(),
                    content: outcome.answer,
                    timestamp: Utc::now(),
                };
                if let Err(e) = store
                    .add_message(
                        &ctx.conversation_id,
                        &assistant_message,
                        outcome.summary.input_tokens,
                        outcome.summary.output_tokens,
                    )
                    .await
                {
                    tracing::warn!(
                        conversation_id = %ctx.conversation_id,
                        error = %e,
                        "Failed to persist assistant message (non-critical)"
                    );
                }

                sink.emit(&StreamEvent::Done(DoneEvent {
                    conversation_id: ctx.conversation_id.clone(),
                    final_message_id: ctx.assistant_message_id.clone(),
                    summary: outcome.summary,
                }))
                .await;
            }
            Err(e) => {
                tracing::error!(
                    conversation_id = %ctx.conversation_id,
                    error = %e,
                    "Chat orchestration failed"
                );
                sink.emit(&StreamEvent::Error(ErrorEvent {
                    message: e.to_string(),
                    step_number: None,
                    recoverable: false,
                }))
                .await;
            }
        }

        // One close on every path; later emits are no-ops
        sink.close();
    });

    Ok(sse_response(rx))
}
