//! Conversation management endpoints.
//!
//! One route, three verbs, three privilege levels: listing is open to any
//! course member, creating curated conversations takes an admin, purging
//! the course's conversations takes the owner.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::access::{AccessLevel, RequiredAccess};
use crate::models::Conversation;
use crate::services::ConversationStore;
use crate::startup::AppState;
use service_core::error::AppError;

fn conversations_access() -> RequiredAccess {
    RequiredAccess::per_method([
        (Method::GET, AccessLevel::Any),
        (Method::POST, AccessLevel::Admin),
        (Method::DELETE, AccessLevel::Owner),
    ])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub message_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationSummary {
    fn from(c: &Conversation) -> Self {
        Self {
            conversation_id: c.conversation_id.clone(),
            title: c.title.clone(),
            message_count: c.message_count,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListConversationsResponse {
    pub course: String,
    pub conversations: Vec<ConversationSummary>,
}

/// List the caller's conversations in a course.
///
/// GET /courses/conversations
#[tracing::instrument(skip_all)]
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<ListConversationsResponse>, AppError> {
    let identity = state.identity.identify(&headers)?;
    let course = state
        .gate
        .authorize(
            &Method::GET,
            &query,
            None,
            &headers,
            &identity,
            &conversations_access(),
        )
        .await?;

    let user_email = course.identity.email.clone().ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
    })?;

    let conversations = state
        .conversations
        .list(&course.course_name, &user_email)
        .await?;

    Ok(Json(ListConversationsResponse {
        course: course.course_name,
        conversations: conversations.iter().map(ConversationSummary::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationResponse {
    pub conversation_id: String,
}

/// Create a curated conversation (admins and the owner).
///
/// POST /courses/conversations
#[tracing::instrument(skip_all)]
pub async fn create_conversation(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<CreateConversationResponse>), AppError> {
    let identity = state.identity.identify(&headers)?;
    let course = state
        .gate
        .authorize(
            &Method::POST,
            &query,
            Some(&body),
            &headers,
            &identity,
            &conversations_access(),
        )
        .await?;

    let user_email = course.identity.email.clone().ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Authentication required"))
    })?;

    let req: CreateConversationRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid request body: {}", e)))?;

    let conversation = Conversation::new(course.course_name, user_email, req.title);
    state.conversations.insert(&conversation).await?;

    tracing::info!(conversation_id = %conversation.conversation_id, "Conversation created");

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse {
            conversation_id: conversation.conversation_id,
        }),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeConversationsResponse {
    pub course: String,
    pub deleted: u64,
}

/// Delete every conversation in a course (owner only).
///
/// DELETE /courses/conversations
#[tracing::instrument(skip_all)]
pub async fn purge_conversations(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<PurgeConversationsResponse>, AppError> {
    let identity = state.identity.identify(&headers)?;
    let course = state
        .gate
        .authorize(
            &Method::DELETE,
            &query,
            None,
            &headers,
            &identity,
            &conversations_access(),
        )
        .await?;

    let deleted = state.conversations.purge_course(&course.course_name).await?;

    tracing::info!(course = %course.course_name, deleted, "Course conversations purged");

    Ok(Json(PurgeConversationsResponse {
        course: course.course_name,
        deleted,
    }))
}
