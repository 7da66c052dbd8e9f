//! Conversation persistence contract.
//!
//! Production uses the MongoDB-backed `ChatDb`; tests use the in-memory
//! store so the protocol surface runs without a database.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{Conversation, ConversationMessage};
use service_core::error::AppError;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert(&self, conversation: &Conversation) -> Result<(), AppError>;

    async fn find(&self, conversation_id: &str) -> Result<Option<Conversation>, AppError>;

    /// Conversations one user holds in one course, newest first.
    async fn list(
        &self,
        course_name: &str,
        user_email: &str,
    ) -> Result<Vec<Conversation>, AppError>;

    async fn add_message(
        &self,
        conversation_id: &str,
        message: &ConversationMessage,
        input_tokens: i32,
        output_tokens: i32,
    ) -> Result<(), AppError>;

    /// Delete every conversation in a course. Returns the deleted count.
    async fn purge_course(&self, course_name: &str) -> Result<u64, AppError>;

    /// Backing-store liveness, surfaced by the health endpoints.
    async fn health_check(&self) -> Result<(), AppError>;
}

/// In-memory conversation store for tests.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert(&self, conversation: &Conversation) -> Result<(), AppError> {
        self.conversations
            .lock()
            .expect("conversation lock poisoned")
            .insert(conversation.conversation_id.clone(), conversation.clone());
        Ok(())
    }

    async fn find(&self, conversation_id: &str) -> Result<Option<Conversation>, AppError> {
        Ok(self
            .conversations
            .lock()
            .expect("conversation lock poisoned")
            .get(conversation_id)
            .cloned())
    }

    async fn list(
        &self,
        course_name: &str,
        user_email: &str,
    ) -> Result<Vec<Conversation>, AppError> {
        let mut matching: Vec<Conversation> = self
            .conversations
            .lock()
            .expect("conversation lock poisoned")
            .values()
            .filter(|c| c.course_name == course_name && c.user_email == user_email)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        message: &ConversationMessage,
        input_tokens: i32,
        output_tokens: i32,
    ) -> Result<(), AppError> {
        let mut guard = self.conversations.lock().expect("conversation lock poisoned");
        let conversation = guard.get_mut(conversation_id).ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Conversation not found: {}", conversation_id))
        })?;
        conversation.add_message(message.role.clone(), message.content.clone());
        conversation.add_usage(input_tokens, output_tokens);
        Ok(())
    }

    async fn purge_course(&self, course_name: &str) -> Result<u64, AppError> {
        let mut guard = self.conversations.lock().expect("conversation lock poisoned");
        let before = guard.len();
        guard.retain(|_, c| c.course_name != course_name);
        Ok((before - guard.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
