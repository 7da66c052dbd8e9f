//! Conversation model for per-course chat persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One conversation thread inside a course.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation identifier.
    pub conversation_id: String,

    /// Course the conversation belongs to.
    pub course_name: String,

    /// Email of the user who started the conversation.
    pub user_email: String,

    /// Optional human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Messages exchanged so far.
    pub messages: Vec<ConversationMessage>,

    /// Total number of messages.
    pub message_count: i32,

    /// Total input tokens consumed.
    pub total_input_tokens: i32,

    /// Total output tokens generated.
    pub total_output_tokens: i32,

    /// When the conversation was created.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    /// When the conversation was last updated.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Role: "user" or "assistant".
    pub role: String,

    /// Message content.
    pub content: String,

    /// When the message was created.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new(course_name: String, user_email: String, title: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            course_name,
            user_email,
            title,
            messages: Vec::new(),
            message_count: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message.
    pub fn add_message(&mut self, role: String, content: String) {
        self.messages.push(ConversationMessage {
            role,
            content,
            timestamp: Utc::now(),
        });
        self.message_count = self.messages.len() as i32;
        self.updated_at = Utc::now();
    }

    /// Update token usage.
    pub fn add_usage(&mut self, input_tokens: i32, output_tokens: i32) {
        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
        self.updated_at = Utc::now();
    }
}
