//! Upstream model provider abstractions and implementations.
//!
//! Providers differ in wire format; all of them surface the same
//! `TextProvider` contract and the same normalized delta stream
//! (reasoning content wrapped in `<think>...</think>`, answers plain).

pub mod deepseek;
pub mod mock;
pub mod normalizer;
pub mod openai;

use async_trait::async_trait;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Reason why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Complete,
    Length,
    Error,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Complete => "complete",
            FinishReason::Length => "length",
            FinishReason::Error => "error",
        }
    }
}

/// One message of conversation history handed to a provider.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Stream chunk for streaming responses.
pub enum StreamChunk {
    /// Normalized text delta.
    Text(String),

    /// Final completion with usage stats.
    Complete {
        input_tokens: i32,
        output_tokens: i32,
        finish_reason: FinishReason,
    },
}

/// Type alias for provider streams.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Generation parameters for provider requests.
#[derive(Debug, Clone, Default)]
pub struct GenerationParams {
    /// Temperature (0.0 - 2.0).
    pub temperature: Option<f32>,

    /// Top-p sampling.
    pub top_p: Option<f32>,

    /// Maximum output tokens.
    pub max_tokens: Option<i32>,

    /// Stop sequences.
    pub stop_sequences: Vec<String>,
}

/// Trait for streaming text generation providers.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Generate a streaming response over the given history.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
