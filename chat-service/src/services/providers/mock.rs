//! Mock provider implementations for testing.

use super::{
    ChatMessage, FinishReason, GenerationParams, ProviderError, ProviderStream, StreamChunk,
    TextProvider,
};
use async_trait::async_trait;

/// Mock text provider streaming a fixed script.
pub struct MockTextProvider {
    deltas: Vec<String>,
}

impl MockTextProvider {
    /// Default script: a short answer in several deltas.
    pub fn new() -> Self {
        Self::with_deltas(vec![
            "Mock".to_string(),
            " streaming".to_string(),
            " response".to_string(),
        ])
    }

    /// Stream exactly the given deltas.
    pub fn with_deltas(deltas: Vec<String>) -> Self {
        Self { deltas }
    }

    /// Script with a normalized reasoning span ahead of the answer.
    pub fn with_reasoning() -> Self {
        Self::with_deltas(vec![
            "<think>".to_string(),
            "thinking it through".to_string(),
            "</think>".to_string(),
            "the answer".to_string(),
        ])
    }
}

impl Default for MockTextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextProvider for MockTextProvider {
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError> {
        let input_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        let output_chars: usize = self.deltas.iter().map(|d| d.len()).sum();

        let mut chunks: Vec<Result<StreamChunk, ProviderError>> = self
            .deltas
            .iter()
            .map(|d| Ok(StreamChunk::Text(d.clone())))
            .collect();
        chunks.push(Ok(StreamChunk::Complete {
            input_tokens: (input_chars / 4) as i32,
            output_tokens: (output_chars / 4) as i32,
            finish_reason: FinishReason::Complete,
        }));

        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Mock provider that fails mid-stream, for error-path tests.
pub struct FailingTextProvider;

#[async_trait]
impl TextProvider for FailingTextProvider {
    async fn generate_stream(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError> {
        let chunks: Vec<Result<StreamChunk, ProviderError>> = vec![
            Ok(StreamChunk::Text("partial".to_string())),
            Err(ProviderError::NetworkError("connection reset".to_string())),
        ];
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Err(ProviderError::NotConfigured(
            "failing provider is test-only".to_string(),
        ))
    }
}
