//! DeepSeek provider implementation.
//!
//! Talks to a DeepSeek streaming relay whose raw protocol interleaves the
//! model's reasoning channel and answer channel as line-prefixed markers
//! inside one byte stream. The raw stream is piped through
//! `ReasoningNormalizer`, so downstream consumers only ever see one
//! normalized text stream.

use super::normalizer::{LineAssembler, ReasoningNormalizer};
use super::{
    ChatMessage, FinishReason, GenerationParams, ProviderError, ProviderStream, StreamChunk,
    TextProvider,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// DeepSeek provider configuration.
#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

/// DeepSeek text provider.
pub struct DeepSeekTextProvider {
    config: DeepSeekConfig,
    client: Client,
}

impl DeepSeekTextProvider {
    pub fn new(config: DeepSeekConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn stream_url(&self) -> String {
        format!("{}/chat/stream", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl TextProvider for DeepSeekTextProvider {
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError> {
        let request = StreamRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stop: if params.stop_sequences.is_empty() {
                None
            } else {
                Some(params.stop_sequences.clone())
            },
        };

        let input_chars: usize = messages.iter().map(|m| m.content.len()).sum();

        tracing::debug!(
            model = %self.config.model,
            message_count = messages.len(),
            "Starting streaming request to DeepSeek relay"
        );

        let response = self
            .client
            .post(self.stream_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "DeepSeek relay error {}: {}",
                status, error_text
            )));
        }

        // Create channel for normalized chunks
        let (tx, rx) = mpsc::channel(32);

        // Spawn task to reassemble lines and normalize the marked protocol
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut assembler = LineAssembler::new();
            let mut normalizer = ReasoningNormalizer::new();
            let mut output_chars = 0usize;

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        let complete = assembler.push(&String::from_utf8_lossy(&chunk));
                        if complete.is_empty() {
                            continue;
                        }
                        let normalized = normalizer.process(&complete);
                        if !normalized.is_empty() {
                            output_chars += normalized.len();
                            if tx.send(Ok(StreamChunk::Text(normalized))).await.is_err() {
                                // Receiver dropped, stop processing
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::NetworkError(e.to_string())))
                            .await;
                        return;
                    }
                }
            }

            // Drain the trailing partial line and close any open span
            let mut tail = String::new();
            let leftover = assembler.finish();
            if !leftover.is_empty() {
                tail.push_str(&normalizer.process(&leftover));
            }
            tail.push_str(&normalizer.finish());
            if !tail.is_empty() {
                output_chars += tail.len();
                if tx.send(Ok(StreamChunk::Text(tail))).await.is_err() {
                    return;
                }
            }

            // The relay carries no usage frame; estimate like the mock does
            let _ = tx
                .send(Ok(StreamChunk::Complete {
                    input_tokens: (input_chars / 4) as i32,
                    output_tokens: (output_chars / 4) as i32,
                    finish_reason: FinishReason::Complete,
                }))
                .await;
        });

        let stream = ReceiverStream::new(rx);
        Ok(Box::pin(stream) as ProviderStream)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "DeepSeek API key not configured".to_string(),
            ));
        }

        let url = format!("{}/models", self.config.api_base.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// DeepSeek Relay Request Types
// ============================================================================

#[derive(Debug, Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}
