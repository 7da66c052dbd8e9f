//! OpenAI-compatible provider implementation.
//!
//! Speaks the chat-completions SSE protocol. There is no interleaved
//! reasoning channel here, so normalization is the identity: answer
//! deltas pass through untouched.

use super::{
    ChatMessage, FinishReason, GenerationParams, ProviderError, ProviderStream, StreamChunk,
    TextProvider,
};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// OpenAI-compatible provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

/// OpenAI-compatible text provider.
pub struct OpenAiTextProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiTextProvider {
    pub fn new(config: OpenAiConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl TextProvider for OpenAiTextProvider {
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<ProviderStream, ProviderError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            stop: if params.stop_sequences.is_empty() {
                None
            } else {
                Some(params.stop_sequences.clone())
            },
        };

        tracing::debug!(
            model = %self.config.model,
            message_count = messages.len(),
            "Starting streaming request to OpenAI-compatible API"
        );

        let response = self
            .client
            .post(self.completions_url())
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
                "OpenAI API error {}: {}",
                status, error_text
            )));
        }

        // Create channel for streaming
        let (tx, rx) = mpsc::channel(32);

        // Spawn task to process SSE stream
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut input_tokens = 0i32;
            let mut output_tokens = 0i32;
            let mut finish_reason = FinishReason::Complete;

            while let Some(chunk_result) = stream.next().await {
                match chunk_result {
                    Ok(chunk) => {
                        buffer.push_str(&String::from_utf8_lossy(&chunk));

                        // Process complete SSE events
                        while let Some(event_end) = buffer.find("\n\n") {
                            let event = buffer[..event_end].to_string();
                            buffer.drain(..event_end + 2);

                            let Some(data) = event.strip_prefix("data: ") else {
                                continue;
                            };
                            if data.trim() == "[DONE]" {
                                continue;
                            }
                            let Ok(parsed) = serde_json::from_str::<CompletionChunk>(data) else {
                                continue;
                            };

                            if let Some(usage) = &parsed.usage {
                                input_tokens = usage.prompt_tokens;
                                output_tokens = usage.completion_tokens;
                            }

                            if let Some(choice) = parsed.choices.first() {
                                if let Some(text) = &choice.delta.content {
                                    if !text.is_empty()
                                        && tx
                                            .send(Ok(StreamChunk::Text(text.clone())))
                                            .await
                                            .is_err()
                                    {
                                        return;
                                    }
                                }
                                if let Some(reason) = &choice.finish_reason {
                                    finish_reason = match reason.as_str() {
                                        "stop" => FinishReason::Complete,
                                        "length" => FinishReason::Length,
                                        _ => FinishReason::Complete,
                                    };
                                }
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

            // Send completion
            let _ = tx
                .send(Ok(StreamChunk::Complete {
                    input_tokens,
                    output_tokens,
                    finish_reason,
                }))
                .await;
        });

        let stream = ReceiverStream::new(rx);
        Ok(Box::pin(stream) as ProviderStream)
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "OpenAI API key not configured".to_string(),
            ));
        }

        let url = format!("{}/v1/models", self.config.api_base.trim_end_matches('/'));

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
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
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
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i32,
    completion_tokens: i32,
}
