//! The orchestration seam between the protocol layer and the decision
//! logic that drives a chat turn.
//!
//! The protocol only cares that an orchestrator emits lifecycle events in
//! order onto the sink and returns a summary; what the stages decide is a
//! collaborator concern behind `ChatOrchestrator` / `ContextRetriever`.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

use crate::services::providers::{
    ChatMessage, FinishReason, GenerationParams, StreamChunk, TextProvider,
};
use crate::stream::events::{
    ContextsMetadataEvent, FinalTokensEvent, RetrievalStageEvent, SelectionStageEvent, StageStatus,
    StreamEvent,
};
use crate::stream::{EventSink, StreamSummary};
use service_core::error::AppError;

/// Everything one chat turn needs.
#[derive(Debug, Clone)]
pub struct ChatTurnContext {
    pub course_name: String,
    pub user_email: String,
    pub conversation_id: String,
    pub message_id: String,
    pub assistant_message_id: String,
    /// Conversation history including the new user message, oldest first.
    pub history: Vec<ChatMessage>,
    /// Query to run against course material, when the caller asks for it.
    pub retrieval_query: Option<String>,
}

/// What a completed turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    /// Full assistant answer (normalized text, reasoning included).
    pub answer: String,
    pub summary: StreamSummary,
}

/// A retrieved course-material context.
#[derive(Debug, Clone)]
pub struct RetrievedContext {
    pub source: String,
    pub content: String,
    pub metadata: Value,
}

/// Retrieval collaborator. The ranking/selection logic lives outside this
/// service; the orchestrator only consumes the results.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    async fn retrieve(
        &self,
        course_name: &str,
        query: &str,
    ) -> Result<Vec<RetrievedContext>, AppError>;
}

/// Drives one chat turn, emitting lifecycle events onto the sink.
#[async_trait]
pub trait ChatOrchestrator: Send + Sync {
    async fn run(&self, ctx: &ChatTurnContext, sink: &EventSink) -> Result<TurnOutcome, AppError>;
}

/// Default orchestration: selection stage, optional retrieval stage, then
/// the provider's normalized delta stream as `FinalTokens`.
pub struct PipelineOrchestrator {
    provider: Arc<dyn TextProvider>,
    retriever: Option<Arc<dyn ContextRetriever>>,
}

impl PipelineOrchestrator {
    pub fn new(provider: Arc<dyn TextProvider>) -> Self {
        Self {
            provider,
            retriever: None,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }
}

#[async_trait]
impl ChatOrchestrator for PipelineOrchestrator {
    async fn run(&self, ctx: &ChatTurnContext, sink: &EventSink) -> Result<TurnOutcome, AppError> {
        let mut step_number: u32 = 1;
        let mut messages = ctx.history.clone();

        // Stage: selection
        sink.emit(&StreamEvent::SelectionStage(SelectionStageEvent {
            step_number,
            status: StageStatus::Running,
            use_retrieval: None,
            selected_tools: None,
        }))
        .await;

        let retrieval = ctx
            .retrieval_query
            .as_deref()
            .and_then(|query| self.retriever.as_ref().map(|r| (query, r)));

        sink.emit(&StreamEvent::SelectionStage(SelectionStageEvent {
            step_number,
            status: StageStatus::Done,
            use_retrieval: Some(retrieval.is_some()),
            selected_tools: Some(Vec::new()),
        }))
        .await;

        // Stage: retrieval
        if let Some((query, retriever)) = retrieval {
            step_number += 1;

            sink.emit(&StreamEvent::RetrievalStage(RetrievalStageEvent {
                step_number,
                status: StageStatus::Running,
                query: query.to_string(),
                contexts_retrieved: None,
            }))
            .await;

            let contexts = retriever.retrieve(&ctx.course_name, query).await?;

            sink.emit(&StreamEvent::RetrievalStage(RetrievalStageEvent {
                step_number,
                status: StageStatus::Done,
                query: query.to_string(),
                contexts_retrieved: Some(contexts.len() as u32),
            }))
            .await;

            if !contexts.is_empty() {
                sink.emit(&StreamEvent::ContextsMetadata(ContextsMetadataEvent {
                    message_id: ctx.message_id.clone(),
                    contexts_metadata: contexts.iter().map(|c| c.metadata.clone()).collect(),
                    total_contexts: contexts.len() as u32,
                }))
                .await;

                let joined = contexts
                    .iter()
                    .map(|c| format!("[{}] {}", c.source, c.content))
                    .collect::<Vec<_>>()
                    .join("\n\n");
                messages.insert(
                    0,
                    ChatMessage::system(format!("Course material:\n{}", joined)),
                );
            }
        }

        // Stage: answer streaming
        let params = GenerationParams::default();
        let mut provider_stream = self
            .provider
            .generate_stream(&messages, &params)
            .await
            .map_err(|e| AppError::BadGateway(e.to_string()))?;

        let mut answer = String::new();
        let mut summary = StreamSummary {
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Complete.as_str().to_string(),
        };

        while let Some(chunk) = provider_stream.next().await {
            if sink.is_closed() {
                // Consumer gone: stop driving the provider, keep what we have
                tracing::debug!(
                    conversation_id = %ctx.conversation_id,
                    "stream consumer gone, abandoning provider stream"
                );
                break;
            }
            match chunk {
                Ok(StreamChunk::Text(delta)) => {
                    answer.push_str(&delta);
                    sink.emit(&StreamEvent::FinalTokens(FinalTokensEvent {
                        delta,
                        done: false,
                    }))
                    .await;
                }
                Ok(StreamChunk::Complete {
                    input_tokens,
                    output_tokens,
                    finish_reason,
                }) => {
                    summary = StreamSummary {
                        input_tokens,
                        output_tokens,
                        finish_reason: finish_reason.as_str().to_string(),
                    };
                }
                Err(e) => {
                    return Err(AppError::BadGateway(e.to_string()));
                }
            }
        }

        sink.emit(&StreamEvent::FinalTokens(FinalTokensEvent {
            delta: String::new(),
            done: true,
        }))
        .await;

        Ok(TurnOutcome { answer, summary })
    }
}
