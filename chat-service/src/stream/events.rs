//! The lifecycle event vocabulary.
//!
//! Every frame on the wire is one of these variants, discriminated by a
//! `type` field. Exactly one terminal event (`Done` or `Error`) ends a
//! stream, and `Initializing` is always first when emitted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Phase of a two-stage step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Running,
    Done,
}

/// Terminal accounting reported by the `Done` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub finish_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializingEvent {
    pub message_id: String,
    pub conversation_id: String,
    pub assistant_message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionStageEvent {
    pub step_number: u32,
    pub status: StageStatus,
    /// Present once the stage is done.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_retrieval: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_tools: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalStageEvent {
    pub step_number: u32,
    pub status: StageStatus,
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contexts_retrieved: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStageEvent {
    pub step_number: u32,
    pub status: StageStatus,
    pub tool_name: String,
    pub readable_tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_image_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEventsUpdateEvent {
    pub agent_events: Vec<Value>,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsUpdateEvent {
    pub tools: Vec<Value>,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextsMetadataEvent {
    pub message_id: String,
    pub contexts_metadata: Vec<Value>,
    pub total_contexts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalTokensEvent {
    pub delta: String,
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneEvent {
    pub conversation_id: String,
    pub final_message_id: String,
    pub summary: StreamSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
    pub recoverable: bool,
}

/// One discrete message in the server-push protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    Initializing(InitializingEvent),
    SelectionStage(SelectionStageEvent),
    RetrievalStage(RetrievalStageEvent),
    ToolStage(ToolStageEvent),
    AgentEventsUpdate(AgentEventsUpdateEvent),
    ToolsUpdate(ToolsUpdateEvent),
    ContextsMetadata(ContextsMetadataEvent),
    FinalTokens(FinalTokensEvent),
    Done(DoneEvent),
    Error(ErrorEvent),
}
