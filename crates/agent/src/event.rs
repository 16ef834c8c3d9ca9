//! Events emitted by the conversation loop.
//!
//! `AgentEvent` is the only observable output of a loop run. The caller
//! receives them in order over a channel and may forward them over SSE,
//! WebSocket, or JSON lines.

use astrolabe_core::message::Message;
use astrolabe_core::provider::Usage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A choice offered to the user by an `ask_user` interrupt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskUserOption {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub value: String,
}

/// Events emitted by the agent during a loop run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Partial visible text from the model.
    ContentChunk { content: String },

    /// Partial reasoning text from the model.
    ReasoningChunk { content: String },

    /// Which provider/model served the current turn.
    ModelInfo { provider: String, model: String },

    /// The model requested these tools, in order.
    ToolCallsStarted { names: Vec<String> },

    /// A tool is about to run.
    ToolExecuting {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool finished (successfully or not).
    ToolResult {
        id: String,
        name: String,
        success: bool,
        summary: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Token accounting for a turn.
    TokenUsage { usage: Usage },

    /// Something went wrong; the loop may or may not have stopped.
    Error { message: String, retryable: bool },

    /// The model client is retrying.
    RetryInfo {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },

    /// The loop paused to ask the user a question.
    AskUserInterrupt {
        question: String,
        options: Vec<AskUserOption>,
        allow_custom_input: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
        transcript: Vec<Message>,
        tools_used: Vec<String>,
    },

    /// The exchange is finished.
    Complete {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        tools_used: Vec<String>,
    },
}

impl AgentEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentChunk { .. } => "content_chunk",
            Self::ReasoningChunk { .. } => "reasoning_chunk",
            Self::ModelInfo { .. } => "model_info",
            Self::ToolCallsStarted { .. } => "tool_calls_started",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::TokenUsage { .. } => "token_usage",
            Self::Error { .. } => "error",
            Self::RetryInfo { .. } => "retry_info",
            Self::AskUserInterrupt { .. } => "ask_user_interrupt",
            Self::Complete { .. } => "complete",
        }
    }
}

/// The caller dropped the event receiver; the run is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event receiver dropped")]
pub struct Cancelled;

/// Send one event, mapping a closed channel to [`Cancelled`].
pub(crate) async fn emit(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), Cancelled> {
    tx.send(event).await.map_err(|_| Cancelled)
}
