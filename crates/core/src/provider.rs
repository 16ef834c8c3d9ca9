//! Model-provider abstraction.
//!
//! A [`ModelClient`] takes the transcript and returns the events of one
//! streaming turn over a channel. Wire protocols, retries and backoff live
//! behind this trait; the agent loop only sees [`StreamEvent`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolDefinition;

/// Configuration for one model turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The full transcript, system prompt first
    pub messages: Vec<Message>,

    /// Temperature override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call natively
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A tool call as delivered by the provider. The ID may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// One event of a streaming model turn.
///
/// A stream carries any number of deltas and ends with exactly one
/// [`StreamEvent::Done`] or [`StreamEvent::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Visible text.
    ContentDelta { text: String },

    /// Reasoning / thinking text.
    ReasoningDelta { text: String },

    /// Native tool calls requested by the model.
    ToolCalls { calls: Vec<RawToolCall> },

    /// The provider failed this turn.
    Error { message: String, retryable: bool },

    /// Token accounting.
    Usage { usage: Usage },

    /// Which provider and model actually served the turn.
    ProviderInfo { provider: String, model: String },

    /// The client is retrying a transient failure.
    Retry {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        reason: String,
    },

    /// End of turn.
    Done,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }
}

/// The model-provider client.
///
/// Every backend implements this trait. The agent loop calls `stream()` once
/// per turn and drains the receiver until it closes.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openrouter").
    fn name(&self) -> &str;

    /// Start one streaming turn.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<mpsc::Receiver<StreamEvent>, ProviderError>;
}
