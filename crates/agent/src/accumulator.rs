//! Streaming response accumulator: drains one turn's [`StreamEvent`]s,
//! forwards chunks outward, and collects the turn's text and tool calls.

use astrolabe_core::message::ToolCallRequest;
use astrolabe_core::provider::{RawToolCall, StreamEvent};
use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event::{AgentEvent, Cancelled, emit};
use crate::extractor::ToolCallExtractor;
use crate::policy::DuplicatePolicy;

/// Text already forwarded to the caller during one loop run.
///
/// Lives for the whole run so that provider re-sends are caught across turns.
#[derive(Debug, Default, Clone)]
pub struct EmittedText {
    pub content: String,
    pub reasoning: String,
}

/// What one model turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnOutput {
    /// Raw visible text, as streamed.
    pub content: String,
    /// Visible text with tool-call scaffolding removed.
    pub clean_content: String,
    pub reasoning: String,
    /// Native calls, or the calls embedded in `content` when there were none.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The provider reported an error; an `Error` event has been sent.
    pub failed: bool,
}

pub struct StreamAccumulator<'a> {
    extractor: &'a ToolCallExtractor,
    policy: DuplicatePolicy,
    emitted: &'a mut EmittedText,
    turn: TurnOutput,
    /// Call ids handed out this turn.
    seen_ids: HashSet<String>,
}

impl<'a> StreamAccumulator<'a> {
    pub fn new(extractor: &'a ToolCallExtractor, policy: DuplicatePolicy, emitted: &'a mut EmittedText) -> Self {
        Self {
            extractor,
            policy,
            emitted,
            turn: TurnOutput::default(),
            seen_ids: HashSet::new(),
        }
    }

    /// Drain `stream` until `Done` or until the channel closes.
    ///
    /// After an `Error` the remaining events are drained without touching the
    /// turn's text; metadata events are still forwarded.
    pub async fn consume(
        mut self,
        mut stream: mpsc::Receiver<StreamEvent>,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<TurnOutput, Cancelled> {
        while let Some(event) = stream.recv().await {
            match event {
                StreamEvent::ContentDelta { text } if !self.turn.failed => self.on_content(text, tx).await?,
                StreamEvent::ReasoningDelta { text } if !self.turn.failed => self.on_reasoning(text, tx).await?,
                StreamEvent::ToolCalls { calls } if !self.turn.failed => {
                    for call in calls {
                        let call = self.normalize_call(call);
                        self.turn.tool_calls.push(call);
                    }
                }
                StreamEvent::ContentDelta { .. } | StreamEvent::ReasoningDelta { .. } | StreamEvent::ToolCalls { .. } => {}
                StreamEvent::Error { message, retryable } => {
                    warn!(error = %message, retryable, "Model stream reported an error");
                    if !self.turn.failed {
                        self.turn.failed = true;
                        emit(tx, AgentEvent::Error { message, retryable }).await?;
                    }
                }
                StreamEvent::Usage { usage } => emit(tx, AgentEvent::TokenUsage { usage }).await?,
                StreamEvent::ProviderInfo { provider, model } => {
                    emit(tx, AgentEvent::ModelInfo { provider, model }).await?;
                }
                StreamEvent::Retry {
                    attempt,
                    max_attempts,
                    delay_ms,
                    reason,
                } => {
                    emit(
                        tx,
                        AgentEvent::RetryInfo {
                            attempt,
                            max_attempts,
                            delay_ms,
                            reason,
                        },
                    )
                    .await?;
                }
                StreamEvent::Done if !self.turn.failed => break,
                StreamEvent::Done => {}
            }
        }

        Ok(self.finish())
    }

    async fn on_content(&mut self, text: String, tx: &mpsc::Sender<AgentEvent>) -> Result<(), Cancelled> {
        if text.is_empty() {
            return Ok(());
        }
        self.turn.content.push_str(&text);
        if self.policy.is_duplicate(&self.emitted.content, &text) {
            debug!(chars = text.len(), "Suppressed repeated content delta");
            return Ok(());
        }
        self.emitted.content.push_str(&text);
        emit(tx, AgentEvent::ContentChunk { content: text }).await
    }

    async fn on_reasoning(&mut self, text: String, tx: &mpsc::Sender<AgentEvent>) -> Result<(), Cancelled> {
        if text.is_empty() {
            return Ok(());
        }
        self.turn.reasoning.push_str(&text);
        if self.policy.is_duplicate(&self.emitted.reasoning, &text) {
            debug!(chars = text.len(), "Suppressed repeated reasoning delta");
            return Ok(());
        }
        self.emitted.reasoning.push_str(&text);
        emit(tx, AgentEvent::ReasoningChunk { content: text }).await
    }

    /// Keep the provider's id unless it is missing, blank, or already used this turn.
    fn normalize_call(&mut self, raw: RawToolCall) -> ToolCallRequest {
        let id = match raw.id.filter(|id| !id.trim().is_empty()) {
            Some(id) if !self.seen_ids.contains(&id) => id,
            Some(id) => {
                debug!(id = %id, tool = %raw.name, "Provider reused a tool call id, generating a fresh one");
                ToolCallRequest::generate_id()
            }
            None => ToolCallRequest::generate_id(),
        };
        self.seen_ids.insert(id.clone());
        ToolCallRequest::new(id, raw.name, raw.arguments)
    }

    fn finish(mut self) -> TurnOutput {
        if !self.turn.failed && self.turn.tool_calls.is_empty() {
            self.turn.tool_calls = self.extractor.extract(&self.turn.content);
            if !self.turn.tool_calls.is_empty() {
                debug!(count = self.turn.tool_calls.len(), "Adopted embedded tool calls");
            }
        }
        self.turn.clean_content = self.extractor.scrub(&self.turn.content);
        self.turn
    }
}
