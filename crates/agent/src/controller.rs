//! The conversation loop controller.
//!
//! One run drives repeated model turns through the [`StreamAccumulator`],
//! routes tool calls through the [`ToolDispatcher`], and stops on one of:
//!
//! - **Completed**: a turn without tool calls produced the answer
//! - **AwaitingUser**: a successful `ask_user` call paused the loop
//! - **CeilingReached**: the turn or tool-turn limit was hit
//! - a provider error
//!
//! Everything the caller sees arrives as [`AgentEvent`]s on the returned
//! channel. Dropping the receiver abandons the run at the next emission.

use astrolabe_config::AppConfig;
use astrolabe_core::context::DomainContext;
use astrolabe_core::message::{Message, Transcript};
use astrolabe_core::prompt::PromptBuilder;
use astrolabe_core::provider::{ModelClient, ModelRequest};
use astrolabe_core::tool::{ToolDefinition, ToolExecutionResult, ToolExecutor};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::accumulator::{EmittedText, StreamAccumulator, TurnOutput};
use crate::ask_user::AskUserRequest;
use crate::dispatcher::{ToolDispatcher, parse_arguments};
use crate::event::{AgentEvent, Cancelled, emit};
use crate::extractor::ToolCallExtractor;
use crate::policy::{DuplicatePolicy, LoopLimits, tool_timeout};

/// Assistant text recorded alongside tool calls when the turn said nothing.
const TOOL_TURN_PLACEHOLDER: &str = "Let me gather the information I need.";

/// Asks the model to turn its reasoning into an answer.
const CONTINUE_PROMPT: &str =
    "Based on the tool results above, please write out your analysis for me now.";

/// Content of a degraded completion that only has reasoning to show.
const INCOMPLETE_PLACEHOLDER: &str =
    "I could not finish the analysis within the allowed number of steps. Here is what I worked out so far.";

/// The user's answer to an `ask_user` interrupt.
#[derive(Debug, Clone, PartialEq)]
pub enum UserReply {
    /// Free-text answer.
    Text(String),
    /// One of the offered options.
    Option { label: String, value: String },
}

impl UserReply {
    fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::user(text),
            Self::Option { label, value } => {
                let mut message = Message::user(label);
                message.metadata.insert("reply_value".into(), Value::String(value));
                message
            }
        }
    }
}

/// Drives multi-turn, tool-augmented conversations.
#[derive(Clone)]
pub struct ConversationLoop {
    client: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolExecutor>,
    prompt: Arc<dyn PromptBuilder>,
    extractor: Arc<ToolCallExtractor>,

    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,

    limits: LoopLimits,
    duplicates: DuplicatePolicy,
    tool_timeout: Option<Duration>,
    event_buffer: usize,
}

impl ConversationLoop {
    pub fn new(
        client: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
        prompt: Arc<dyn PromptBuilder>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tools,
            prompt,
            extractor: Arc::new(ToolCallExtractor::default()),
            model: model.into(),
            temperature: None,
            max_tokens: None,
            limits: LoopLimits::default(),
            duplicates: DuplicatePolicy::default(),
            tool_timeout: None,
            event_buffer: 128,
        }
    }

    /// Build a loop with every knob taken from `config`.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolExecutor>,
        prompt: Arc<dyn PromptBuilder>,
    ) -> Self {
        let mut this = Self::new(client, tools, prompt, config.model.clone())
            .with_limits(LoopLimits::from(&config.agent))
            .with_duplicate_policy(DuplicatePolicy::from(&config.agent.duplicates))
            .with_tool_timeout(tool_timeout(&config.agent))
            .with_event_buffer(config.agent.event_buffer);
        this.temperature = config.temperature;
        this.max_tokens = config.max_tokens;
        this
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    /// Per-tool timeout; `None` lets tools run indefinitely.
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Capacity of the outward event channel (minimum 1).
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Replace the default six-strategy extractor.
    pub fn with_extractor(mut self, extractor: ToolCallExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Start a run for a new user message.
    pub fn run(
        &self,
        mut transcript: Transcript,
        user_message: impl Into<String>,
        context: DomainContext,
    ) -> mpsc::Receiver<AgentEvent> {
        transcript.push(Message::user(user_message));
        self.start(transcript, context)
    }

    /// Continue after an [`AgentEvent::AskUserInterrupt`].
    ///
    /// `transcript` is the snapshot carried by the interrupt.
    pub fn resume(&self, mut transcript: Transcript, reply: UserReply, context: DomainContext) -> mpsc::Receiver<AgentEvent> {
        transcript.push(reply.into_message());
        self.start(transcript, context)
    }

    fn start(&self, mut transcript: Transcript, context: DomainContext) -> mpsc::Receiver<AgentEvent> {
        transcript.set_system_prompt(self.prompt.build(&context));

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let this = self.clone();
        tokio::spawn(async move {
            if this.drive(transcript, context, &tx).await.is_err() {
                debug!("Event receiver dropped, run abandoned");
            }
        });
        rx
    }

    async fn drive(
        &self,
        mut transcript: Transcript,
        context: DomainContext,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), Cancelled> {
        let mut state = LoopState::default();
        let definitions = self.tools.definitions();
        let dispatcher = ToolDispatcher::new(self.tools.clone()).with_timeout(self.tool_timeout);

        info!(model = %self.model, messages = transcript.len(), "Conversation run started");

        while state.iterations < self.limits.max_total_turns && state.tool_turns < self.limits.max_tool_turns {
            state.iterations += 1;
            debug!(iteration = state.iterations, tool_turns = state.tool_turns, "Starting turn");

            let Some(turn) = self.model_turn(&transcript, &definitions, &mut state, tx).await? else {
                return Ok(());
            };

            state.record_content(&turn.clean_content);
            state.record_reasoning(&turn.reasoning);

            if turn.failed {
                warn!(iteration = state.iterations, "Turn failed, stopping run");
                return Ok(());
            }

            if !turn.tool_calls.is_empty() {
                state.tool_turns += 1;
                if let Some(interrupt) = self
                    .run_tools(&turn, &mut transcript, &mut state, &context, &dispatcher, tx)
                    .await?
                {
                    info!(iteration = state.iterations, "Paused for user input");
                    return emit(tx, interrupt).await;
                }
                continue;
            }

            if state.wants_reasoning_continuation(&self.limits) {
                info!(iteration = state.iterations, "Reasoning without an answer, asking the model to continue");
                transcript.push(Message::assistant(state.reasoning.clone()));
                transcript.push(Message::user(CONTINUE_PROMPT));
                state.history.clear();
                state.reasoning.clear();
                state.continued = true;
                continue;
            }

            let (content, reasoning) = state.completion();
            info!(
                iterations = state.iterations,
                tool_turns = state.tool_turns,
                tools = state.tools_used.len(),
                "Conversation run complete"
            );
            return emit(
                tx,
                AgentEvent::Complete {
                    content,
                    reasoning,
                    tools_used: state.tools_used,
                },
            )
            .await;
        }

        warn!(
            iterations = state.iterations,
            tool_turns = state.tool_turns,
            "Iteration ceiling reached"
        );
        if let Some((content, reasoning)) = state.degraded_completion() {
            emit(
                tx,
                AgentEvent::Complete {
                    content,
                    reasoning,
                    tools_used: state.tools_used.clone(),
                },
            )
            .await?;
        }
        emit(
            tx,
            AgentEvent::Error {
                message: format!(
                    "Reached the iteration limit after {} turns and {} tool rounds",
                    state.iterations, state.tool_turns
                ),
                retryable: false,
            },
        )
        .await
    }

    /// Stream one turn. `None` means the client refused the request and an
    /// `Error` event has been sent.
    async fn model_turn(
        &self,
        transcript: &Transcript,
        definitions: &[ToolDefinition],
        state: &mut LoopState,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<Option<TurnOutput>, Cancelled> {
        let request = ModelRequest {
            model: self.model.clone(),
            messages: transcript.messages.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: definitions.to_vec(),
            stream: true,
        };

        let stream = match self.client.stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(client = self.client.name(), error = %e, "Model request failed");
                emit(
                    tx,
                    AgentEvent::Error {
                        message: format!("Model request failed: {e}"),
                        retryable: e.is_retryable(),
                    },
                )
                .await?;
                return Ok(None);
            }
        };

        let turn = StreamAccumulator::new(&self.extractor, self.duplicates, &mut state.emitted)
            .consume(stream, tx)
            .await?;
        debug!(
            iteration = state.iterations,
            content_chars = turn.clean_content.len(),
            tool_calls = turn.tool_calls.len(),
            "Turn finished"
        );
        Ok(Some(turn))
    }

    /// Execute a turn's tool calls in order. Returns the interrupt to emit if
    /// a successful `ask_user` call was among them.
    async fn run_tools(
        &self,
        turn: &TurnOutput,
        transcript: &mut Transcript,
        state: &mut LoopState,
        context: &DomainContext,
        dispatcher: &ToolDispatcher,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<Option<AgentEvent>, Cancelled> {
        let names: Vec<String> = turn.tool_calls.iter().map(|c| c.name.clone()).collect();
        emit(tx, AgentEvent::ToolCallsStarted { names }).await?;

        let content = if turn.clean_content.trim().is_empty() {
            TOOL_TURN_PLACEHOLDER.to_string()
        } else {
            turn.clean_content.clone()
        };
        transcript.push(Message::assistant_with_tools(content, turn.tool_calls.clone()));

        let mut question = None;
        for call in &turn.tool_calls {
            state.note_tool(&call.name);
            emit(
                tx,
                AgentEvent::ToolExecuting {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: parse_arguments(&call.arguments),
                },
            )
            .await?;

            let result = dispatcher.dispatch(call, context).await;
            if question.is_none() {
                question = AskUserRequest::from_result(&call.name, &result);
            }

            let stored = tool_message_content(&result);
            emit(
                tx,
                AgentEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    success: result.success,
                    summary: result.summary,
                    data: result.data,
                    error: result.error,
                },
            )
            .await?;
            transcript.push(Message::tool_result(&call.id, stored));
        }

        Ok(question.map(|q| AgentEvent::AskUserInterrupt {
            question: q.question,
            options: q.options,
            allow_custom_input: q.allow_custom_input,
            context: q.context,
            transcript: transcript.messages.clone(),
            tools_used: state.tools_used.clone(),
        }))
    }
}

/// Serialized result envelope stored in the tool-role message.
fn tool_message_content(result: &ToolExecutionResult) -> String {
    serde_json::to_string(result).unwrap_or_else(|_| result.summary.clone())
}

/// Mutable state of one run. Never shared between runs.
#[derive(Debug, Default)]
struct LoopState {
    iterations: u32,
    tool_turns: u32,
    /// Clean content per turn, near-duplicates folded.
    history: Vec<String>,
    /// Reasoning across turns, blank-line separated.
    reasoning: String,
    /// Distinct tool names, first-use order.
    tools_used: Vec<String>,
    emitted: EmittedText,
    /// The reasoning continuation has been used.
    continued: bool,
}

impl LoopState {
    /// Record a turn's clean content. A turn that extends an earlier one
    /// replaces it; a turn already covered by an earlier one is dropped.
    fn record_content(&mut self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        if self.history.iter().any(|prior| prior.contains(content)) {
            debug!("Dropped near-duplicate turn content");
            return;
        }
        self.history.retain(|prior| !content.contains(prior.as_str()));
        self.history.push(content.to_string());
    }

    fn record_reasoning(&mut self, reasoning: &str) {
        let reasoning = reasoning.trim();
        if reasoning.is_empty() {
            return;
        }
        if !self.reasoning.is_empty() {
            self.reasoning.push_str("\n\n");
        }
        self.reasoning.push_str(reasoning);
    }

    fn note_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|n| n == name) {
            self.tools_used.push(name.to_string());
        }
    }

    fn final_content(&self) -> &str {
        self.history.last().map(String::as_str).unwrap_or_default()
    }

    fn wants_reasoning_continuation(&self, limits: &LoopLimits) -> bool {
        !self.continued
            && self.final_content().is_empty()
            && !self.reasoning.is_empty()
            && !self.tools_used.is_empty()
            && self.iterations < limits.max_total_turns.saturating_sub(1)
    }

    /// Content and the separately surfaced reasoning for `Complete`.
    fn completion(&self) -> (String, Option<String>) {
        let content = self.final_content();
        if content.is_empty() {
            (self.reasoning.clone(), None)
        } else if self.reasoning.is_empty() {
            (content.to_string(), None)
        } else {
            (content.to_string(), Some(self.reasoning.clone()))
        }
    }

    /// `Complete` payload after a ceiling breach, if anything was produced.
    fn degraded_completion(&self) -> Option<(String, Option<String>)> {
        match (self.final_content().is_empty(), self.reasoning.is_empty()) {
            (true, true) => None,
            (true, false) => Some((INCOMPLETE_PLACEHOLDER.to_string(), Some(self.reasoning.clone()))),
            (false, _) => Some(self.completion()),
        }
    }
}
