//! End-to-end tests for the conversation loop.
//!
//! These drive `ConversationLoop` through its public API with a scripted
//! model client and a real `ToolRegistry`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use astrolabe_agent::{AgentEvent, ConversationLoop, LoopLimits, UserReply};
use astrolabe_core::context::DomainContext;
use astrolabe_core::error::{ProviderError, ToolError};
use astrolabe_core::message::{Role, Transcript};
use astrolabe_core::prompt::StaticPrompt;
use astrolabe_core::provider::{ModelClient, ModelRequest, RawToolCall, StreamEvent};
use astrolabe_core::tool::{Tool, ToolExecutionResult, ToolRegistry};
use serde_json::{Value, json};
use tokio::sync::mpsc;

// ── Scripted model client ────────────────────────────────────────────────

/// Replays one event list per turn. With `always`, every turn is the same.
struct ScriptedClient {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
    always: Option<Vec<StreamEvent>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedClient {
    fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            always: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn always(turn: Vec<StreamEvent>) -> Self {
        Self {
            always: Some(turn),
            ..Self::new(vec![])
        }
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedClient {
    fn name(&self) -> &str {
        "e2e_scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let turn = match &self.always {
            Some(turn) => turn.clone(),
            None => self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .expect("ScriptedClient exhausted"),
        };
        let (tx, rx) = mpsc::channel(turn.len().max(1));
        for event in turn {
            tx.send(event).await.unwrap();
        }
        Ok(rx)
    }
}

fn native_call(name: &str, arguments: &str) -> StreamEvent {
    StreamEvent::ToolCalls {
        calls: vec![RawToolCall {
            id: None,
            name: name.into(),
            arguments: arguments.into(),
        }],
    }
}

// ── Tools ────────────────────────────────────────────────────────────────

struct AscendantTool;

#[async_trait::async_trait]
impl Tool for AscendantTool {
    fn name(&self) -> &str {
        "get_ascendant"
    }
    fn description(&self) -> &str {
        "Rising sign of the active chart"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: Value, _ctx: &DomainContext) -> Result<ToolExecutionResult, ToolError> {
        Ok(ToolExecutionResult::ok(json!({"sign": "Leo"}), "Ascendant in Leo"))
    }
}

struct BrokenTransitsTool;

#[async_trait::async_trait]
impl Tool for BrokenTransitsTool {
    fn name(&self) -> &str {
        "get_transits"
    }
    fn description(&self) -> &str {
        "Current transits"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"days": {"type": "integer"}}})
    }
    async fn execute(&self, _args: Value, _ctx: &DomainContext) -> Result<ToolExecutionResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "get_transits".into(),
            reason: "ephemeris file \"de440.bsp\" missing".into(),
        })
    }
}

struct AskUserTool;

#[async_trait::async_trait]
impl Tool for AskUserTool {
    fn name(&self) -> &str {
        "ask_user"
    }
    fn description(&self) -> &str {
        "Ask the user a question"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"question": {"type": "string"}}})
    }
    async fn execute(&self, args: Value, _ctx: &DomainContext) -> Result<ToolExecutionResult, ToolError> {
        Ok(ToolExecutionResult::ok(
            json!({
                "question": args["question"],
                "options": [{"label": "Natal chart", "value": "natal"}, "Solar return"],
            }),
            "Asked the user",
        ))
    }
}

fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(AscendantTool));
    registry.register(Box::new(BrokenTransitsTool));
    registry.register(Box::new(AskUserTool));
    Arc::new(registry)
}

fn agent(client: Arc<ScriptedClient>) -> ConversationLoop {
    ConversationLoop::new(client, registry(), Arc::new(StaticPrompt::new("You are an astrologer.")), "mock-model")
}

async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = vec![];
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn complete_of(events: &[AgentEvent]) -> Option<(&str, Option<&str>, &[String])> {
    events.iter().find_map(|e| match e {
        AgentEvent::Complete {
            content,
            reasoning,
            tools_used,
        } => Some((content.as_str(), reasoning.as_deref(), tools_used.as_slice())),
        _ => None,
    })
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_ascendant_lookup_event_sequence() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![
            StreamEvent::content("Let me check."),
            native_call("get_ascendant", "{}"),
            StreamEvent::Done,
        ],
        vec![StreamEvent::content("Your ascendant is Leo."), StreamEvent::Done],
    ]));
    let events = collect(agent(client.clone()).run(
        Transcript::new(),
        "What is my ascendant?",
        DomainContext::default(),
    ))
    .await;

    assert_eq!(events.len(), 6, "events: {events:#?}");
    assert_eq!(
        events[0],
        AgentEvent::ContentChunk {
            content: "Let me check.".into()
        }
    );
    assert_eq!(
        events[1],
        AgentEvent::ToolCallsStarted {
            names: vec!["get_ascendant".into()]
        }
    );
    let call_id = match &events[2] {
        AgentEvent::ToolExecuting { id, name, arguments } => {
            assert_eq!(name, "get_ascendant");
            assert_eq!(*arguments, json!({}));
            id.clone()
        }
        other => panic!("Expected ToolExecuting, got {other:?}"),
    };
    match &events[3] {
        AgentEvent::ToolResult {
            id, name, success, data, ..
        } => {
            assert_eq!(*id, call_id);
            assert_eq!(name, "get_ascendant");
            assert!(*success);
            assert_eq!(data.as_ref().unwrap()["sign"], "Leo");
        }
        other => panic!("Expected ToolResult, got {other:?}"),
    }
    assert_eq!(
        events[4],
        AgentEvent::ContentChunk {
            content: "Your ascendant is Leo.".into()
        }
    );
    assert_eq!(
        events[5],
        AgentEvent::Complete {
            content: "Your ascendant is Leo.".into(),
            reasoning: None,
            tools_used: vec!["get_ascendant".into()],
        }
    );

    // Tool definitions from the registry travel with every request.
    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    let advertised: Vec<&str> = requests[0].tools.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(advertised, vec!["ask_user", "get_ascendant", "get_transits"]);
}

#[tokio::test]
async fn e2e_tool_turn_ceiling() {
    let client = Arc::new(ScriptedClient::always(vec![
        native_call("get_ascendant", "{}"),
        StreamEvent::Done,
    ]));
    let agent = agent(client.clone()).with_limits(LoopLimits {
        max_tool_turns: 2,
        max_total_turns: 15,
    });
    let events = collect(agent.run(Transcript::new(), "Keep checking", DomainContext::default())).await;

    let executing = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ToolExecuting { .. }))
        .count();
    assert_eq!(executing, 2);
    assert_eq!(client.requests().len(), 2);
    assert!(complete_of(&events).is_none());
    match events.last() {
        Some(AgentEvent::Error { message, retryable }) => {
            assert!(!*retryable);
            assert!(message.contains('2'), "message: {message}");
        }
        other => panic!("Expected Error, got {other:?}"),
    }
}

#[tokio::test]
async fn e2e_ceiling_with_partial_content_completes_then_errors() {
    let client = Arc::new(ScriptedClient::always(vec![
        StreamEvent::content("Still looking at your houses."),
        native_call("get_ascendant", "{}"),
        StreamEvent::Done,
    ]));
    let agent = agent(client).with_limits(LoopLimits {
        max_tool_turns: 3,
        max_total_turns: 15,
    });
    let events = collect(agent.run(Transcript::new(), "Houses?", DomainContext::default())).await;

    let n = events.len();
    assert!(matches!(&events[n - 2], AgentEvent::Complete { content, .. } if content == "Still looking at your houses."));
    assert!(matches!(&events[n - 1], AgentEvent::Error { retryable: false, message } if message.contains('3')));
}

#[tokio::test]
async fn e2e_ask_user_interrupt_and_resume() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![
            native_call("ask_user", r#"{"question": "Which chart should I read?"}"#),
            StreamEvent::Done,
        ],
        vec![StreamEvent::content("Reading your natal chart."), StreamEvent::Done],
    ]));
    let agent = agent(client.clone());
    let events = collect(agent.run(Transcript::new(), "Read my chart", DomainContext::default())).await;

    assert!(complete_of(&events).is_none());
    let (transcript, options) = match events.last() {
        Some(AgentEvent::AskUserInterrupt {
            question,
            options,
            allow_custom_input,
            transcript,
            tools_used,
            ..
        }) => {
            assert_eq!(question, "Which chart should I read?");
            assert!(*allow_custom_input);
            assert_eq!(tools_used, &vec!["ask_user".to_string()]);
            (transcript.clone(), options.clone())
        }
        other => panic!("Expected AskUserInterrupt, got {other:?}"),
    };
    assert_eq!(options.len(), 2);
    assert_eq!(options[1].value, "Solar return");

    // Every tool call in the snapshot already has its answer.
    let last = transcript.last().unwrap();
    assert_eq!(last.role, Role::Tool);

    let reply = UserReply::Option {
        label: options[0].label.clone(),
        value: options[0].value.clone(),
    };
    let resumed = collect(agent.resume(Transcript::from_messages(transcript), reply, DomainContext::default())).await;
    let (content, _, _) = complete_of(&resumed).unwrap();
    assert_eq!(content, "Reading your natal chart.");

    let request = &client.requests()[1];
    assert_eq!(request.messages[0].role, Role::System);
    let reply_message = request.messages.last().unwrap();
    assert_eq!(reply_message.role, Role::User);
    assert_eq!(reply_message.content, "Natal chart");
    assert_eq!(reply_message.metadata["reply_value"], "natal");
}

#[tokio::test]
async fn e2e_failed_tool_round_trips_into_transcript() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![native_call("get_transits", r#"{"days": 7}"#), StreamEvent::Done],
        vec![
            StreamEvent::content("I could not load the transits right now."),
            StreamEvent::Done,
        ],
    ]));
    let events = collect(agent(client.clone()).run(Transcript::new(), "Transits?", DomainContext::default())).await;

    let error = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolResult {
                success: false,
                error,
                summary,
                ..
            } => {
                assert_eq!(summary, "Failed to execute get_transits");
                error.clone()
            }
            _ => None,
        })
        .expect("failed ToolResult");
    assert!(complete_of(&events).is_some());

    let tool_message = client.requests()[1]
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .cloned()
        .unwrap();
    let stored: ToolExecutionResult = serde_json::from_str(&tool_message.content).unwrap();
    assert!(!stored.success);
    assert_eq!(stored.error.as_deref(), Some(error.as_str()));
    assert!(error.contains("\"de440.bsp\""));
}

#[tokio::test]
async fn e2e_repeated_delta_streams_once() {
    let client = Arc::new(ScriptedClient::new(vec![vec![
        StreamEvent::content("Your Sun is in Leo."),
        StreamEvent::content("Your Sun is in Leo."),
        StreamEvent::Done,
    ]]));
    let events = collect(agent(client).run(Transcript::new(), "Sun sign?", DomainContext::default())).await;

    let chunks = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::ContentChunk { .. }))
        .count();
    assert_eq!(chunks, 1);
}

#[tokio::test]
async fn e2e_later_turn_supersedes_its_prefix() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![
            StreamEvent::content("Your ascendant is Leo."),
            native_call("get_ascendant", "{}"),
            StreamEvent::Done,
        ],
        vec![
            StreamEvent::content("Your ascendant is Leo. That gives you a warm, open presence."),
            StreamEvent::Done,
        ],
    ]));
    let events = collect(agent(client).run(Transcript::new(), "Ascendant?", DomainContext::default())).await;

    let (content, _, _) = complete_of(&events).unwrap();
    assert_eq!(content, "Your ascendant is Leo. That gives you a warm, open presence.");
}

#[tokio::test]
async fn e2e_embedded_tool_call_drives_the_loop() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![
            StreamEvent::content("Checking.\n```tool_call\n{\"tool\": \"get_ascendant\", \"arguments\": {}}\n```"),
            StreamEvent::Done,
        ],
        vec![StreamEvent::content("Your ascendant is Leo."), StreamEvent::Done],
    ]));
    let events = collect(agent(client.clone()).run(Transcript::new(), "Ascendant?", DomainContext::default())).await;

    assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolExecuting { name, .. } if name == "get_ascendant")));
    let (content, _, tools) = complete_of(&events).unwrap();
    assert_eq!(content, "Your ascendant is Leo.");
    assert_eq!(tools, ["get_ascendant".to_string()]);

    // The assistant message keeps the prose, not the scaffolding.
    let assistant = &client.requests()[1].messages[2];
    assert_eq!(assistant.content, "Checking.");
}

#[tokio::test]
async fn e2e_reasoning_without_answer_gets_one_continuation() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![native_call("get_ascendant", "{}"), StreamEvent::Done],
        vec![StreamEvent::reasoning("Leo rising, so the chart is fiery."), StreamEvent::Done],
        vec![StreamEvent::content("Your ascendant is Leo."), StreamEvent::Done],
    ]));
    let events = collect(agent(client.clone()).run(Transcript::new(), "Ascendant?", DomainContext::default())).await;

    let (content, reasoning, _) = complete_of(&events).unwrap();
    assert_eq!(content, "Your ascendant is Leo.");
    assert_eq!(reasoning, None);

    let third = &client.requests()[2].messages;
    let n = third.len();
    assert_eq!(third[n - 2].role, Role::Assistant);
    assert_eq!(third[n - 2].content, "Leo rising, so the chart is fiery.");
    assert_eq!(third[n - 1].role, Role::User);
}

#[tokio::test]
async fn e2e_continuation_happens_only_once() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![native_call("get_ascendant", "{}"), StreamEvent::Done],
        vec![StreamEvent::reasoning("First thoughts."), StreamEvent::Done],
        vec![StreamEvent::reasoning("Second thoughts."), StreamEvent::Done],
    ]));
    let events = collect(agent(client.clone()).run(Transcript::new(), "Ascendant?", DomainContext::default())).await;

    assert_eq!(client.requests().len(), 3);
    let (content, reasoning, _) = complete_of(&events).unwrap();
    assert_eq!(content, "Second thoughts.");
    assert_eq!(reasoning, None);
}

#[tokio::test]
async fn e2e_continuation_needs_a_spare_turn() {
    let client = Arc::new(ScriptedClient::new(vec![
        vec![native_call("get_ascendant", "{}"), StreamEvent::Done],
        vec![StreamEvent::reasoning("Leo rising."), StreamEvent::Done],
    ]));
    let agent = agent(client.clone()).with_limits(LoopLimits {
        max_tool_turns: 10,
        max_total_turns: 2,
    });
    let events = collect(agent.run(Transcript::new(), "Ascendant?", DomainContext::default())).await;

    assert_eq!(client.requests().len(), 2);
    let (content, _, _) = complete_of(&events).unwrap();
    assert_eq!(content, "Leo rising.");
}
