//! Shared test helpers: scripted model client and tool executor.

use astrolabe_core::context::DomainContext;
use astrolabe_core::error::{ProviderError, ToolError};
use astrolabe_core::provider::{ModelClient, ModelRequest, RawToolCall, StreamEvent};
use astrolabe_core::tool::{ToolExecutionResult, ToolExecutor};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::AgentEvent;

/// A model client that replays one scripted event list per turn.
///
/// Panics if more turns are requested than scripted, unless built with
/// [`ScriptedModelClient::repeating`], which cycles through the script.
pub struct ScriptedModelClient {
    turns: Vec<Vec<StreamEvent>>,
    repeat: bool,
    refusal: Option<ProviderError>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModelClient {
    pub fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns,
            repeat: false,
            refusal: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            repeat: true,
            ..Self::new(turns)
        }
    }

    /// Fail every `stream()` call before any event is produced.
    pub fn with_refusal(mut self, error: ProviderError) -> Self {
        self.refusal = Some(error);
        self
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModelClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ModelRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let turn = {
            let mut requests = self.requests.lock().unwrap();
            let index = requests.len();
            requests.push(request);
            if let Some(error) = &self.refusal {
                return Err(error.clone());
            }
            let index = if self.repeat { index % self.turns.len() } else { index };
            match self.turns.get(index) {
                Some(turn) => turn.clone(),
                None => panic!("ScriptedModelClient: no turn #{index} (have {})", self.turns.len()),
            }
        };

        let (tx, rx) = mpsc::channel(turn.len().max(1));
        for event in turn {
            tx.send(event).await.unwrap();
        }
        Ok(rx)
    }
}

enum Script {
    Result(ToolExecutionResult),
    Fail(String),
    Panic,
}

/// A tool executor with canned results per tool name. Records every call.
pub struct ScriptedTools {
    scripts: HashMap<String, Script>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTools {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_result(mut self, name: &str, result: ToolExecutionResult) -> Self {
        self.scripts.insert(name.to_string(), Script::Result(result));
        self
    }

    /// `name` returns `ToolError::ExecutionFailed`.
    pub fn with_failure(mut self, name: &str, reason: &str) -> Self {
        self.scripts.insert(name.to_string(), Script::Fail(reason.to_string()));
        self
    }

    /// `name` panics with "ephemeris exploded".
    pub fn with_panic(mut self, name: &str) -> Self {
        self.scripts.insert(name.to_string(), Script::Panic);
        self
    }

    /// Sleep before answering any call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for ScriptedTools {
    async fn execute(
        &self,
        name: &str,
        arguments: Value,
        _context: &DomainContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.scripts.get(name) {
            Some(Script::Result(result)) => Ok(result.clone()),
            Some(Script::Fail(reason)) => Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: reason.clone(),
            }),
            Some(Script::Panic) => panic!("ephemeris exploded"),
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }
}

/// A turn that streams `text` and ends.
pub fn text_turn(text: &str) -> Vec<StreamEvent> {
    vec![StreamEvent::content(text), StreamEvent::Done]
}

/// A turn that streams `text` (if any) and requests one native tool call.
pub fn tool_turn(text: &str, name: &str, arguments: &str) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(StreamEvent::content(text));
    }
    events.push(StreamEvent::ToolCalls {
        calls: vec![RawToolCall {
            id: None,
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
    });
    events.push(StreamEvent::Done);
    events
}

/// Drain a run's events.
pub async fn collect(mut rx: mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
