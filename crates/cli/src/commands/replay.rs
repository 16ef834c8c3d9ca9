//! `astrolabe replay`: drive the conversation loop from a JSON script.
//!
//! A script looks like:
//!
//! ```json
//! {
//!   "message": "What is my ascendant?",
//!   "turns": [
//!     [{"type": "content_delta", "text": "Let me check."},
//!      {"type": "tool_calls", "calls": [{"name": "get_ascendant"}]},
//!      {"type": "done"}],
//!     [{"type": "content_delta", "text": "Your ascendant is Leo."}, {"type": "done"}]
//!   ],
//!   "tools": {
//!     "get_ascendant": {"success": true, "data": {"sign": "Leo"}, "summary": "Ascendant in Leo"}
//!   }
//! }
//! ```
//!
//! `replies` answers `ask_user` interrupts in order, as `{"text": ...}` or
//! `{"label": ..., "value": ...}`.

use astrolabe_agent::{AgentEvent, ConversationLoop, UserReply};
use astrolabe_config::AppConfig;
use astrolabe_core::context::DomainContext;
use astrolabe_core::error::{ProviderError, ToolError};
use astrolabe_core::message::Transcript;
use astrolabe_core::prompt::StaticPrompt;
use astrolabe_core::provider::{ModelClient, ModelRequest, StreamEvent};
use astrolabe_core::tool::{ToolDefinition, ToolExecutionResult, ToolExecutor};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

use super::load_config;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Astrolabe, an astrology assistant. Use the tools to read the user's chart.";

#[derive(Debug, Deserialize)]
pub struct ReplayScript {
    message: String,
    #[serde(default)]
    system_prompt: Option<String>,
    #[serde(default)]
    context: Option<DomainContext>,
    turns: Vec<Vec<StreamEvent>>,
    #[serde(default)]
    tools: BTreeMap<String, ToolExecutionResult>,
    #[serde(default)]
    replies: Vec<ReplyScript>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplyScript {
    Text { text: String },
    Option { label: String, value: String },
}

impl From<ReplyScript> for UserReply {
    fn from(reply: ReplyScript) -> Self {
        match reply {
            ReplyScript::Text { text } => UserReply::Text(text),
            ReplyScript::Option { label, value } => UserReply::Option { label, value },
        }
    }
}

pub async fn run(script: &Path, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let raw = std::fs::read_to_string(script).map_err(|e| format!("Failed to read {}: {e}", script.display()))?;
    let script: ReplayScript = serde_json::from_str(&raw).map_err(|e| format!("Invalid replay script: {e}"))?;

    for event in replay(script, &config).await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

/// Run the script to the end, resuming after each interrupt while replies remain.
pub async fn replay(script: ReplayScript, config: &AppConfig) -> Vec<AgentEvent> {
    let context = script
        .context
        .unwrap_or_else(|| DomainContext::new(config.language.clone()));
    let prompt = script
        .system_prompt
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let agent = ConversationLoop::from_config(
        config,
        Arc::new(ReplayClient::new(script.turns)),
        Arc::new(ReplayTools { results: script.tools }),
        Arc::new(StaticPrompt::new(prompt)),
    );

    let mut replies: VecDeque<UserReply> = script.replies.into_iter().map(UserReply::from).collect();
    let mut events = Vec::new();
    let mut rx = agent.run(Transcript::new(), script.message, context.clone());

    loop {
        let mut resume_from = None;
        while let Some(event) = rx.recv().await {
            if let AgentEvent::AskUserInterrupt { transcript, .. } = &event {
                resume_from = Some(transcript.clone());
            }
            events.push(event);
        }

        match (resume_from, replies.pop_front()) {
            (Some(transcript), Some(reply)) => {
                info!("Resuming with scripted reply");
                rx = agent.resume(Transcript::from_messages(transcript), reply, context.clone());
            }
            _ => break,
        }
    }

    events
}

/// Hands out scripted turns in order.
struct ReplayClient {
    turns: Mutex<VecDeque<Vec<StreamEvent>>>,
}

impl ReplayClient {
    fn new(turns: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }
}

#[async_trait::async_trait]
impl ModelClient for ReplayClient {
    fn name(&self) -> &str {
        "replay"
    }

    async fn stream(&self, _request: ModelRequest) -> Result<mpsc::Receiver<StreamEvent>, ProviderError> {
        let next = self
            .turns
            .lock()
            .map_err(|_| ProviderError::StreamInterrupted("replay state poisoned".into()))?
            .pop_front();
        let turn = next.ok_or_else(|| ProviderError::StreamInterrupted("replay script has no more turns".into()))?;

        let (tx, rx) = mpsc::channel(turn.len().max(1));
        tokio::spawn(async move {
            for event in turn {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// Canned results keyed by tool name.
struct ReplayTools {
    results: BTreeMap<String, ToolExecutionResult>,
}

#[async_trait::async_trait]
impl ToolExecutor for ReplayTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.results
            .keys()
            .map(|name| ToolDefinition {
                name: name.clone(),
                description: format!("Scripted result for {name}"),
                parameters: json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(
        &self,
        name: &str,
        _arguments: Value,
        _context: &DomainContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        self.results
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))
    }
}
