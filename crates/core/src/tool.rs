//! Tool abstraction and the uniform result envelope.
//!
//! The agent loop only knows [`ToolExecutor`]: "run this named tool with these
//! arguments against this domain context". [`ToolRegistry`] is the stock
//! implementation backed by individually registered [`Tool`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::DomainContext;
use crate::error::ToolError;

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// The result of one tool execution, success or failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// One-line human-readable summary
    #[serde(default)]
    pub summary: String,
}

impl ToolExecutionResult {
    pub fn ok(data: serde_json::Value, summary: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            summary: summary.into(),
        }
    }

    pub fn failed(error: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            summary: summary.into(),
        }
    }
}

/// Executes tools on behalf of the agent loop.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Definitions advertised to the model. Empty by default.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    /// Run `name` with `arguments`.
    async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &DomainContext,
    ) -> std::result::Result<ToolExecutionResult, ToolError>;
}

/// A single capability (chart lookup, transit calculation, ask_user, ...).
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_ascendant").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context: &DomainContext,
    ) -> std::result::Result<ToolExecutionResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn execute(
        &self,
        name: &str,
        arguments: serde_json::Value,
        context: &DomainContext,
    ) -> std::result::Result<ToolExecutionResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments, context).await
    }
}
