//! The `ask_user` interrupt: a tool whose successful result hands control
//! back to the human before the model may continue.

use astrolabe_core::tool::ToolExecutionResult;
use serde::Deserialize;
use serde_json::Value;

use crate::event::AskUserOption;

/// Tool name that triggers the interrupt.
pub const ASK_USER_TOOL: &str = "ask_user";

/// A question parsed out of a successful `ask_user` result.
#[derive(Debug, Clone, PartialEq)]
pub struct AskUserRequest {
    pub question: String,
    pub options: Vec<AskUserOption>,
    pub allow_custom_input: bool,
    pub context: Option<String>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<Value>,
    #[serde(default, alias = "allowCustomInput")]
    allow_custom_input: Option<bool>,
    #[serde(default)]
    context: Option<Value>,
}

impl AskUserRequest {
    /// Parse the interrupt from a tool result.
    ///
    /// Returns `None` unless the tool is `ask_user`, the result succeeded,
    /// and it carries a non-empty question.
    pub fn from_result(tool_name: &str, result: &ToolExecutionResult) -> Option<Self> {
        if tool_name != ASK_USER_TOOL || !result.success {
            return None;
        }
        let payload: Payload = serde_json::from_value(result.data.clone()?).ok()?;
        let question = payload.question.trim();
        if question.is_empty() {
            return None;
        }

        Some(Self {
            question: question.to_string(),
            options: payload.options.iter().filter_map(parse_option).collect(),
            allow_custom_input: payload.allow_custom_input.unwrap_or(true),
            context: payload.context.and_then(|c| match c {
                Value::String(s) if !s.trim().is_empty() => Some(s),
                Value::String(_) | Value::Null => None,
                other => Some(other.to_string()),
            }),
        })
    }
}

/// Objects `{label, description?, value?}` or bare strings. `value` defaults
/// to the label.
fn parse_option(raw: &Value) -> Option<AskUserOption> {
    let (label, description, value) = match raw {
        Value::String(s) => (s.clone(), None, None),
        Value::Object(obj) => (
            obj.get("label")?.as_str()?.to_string(),
            obj.get("description").and_then(Value::as_str).map(str::to_string),
            obj.get("value").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            }),
        ),
        _ => return None,
    };
    if label.trim().is_empty() {
        return None;
    }
    Some(AskUserOption {
        value: value.unwrap_or_else(|| label.clone()),
        label,
        description,
    })
}
