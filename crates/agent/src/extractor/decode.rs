//! Decoding the body of a JSON-shaped match into a tool name and arguments.
//!
//! [`StrictDecoder`] accepts only well-formed JSON. [`SalvageDecoder`] is the
//! best-effort path: it scans for the name and the argument object
//! independently, repairing what it can. Strategies try them in that order.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

const NAME_KEYS: [&str; 3] = ["tool", "name", "function"];
const ARGUMENT_KEYS: [&str; 3] = ["arguments", "parameters", "args"];

/// A tool name and its argument object.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedCall {
    pub name: String,
    pub arguments: Value,
}

pub trait CallDecoder: Send + Sync {
    fn decode(&self, body: &str) -> Option<DecodedCall>;
}

/// Well-formed JSON objects only.
pub struct StrictDecoder;

impl CallDecoder for StrictDecoder {
    fn decode(&self, body: &str) -> Option<DecodedCall> {
        let value: Value = serde_json::from_str(body.trim()).ok()?;
        call_from_value(&value)
    }
}

/// Regex-driven recovery for truncated or slightly broken JSON.
pub struct SalvageDecoder;

static SALVAGE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:tool|name|function)"\s*:\s*"([^"\\]+)""#).unwrap()
});

static SALVAGE_ARGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:arguments|parameters|args)"\s*:\s*\{"#).unwrap()
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

impl CallDecoder for SalvageDecoder {
    fn decode(&self, body: &str) -> Option<DecodedCall> {
        let name = SALVAGE_NAME_RE.captures(body)?.get(1)?.as_str().trim();
        if name.is_empty() {
            return None;
        }

        let arguments = SALVAGE_ARGS_RE
            .find(body)
            // the match ends just past the opening brace
            .and_then(|m| repair_object(&body[m.end() - 1..]))
            .unwrap_or_else(empty_object);

        Some(DecodedCall {
            name: name.to_string(),
            arguments,
        })
    }
}

/// Strict first, salvage second.
pub fn decode_with_fallback(body: &str) -> Option<DecodedCall> {
    StrictDecoder.decode(body).or_else(|| SalvageDecoder.decode(body))
}

/// Read a call out of an already-parsed JSON value.
///
/// Name comes from `tool`, then `name`, then `function` (a string, or an
/// OpenAI-style object carrying its own `name`/`arguments`). Arguments come
/// from `arguments`, then `parameters`, then `args`, defaulting to `{}`.
pub fn call_from_value(value: &Value) -> Option<DecodedCall> {
    let obj = value.as_object()?;

    if let Some(Value::Object(function)) = obj.get("function")
        && let Some(name) = function.get("name").and_then(Value::as_str)
        && !name.trim().is_empty()
    {
        return Some(DecodedCall {
            name: name.trim().to_string(),
            arguments: arguments_from(function),
        });
    }

    let name = NAME_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())?;

    Some(DecodedCall {
        name: name.to_string(),
        arguments: arguments_from(obj),
    })
}

fn arguments_from(obj: &Map<String, Value>) -> Value {
    ARGUMENT_KEYS
        .iter()
        .find_map(|key| obj.get(*key))
        .map(normalize_arguments)
        .unwrap_or_else(empty_object)
}

fn normalize_arguments(raw: &Value) -> Value {
    match raw {
        Value::Object(_) => raw.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => empty_object(),
        },
        _ => empty_object(),
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Outcome of scanning for the brace closing the object at the start of `s`.
enum BraceScan {
    /// Byte offset just past the closing brace.
    Closed(usize),
    /// Input ended with this many braces still open.
    Open(usize),
}

/// `s` must start with `{`. Tracks strings and escapes.
fn scan_braces(s: &str) -> BraceScan {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return BraceScan::Closed(i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    BraceScan::Open(depth)
}

/// Best-effort parse of the object starting at `s`.
fn repair_object(s: &str) -> Option<Value> {
    let candidate = match scan_braces(s) {
        BraceScan::Closed(end) => s[..end].to_string(),
        BraceScan::Open(depth) => {
            let mut truncated = s.trim_end().trim_end_matches([',', '`']).to_string();
            truncated.push_str(&"}".repeat(depth));
            truncated
        }
    };

    let parse = |text: &str| match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    };

    parse(&candidate).or_else(|| parse(&TRAILING_COMMA_RE.replace_all(&candidate, "$1")))
}
