//! The individual tool-call encodings recognised in model text.
//!
//! Each strategy is pure and scans the whole text independently. The
//! extractor runs them in priority order and deduplicates afterwards, so two
//! strategies matching the same span is expected and harmless.

use regex::Regex;
use serde_json::{Map, Value};
use std::ops::Range;
use std::sync::LazyLock;

use super::decode::{SalvageDecoder, CallDecoder, DecodedCall, call_from_value, decode_with_fallback};

/// A tool call recovered from text, with the byte span it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub arguments: Value,
    pub span: Range<usize>,
    pub strategy: &'static str,
}

impl Candidate {
    fn new(call: DecodedCall, span: Range<usize>, strategy: &'static str) -> Self {
        Self {
            name: call.name,
            arguments: call.arguments,
            span,
            strategy,
        }
    }
}

/// One textual tool-call convention.
pub trait ExtractStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_extract(&self, text: &str) -> Vec<Candidate>;

    /// Whether matched spans are scaffolding to strip from visible content.
    fn is_scaffolding(&self) -> bool {
        true
    }
}

// ── Fenced blocks ─────────────────────────────────────────────────────────

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_-]*)[ \t]*\r?\n(.*?)```").unwrap()
});

static TOOL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""tool"\s*:"#).unwrap());

struct FencedBlock<'a> {
    label: String,
    body: &'a str,
    span: Range<usize>,
}

/// Every fenced block in `text`, left to right, non-overlapping.
fn fenced_blocks(text: &str) -> Vec<FencedBlock<'_>> {
    FENCE_RE
        .captures_iter(text)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            Some(FencedBlock {
                label: cap.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase(),
                body: cap.get(2).map_or("", |m| m.as_str()),
                span: whole.range(),
            })
        })
        .collect()
}

/// Decode a block body only if its object carries a `tool` key.
fn decode_tool_keyed(body: &str) -> Option<DecodedCall> {
    match serde_json::from_str::<Value>(body.trim()) {
        Ok(value) if value.get("tool").is_some() => call_from_value(&value),
        Ok(_) => None,
        Err(_) if TOOL_KEY_RE.is_match(body) => SalvageDecoder.decode(body),
        Err(_) => None,
    }
}

/// ```` ```tool_call ```` blocks holding one JSON object.
pub struct FencedToolCall;

impl ExtractStrategy for FencedToolCall {
    fn name(&self) -> &'static str {
        "fenced_tool_call"
    }

    fn try_extract(&self, text: &str) -> Vec<Candidate> {
        fenced_blocks(text)
            .into_iter()
            .filter(|b| matches!(b.label.as_str(), "tool_call" | "tool-call" | "toolcall" | "tool"))
            .filter_map(|b| Some(Candidate::new(decode_with_fallback(b.body)?, b.span, self.name())))
            .collect()
    }
}

/// ```` ```json ```` blocks whose object has a `tool` key.
pub struct FencedJson;

impl ExtractStrategy for FencedJson {
    fn name(&self) -> &'static str {
        "fenced_json"
    }

    fn try_extract(&self, text: &str) -> Vec<Candidate> {
        fenced_blocks(text)
            .into_iter()
            .filter(|b| b.label == "json")
            .filter_map(|b| Some(Candidate::new(decode_tool_keyed(b.body)?, b.span, self.name())))
            .collect()
    }
}

/// Unlabelled fenced blocks whose object has a `tool` key.
pub struct FencedUnlabeled;

impl ExtractStrategy for FencedUnlabeled {
    fn name(&self) -> &'static str {
        "fenced_unlabeled"
    }

    fn try_extract(&self, text: &str) -> Vec<Candidate> {
        fenced_blocks(text)
            .into_iter()
            .filter(|b| b.label.is_empty())
            .filter_map(|b| Some(Candidate::new(decode_tool_keyed(b.body)?, b.span, self.name())))
            .collect()
    }
}

// ── Inline objects ────────────────────────────────────────────────────────

// The argument object may contain one level of nested objects; arrays pass
// through the `[^{}]` branch.
static INLINE_TOOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"tool"\s*:\s*"[^"]+"\s*,\s*"arguments"\s*:\s*\{(?:[^{}]|\{[^{}]*\})*\}\s*\}"#)
        .unwrap()
});

static INLINE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"name"\s*:\s*"[^"]+"\s*,\s*"parameters"\s*:\s*\{(?:[^{}]|\{[^{}]*\})*\}\s*\}"#)
        .unwrap()
});

fn inline_matches(re: &Regex, text: &str, strategy: &'static str) -> Vec<Candidate> {
    re.find_iter(text)
        .filter_map(|m| Some(Candidate::new(decode_with_fallback(m.as_str())?, m.range(), strategy)))
        .collect()
}

/// Inline `{"tool": ..., "arguments": {...}}`.
pub struct InlineToolArguments;

impl ExtractStrategy for InlineToolArguments {
    fn name(&self) -> &'static str {
        "inline_tool_arguments"
    }

    fn try_extract(&self, text: &str) -> Vec<Candidate> {
        inline_matches(&INLINE_TOOL_RE, text, self.name())
    }
}

/// Inline `{"name": ..., "parameters": {...}}`.
pub struct InlineNameParameters;

impl ExtractStrategy for InlineNameParameters {
    fn name(&self) -> &'static str {
        "inline_name_parameters"
    }

    fn try_extract(&self, text: &str) -> Vec<Candidate> {
        inline_matches(&INLINE_NAME_RE, text, self.name())
    }
}

// ── Function-call syntax ──────────────────────────────────────────────────

static FUNCTION_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:get|calculate)_[A-Za-z0-9_]+)\s*\(([^()]*)\)").unwrap()
});

/// Bare `get_x(a=1, b="two")` / `calculate_x(...)` calls.
pub struct FunctionCallSyntax;

impl ExtractStrategy for FunctionCallSyntax {
    fn name(&self) -> &'static str {
        "function_call"
    }

    fn try_extract(&self, text: &str) -> Vec<Candidate> {
        FUNCTION_CALL_RE
            .captures_iter(text)
            .filter_map(|cap| {
                let whole = cap.get(0)?;
                let call = DecodedCall {
                    name: cap.get(1)?.as_str().to_string(),
                    arguments: Value::Object(parse_keyword_args(cap.get(2).map_or("", |m| m.as_str()))),
                };
                Some(Candidate::new(call, whole.range(), self.name()))
            })
            .collect()
    }

    // Prose mentions such as "I used get_houses()" stay readable.
    fn is_scaffolding(&self) -> bool {
        false
    }
}

/// Parse `a=1, b="x, y"` into an object. Parts without `=` are ignored.
fn parse_keyword_args(input: &str) -> Map<String, Value> {
    let mut args = Map::new();
    for part in split_unquoted_commas(input) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        args.insert(key.to_string(), keyword_value(value.trim()));
    }
    args
}

fn split_unquoted_commas(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match (ch, quote) {
            ('"' | '\'', None) => {
                quote = Some(ch);
                current.push(ch);
            }
            (c, Some(q)) if c == q => {
                quote = None;
                current.push(ch);
            }
            (',', None) => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Quoted values become strings; bare numbers, booleans and null keep their type.
fn keyword_value(raw: &str) -> Value {
    for q in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q) {
            return Value::String(raw[1..raw.len() - 1].to_string());
        }
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    }
}
