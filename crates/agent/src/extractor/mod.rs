//! Tolerant tool-call extraction from free-form model text.
//!
//! Models without native tool calling write their calls inline. The
//! extractor recognises six encodings, tried in this order with every match
//! collected:
//!
//! 1. ```` ```tool_call ```` fenced block holding one JSON object
//! 2. ```` ```json ```` fenced block whose object has a `tool` key
//! 3. unlabelled fenced block whose object has a `tool` key
//! 4. inline `{"tool": <name>, "arguments": {...}}`
//! 5. inline `{"name": <name>, "parameters": {...}}`
//! 6. bare `get_*(k=v, ...)` / `calculate_*(...)` calls
//!
//! JSON bodies go through the strict decoder first and the salvage decoder
//! second; bodies neither can read are dropped silently. Candidates with the
//! same name and canonical arguments are reported once.

pub mod decode;
pub mod strategies;

use astrolabe_core::message::ToolCallRequest;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;
use tracing::debug;

pub use decode::{CallDecoder, DecodedCall, SalvageDecoder, StrictDecoder};
pub use strategies::{
    Candidate, ExtractStrategy, FencedJson, FencedToolCall, FencedUnlabeled, FunctionCallSyntax,
    InlineNameParameters, InlineToolArguments,
};

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Ordered collection of [`ExtractStrategy`]s.
pub struct ToolCallExtractor {
    strategies: Vec<Box<dyn ExtractStrategy>>,
}

impl ToolCallExtractor {
    /// An extractor with a custom strategy list, run in the given order.
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractStrategy>>) -> Self {
        Self { strategies }
    }

    /// All candidates in priority order, deduplicated by name and arguments.
    pub fn candidates(&self, text: &str) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for strategy in &self.strategies {
            for candidate in strategy.try_extract(text) {
                if seen.insert(dedup_key(&candidate.name, &candidate.arguments)) {
                    debug!(strategy = strategy.name(), tool = %candidate.name, "Extracted embedded tool call");
                    out.push(candidate);
                }
            }
        }

        out
    }

    /// Extract tool-call requests, assigning fresh call IDs.
    pub fn extract(&self, text: &str) -> Vec<ToolCallRequest> {
        self.candidates(text)
            .into_iter()
            .map(|c| ToolCallRequest::new(ToolCallRequest::generate_id(), c.name, c.arguments.to_string()))
            .collect()
    }

    /// Remove tool-call scaffolding (fenced and inline shapes) from `text`.
    pub fn scrub(&self, text: &str) -> String {
        let mut spans: Vec<Range<usize>> = self
            .strategies
            .iter()
            .filter(|s| s.is_scaffolding())
            .flat_map(|s| s.try_extract(text))
            .map(|c| c.span)
            .collect();

        if spans.is_empty() {
            return text.trim().to_string();
        }

        spans.sort_by_key(|r| r.start);
        let mut cleaned = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in spans {
            if span.start > cursor {
                cleaned.push_str(&text[cursor..span.start]);
            }
            cursor = cursor.max(span.end);
        }
        cleaned.push_str(&text[cursor..]);

        BLANK_RUN_RE.replace_all(&cleaned, "\n\n").trim().to_string()
    }
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self::with_strategies(vec![
            Box::new(FencedToolCall),
            Box::new(FencedJson),
            Box::new(FencedUnlabeled),
            Box::new(InlineToolArguments),
            Box::new(InlineNameParameters),
            Box::new(FunctionCallSyntax),
        ])
    }
}

/// `name` plus a SHA-256 of the key-sorted argument JSON.
fn dedup_key(name: &str, arguments: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(arguments, &mut canonical);
    format!("{name}:{:x}", Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
