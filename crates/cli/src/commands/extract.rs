//! `astrolabe extract`: run the tool-call extractor over a block of text.

use astrolabe_agent::ToolCallExtractor;
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Serialize)]
struct ExtractedCall {
    name: String,
    arguments: Value,
    strategy: &'static str,
}

#[derive(Debug, Serialize)]
struct ExtractReport {
    tool_calls: Vec<ExtractedCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

pub fn run(file: Option<&Path>, scrub: bool) -> Result<(), Box<dyn std::error::Error>> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let report = extract_report(&text, scrub);
    tracing::debug!(calls = report.tool_calls.len(), "Extraction finished");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn extract_report(text: &str, scrub: bool) -> ExtractReport {
    let extractor = ToolCallExtractor::default();
    ExtractReport {
        tool_calls: extractor
            .candidates(text)
            .into_iter()
            .map(|c| ExtractedCall {
                name: c.name,
                arguments: c.arguments,
                strategy: c.strategy,
            })
            .collect(),
        content: scrub.then(|| extractor.scrub(text)),
    }
}
