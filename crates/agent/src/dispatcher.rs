//! Tool dispatch: one request in, one [`ToolExecutionResult`] out, always.
//!
//! Unparseable arguments become `{}`, registry errors, panics and timeouts
//! become failed envelopes. The loop never handles tool errors itself.

use astrolabe_core::context::DomainContext;
use astrolabe_core::error::ToolError;
use astrolabe_core::message::ToolCallRequest;
use astrolabe_core::tool::{ToolExecutionResult, ToolExecutor};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::extractor::decode::empty_object;

pub struct ToolDispatcher {
    executor: Arc<dyn ToolExecutor>,
    timeout: Option<Duration>,
}

impl ToolDispatcher {
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            executor,
            timeout: None,
        }
    }

    /// Fail tools that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Execute one tool call.
    pub async fn dispatch(&self, request: &ToolCallRequest, context: &DomainContext) -> ToolExecutionResult {
        let arguments = parse_arguments(&request.arguments);
        let start = Instant::now();

        let call = AssertUnwindSafe(self.executor.execute(&request.name, arguments, context)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(tool = %request.name, timeout_secs = limit.as_secs(), "Tool timed out");
                    let error = ToolError::Timeout {
                        tool_name: request.name.clone(),
                        timeout_secs: limit.as_secs(),
                    };
                    return failure(&request.name, error.to_string());
                }
            },
            None => call.await,
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(tool = %request.name, error = %e, "Tool execution failed");
                failure(&request.name, e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %request.name, panic = %message, "Tool panicked");
                failure(&request.name, format!("Tool panicked: {message}"))
            }
        };

        debug!(
            tool = %request.name,
            success = result.success,
            duration_ms = start.elapsed().as_millis() as u64,
            "Tool dispatched"
        );
        result
    }
}

fn failure(name: &str, error: String) -> ToolExecutionResult {
    ToolExecutionResult::failed(error, format!("Failed to execute {name}"))
}

/// Parse a JSON argument string. Anything but an object becomes `{}`.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) | Err(_) => {
            if !raw.trim().is_empty() {
                debug!(arguments = raw, "Tool arguments are not a JSON object, using {{}}");
            }
            empty_object()
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
