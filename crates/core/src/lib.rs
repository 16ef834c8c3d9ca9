//! # Astrolabe Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! Astrolabe conversation engine. This crate has no runtime behaviour of
//! its own: it defines the transcript, the model-provider stream protocol,
//! the tool envelope, and the traits the agent loop is built against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`ModelClient`] streams one model turn as [`StreamEvent`]s
//! - [`ToolExecutor`] runs a named tool against domain context
//! - [`PromptBuilder`] renders the system prompt
//!
//! Implementations are handed to the agent loop at construction time, which
//! keeps the loop testable with scripted stand-ins.

pub mod context;
pub mod error;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use context::DomainContext;
pub use error::{ProviderError, ToolError};
pub use message::{Message, Role, ToolCallRequest, Transcript};
pub use prompt::{PromptBuilder, StaticPrompt};
pub use provider::{ModelClient, ModelRequest, RawToolCall, StreamEvent, Usage};
pub use tool::{Tool, ToolDefinition, ToolExecutionResult, ToolExecutor, ToolRegistry};
