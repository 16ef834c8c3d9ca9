//! The conversation loop, the heart of Astrolabe.
//!
//! A run follows a **Stream → Extract → Dispatch** cycle:
//!
//! 1. **Stream** one model turn, forwarding chunks to the caller
//! 2. **Extract** tool calls, native or embedded in the text
//! 3. **Dispatch** them in order and append the results to the transcript
//! 4. Loop back to step 1, or **complete** when a turn asks for no tools
//!
//! The loop also stops when the model asks the user a question
//! (`ask_user`), when the provider fails, or when a turn ceiling is reached.

pub mod accumulator;
pub mod ask_user;
pub mod controller;
pub mod dispatcher;
pub mod event;
pub mod extractor;
pub mod policy;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use accumulator::{EmittedText, StreamAccumulator, TurnOutput};
pub use ask_user::{ASK_USER_TOOL, AskUserRequest};
pub use controller::{ConversationLoop, UserReply};
pub use dispatcher::ToolDispatcher;
pub use event::{AgentEvent, AskUserOption, Cancelled};
pub use extractor::{Candidate, ExtractStrategy, ToolCallExtractor};
pub use policy::{DuplicatePolicy, LoopLimits};
