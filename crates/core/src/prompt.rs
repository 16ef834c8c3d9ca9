//! System prompt construction.

use crate::context::DomainContext;

/// Renders the system prompt installed as message zero of every transcript.
///
/// Implementations read the active profile, the profile list, the active
/// chart and the language selector from [`DomainContext`].
pub trait PromptBuilder: Send + Sync {
    fn build(&self, context: &DomainContext) -> String;
}

/// A prompt builder that always returns the same text.
#[derive(Debug, Clone)]
pub struct StaticPrompt(pub String);

impl StaticPrompt {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self(prompt.into())
    }
}

impl PromptBuilder for StaticPrompt {
    fn build(&self, _context: &DomainContext) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_prompt_ignores_context() {
        let prompt = StaticPrompt::new("You are a careful astrologer.");
        let built = prompt.build(&DomainContext::new("fr"));
        assert_eq!(built, "You are a careful astrologer.");
    }
}
