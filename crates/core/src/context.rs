//! Ambient domain context handed to tools and the prompt builder.
//!
//! Profiles and charts are opaque JSON from the engine's point of view; only
//! the tools and prompt builder interpret them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainContext {
    /// The profile the conversation is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<serde_json::Value>,

    /// All profiles known to the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<serde_json::Value>,

    /// The chart currently on screen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_chart: Option<serde_json::Value>,

    /// Language selector for the system prompt (e.g. "en")
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".into()
}

impl Default for DomainContext {
    fn default() -> Self {
        Self {
            active_profile: None,
            profiles: Vec::new(),
            active_chart: None,
            language: default_language(),
        }
    }
}

impl DomainContext {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    pub fn with_active_profile(mut self, profile: serde_json::Value) -> Self {
        self.active_profile = Some(profile);
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<serde_json::Value>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_active_chart(mut self, chart: serde_json::Value) -> Self {
        self.active_chart = Some(chart);
        self
    }
}
