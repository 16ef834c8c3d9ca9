//! Tunable limits and heuristics for the conversation loop.

use astrolabe_config::{AgentConfig, DuplicateConfig};
use std::time::Duration;

/// Iteration ceilings for one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    /// Turns that invoke at least one tool
    pub max_tool_turns: u32,
    /// All turns, including empty and reasoning-only ones
    pub max_total_turns: u32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_tool_turns: 10,
            max_total_turns: 15,
        }
    }
}

/// Thresholds for dropping stream fragments the caller has already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicatePolicy {
    /// A fragment whose first `prefix_chars` characters already occur in the
    /// emitted text counts as a re-send.
    pub prefix_chars: usize,
    /// Fragments shorter than this (after trimming) are never suppressed.
    pub min_fragment_chars: usize,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            prefix_chars: 50,
            min_fragment_chars: 8,
        }
    }
}

impl DuplicatePolicy {
    /// Whether `fragment` repeats text already present in `emitted`.
    pub fn is_duplicate(&self, emitted: &str, fragment: &str) -> bool {
        if emitted.is_empty() || fragment.trim().chars().count() < self.min_fragment_chars {
            return false;
        }
        if emitted.ends_with(fragment) {
            return true;
        }
        let prefix: String = fragment.chars().take(self.prefix_chars).collect();
        emitted.contains(&prefix)
    }
}

impl From<&DuplicateConfig> for DuplicatePolicy {
    fn from(config: &DuplicateConfig) -> Self {
        Self {
            prefix_chars: config.prefix_chars,
            min_fragment_chars: config.min_fragment_chars,
        }
    }
}

impl From<&AgentConfig> for LoopLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_tool_turns: config.max_tool_turns,
            max_total_turns: config.max_total_turns,
        }
    }
}

/// Per-tool timeout from config; `None` when disabled.
pub fn tool_timeout(config: &AgentConfig) -> Option<Duration> {
    (config.tool_timeout_secs > 0).then(|| Duration::from_secs(config.tool_timeout_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_tail_repeat_is_duplicate() {
        let policy = DuplicatePolicy::default();
        assert!(policy.is_duplicate("Your Sun is in Leo.", "is in Leo."));
    }

    #[test]
    fn prefix_contained_is_duplicate() {
        let policy = DuplicatePolicy {
            prefix_chars: 10,
            min_fragment_chars: 4,
        };
        let emitted = "Mars squares Saturn this week, so expect friction.";
        assert!(policy.is_duplicate(emitted, "Mars squares a lot of things"));
        assert!(!policy.is_duplicate(emitted, "Venus trines Jupiter"));
    }

    #[test]
    fn short_fragments_always_pass() {
        let policy = DuplicatePolicy::default();
        assert!(!policy.is_duplicate("the moon and the", " the"));
    }

    #[test]
    fn nothing_emitted_means_no_duplicate() {
        assert!(!DuplicatePolicy::default().is_duplicate("", "Let me check your chart."));
    }

    #[test]
    fn converts_from_config() {
        let config = AgentConfig::default();
        assert_eq!(LoopLimits::from(&config), LoopLimits::default());
        assert_eq!(DuplicatePolicy::from(&config.duplicates), DuplicatePolicy::default());
        assert_eq!(tool_timeout(&config), Some(Duration::from_secs(60)));

        let disabled = AgentConfig {
            tool_timeout_secs: 0,
            ..AgentConfig::default()
        };
        assert_eq!(tool_timeout(&disabled), None);
    }
}
