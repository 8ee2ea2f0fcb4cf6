//! Runtime limits shared by the session runtime and the compaction engine.

use serde::{Deserialize, Serialize};

/// Thresholds governing the ReAct loop and the three compaction tiers. All
/// values are configuration, not semantics; the daemon overrides them from
/// its TOML file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeLimits {
    /// Hard cap on model-call iterations within one turn.
    pub max_iterations: u32,
    /// Model context window, in tokens.
    pub context_limit_tokens: u32,
    /// Predictive compaction fires above this fraction of the context limit.
    pub predictive_pct: f32,
    /// Structural compaction fires above this many events.
    pub max_events: usize,
    /// Threshold-driven compaction never runs below this many events.
    pub min_events: usize,
    /// The summarizer input is head/tail-truncated above this many chars.
    pub render_cap_chars: usize,
    /// Tool results longer than this are truncated before reaching the model.
    pub tool_result_max_chars: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_iterations: 40,
            context_limit_tokens: 200_000,
            predictive_pct: 0.9,
            max_events: 700,
            min_events: 10,
            render_cap_chars: 200_000,
            tool_result_max_chars: 20_000,
        }
    }
}

impl RuntimeLimits {
    /// Crude token estimate: total text characters divided by three.
    pub fn estimate_tokens(total_chars: usize) -> u32 {
        (total_chars / 3) as u32
    }

    /// Token count above which predictive compaction fires.
    pub fn predictive_threshold(&self) -> u32 {
        (self.context_limit_tokens as f32 * self.predictive_pct) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predictive_threshold_math() {
        let limits = RuntimeLimits {
            context_limit_tokens: 1000,
            predictive_pct: 0.9,
            ..Default::default()
        };
        assert_eq!(limits.predictive_threshold(), 900);
        assert_eq!(RuntimeLimits::estimate_tokens(3000), 1000);
    }
}
