//! Per-screen bounds threaded through the fill state machine.

use crate::config::FillConfig;

/// Scroll-round and AI-call counters for one screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillBudget {
    /// Current round, 1-based once the first round starts.
    pub scroll_round: u32,
    pub max_scroll_rounds: u32,
    pub ai_calls: u32,
    pub max_ai_calls: u32,
}

impl FillBudget {
    pub fn new(max_scroll_rounds: u32, max_ai_calls: u32) -> Self {
        Self {
            scroll_round: 0,
            max_scroll_rounds: max_scroll_rounds.max(1),
            ai_calls: 0,
            max_ai_calls,
        }
    }

    pub fn from_config(config: &FillConfig) -> Self {
        Self::new(config.max_scroll_rounds, config.max_ai_calls)
    }

    /// Begin the next round. Returns false once all rounds are used.
    pub fn next_round(&mut self) -> bool {
        if self.scroll_round >= self.max_scroll_rounds {
            return false;
        }
        self.scroll_round += 1;
        true
    }

    pub fn is_first_round(&self) -> bool {
        self.scroll_round <= 1
    }

    pub fn rounds_remaining(&self) -> u32 {
        self.max_scroll_rounds.saturating_sub(self.scroll_round)
    }

    /// Reserve one AI call. Returns false when the budget is spent.
    pub fn try_consume_ai(&mut self) -> bool {
        if self.ai_calls >= self.max_ai_calls {
            return false;
        }
        self.ai_calls += 1;
        true
    }

    pub fn ai_remaining(&self) -> u32 {
        self.max_ai_calls.saturating_sub(self.ai_calls)
    }
}
