//! Point-in-time page snapshot shared by every classifier signal.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::PageError;
use crate::page::{Page, evaluate_as, scripts};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Visible body text.
    #[serde(default)]
    pub text: String,
    /// Subset of the probed selectors with at least one visible match.
    #[serde(default)]
    pub matched_selectors: HashSet<String>,
}

impl PageSnapshot {
    /// Capture the page in one `evaluate` call, probing `selectors`.
    pub async fn capture(page: &dyn Page, selectors: &[&str]) -> Result<Self, PageError> {
        evaluate_as(page, scripts::SNAPSHOT, serde_json::json!(selectors)).await
    }

    pub fn has_selector(&self, selector: &str) -> bool {
        self.matched_selectors.contains(selector)
    }

    /// Title and body text, for text signals.
    pub fn searchable_text(&self) -> String {
        format!("{}\n{}", self.title, self.text)
    }
}
