//! Page-control collaborator.
//!
//! The engine never talks to a browser directly. Callers inject a
//! `PageFactory` that provisions one `Page` per job; everything the engine
//! needs from the page goes through `evaluate` with the scripts in
//! [`scripts`] or through handle-based element queries.

#[cfg(test)]
pub(crate) mod fake;
pub mod scripts;
pub mod snapshot;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::PageError;
use crate::job::Job;

pub use snapshot::PageSnapshot;

/// How to look an element up on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementQuery {
    /// `data-testid` attribute.
    TestId(String),
    /// ARIA role with optional accessible name.
    Role { role: String, name: Option<String> },
    /// Accessible label text.
    Label(String),
    Css(String),
    XPath(String),
    /// Exact visible text.
    Text(String),
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestId(id) => write!(f, "test_id={id}"),
            Self::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name={name:?}]"),
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Label(label) => write!(f, "label={label:?}"),
            Self::Css(css) => write!(f, "css={css}"),
            Self::XPath(xpath) => write!(f, "xpath={xpath}"),
            Self::Text(text) => write!(f, "text={text:?}"),
        }
    }
}

/// A lazily-evaluated element query result.
///
/// `count` reports how many elements currently match; the action methods
/// operate on the single match and fail with `PageError::Stale` when the
/// element was detached since lookup.
#[async_trait]
pub trait ElementHandle: Send + Sync {
    async fn count(&self) -> Result<usize, PageError>;
    async fn click(&self) -> Result<(), PageError>;
    async fn fill(&self, value: &str) -> Result<(), PageError>;
    async fn select_option(&self, value: &str) -> Result<(), PageError>;
    async fn get_attribute(&self, name: &str) -> Result<Option<String>, PageError>;
    async fn scroll_into_view(&self) -> Result<(), PageError>;
}

/// A rendered page driven by one worker.
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    /// Run `script` (a function expression) with `arg` and return its JSON result.
    async fn evaluate(
        &self,
        script: &str,
        arg: serde_json::Value,
    ) -> Result<serde_json::Value, PageError>;

    async fn locate(&self, query: &ElementQuery) -> Result<Box<dyn ElementHandle>, PageError>;

    async fn wait_for_timeout(&self, duration: Duration);

    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;

    async fn url(&self) -> Result<String, PageError>;
}

/// Provisions and tears down a page per job.
#[async_trait]
pub trait PageFactory: Send + Sync {
    async fn open(&self, job: &Job) -> Result<Arc<dyn Page>, PageError>;
    async fn close(&self, page: Arc<dyn Page>);
}

/// Evaluate a script and deserialize its result.
pub async fn evaluate_as<T: DeserializeOwned>(
    page: &dyn Page,
    script: &str,
    arg: serde_json::Value,
) -> Result<T, PageError> {
    let value = page.evaluate(script, arg).await?;
    serde_json::from_value(value).map_err(|e| PageError::InvalidResult(e.to_string()))
}
