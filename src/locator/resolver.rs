//! Element resolver with fallback chain orchestration.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::PageError;
use crate::locator::{LocatorDescriptor, Strategy};
use crate::page::{ElementHandle, ElementQuery, Page};

/// Bounds for one resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Upper bound on one locate+count probe.
    pub timeout_per_strategy: Duration,
    /// Retries of the same strategy after a stale/detached error.
    pub max_stale_retries: u32,
    /// Fixed wait between stale retries.
    pub stale_backoff: Duration,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout_per_strategy: Duration::from_secs(2),
            max_stale_retries: 2,
            stale_backoff: Duration::from_millis(100),
        }
    }
}

/// Outcome of a resolution.
pub struct ResolveResult {
    /// The single verified match, if any strategy produced one.
    pub handle: Option<Box<dyn ElementHandle>>,
    pub strategy: Option<Strategy>,
    /// Strategies tried, the winning one included.
    pub attempts: usize,
}

impl ResolveResult {
    pub fn is_found(&self) -> bool {
        self.handle.is_some()
    }
}

impl std::fmt::Debug for ResolveResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveResult")
            .field("found", &self.handle.is_some())
            .field("strategy", &self.strategy)
            .field("attempts", &self.attempts)
            .finish()
    }
}

/// Result of probing one strategy.
enum Probe {
    Unique(Box<dyn ElementHandle>),
    Count(usize),
    Failed(PageError),
}

/// Resolves a descriptor to exactly one element.
#[derive(Debug, Clone, Default)]
pub struct LocatorResolver {
    options: ResolveOptions,
}

impl LocatorResolver {
    pub fn new(options: ResolveOptions) -> Self {
        Self { options }
    }

    /// Try each present hint in priority order. A strategy wins only with
    /// exactly one match; duplicates are never auto-picked.
    pub async fn resolve(&self, page: &dyn Page, descriptor: &LocatorDescriptor) -> ResolveResult {
        let mut attempts = 0;

        for (strategy, query) in descriptor.plan() {
            attempts += 1;
            match self.probe(page, &query).await {
                Probe::Unique(handle) => {
                    debug!(%strategy, %query, attempts, "Element resolved");
                    return ResolveResult {
                        handle: Some(handle),
                        strategy: Some(strategy),
                        attempts,
                    };
                }
                Probe::Count(0) => {
                    debug!(%strategy, %query, "No match, falling through");
                }
                Probe::Count(n) => {
                    debug!(%strategy, %query, matches = n, "Ambiguous match, falling through");
                }
                Probe::Failed(e) => {
                    warn!(%strategy, %query, "Strategy abandoned: {}", e);
                }
            }
        }

        debug!(%descriptor, attempts, "All strategies exhausted");
        ResolveResult {
            handle: None,
            strategy: None,
            attempts,
        }
    }

    async fn probe(&self, page: &dyn Page, query: &ElementQuery) -> Probe {
        let mut stale_retries = 0;
        loop {
            let attempt = async {
                let handle = page.locate(query).await?;
                let count = handle.count().await?;
                Ok::<_, PageError>((handle, count))
            };

            match tokio::time::timeout(self.options.timeout_per_strategy, attempt).await {
                Err(_) => return Probe::Failed(PageError::Timeout(self.options.timeout_per_strategy)),
                Ok(Ok((handle, 1))) => return Probe::Unique(handle),
                Ok(Ok((_, count))) => return Probe::Count(count),
                Ok(Err(e)) if e.is_stale() && stale_retries < self.options.max_stale_retries => {
                    stale_retries += 1;
                    debug!(%query, stale_retries, "Stale element, retrying");
                    tokio::time::sleep(self.options.stale_backoff).await;
                }
                Ok(Err(e)) => return Probe::Failed(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    #[derive(Clone)]
    enum Behavior {
        Count(usize),
        /// Stale for the first n probes, then a single match.
        StaleThenOne(usize),
        Hang,
        Fail,
    }

    #[derive(Default)]
    struct FakePage {
        behaviors: HashMap<String, Behavior>,
        probes: Mutex<HashMap<String, usize>>,
        locate_calls: AtomicUsize,
    }

    impl FakePage {
        fn with(mut self, query: ElementQuery, behavior: Behavior) -> Self {
            self.behaviors.insert(query.to_string(), behavior);
            self
        }
    }

    struct FakeHandle {
        result: Result<usize, PageError>,
    }

    #[async_trait]
    impl ElementHandle for FakeHandle {
        async fn count(&self) -> Result<usize, PageError> {
            self.result.clone()
        }
        async fn click(&self) -> Result<(), PageError> {
            Ok(())
        }
        async fn fill(&self, _value: &str) -> Result<(), PageError> {
            Ok(())
        }
        async fn select_option(&self, _value: &str) -> Result<(), PageError> {
            Ok(())
        }
        async fn get_attribute(&self, _name: &str) -> Result<Option<String>, PageError> {
            Ok(None)
        }
        async fn scroll_into_view(&self) -> Result<(), PageError> {
            Ok(())
        }
    }

    #[async_trait]
    impl Page for FakePage {
        async fn navigate(&self, _url: &str) -> Result<(), PageError> {
            Ok(())
        }
        async fn evaluate(
            &self,
            _script: &str,
            _arg: serde_json::Value,
        ) -> Result<serde_json::Value, PageError> {
            Ok(serde_json::Value::Null)
        }
        async fn locate(&self, query: &ElementQuery) -> Result<Box<dyn ElementHandle>, PageError> {
            self.locate_calls.fetch_add(1, Ordering::SeqCst);
            let key = query.to_string();
            let probe = {
                let mut probes = self.probes.lock().unwrap();
                let n = probes.entry(key.clone()).or_insert(0);
                *n += 1;
                *n
            };
            let result = match self.behaviors.get(&key).cloned() {
                None => Ok(0),
                Some(Behavior::Count(n)) => Ok(n),
                Some(Behavior::StaleThenOne(stale)) if probe <= stale => {
                    Err(PageError::Stale("detached".into()))
                }
                Some(Behavior::StaleThenOne(_)) => Ok(1),
                Some(Behavior::Hang) => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(1)
                }
                Some(Behavior::Fail) => Err(PageError::Backend("boom".into())),
            };
            Ok(Box::new(FakeHandle { result }))
        }
        async fn wait_for_timeout(&self, _duration: Duration) {}
        async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
            Ok(Vec::new())
        }
        async fn url(&self) -> Result<String, PageError> {
            Ok("about:blank".into())
        }
    }

    fn resolver() -> LocatorResolver {
        LocatorResolver::new(ResolveOptions {
            timeout_per_strategy: Duration::from_millis(50),
            max_stale_retries: 2,
            stale_backoff: Duration::from_millis(1),
        })
    }

    fn full_descriptor() -> LocatorDescriptor {
        LocatorDescriptor {
            test_id: Some("submit".into()),
            label: Some("Submit".into()),
            text: Some("Submit".into()),
            css: Some("button.submit".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_id_wins_when_unique() {
        let page = FakePage::default()
            .with(ElementQuery::TestId("submit".into()), Behavior::Count(1))
            .with(ElementQuery::Css("button.submit".into()), Behavior::Count(1));

        let result = resolver().resolve(&page, &full_descriptor()).await;
        assert!(result.is_found());
        assert_eq!(result.strategy, Some(Strategy::TestId));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn ambiguous_and_missing_fall_through_to_css() {
        let page = FakePage::default()
            .with(ElementQuery::TestId("submit".into()), Behavior::Count(2))
            .with(ElementQuery::Label("Submit".into()), Behavior::Count(0))
            .with(ElementQuery::Text("Submit".into()), Behavior::Count(3))
            .with(ElementQuery::Css("button.submit".into()), Behavior::Count(1));

        let result = resolver().resolve(&page, &full_descriptor()).await;
        assert_eq!(result.strategy, Some(Strategy::Css));
        assert_eq!(result.strategy.unwrap().name(), "css");
        assert_eq!(result.attempts, 4);
    }

    #[tokio::test]
    async fn no_match_reports_attempts() {
        let page = FakePage::default();
        let result = resolver().resolve(&page, &full_descriptor()).await;
        assert!(!result.is_found());
        assert!(result.strategy.is_none());
        assert_eq!(result.attempts, 4);
    }

    #[tokio::test]
    async fn stale_is_retried_within_bound() {
        let page = FakePage::default()
            .with(ElementQuery::TestId("submit".into()), Behavior::StaleThenOne(2));

        let result = resolver().resolve(&page, &full_descriptor()).await;
        assert_eq!(result.strategy, Some(Strategy::TestId));
        assert_eq!(page.locate_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stale_beyond_bound_abandons_strategy() {
        let page = FakePage::default()
            .with(ElementQuery::TestId("submit".into()), Behavior::StaleThenOne(5))
            .with(ElementQuery::Css("button.submit".into()), Behavior::Count(1));

        let result = resolver().resolve(&page, &full_descriptor()).await;
        assert_eq!(result.strategy, Some(Strategy::Css));
        let probes = page.probes.lock().unwrap();
        // One initial probe plus two retries.
        assert_eq!(probes.get("test_id=submit"), Some(&3));
    }

    #[tokio::test]
    async fn timeout_and_errors_abandon_only_that_strategy() {
        let page = FakePage::default()
            .with(ElementQuery::TestId("submit".into()), Behavior::Hang)
            .with(ElementQuery::Label("Submit".into()), Behavior::Fail)
            .with(ElementQuery::Text("Submit".into()), Behavior::Count(1));

        let result = resolver().resolve(&page, &full_descriptor()).await;
        assert_eq!(result.strategy, Some(Strategy::Text));
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn empty_descriptor_tries_nothing() {
        let page = FakePage::default();
        let result = resolver()
            .resolve(&page, &LocatorDescriptor::default())
            .await;
        assert!(!result.is_found());
        assert_eq!(result.attempts, 0);
    }
}
