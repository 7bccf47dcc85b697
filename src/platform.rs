//! Platform adapters: per-site knowledge kept out of the fill controller.
//!
//! Each adapter recognises its URLs, reports page state from the URL, turns
//! the job's profile into an answer map and names its next/continue controls.
//! `PlatformRegistry` picks the first adapter whose predicate matches and
//! falls back to `GenericPlatform`.

use std::sync::Arc;

use serde_json::Value;

use crate::locator::LocatorDescriptor;

/// Page state as far as the URL alone can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Unknown,
    Form,
    Review,
    Confirmation,
}

impl PageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Review | Self::Confirmation)
    }
}

/// Lowercase and collapse whitespace.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Ordered question-fragment → answer pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerMap {
    entries: Vec<(String, String)>,
}

impl AnswerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Blank keys or answers are ignored; the first entry for
    /// a key wins.
    pub fn insert(&mut self, key: &str, answer: impl Into<String>) {
        let key = normalize(key);
        let answer = answer.into();
        if key.is_empty() || answer.trim().is_empty() {
            return;
        }
        if !self.entries.iter().any(|(k, _)| *k == key) {
            self.entries.push((key, answer));
        }
    }

    /// First answer whose key occurs in `question`.
    pub fn answer_for(&self, question: &str) -> Option<&str> {
        let question = normalize(question);
        self.entries
            .iter()
            .find(|(key, _)| question.contains(key.as_str()))
            .map(|(_, answer)| answer.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Pick the option matching `answer`, case- and whitespace-insensitively.
/// Exact matches beat substring matches.
pub fn match_option<'a>(options: &'a [String], answer: &str) -> Option<&'a str> {
    let wanted = normalize(answer);
    if wanted.is_empty() {
        return None;
    }
    options
        .iter()
        .find(|o| normalize(o) == wanted)
        .or_else(|| options.iter().find(|o| normalize(o).contains(&wanted)))
        .map(String::as_str)
}

pub trait PlatformAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this adapter handles `url`.
    fn matches(&self, url: &str) -> bool;

    fn detect_page_state(&self, url: &str) -> PageState;

    /// Question fragments and answers derived from the job's profile.
    fn answer_map(&self, profile: &Value) -> AnswerMap {
        common_answers(profile)
    }

    /// Candidate next/continue controls, tried in order.
    fn advance_descriptors(&self) -> Vec<LocatorDescriptor> {
        common_advance_descriptors()
    }
}

/// Profile keys every platform understands.
const PROFILE_QUESTIONS: &[(&str, &str)] = &[
    ("authorized to work", "work_authorization"),
    ("legally authorized", "work_authorization"),
    ("require sponsorship", "requires_sponsorship"),
    ("visa sponsorship", "requires_sponsorship"),
    ("veteran", "veteran_status"),
    ("disability", "disability_status"),
    ("gender", "gender"),
    ("hispanic", "hispanic_latino"),
    ("race", "race"),
    ("ethnicity", "race"),
    ("how did you hear", "referral_source"),
    ("start date", "available_start_date"),
    ("willing to relocate", "willing_to_relocate"),
    ("country", "country"),
];

fn answer_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(true) => Some("Yes".into()),
        Value::Bool(false) => Some("No".into()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn common_answers(profile: &Value) -> AnswerMap {
    let mut map = AnswerMap::new();

    // Explicit question → answer overrides come first.
    if let Some(answers) = profile.get("answers").and_then(Value::as_object) {
        for (question, answer) in answers {
            if let Some(text) = answer_text(answer) {
                map.insert(question, text);
            }
        }
    }

    for (fragment, key) in PROFILE_QUESTIONS {
        if let Some(text) = profile.get(*key).and_then(answer_text) {
            map.insert(fragment, text);
        }
    }
    map
}

fn common_advance_descriptors() -> Vec<LocatorDescriptor> {
    ["Next", "Continue", "Save and Continue"]
        .into_iter()
        .map(|label| LocatorDescriptor::role("button", label).with_text(label))
        .collect()
}

/// Fallback for unrecognised sites.
pub struct GenericPlatform;

impl PlatformAdapter for GenericPlatform {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn detect_page_state(&self, _url: &str) -> PageState {
        PageState::Unknown
    }
}

pub struct WorkdayPlatform;

impl PlatformAdapter for WorkdayPlatform {
    fn name(&self) -> &'static str {
        "workday"
    }

    fn matches(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        url.contains("myworkdayjobs.com") || url.contains(".workday.com")
    }

    fn detect_page_state(&self, url: &str) -> PageState {
        let url = url.to_lowercase();
        if url.contains("/review") {
            PageState::Review
        } else if url.contains("/apply") {
            PageState::Form
        } else {
            PageState::Unknown
        }
    }

    fn answer_map(&self, profile: &Value) -> AnswerMap {
        let mut map = common_answers(profile);
        // Workday asks about prior employment with the hiring company.
        if let Some(text) = profile.get("previously_employed").and_then(answer_text) {
            map.insert("previously worked for", text);
        }
        map
    }

    fn advance_descriptors(&self) -> Vec<LocatorDescriptor> {
        let mut descriptors = vec![LocatorDescriptor::test_id("bottom-navigation-next-button")];
        descriptors.extend(common_advance_descriptors());
        descriptors
    }
}

pub struct GreenhousePlatform;

impl PlatformAdapter for GreenhousePlatform {
    fn name(&self) -> &'static str {
        "greenhouse"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_lowercase().contains("greenhouse.io")
    }

    fn detect_page_state(&self, url: &str) -> PageState {
        if url.to_lowercase().contains("/confirmation") {
            PageState::Confirmation
        } else {
            PageState::Form
        }
    }
}

/// Ordered adapter list, first match wins.
pub struct PlatformRegistry {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    fallback: Arc<dyn PlatformAdapter>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
            fallback: Arc::new(GenericPlatform),
        }
    }

    /// Registry with the built-in adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(WorkdayPlatform));
        registry.register(Arc::new(GreenhousePlatform));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        tracing::debug!("Registered platform adapter: {}", adapter.name());
        self.adapters.push(adapter);
    }

    pub fn for_url(&self, url: &str) -> Arc<dyn PlatformAdapter> {
        self.adapters
            .iter()
            .find(|a| a.matches(url))
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_picks_first_matching_adapter() {
        let registry = PlatformRegistry::with_defaults();
        assert_eq!(
            registry
                .for_url("https://acme.wd5.myworkdayjobs.com/en-US/careers/job/apply")
                .name(),
            "workday"
        );
        assert_eq!(
            registry.for_url("https://boards.greenhouse.io/acme/jobs/1").name(),
            "greenhouse"
        );
        assert_eq!(registry.for_url("https://example.com/careers").name(), "generic");
    }

    #[test]
    fn page_state_from_url() {
        assert_eq!(
            WorkdayPlatform.detect_page_state("https://acme.myworkdayjobs.com/job/apply/review"),
            PageState::Review
        );
        assert!(
            GreenhousePlatform
                .detect_page_state("https://boards.greenhouse.io/acme/jobs/1/confirmation")
                .is_terminal()
        );
        assert_eq!(
            GenericPlatform.detect_page_state("https://example.com"),
            PageState::Unknown
        );
    }

    #[test]
    fn answer_map_from_profile() {
        let profile = json!({
            "work_authorization": true,
            "requires_sponsorship": false,
            "answers": {"  Years of   Python experience": "5"},
        });
        let map = GenericPlatform.answer_map(&profile);
        assert_eq!(
            map.answer_for("Are you legally AUTHORIZED to work in the US?"),
            Some("Yes")
        );
        assert_eq!(map.answer_for("Will you require sponsorship?"), Some("No"));
        assert_eq!(
            map.answer_for("How many years of python experience do you have?"),
            Some("5")
        );
        assert_eq!(map.answer_for("Favourite colour"), None);
    }

    #[test]
    fn first_entry_for_a_key_wins() {
        let mut map = AnswerMap::new();
        map.insert("Gender", "Decline");
        map.insert("gender", "Other");
        assert_eq!(map.len(), 1);
        assert_eq!(map.answer_for("gender"), Some("Decline"));
    }

    #[test]
    fn option_matching_prefers_exact() {
        let options = vec![
            "Yes, I will need sponsorship".to_string(),
            "Yes".to_string(),
            "No".to_string(),
        ];
        assert_eq!(match_option(&options, " yes "), Some("Yes"));
        assert_eq!(match_option(&options, "need sponsorship"), Some("Yes, I will need sponsorship"));
        assert_eq!(match_option(&options, "maybe"), None);
        assert_eq!(match_option(&options, ""), None);
    }

    #[test]
    fn workday_prefers_its_own_next_button() {
        let first = WorkdayPlatform.advance_descriptors().remove(0);
        assert_eq!(first.test_id.as_deref(), Some("bottom-navigation-next-button"));
        assert!(GenericPlatform.advance_descriptors().len() >= 2);
    }
}
