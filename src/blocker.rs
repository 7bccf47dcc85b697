//! Obstacle classifier.
//!
//! Decides from one page snapshot whether automation must halt (captcha,
//! login wall, 2FA prompt, bot check, rate limit) and, from the same
//! snapshot, which kind of screen is showing.
//!
//! Signals are evaluated in registration order; the highest confidence wins
//! and an exact tie keeps the earlier-registered signal.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::PageError;
use crate::page::{Page, PageSnapshot};

/// Kind of obstacle that halts automated progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    Captcha,
    Login,
    TwoFactor,
    BotCheck,
    RateLimited,
}

impl BlockerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captcha => "captcha",
            Self::Login => "login",
            Self::TwoFactor => "two_factor",
            Self::BotCheck => "bot_check",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl std::fmt::Display for BlockerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the winning signal matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Dom,
    Text,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dom => "dom",
            Self::Text => "text",
        }
    }
}

/// What the current screen is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenPurpose {
    Form,
    Review,
    Confirmation,
}

impl ScreenPurpose {
    /// Review and confirmation screens must not be filled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Review | Self::Confirmation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockerResult {
    pub kind: BlockerType,
    pub confidence: f64,
    pub source: Source,
    /// Name of the matched signal, for logs.
    pub signal: &'static str,
}

impl std::fmt::Display for BlockerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, {:.2}, signal {})",
            self.kind,
            self.source.as_str(),
            self.confidence,
            self.signal
        )
    }
}

#[derive(Debug, Clone)]
pub enum SignalMode {
    /// CSS selector that must have a visible match.
    Dom(&'static str),
    /// Regex over title and visible text.
    Text(Regex),
}

/// One row of a signal table.
#[derive(Debug, Clone)]
pub struct Signal<K> {
    pub name: &'static str,
    pub kind: K,
    pub confidence: f64,
    pub mode: SignalMode,
}

impl<K: Copy> Signal<K> {
    pub fn dom(name: &'static str, kind: K, confidence: f64, selector: &'static str) -> Self {
        Self {
            name,
            kind,
            confidence,
            mode: SignalMode::Dom(selector),
        }
    }

    /// Returns `None` (and logs) if the pattern does not compile.
    pub fn text(name: &'static str, kind: K, confidence: f64, pattern: &str) -> Option<Self> {
        match Regex::new(pattern) {
            Ok(regex) => Some(Self {
                name,
                kind,
                confidence,
                mode: SignalMode::Text(regex),
            }),
            Err(e) => {
                error!(signal = name, "Invalid signal pattern: {}", e);
                None
            }
        }
    }

    fn matches(&self, snapshot: &PageSnapshot, text: &str) -> bool {
        match &self.mode {
            SignalMode::Dom(selector) => snapshot.has_selector(selector),
            SignalMode::Text(regex) => regex.is_match(text),
        }
    }

    fn source(&self) -> Source {
        match self.mode {
            SignalMode::Dom(_) => Source::Dom,
            SignalMode::Text(_) => Source::Text,
        }
    }
}

/// Highest-confidence matching signal; ties keep the earlier one.
fn strongest<'a, K: Copy>(signals: &'a [Signal<K>], snapshot: &PageSnapshot) -> Option<&'a Signal<K>> {
    let text = snapshot.searchable_text();
    let mut best: Option<&Signal<K>> = None;
    for signal in signals.iter().filter(|s| s.matches(snapshot, &text)) {
        if best.is_none_or(|b| signal.confidence > b.confidence) {
            best = Some(signal);
        }
    }
    best
}

/// Password fields inside a sign-in form. Application pages that ask the
/// candidate to create an account carry bare password inputs too.
const LOGIN_FORM_PASSWORD: &str = r#"form[action*="login"] input[type="password"], form[action*="signin"] input[type="password"], form[action*="sign_in"] input[type="password"]"#;

/// Signal-table classifier for obstacles and screen purpose.
pub struct BlockerClassifier {
    blockers: Vec<Signal<BlockerType>>,
    purposes: Vec<Signal<ScreenPurpose>>,
}

impl BlockerClassifier {
    pub fn new(blockers: Vec<Signal<BlockerType>>, purposes: Vec<Signal<ScreenPurpose>>) -> Self {
        Self { blockers, purposes }
    }

    /// Built-in vendor signal tables.
    pub fn default_rules() -> Self {
        use BlockerType::*;

        // DOM signals are vendor-specific widgets only; generic media
        // elements appear on ordinary pages.
        let mut blockers = vec![
            Signal::dom("recaptcha_iframe", Captcha, 0.95, r#"iframe[src*="recaptcha"]"#),
            Signal::dom("recaptcha_widget", Captcha, 0.95, ".g-recaptcha"),
            Signal::dom("hcaptcha_iframe", Captcha, 0.95, r#"iframe[src*="hcaptcha.com"]"#),
            Signal::dom("hcaptcha_widget", Captcha, 0.95, ".h-captcha"),
            Signal::dom(
                "arkose_funcaptcha",
                Captcha,
                0.9,
                r#"iframe[src*="arkoselabs.com"], #FunCaptcha"#,
            ),
            Signal::dom("captcha_sitekey", Captcha, 0.8, "[data-sitekey]"),
            Signal::dom(
                "cloudflare_turnstile",
                BotCheck,
                0.95,
                r#".cf-turnstile, iframe[src*="challenges.cloudflare.com"]"#,
            ),
            Signal::dom("perimeterx", BotCheck, 0.95, "#px-captcha"),
            Signal::dom(
                "one_time_code_input",
                TwoFactor,
                0.9,
                r#"input[autocomplete="one-time-code"]"#,
            ),
            Signal::dom("login_form_password", Login, 0.6, LOGIN_FORM_PASSWORD),
        ];
        blockers.extend(
            [
                Signal::text(
                    "captcha_phrase",
                    Captcha,
                    0.75,
                    r"(?i)(complete the captcha|i'?m not a robot|verify (that )?you(’|')?(re| are) (a )?human)",
                ),
                Signal::text(
                    "browser_check_phrase",
                    BotCheck,
                    0.8,
                    r"(?i)(checking your browser|unusual traffic|press (and|&) hold)",
                ),
                Signal::text(
                    "two_factor_phrase",
                    TwoFactor,
                    0.8,
                    r"(?i)(enter the verification code|one[- ]time (pass)?code|two[- ]factor authentication|authenticator app)",
                ),
                Signal::text(
                    "login_phrase",
                    Login,
                    0.6,
                    r"(?i)((sign|log) in to (continue|apply)|please (sign|log) in|create an account to apply)",
                ),
                Signal::text(
                    "rate_limit_phrase",
                    RateLimited,
                    0.85,
                    r"(?i)(too many requests|you have been rate limited|rate limit exceeded)",
                ),
            ]
            .into_iter()
            .flatten(),
        );

        let mut purposes = vec![
            Signal::dom(
                "workday_review_page",
                ScreenPurpose::Review,
                0.9,
                r#"[data-automation-id="reviewJobApplicationPage"]"#,
            ),
            Signal::dom(
                "greenhouse_confirmation",
                ScreenPurpose::Confirmation,
                0.9,
                "#application_confirmation",
            ),
        ];
        purposes.extend(
            [
                Signal::text(
                    "review_phrase",
                    ScreenPurpose::Review,
                    0.8,
                    r"(?i)(review (your|and submit( your)?) application|please review (your|the) (information|answers))",
                ),
                Signal::text(
                    "confirmation_phrase",
                    ScreenPurpose::Confirmation,
                    0.9,
                    r"(?i)(thank you for (applying|your application)|application (has been )?(submitted|received))",
                ),
            ]
            .into_iter()
            .flatten(),
        );

        Self::new(blockers, purposes)
    }

    /// Every DOM selector either table probes.
    pub fn selectors(&self) -> Vec<&'static str> {
        let blockers = self.blockers.iter().map(|s| &s.mode);
        let purposes = self.purposes.iter().map(|s| &s.mode);
        blockers
            .chain(purposes)
            .filter_map(|mode| match mode {
                SignalMode::Dom(selector) => Some(*selector),
                SignalMode::Text(_) => None,
            })
            .collect()
    }

    /// Capture the snapshot both tables evaluate against.
    pub async fn snapshot(&self, page: &dyn Page) -> Result<PageSnapshot, PageError> {
        PageSnapshot::capture(page, &self.selectors()).await
    }

    /// Capture a snapshot and classify it.
    pub async fn detect(&self, page: &dyn Page) -> Result<Option<BlockerResult>, PageError> {
        let snapshot = self.snapshot(page).await?;
        Ok(self.classify(&snapshot))
    }

    pub fn classify(&self, snapshot: &PageSnapshot) -> Option<BlockerResult> {
        let signal = strongest(&self.blockers, snapshot)?;
        let result = BlockerResult {
            kind: signal.kind,
            confidence: signal.confidence,
            source: signal.source(),
            signal: signal.name,
        };
        debug!(url = %snapshot.url, blocker = %result, "Blocker detected");
        Some(result)
    }

    pub fn screen_purpose(&self, snapshot: &PageSnapshot) -> ScreenPurpose {
        strongest(&self.purposes, snapshot)
            .map(|s| s.kind)
            .unwrap_or(ScreenPurpose::Form)
    }
}

impl Default for BlockerClassifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(text: &str, selectors: &[&str]) -> PageSnapshot {
        PageSnapshot {
            url: "https://jobs.example.com/apply".into(),
            title: "Apply".into(),
            text: text.into(),
            matched_selectors: selectors.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn default_tables_compile_every_pattern() {
        let classifier = BlockerClassifier::default_rules();
        assert_eq!(classifier.blockers.len(), 15);
        assert_eq!(classifier.purposes.len(), 4);
    }

    #[test]
    fn clean_media_page_is_not_blocked() {
        let classifier = BlockerClassifier::default_rules();
        let snap = snapshot(
            "Watch our culture video and listen to the team podcast. First name. Last name.",
            &[],
        );
        assert_eq!(classifier.classify(&snap), None);
    }

    #[test]
    fn no_generic_media_selectors() {
        let classifier = BlockerClassifier::default_rules();
        for selector in classifier.selectors() {
            assert!(!selector.contains("audio"), "{selector}");
            assert!(!selector.contains("video"), "{selector}");
        }
    }

    #[test]
    fn recaptcha_detected_from_dom() {
        let classifier = BlockerClassifier::default_rules();
        let result = classifier
            .classify(&snapshot("", &[".g-recaptcha"]))
            .unwrap();
        assert_eq!(result.kind, BlockerType::Captcha);
        assert_eq!(result.source, Source::Dom);
        assert_eq!(result.signal, "recaptcha_widget");
    }

    #[test]
    fn higher_confidence_wins_over_earlier_signal() {
        let classifier = BlockerClassifier::default_rules();
        // login form (0.6) is outranked by the rate limit text (0.85)
        let result = classifier
            .classify(&snapshot("Too many requests", &[LOGIN_FORM_PASSWORD]))
            .unwrap();
        assert_eq!(result.kind, BlockerType::RateLimited);
        assert_eq!(result.source, Source::Text);
    }

    #[test]
    fn bare_password_field_is_not_a_login_wall() {
        let classifier = BlockerClassifier::default_rules();
        assert!(!classifier.selectors().contains(&r#"input[type="password"]"#));
        let snap = snapshot("Create a password for your candidate account", &[r#"input[type="password"]"#]);
        assert_eq!(classifier.classify(&snap), None);

        let result = classifier
            .classify(&snapshot("", &[LOGIN_FORM_PASSWORD]))
            .unwrap();
        assert_eq!(result.kind, BlockerType::Login);
        assert_eq!(result.signal, "login_form_password");
    }

    #[test]
    fn exact_tie_keeps_registration_order() {
        let classifier = BlockerClassifier::default_rules();
        let result = classifier
            .classify(&snapshot(
                "",
                &["#px-captcha", r#"iframe[src*="recaptcha"]"#],
            ))
            .unwrap();
        assert_eq!(result.kind, BlockerType::Captcha);
        assert_eq!(result.signal, "recaptcha_iframe");
    }

    #[test]
    fn custom_table_tie_break() {
        let classifier = BlockerClassifier::new(
            vec![
                Signal::text("first", BlockerType::Login, 0.5, "(?i)hello").unwrap(),
                Signal::text("second", BlockerType::Captcha, 0.5, "(?i)hello").unwrap(),
            ],
            Vec::new(),
        );
        let result = classifier.classify(&snapshot("Hello there", &[])).unwrap();
        assert_eq!(result.signal, "first");
    }

    #[test]
    fn two_factor_text() {
        let classifier = BlockerClassifier::default_rules();
        let result = classifier
            .classify(&snapshot("Enter the verification code we sent to your phone", &[]))
            .unwrap();
        assert_eq!(result.kind, BlockerType::TwoFactor);
    }

    #[test]
    fn invalid_pattern_is_skipped() {
        assert!(Signal::text("bad", BlockerType::Login, 0.5, "(unclosed").is_none());
    }

    #[test]
    fn screen_purpose_classification() {
        let classifier = BlockerClassifier::default_rules();
        assert_eq!(
            classifier.screen_purpose(&snapshot("First name", &[])),
            ScreenPurpose::Form
        );
        assert_eq!(
            classifier.screen_purpose(&snapshot("Please review your application before submitting", &[])),
            ScreenPurpose::Review
        );
        assert_eq!(
            classifier.screen_purpose(&snapshot("Thank you for applying!", &[])),
            ScreenPurpose::Confirmation
        );
        assert!(ScreenPurpose::Review.is_terminal());
        assert!(!ScreenPurpose::Form.is_terminal());
    }
}
