//! Rule-based fillers run before any AI-assisted fill.
//!
//! Each filler lists its targets with one page script, resolves every target
//! through the locator resolver and acts on it. A target that cannot be
//! resolved or acted on is skipped and left for the AI pass.

use chrono::NaiveDate;
use tracing::debug;

use crate::error::PageError;
use crate::locator::{LocatorDescriptor, LocatorResolver};
use crate::page::scripts::{self, FieldInfo, FieldKind};
use crate::page::{Page, evaluate_as};
use crate::platform::{AnswerMap, match_option};

/// Counts from one deterministic pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    pub filled: usize,
    pub skipped: usize,
}

impl FillStats {
    fn record(&mut self, done: bool) {
        if done {
            self.filled += 1;
        } else {
            self.skipped += 1;
        }
    }
}

pub struct DeterministicFiller<'a> {
    resolver: &'a LocatorResolver,
    answers: &'a AnswerMap,
    today: NaiveDate,
}

impl<'a> DeterministicFiller<'a> {
    pub fn new(resolver: &'a LocatorResolver, answers: &'a AnswerMap, today: NaiveDate) -> Self {
        Self {
            resolver,
            answers,
            today,
        }
    }

    /// Choice questions, then dates, then acknowledgements.
    pub async fn run(&self, page: &dyn Page) -> Result<FillStats, PageError> {
        let mut stats = FillStats::default();

        for field in collect(page, FieldKind::Choice).await? {
            stats.record(self.fill_choice(page, &field).await);
        }
        for field in collect(page, FieldKind::Date).await? {
            stats.record(self.fill_date(page, &field).await);
        }
        for field in collect(page, FieldKind::Ack).await? {
            stats.record(self.check_ack(page, &field).await);
        }

        debug!(filled = stats.filled, skipped = stats.skipped, "Deterministic pass done");
        Ok(stats)
    }

    async fn fill_choice(&self, page: &dyn Page, field: &FieldInfo) -> bool {
        let Some(answer) = self.answers.answer_for(&field.label) else {
            return false;
        };
        let Some(option) = match_option(&field.options, answer) else {
            debug!(question = %field.label, answer, "No option matches answer");
            return false;
        };

        if field.is_radio() {
            let Some(index) = field.options.iter().position(|o| o == option) else {
                return false;
            };
            let Some(descriptor) = field.option_descriptors.get(index) else {
                return false;
            };
            self.act(page, descriptor, &field.label, Action::Click).await
        } else {
            self.act(page, &field.descriptor, &field.label, Action::Select(option))
                .await
        }
    }

    async fn fill_date(&self, page: &dyn Page, field: &FieldInfo) -> bool {
        let format = date_format(field.format.as_deref());
        let value = match self.answers.answer_for(&field.label) {
            Some(answer) => match parse_date(answer) {
                Some(date) => date.format(format).to_string(),
                None => answer.to_string(),
            },
            None => self.today.format(format).to_string(),
        };
        self.act(page, &field.descriptor, &field.label, Action::Fill(&value))
            .await
    }

    async fn check_ack(&self, page: &dyn Page, field: &FieldInfo) -> bool {
        self.act(page, &field.descriptor, &field.label, Action::Click)
            .await
    }

    async fn act(
        &self,
        page: &dyn Page,
        descriptor: &LocatorDescriptor,
        label: &str,
        action: Action<'_>,
    ) -> bool {
        let resolved = self.resolver.resolve(page, descriptor).await;
        let Some(handle) = resolved.handle else {
            debug!(field = label, attempts = resolved.attempts, "Field not found, leaving for AI pass");
            return false;
        };

        let result = match action {
            Action::Click => handle.click().await,
            Action::Fill(value) => handle.fill(value).await,
            Action::Select(option) => handle.select_option(option).await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(field = label, "Field action failed: {}", e);
                false
            }
        }
    }
}

enum Action<'v> {
    Click,
    Fill(&'v str),
    Select(&'v str),
}

async fn collect(page: &dyn Page, kind: FieldKind) -> Result<Vec<FieldInfo>, PageError> {
    evaluate_as(page, scripts::COLLECT_FIELDS, kind.arg()).await
}

/// chrono format for a declared field format. Defaults to US order.
fn date_format(declared: Option<&str>) -> &'static str {
    match declared.map(|f| f.trim().to_ascii_uppercase()).as_deref() {
        Some("YYYY-MM-DD") => "%Y-%m-%d",
        Some("DD/MM/YYYY") => "%d/%m/%Y",
        _ => "%m/%d/%Y",
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    ["%Y-%m-%d", "%m/%d/%Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}
