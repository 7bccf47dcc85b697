//! Scriptable in-memory page for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::PageError;
use crate::page::scripts::{self, FieldInfo, ValidationMessage};
use crate::page::{ElementHandle, ElementQuery, Page};

#[derive(Default)]
pub(crate) struct FakeState {
    pub url: String,
    pub title: String,
    pub text: String,
    pub selectors: HashSet<String>,
    pub scroll_y: f64,
    pub max_scroll: f64,
    pub viewport_height: f64,
    pub empty_fields: Vec<FieldInfo>,
    pub choice_fields: Vec<FieldInfo>,
    pub date_fields: Vec<FieldInfo>,
    pub ack_fields: Vec<FieldInfo>,
    /// How many more times VALIDATION_ERRORS reports `validation_messages`.
    pub validation_failures: usize,
    pub validation_messages: Vec<ValidationMessage>,
    /// Scroll offset of the first flagged field, if any.
    pub invalid_at: Option<f64>,
    /// Element match counts keyed by `ElementQuery` display form.
    pub elements: HashMap<String, usize>,
    /// Log of element actions and scrolls.
    pub actions: Vec<String>,
}

#[derive(Clone)]
pub(crate) struct FakePage {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    pub fn new(url: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                url: url.to_string(),
                viewport_height: 1000.0,
                ..Default::default()
            })),
        }
    }

    pub fn with<F: FnOnce(&mut FakeState)>(self, f: F) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn element(self, query: ElementQuery, count: usize) -> Self {
        self.with(|s| {
            s.elements.insert(query.to_string(), count);
        })
    }

    pub fn actions(&self) -> Vec<String> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn count_actions(&self, prefix: &str) -> usize {
        self.actions().iter().filter(|a| a.starts_with(prefix)).count()
    }
}

struct FakeHandle {
    state: Arc<Mutex<FakeState>>,
    query: String,
    count: usize,
}

impl FakeHandle {
    fn log(&self, action: String) {
        self.state.lock().unwrap().actions.push(action);
    }
}

#[async_trait]
impl ElementHandle for FakeHandle {
    async fn count(&self) -> Result<usize, PageError> {
        Ok(self.count)
    }
    async fn click(&self) -> Result<(), PageError> {
        self.log(format!("click {}", self.query));
        Ok(())
    }
    async fn fill(&self, value: &str) -> Result<(), PageError> {
        self.log(format!("fill {} = {value}", self.query));
        Ok(())
    }
    async fn select_option(&self, value: &str) -> Result<(), PageError> {
        self.log(format!("select {} = {value}", self.query));
        Ok(())
    }
    async fn get_attribute(&self, _name: &str) -> Result<Option<String>, PageError> {
        Ok(None)
    }
    async fn scroll_into_view(&self) -> Result<(), PageError> {
        self.log(format!("scroll_into_view {}", self.query));
        Ok(())
    }
}

#[async_trait]
impl Page for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        let mut s = self.state.lock().unwrap();
        s.url = url.to_string();
        s.actions.push(format!("navigate {url}"));
        Ok(())
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value, PageError> {
        let mut s = self.state.lock().unwrap();
        let value = if script == scripts::SNAPSHOT {
            let probed: Vec<String> = serde_json::from_value(arg).unwrap_or_default();
            let matched: Vec<&String> = probed.iter().filter(|p| s.selectors.contains(*p)).collect();
            json!({"url": s.url, "title": s.title, "text": s.text, "matched_selectors": matched})
        } else if script == scripts::SCROLL_METRICS {
            json!({"scroll_y": s.scroll_y, "max_scroll": s.max_scroll, "viewport_height": s.viewport_height})
        } else if script == scripts::SCROLL_TO {
            let y = arg["y"].as_f64().unwrap_or(0.0);
            s.actions.push(format!("scroll_to {y}"));
            s.scroll_y = y.clamp(0.0, s.max_scroll);
            json!(s.scroll_y)
        } else if script == scripts::SCROLL_TO_INVALID {
            match s.invalid_at {
                Some(y) => {
                    s.actions.push("scroll_to_invalid".into());
                    s.scroll_y = y.clamp(0.0, s.max_scroll);
                    json!(true)
                }
                None => json!(false),
            }
        } else if script == scripts::SCROLL_BY {
            let dy = arg["dy"].as_f64().unwrap_or(0.0);
            s.actions.push(format!("scroll_by {dy}"));
            s.scroll_y = (s.scroll_y + dy).clamp(0.0, s.max_scroll);
            json!(s.scroll_y)
        } else if script == scripts::SUPPRESS_BANNERS {
            s.actions.push("suppress_banners".into());
            json!(0)
        } else if script == scripts::COLLECT_FIELDS {
            let fields = match arg["kind"].as_str() {
                Some("empty") => &s.empty_fields,
                Some("choice") => &s.choice_fields,
                Some("date") => &s.date_fields,
                Some("ack") => &s.ack_fields,
                _ => return Err(PageError::Evaluation("unknown field kind".into())),
            };
            serde_json::to_value(fields).unwrap_or_default()
        } else if script == scripts::VALIDATION_ERRORS {
            if s.validation_failures > 0 {
                s.validation_failures -= 1;
                serde_json::to_value(&s.validation_messages).unwrap_or_default()
            } else {
                json!([])
            }
        } else {
            return Err(PageError::Evaluation("unknown script".into()));
        };
        Ok(value)
    }

    async fn locate(&self, query: &ElementQuery) -> Result<Box<dyn ElementHandle>, PageError> {
        let key = query.to_string();
        let count = self.state.lock().unwrap().elements.get(&key).copied().unwrap_or(0);
        Ok(Box::new(FakeHandle {
            state: Arc::clone(&self.state),
            query: key,
            count,
        }))
    }

    async fn wait_for_timeout(&self, _duration: Duration) {}

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        Ok(Vec::new())
    }

    async fn url(&self) -> Result<String, PageError> {
        Ok(self.state.lock().unwrap().url.clone())
    }
}
