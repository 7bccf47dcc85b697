//! In-page scripts and the shapes they return.
//!
//! Each script is a function expression taking one JSON argument. Page
//! backends pass them to `evaluate` verbatim.

use serde::{Deserialize, Serialize};

use crate::locator::LocatorDescriptor;

/// Capture url, title, visible text and which of `arg` (CSS selectors) match.
pub const SNAPSHOT: &str = r#"(selectors) => {
  const visible = (el) => {
    const r = el.getBoundingClientRect();
    const s = getComputedStyle(el);
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
  };
  const matched = selectors.filter((sel) => {
    try {
      return Array.from(document.querySelectorAll(sel)).some(visible);
    } catch (_) {
      return false;
    }
  });
  return {
    url: location.href,
    title: document.title || '',
    text: document.body ? document.body.innerText.slice(0, 20000) : '',
    matched_selectors: matched,
  };
}"#;

/// Current scroll position, maximum scroll and viewport height.
pub const SCROLL_METRICS: &str = r#"() => {
  const root = document.scrollingElement || document.documentElement;
  return {
    scroll_y: window.scrollY,
    max_scroll: Math.max(0, root.scrollHeight - window.innerHeight),
    viewport_height: window.innerHeight,
  };
}"#;

/// Scroll to absolute position `arg.y`.
pub const SCROLL_TO: &str = r#"(arg) => { window.scrollTo(0, arg.y); return window.scrollY; }"#;

/// Scroll by `arg.dy` pixels.
pub const SCROLL_BY: &str = r#"(arg) => { window.scrollBy(0, arg.dy); return window.scrollY; }"#;

/// Scroll the first `aria-invalid` field to the middle of the viewport.
/// Returns false when no field is flagged.
pub const SCROLL_TO_INVALID: &str = r#"() => {
  const el = document.querySelector('[aria-invalid="true"]');
  if (!el) return false;
  el.scrollIntoView({ block: 'center' });
  return true;
}"#;

/// Hide cookie banners, chat widgets and similar overlays. Returns the count hidden.
pub const SUPPRESS_BANNERS: &str = r#"() => {
  const selectors = [
    '#onetrust-banner-sdk', '#onetrust-consent-sdk', '.cookie-banner', '[id*="cookie-consent"]',
    '#intercom-container', '.intercom-lightweight-app', '#drift-widget', '[aria-label="cookie banner"]',
  ];
  let hidden = 0;
  for (const sel of selectors) {
    for (const el of document.querySelectorAll(sel)) {
      el.style.setProperty('display', 'none', 'important');
      hidden += 1;
    }
  }
  return hidden;
}"#;

/// List fields of kind `arg.kind` (see [`FieldKind`]) within the viewport.
pub const COLLECT_FIELDS: &str = r#"(arg) => {
  const inView = (el) => {
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0 && r.bottom > 0 && r.top < window.innerHeight;
  };
  const labelOf = (el) => {
    if (el.labels && el.labels.length) return el.labels[0].innerText.trim();
    const aria = el.getAttribute('aria-label');
    if (aria) return aria.trim();
    const group = el.closest('fieldset, [role="group"], [role="radiogroup"]');
    const legend = group && group.querySelector('legend, [id$="-label"], label');
    return legend ? legend.innerText.trim() : '';
  };
  const describe = (el) => ({
    test_id: el.getAttribute('data-testid') || el.getAttribute('data-automation-id') || null,
    label: labelOf(el) || null,
    field_name: el.getAttribute('name') || null,
    dom_id: el.id || null,
  });
  const isEmpty = (el) => {
    if (el.type === 'checkbox' || el.type === 'radio') {
      const name = el.getAttribute('name');
      return !name || !document.querySelector(`input[name="${CSS.escape(name)}"]:checked`);
    }
    return !el.value || !String(el.value).trim();
  };
  const base = (el) => ({
    descriptor: describe(el),
    label: labelOf(el),
    required: el.required || el.getAttribute('aria-required') === 'true',
    input_type: el.tagName === 'SELECT' ? 'select' : (el.type || el.tagName.toLowerCase()),
  });
  const fields = Array.from(document.querySelectorAll('input, select, textarea'))
    .filter((el) => el.type !== 'hidden' && !el.disabled && inView(el));

  if (arg.kind === 'empty') {
    return fields.filter(isEmpty).map(base);
  }
  if (arg.kind === 'choice') {
    const out = [];
    for (const el of fields.filter((f) => f.tagName === 'SELECT' && isEmpty(f))) {
      out.push({ ...base(el), options: Array.from(el.options).map((o) => o.text.trim()).filter(Boolean) });
    }
    const groups = new Map();
    for (const el of fields.filter((f) => f.type === 'radio' && isEmpty(f))) {
      const key = el.getAttribute('name');
      if (!groups.has(key)) groups.set(key, []);
      groups.get(key).push(el);
    }
    for (const radios of groups.values()) {
      out.push({
        ...base(radios[0]),
        input_type: 'radio',
        options: radios.map(labelOfOption),
        option_descriptors: radios.map(describe),
      });
    }
    return out;
    function labelOfOption(el) {
      return el.labels && el.labels.length ? el.labels[0].innerText.trim() : (el.value || '');
    }
  }
  if (arg.kind === 'date') {
    return fields
      .filter((el) => isEmpty(el) && (el.type === 'date' || /date|mm\/dd/i.test(el.placeholder || '') || /date/i.test(labelOf(el))))
      .map((el) => ({ ...base(el), format: el.type === 'date' ? 'YYYY-MM-DD' : 'MM/DD/YYYY' }));
  }
  if (arg.kind === 'ack') {
    return fields
      .filter((el) => el.type === 'checkbox' && !el.checked && (el.required || /agree|acknowledge|certify|consent/i.test(labelOf(el))))
      .map(base);
  }
  return [];
}"#;

/// Field-level validation messages currently shown.
pub const VALIDATION_ERRORS: &str = r#"() => {
  const out = [];
  for (const el of document.querySelectorAll('[aria-invalid="true"]')) {
    const label = (el.labels && el.labels.length ? el.labels[0].innerText : el.getAttribute('aria-label') || el.name || '').trim();
    const msgId = el.getAttribute('aria-errormessage') || el.getAttribute('aria-describedby');
    const msgEl = msgId ? document.getElementById(msgId) : null;
    out.push({ field: label, message: msgEl ? msgEl.innerText.trim() : '' });
  }
  for (const el of document.querySelectorAll('[role="alert"], .error-message, .field-error')) {
    const text = el.innerText.trim();
    if (text && !out.some((e) => e.message === text)) out.push({ field: '', message: text });
  }
  return out;
}"#;

/// Which subset of fields `COLLECT_FIELDS` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Any visible field with no value.
    Empty,
    /// Unanswered selects and radio groups.
    Choice,
    Date,
    /// Unchecked acknowledgement checkboxes.
    Ack,
}

impl FieldKind {
    pub fn arg(self) -> serde_json::Value {
        serde_json::json!({ "kind": self })
    }
}

/// One field reported by `COLLECT_FIELDS`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub descriptor: LocatorDescriptor,
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    /// Per-option descriptors for radio groups, parallel to `options`.
    #[serde(default)]
    pub option_descriptors: Vec<LocatorDescriptor>,
    /// Date format the field expects.
    #[serde(default)]
    pub format: Option<String>,
}

impl FieldInfo {
    pub fn is_radio(&self) -> bool {
        self.input_type.as_deref() == Some("radio")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub scroll_y: f64,
    pub max_scroll: f64,
    pub viewport_height: f64,
}

impl ScrollMetrics {
    pub fn at_bottom(&self, epsilon: f64) -> bool {
        self.max_scroll - self.scroll_y <= epsilon
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMessage {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub message: String,
}

impl ValidationMessage {
    /// Field label if known, otherwise the message itself.
    pub fn subject(&self) -> &str {
        if self.field.is_empty() {
            &self.message
        } else {
            &self.field
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_info_tolerates_sparse_json() {
        let info: FieldInfo = serde_json::from_value(serde_json::json!({
            "descriptor": {"label": "Email"},
            "label": "Email",
        }))
        .unwrap();
        assert_eq!(info.descriptor.label.as_deref(), Some("Email"));
        assert!(info.options.is_empty());
        assert!(!info.is_radio());
    }

    #[test]
    fn bottom_detection_uses_epsilon() {
        let m = ScrollMetrics {
            scroll_y: 997.0,
            max_scroll: 1000.0,
            viewport_height: 800.0,
        };
        assert!(m.at_bottom(4.0));
        assert!(!m.at_bottom(1.0));
    }

    #[test]
    fn field_kind_arg_is_snake_case() {
        assert_eq!(FieldKind::Ack.arg(), serde_json::json!({"kind": "ack"}));
    }
}
