//! Element locator: descriptor hints and the fallback resolver.

pub mod resolver;

use serde::{Deserialize, Serialize};

use crate::page::ElementQuery;

pub use resolver::{LocatorResolver, ResolveOptions, ResolveResult};

/// Caller-supplied hints describing one element. Every hint is optional;
/// the resolver tries them in [`Strategy`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Accessible name, used together with `role`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Form field `name` attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
    /// Exact visible text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

impl LocatorDescriptor {
    pub fn test_id(id: impl Into<String>) -> Self {
        Self {
            test_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: Some(css.into()),
            ..Self::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.plan().is_empty()
    }

    /// Queries to try, in priority order, for the hints that are present.
    pub fn plan(&self) -> Vec<(Strategy, ElementQuery)> {
        let mut plan = Vec::new();
        if let Some(id) = non_empty(&self.test_id) {
            plan.push((Strategy::TestId, ElementQuery::TestId(id.to_string())));
        }
        if let Some(role) = non_empty(&self.role) {
            plan.push((
                Strategy::Role,
                ElementQuery::Role {
                    role: role.to_string(),
                    name: non_empty(&self.name).map(str::to_string),
                },
            ));
        }
        if let Some(label) = non_empty(&self.label) {
            plan.push((Strategy::Label, ElementQuery::Label(label.to_string())));
        }
        // A role already pins the element kind; the name attribute adds nothing.
        if non_empty(&self.role).is_none()
            && let Some(name) = non_empty(&self.field_name)
        {
            plan.push((
                Strategy::FieldName,
                ElementQuery::Css(format!("[name=\"{}\"]", css_escape(name))),
            ));
        }
        if let Some(id) = non_empty(&self.dom_id) {
            plan.push((
                Strategy::DomId,
                ElementQuery::Css(format!("[id=\"{}\"]", css_escape(id))),
            ));
        }
        if let Some(text) = non_empty(&self.text) {
            plan.push((Strategy::Text, ElementQuery::Text(text.to_string())));
        }
        if let Some(css) = non_empty(&self.css) {
            plan.push((Strategy::Css, ElementQuery::Css(css.to_string())));
        }
        if let Some(xpath) = non_empty(&self.xpath) {
            plan.push((Strategy::XPath, ElementQuery::XPath(xpath.to_string())));
        }
        plan
    }
}

impl std::fmt::Display for LocatorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.plan().iter().map(|(_, q)| q.to_string()).collect();
        if parts.is_empty() {
            f.write_str("<empty descriptor>")
        } else {
            f.write_str(&parts.join(" | "))
        }
    }
}

/// Resolution strategies in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    TestId,
    Role,
    Label,
    FieldName,
    DomId,
    Text,
    Css,
    XPath,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TestId => "test_id",
            Self::Role => "role",
            Self::Label => "label",
            Self::FieldName => "field_name",
            Self::DomId => "dom_id",
            Self::Text => "text",
            Self::Css => "css",
            Self::XPath => "xpath",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn css_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
