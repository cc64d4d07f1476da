//! Selector synthesis
//!
//! Turns an [`ElementDescriptor`] into an ordered list of [`TypedSelector`]s,
//! most stable first. Selectors are immutable: scoping a selector under a
//! parent or picking the n-th match builds a new value that points at the old
//! one, so chains resolve top-down from the root.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use crate::som::descriptor::ElementDescriptor;

/// Attribute stamped on every marked element
pub const MARKER_ATTRIBUTE: &str = "data-som-id";

static AUTOGEN_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:react-|radix-|headlessui-|mui-|ember\d|ng-|_r_|rc-|downshift-|yui_|ext-gen|aria-|__|:r)|[«»]|\d{4,}",
    )
    .expect("static regex")
});

static UNSTABLE_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:css-|sc-|jsx-|emotion-|svelte-|astro-|tw-|styled-|makeStyles-|jss\d|_|ng-)|_[a-zA-Z0-9]+__[a-zA-Z0-9_-]{5}$|\d{3,}|^[a-zA-Z]{1,3}[0-9][a-zA-Z0-9]{3,}$",
    )
    .expect("static regex")
});

/// How a selector locates its element
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SelectorStrategy {
    /// The marker attribute stamped during annotation
    Marker(String),
    /// A stable `id` attribute
    StableId(String),
    /// Text of an associated `<label>`
    Label(String),
    /// `name` attribute of a form control
    FormName { tag: String, name: String },
    Placeholder(String),
    /// ARIA role plus accessible name
    Role { role: String, name: Option<String> },
    /// Visible text
    Text(String),
    /// Free-form CSS locator
    Css(String),
}

/// A locating strategy with an optional parent scope and match index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedSelector {
    pub strategy: SelectorStrategy,
    pub parent: Option<Arc<TypedSelector>>,
    pub nth: Option<usize>,
}

impl TypedSelector {
    pub fn new(strategy: SelectorStrategy) -> Self {
        Self {
            strategy,
            parent: None,
            nth: None,
        }
    }

    /// `[data-som-id="<id>"]`
    pub fn marker(som_id: &str) -> Self {
        Self::new(SelectorStrategy::Marker(som_id.to_string()))
    }

    pub fn css(css: impl Into<String>) -> Self {
        Self::new(SelectorStrategy::Css(css.into()))
    }

    /// Scope this selector under `parent`
    pub fn within(&self, parent: TypedSelector) -> Self {
        Self {
            strategy: self.strategy.clone(),
            parent: Some(Arc::new(parent)),
            nth: self.nth,
        }
    }

    /// Pick the n-th match (0-based)
    pub fn nth(&self, index: usize) -> Self {
        Self {
            strategy: self.strategy.clone(),
            parent: self.parent.clone(),
            nth: Some(index),
        }
    }

    /// First match, unless an index is already pinned
    pub fn first(&self) -> Self {
        match self.nth {
            Some(_) => self.clone(),
            None => self.nth(0),
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.parent.is_some()
    }

    /// Selector chain from the outermost scope down to this selector
    pub fn lineage(&self) -> Vec<&TypedSelector> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Whether this is the raw marker-attribute selector
    pub fn is_marker(&self) -> bool {
        matches!(self.strategy, SelectorStrategy::Marker(_))
    }

    fn write_step(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.strategy {
            SelectorStrategy::Marker(id) => {
                write!(f, "locator('[{}=\"{}\"]')", MARKER_ATTRIBUTE, escape_quoted(id))
            }
            SelectorStrategy::StableId(id) => {
                if is_css_ident(id) {
                    write!(f, "locator('#{}')", id)
                } else {
                    write!(f, "locator('[id=\"{}\"]')", escape_quoted(id))
                }
            }
            SelectorStrategy::Label(label) => write!(f, "getByLabel('{}')", escape_quoted(label)),
            SelectorStrategy::FormName { tag, name } => {
                write!(f, "locator('{}[name=\"{}\"]')", tag, escape_quoted(name))
            }
            SelectorStrategy::Placeholder(text) => {
                write!(f, "getByPlaceholder('{}')", escape_quoted(text))
            }
            SelectorStrategy::Role { role, name } => match name {
                Some(name) => write!(
                    f,
                    "getByRole('{}', {{ name: '{}' }})",
                    role,
                    escape_quoted(name)
                ),
                None => write!(f, "getByRole('{}')", role),
            },
            SelectorStrategy::Text(text) => write!(f, "getByText('{}')", escape_quoted(text)),
            SelectorStrategy::Css(css) => write!(f, "locator('{}')", escape_quoted(css)),
        }
    }
}

/// Canonical locator expression, e.g. `page.locator('.card').getByRole('button', { name: 'Save' }).nth(1)`
impl fmt::Display for TypedSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parent {
            Some(parent) => write!(f, "{}", parent)?,
            None => write!(f, "page")?,
        }
        write!(f, ".")?;
        self.write_step(f)?;
        if let Some(index) = self.nth {
            write!(f, ".nth({})", index)?;
        }
        Ok(())
    }
}

impl Serialize for TypedSelector {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Escape a value for a single-quoted JS string that may also hold a
/// double-quoted CSS attribute value
pub fn escape_quoted(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('\n', " ")
}

fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Ids that look hand-written rather than generated by a framework
pub fn is_stable_id(id: &str) -> bool {
    let id = id.trim();
    !id.is_empty() && !id.contains(':') && !id.contains(char::is_whitespace) && !AUTOGEN_ID.is_match(id)
}

/// Class tokens that are not build-time hashes or utility prefixes
pub fn is_stable_class(class: &str) -> bool {
    !class.is_empty() && class.len() <= 40 && !UNSTABLE_CLASS.is_match(class)
}

/// First stable class token, if any
pub fn first_stable_class(classes: &[String]) -> Option<&str> {
    classes
        .iter()
        .map(String::as_str)
        .find(|c| is_stable_class(c))
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Build the ordered selector list for a descriptor, most stable first
pub fn synthesize(desc: &ElementDescriptor) -> Vec<TypedSelector> {
    let mut selectors = Vec::new();
    let tag = desc.tag.to_ascii_lowercase();

    if let Some(id) = non_empty(&desc.id).filter(|id| is_stable_id(id)) {
        selectors.push(TypedSelector::new(SelectorStrategy::StableId(id.to_string())));
    }

    if let Some(label) = non_empty(&desc.label_text) {
        selectors.push(TypedSelector::new(SelectorStrategy::Label(label.to_string())));
    }

    if matches!(tag.as_str(), "input" | "textarea" | "select") {
        if let Some(name) = non_empty(&desc.name) {
            selectors.push(TypedSelector::new(SelectorStrategy::FormName {
                tag: tag.clone(),
                name: name.to_string(),
            }));
        }
    }

    if let Some(placeholder) = non_empty(&desc.placeholder) {
        selectors.push(TypedSelector::new(SelectorStrategy::Placeholder(
            placeholder.to_string(),
        )));
    }

    if desc.pseudo_rendered {
        if let Some(input_type) = non_empty(&desc.input_type) {
            selectors.push(TypedSelector::css(format!(
                "{}[type=\"{}\"]",
                tag, input_type
            )));
        } else if let Some(class) = first_stable_class(&desc.class_tokens) {
            selectors.push(TypedSelector::css(format!("{}.{}", tag, class)));
        }
    } else {
        if let Some(role) = non_empty(&desc.role) {
            let name = desc
                .accessible_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .or_else(|| Some(desc.text.trim()).filter(|s| !s.is_empty()))
                .map(str::to_string);
            selectors.push(TypedSelector::new(SelectorStrategy::Role {
                role: role.to_string(),
                name,
            }));
        }

        let text = desc.text.trim();
        if !text.is_empty() {
            selectors.push(TypedSelector::new(SelectorStrategy::Text(text.to_string())));
        }
    }

    if let Some(parent_class) = desc
        .parent
        .as_ref()
        .and_then(|p| first_stable_class(&p.classes))
    {
        selectors.push(TypedSelector::css(tag.clone()).within(TypedSelector::css(format!(
            ".{}",
            parent_class
        ))));
    }

    selectors
}
