//! Raw DOM scan results
//!
//! Shape of the JSON returned by the scan script, plus the element
//! classification helpers the annotator filters with.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::core::{BoundingBox, Viewport};
use crate::som::descriptor::ParentSummary;

/// Tags whose interactivity is native; descendants of these are not marked
pub const TRUE_INTERACTIVE_TAGS: [&str; 6] = ["button", "a", "input", "textarea", "select", "label"];

/// One scan of the live page
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawScan {
    #[serde(default)]
    pub viewport: Viewport,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

/// Computed style subset
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
    pub cursor: String,
}

impl Default for RawStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
            cursor: "auto".to_string(),
        }
    }
}

/// A node that carried at least one interactivity signal
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawNode {
    /// Traversal index, unique within one scan
    pub node_id: u32,
    /// Composed-tree ancestors, nearest first
    pub ancestors: Vec<u32>,
    pub tag: String,
    /// Explicit `role` attribute
    pub role: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub classes: Vec<String>,
    pub style: RawStyle,
    pub rect: BoundingBox,
    pub text: String,
    /// ::before/::after content, quotes stripped
    pub pseudo_content: Option<String>,
    pub label_text: Option<String>,
    pub label_node_id: Option<u32>,
    pub parent: Option<ParentSummary>,
    pub disabled: bool,
    pub in_viewport: bool,
    /// Per sample point: the top hit and its ancestors, or `None` when
    /// nothing scanned was hit there
    pub hit_samples: Vec<Option<Vec<u32>>>,
    /// Matched the tag/role/attribute allow-list
    pub allow_listed: bool,
    /// `cursor: pointer` not inherited from the parent
    pub pointer_cursor: bool,
    pub inline_handler: bool,
    pub tab_index: Option<i32>,
}

impl RawNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(name)
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn input_type(&self) -> Option<String> {
        match self.tag.as_str() {
            "input" => Some(self.attr("type").unwrap_or("text").to_ascii_lowercase()),
            "button" => self.attr("type").map(str::to_ascii_lowercase),
            _ => None,
        }
    }

    /// Explicit role, or the implicit ARIA role of the tag
    pub fn effective_role(&self) -> Option<String> {
        if let Some(role) = self.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            return Some(role.to_string());
        }
        let role = match self.tag.as_str() {
            "a" if self.attrs.contains_key("href") => "link",
            "button" | "summary" => "button",
            "select" => "combobox",
            "textarea" => "textbox",
            "option" => "option",
            "img" => "img",
            "input" => match self.input_type().as_deref() {
                Some("checkbox") => "checkbox",
                Some("radio") => "radio",
                Some("button" | "submit" | "reset" | "image") => "button",
                Some("range") => "slider",
                Some("number") => "spinbutton",
                Some("search") => "searchbox",
                Some("hidden" | "file" | "color") => return None,
                _ => "textbox",
            },
            _ => return None,
        };
        Some(role.to_string())
    }

    /// Alt text for images, aria-label otherwise
    pub fn accessible_name(&self) -> Option<String> {
        let name = if self.tag == "img" {
            self.attr("alt")
        } else {
            self.attr("aria-label")
        };
        name.map(str::to_string)
    }

    pub fn is_true_interactive(&self) -> bool {
        TRUE_INTERACTIVE_TAGS.contains(&self.tag.as_str())
    }

    pub fn has_pseudo_signal(&self) -> bool {
        self.pointer_cursor || self.inline_handler || self.tab_index.is_some_and(|t| t > 0)
    }

    /// Opacity zero or visibility hidden
    pub fn is_visually_hidden(&self) -> bool {
        self.style.opacity <= 0.0
            || self.style.visibility == "hidden"
            || self.style.visibility == "collapse"
    }

    /// Hidden itself, but drawing content through ::before/::after
    pub fn is_pseudo_rendered(&self) -> bool {
        self.is_visually_hidden() && self.pseudo_content.is_some()
    }

    /// Popup triggers, expandable sections and custom comboboxes
    pub fn is_container(&self) -> bool {
        let native = matches!(
            self.tag.as_str(),
            "button" | "a" | "input" | "select" | "textarea" | "summary"
        );
        if self.tag == "details" {
            return true;
        }
        if native {
            return false;
        }
        matches!(self.role.as_deref(), Some("combobox" | "listbox"))
            || self.attrs.contains_key("aria-haspopup")
            || self.attrs.contains_key("aria-expanded")
    }

    /// Something a user would click on directly
    pub fn is_clickable(&self) -> bool {
        matches!(
            self.tag.as_str(),
            "button" | "a" | "input" | "select" | "textarea" | "summary" | "option"
        ) || matches!(
            self.role.as_deref(),
            Some("button" | "link" | "option" | "menuitem" | "checkbox" | "radio" | "tab" | "switch")
        ) || self.pointer_cursor
            || self.inline_handler
    }

    /// A checkbox or radio the user cannot see
    pub fn is_hidden_toggle(&self) -> bool {
        matches!(self.input_type().as_deref(), Some("checkbox" | "radio"))
            && self.tag == "input"
            && (self.is_visually_hidden() || !self.rect.has_area())
    }
}
