//! Element descriptors and the per-round marker map

use serde::{Deserialize, Serialize};

use crate::core::BoundingBox;

/// Structured metadata captured for one marker at annotation time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    /// Marker id, a small positive integer rendered as a string
    pub som_id: String,
    pub tag: String,
    /// Explicit ARIA role, or the implicit role of the tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Visible text, truncated
    #[serde(default)]
    pub text: String,
    /// Alt text for images, aria-label otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessible_name: Option<String>,
    /// Text of a real `<label>` element (for=id or wrapping), never aria-label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub class_tokens: Vec<String>,
    /// Viewport-relative box at annotation time
    pub bbox: BoundingBox,
    /// Visually hidden, but drawn through ::before/::after content
    #[serde(default)]
    pub pseudo_rendered: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentSummary>,
}

/// Shallow summary of an element's parent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentSummary {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub text: String,
}

impl ElementDescriptor {
    /// Best human-facing name: accessible name, label, then text
    pub fn display_name(&self) -> Option<&str> {
        self.accessible_name
            .as_deref()
            .or(self.label_text.as_deref())
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.text.as_str()).filter(|s| !s.is_empty()))
    }
}

/// Numbered map of the interactive elements found in one annotation round.
///
/// The map is rebuilt from scratch every round; markers are never carried
/// over or merged between rounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerMap {
    elements: Vec<ElementDescriptor>,
}

impl MarkerMap {
    pub fn new(elements: Vec<ElementDescriptor>) -> Self {
        Self { elements }
    }

    pub fn get(&self, som_id: &str) -> Option<&ElementDescriptor> {
        let som_id = som_id.trim();
        self.elements.iter().find(|el| el.som_id == som_id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementDescriptor> {
        self.elements.iter()
    }

    /// One line per marker, in marker order, for the oracle prompt
    pub fn format_for_prompt(&self) -> String {
        if self.elements.is_empty() {
            return "(no interactive elements were marked)".to_string();
        }

        let mut out = String::new();
        for el in &self.elements {
            let mut line = format!("[{}] <{}>", el.som_id, el.tag);
            if let Some(role) = &el.role {
                line.push_str(&format!(" role={}", role));
            }
            if let Some(input_type) = &el.input_type {
                line.push_str(&format!(" type={}", input_type));
            }
            if let Some(name) = &el.accessible_name {
                line.push_str(&format!(" name=\"{}\"", name));
            }
            if !el.text.is_empty() {
                line.push_str(&format!(" text=\"{}\"", el.text));
            }
            if let Some(label) = &el.label_text {
                line.push_str(&format!(" label=\"{}\"", label));
            }
            if let Some(placeholder) = &el.placeholder {
                line.push_str(&format!(" placeholder=\"{}\"", placeholder));
            }
            if el.disabled {
                line.push_str(" (disabled)");
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn button(id: &str, text: &str) -> ElementDescriptor {
        ElementDescriptor {
            som_id: id.to_string(),
            tag: "button".to_string(),
            role: Some("button".to_string()),
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_lookup_by_marker() {
        let map = MarkerMap::new(vec![button("1", "Save"), button("2", "Cancel")]);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("2").map(|e| e.text.as_str()), Some("Cancel"));
        assert_eq!(map.get(" 1 ").map(|e| e.text.as_str()), Some("Save"));
        assert!(map.get("3").is_none());
    }

    #[test]
    fn test_prompt_format_lists_every_marker() {
        let mut email = ElementDescriptor {
            som_id: "2".into(),
            tag: "input".into(),
            input_type: Some("email".into()),
            placeholder: Some("you@example.com".into()),
            ..Default::default()
        };
        email.label_text = Some("Email".into());
        let map = MarkerMap::new(vec![button("1", "Save"), email]);
        let text = map.format_for_prompt();
        assert!(text.contains("[1] <button> role=button text=\"Save\""));
        assert!(text.contains("[2] <input> type=email label=\"Email\" placeholder=\"you@example.com\""));
    }

    #[test]
    fn test_display_name_prefers_accessible_name() {
        let mut el = button("1", "X");
        assert_eq!(el.display_name(), Some("X"));
        el.accessible_name = Some("Close dialog".into());
        assert_eq!(el.display_name(), Some("Close dialog"));
    }
}
