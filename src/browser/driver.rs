//! Page driver abstraction
//!
//! Everything the annotator, executor and orchestrator need from a browser
//! automation backend: script evaluation, screenshots, navigation, element
//! actions through [`TypedSelector`]s and raw pointer/keyboard input.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Point, SightlineError, Viewport};
use crate::som::selector::TypedSelector;

/// Result type for driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// An error reported by the browser backend, classified by its message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub message: String,
}

/// What kind of failure a driver error represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The selector matched several elements
    StrictViolation,
    /// Timed out for a reason other than the element being disabled
    Timeout,
    /// Element is disabled, read-only or otherwise not actionable
    NotActionable,
    /// Element was detached, unstable or still moving
    Detached,
    /// The execution context went away (navigation, crash, close)
    Navigation,
    Other,
}

static NAVIGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)execution context was destroyed|target (?:page, context or browser )?(?:has been )?closed|target closed|page (?:has )?crashed|browser has disconnected|disconnected|has been closed",
    )
    .expect("static regex")
});

static STRICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)strict mode violation|resolved to \d+ elements").expect("static regex")
});

static NOT_ACTIONABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)not enabled|not editable|not actionable|element is disabled|is not an? (?:<input>|input|select|textarea)")
        .expect("static regex")
});

static DETACHED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)detached|not stable|is moving|animating").expect("static regex")
});

static TIMEOUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)timeout|timed out").expect("static regex"));

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Classify the failure from its message text
    pub fn classify(&self) -> FailureKind {
        let msg = self.message.as_str();
        if NAVIGATION.is_match(msg) {
            FailureKind::Navigation
        } else if STRICT.is_match(msg) {
            FailureKind::StrictViolation
        } else if NOT_ACTIONABLE.is_match(msg) {
            FailureKind::NotActionable
        } else if DETACHED.is_match(msg) {
            FailureKind::Detached
        } else if TIMEOUT.is_match(msg) {
            FailureKind::Timeout
        } else {
            FailureKind::Other
        }
    }

    pub fn is_navigation(&self) -> bool {
        self.classify() == FailureKind::Navigation
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DriverError {}

impl From<DriverError> for SightlineError {
    fn from(err: DriverError) -> Self {
        if err.is_navigation() {
            SightlineError::NavigationInterrupted(err.message)
        } else {
            SightlineError::Browser(err.message)
        }
    }
}

/// Mouse button
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

/// Browsing-context navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Goto(String),
    Back,
    Forward,
    Reload,
}

impl fmt::Display for Navigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Goto(url) => write!(f, "page.goto('{}')", url),
            Self::Back => write!(f, "page.goBack()"),
            Self::Forward => write!(f, "page.goForward()"),
            Self::Reload => write!(f, "page.reload()"),
        }
    }
}

/// Where a drag ends
#[derive(Debug, Clone, PartialEq)]
pub enum DragTarget {
    Element(TypedSelector),
    Point(Point),
}

/// An action performed on the element a selector resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum ElementOp {
    Click {
        button: MouseButton,
        click_count: u32,
        modifiers: Vec<String>,
        /// Element-relative position
        position: Option<Point>,
    },
    Hover {
        position: Option<Point>,
    },
    MouseDown(MouseButton),
    MouseUp(MouseButton),
    DragTo(DragTarget),
    Fill(String),
    Type(String),
    Clear,
    Press(String),
    PressSequentially(String),
    SelectOption(String),
    Check,
    Uncheck,
    Focus,
    Blur,
    ScrollIntoView,
    Scroll {
        dx: f64,
        dy: f64,
    },
}

impl ElementOp {
    /// Operations that may be forced past actionability checks
    pub fn supports_force(&self) -> bool {
        matches!(
            self,
            Self::Click { .. } | Self::Hover { .. } | Self::Check | Self::Uncheck
        )
    }
}

/// Options passed with every element action
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionOptions {
    /// Skip visibility and actionability checks
    pub force: bool,
    pub timeout: Duration,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            force: false,
            timeout: Duration::from_millis(4_000),
        }
    }
}

/// Low-level pointer input at page coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum PointerOp {
    Move(Point),
    Down(MouseButton),
    Up(MouseButton),
    Click {
        at: Point,
        button: MouseButton,
        click_count: u32,
    },
    Wheel {
        dx: f64,
        dy: f64,
    },
}

/// Low-level keyboard input to the focused element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyboardOp {
    Press(String),
    Type(String),
}

/// State read from the element a selector resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateQuery {
    Text,
    Value,
    Visible,
    Enabled,
    Checked,
    ClassList,
    Attribute(String),
}

/// Browser automation backend
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Evaluate a function expression in the page with one JSON argument
    async fn evaluate(&self, script: &str, arg: Value) -> DriverResult<Value>;

    /// Base64 PNG of the viewport or the full page
    async fn screenshot(&self, full_page: bool) -> DriverResult<String>;

    async fn viewport(&self) -> DriverResult<Viewport>;

    async fn navigate(&self, navigation: &Navigation, timeout: Duration) -> DriverResult<()>;

    async fn perform(
        &self,
        selector: &TypedSelector,
        op: &ElementOp,
        options: &ActionOptions,
    ) -> DriverResult<()>;

    async fn pointer(&self, op: &PointerOp) -> DriverResult<()>;

    async fn keyboard(&self, op: &KeyboardOp) -> DriverResult<()>;

    /// Number of attached elements the selector matches
    async fn count(&self, selector: &TypedSelector) -> DriverResult<usize>;

    /// Read state from the element; strings for text/value/attribute,
    /// booleans for visible/enabled/checked, an array for the class list
    async fn query(&self, selector: &TypedSelector, query: &StateQuery) -> DriverResult<Value>;

    async fn wait_for_load_state(&self, timeout: Duration) -> DriverResult<()>;

    /// Change the default timeout of driver operations
    async fn set_default_timeout(&self, timeout: Duration) -> DriverResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let cases = [
            ("strict mode violation: locator('[data-som-id=\"3\"]') resolved to 2 elements", FailureKind::StrictViolation),
            ("Timeout 4000ms exceeded.\nwaiting for element to be visible", FailureKind::Timeout),
            ("Timeout 4000ms exceeded. element is not enabled", FailureKind::NotActionable),
            ("Error: Element is not editable", FailureKind::NotActionable),
            ("element is not stable - waiting...", FailureKind::Detached),
            ("Element is detached from the DOM", FailureKind::Detached),
            ("Execution context was destroyed, most likely because of a navigation", FailureKind::Navigation),
            ("Target page, context or browser has been closed", FailureKind::Navigation),
            ("Page crashed", FailureKind::Navigation),
            ("something else", FailureKind::Other),
        ];
        for (message, expected) in cases {
            assert_eq!(DriverError::new(message).classify(), expected, "{}", message);
        }
    }

    #[test]
    fn test_navigation_errors_convert_to_interruptions() {
        let err: SightlineError = DriverError::new("Target closed").into();
        assert!(matches!(err, SightlineError::NavigationInterrupted(_)));
        let err: SightlineError = DriverError::new("boom").into();
        assert!(matches!(err, SightlineError::Browser(_)));
    }

    #[test]
    fn test_navigation_display() {
        assert_eq!(
            Navigation::Goto("https://example.com".into()).to_string(),
            "page.goto('https://example.com')"
        );
        assert_eq!(Navigation::Back.to_string(), "page.goBack()");
    }
}
