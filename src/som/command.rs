//! Oracle commands and execution results

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::browser::MouseButton;
use crate::core::{Result, SightlineError};

/// Shortest and longest pause a `waitFor` command may request
pub const MIN_WAIT: Duration = Duration::from_millis(250);
pub const MAX_WAIT: Duration = Duration::from_millis(10_000);
/// Pause used when a `waitFor` command names no duration
pub const DEFAULT_WAIT: Duration = Duration::from_millis(1_000);

/// Command vocabulary understood by the executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SomAction {
    Click,
    #[serde(alias = "dblclick", alias = "double_click")]
    DoubleClick,
    #[serde(alias = "right_click")]
    RightClick,
    Hover,
    #[serde(alias = "mouse_down")]
    MouseDown,
    #[serde(alias = "mouse_up")]
    MouseUp,
    #[serde(alias = "dragAndDrop", alias = "drag_and_drop")]
    Drag,
    Fill,
    Type,
    Clear,
    Press,
    #[serde(alias = "press_sequentially")]
    PressSequentially,
    #[serde(alias = "selectOption", alias = "select_option")]
    Select,
    Check,
    Uncheck,
    Focus,
    Blur,
    Scroll,
    #[serde(alias = "scroll_into_view")]
    ScrollIntoView,
    #[serde(alias = "wait", alias = "wait_for")]
    WaitFor,
    #[serde(alias = "goto")]
    Navigate,
    #[serde(alias = "back", alias = "go_back")]
    GoBack,
    #[serde(alias = "forward", alias = "go_forward")]
    GoForward,
    Reload,
}

impl SomAction {
    /// Acts on the browsing context rather than an element
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            Self::Navigate | Self::GoBack | Self::GoForward | Self::Reload
        )
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Self::WaitFor)
    }

    /// Actions that arm the mutation observer
    pub fn observes_mutations(&self) -> bool {
        matches!(self, Self::Hover | Self::Focus)
    }

    /// Actions that cannot run without a marker or a coordinate
    pub fn requires_target(&self) -> bool {
        !matches!(
            self,
            Self::Type
                | Self::Press
                | Self::PressSequentially
                | Self::Scroll
                | Self::MouseDown
                | Self::MouseUp
        ) && !self.is_navigation()
            && !self.is_wait()
    }
}

/// Position as a percentage of the viewport, 0-100 on both axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// One command from the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SomCommand {
    pub action: SomAction,
    /// Marker reference; the oracle may send it as a number
    #[serde(
        default,
        deserialize_with = "string_like",
        skip_serializing_if = "Option::is_none"
    )]
    pub element_ref: Option<String>,
    /// Used only when no marker reference is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<PercentPoint>,
    /// Element-relative pixel position (canvas-internal interactions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<crate::core::Point>,
    /// Text, keys, option value or URL
    #[serde(
        default,
        deserialize_with = "string_like",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_like",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_element_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_coordinates: Option<PercentPoint>,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_direction: Option<ScrollDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<MouseButton>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    /// Per-command timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Pause length for `waitFor`, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

fn string_like<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, got {}",
            other
        ))),
    }
}

impl SomCommand {
    pub fn new(action: SomAction) -> Self {
        Self {
            action,
            element_ref: None,
            coordinates: None,
            offset: None,
            value: None,
            target_element_ref: None,
            target_coordinates: None,
            force: false,
            scroll_amount: None,
            scroll_direction: None,
            button: None,
            modifiers: Vec::new(),
            timeout: None,
            duration: None,
        }
    }

    pub fn on_marker(action: SomAction, som_id: impl Into<String>) -> Self {
        let mut command = Self::new(action);
        command.element_ref = Some(som_id.into());
        command
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Check the targeting invariant: a marker or a coordinate, never both
    pub fn validate(&self) -> Result<()> {
        if self.element_ref.is_some() && self.coordinates.is_some() {
            return Err(SightlineError::protocol(format!(
                "{:?} command names both a marker and coordinates",
                self.action
            )));
        }
        if self.action.requires_target() && self.element_ref.is_none() && self.coordinates.is_none() {
            return Err(SightlineError::protocol(format!(
                "{:?} command needs a marker or coordinates",
                self.action
            )));
        }
        if self.action == SomAction::Navigate && self.value.is_none() {
            return Err(SightlineError::protocol("navigate command needs a URL value"));
        }
        if self.action == SomAction::Drag
            && self.target_element_ref.is_none()
            && self.target_coordinates.is_none()
        {
            return Err(SightlineError::protocol("drag command needs a drop target"));
        }
        for p in self.coordinates.iter().chain(self.target_coordinates.iter()) {
            if !(0.0..=100.0).contains(&p.x) || !(0.0..=100.0).contains(&p.y) {
                return Err(SightlineError::protocol(format!(
                    "coordinates ({}, {}) are outside 0-100%",
                    p.x, p.y
                )));
            }
        }
        Ok(())
    }

    /// Pause length for a `waitFor` command, clamped
    pub fn pause_duration(&self) -> Duration {
        self.duration
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_WAIT)
            .clamp(MIN_WAIT, MAX_WAIT)
    }

    /// Scroll delta in pixels derived from direction and amount
    pub fn scroll_delta(&self) -> (f64, f64) {
        let amount = self.scroll_amount.unwrap_or(300.0);
        match self.scroll_direction.unwrap_or(ScrollDirection::Down) {
            ScrollDirection::Up => (0.0, -amount),
            ScrollDirection::Down => (0.0, amount),
            ScrollDirection::Left => (-amount, 0.0),
            ScrollDirection::Right => (amount, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One selector (or fallback) tried while executing a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAttempt {
    /// Canonical locator expression, or a description of the raw input used
    pub selector: String,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAttempt {
    pub fn success(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            outcome: AttemptOutcome::Success,
            error: None,
        }
    }

    pub fn failure(selector: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            outcome: AttemptOutcome::Failure,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Failure,
}

/// A DOM change observed after a hover or focus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomMutation {
    pub kind: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Outcome of one command with every attempt in order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticCommandResult {
    pub command: SomCommand,
    pub attempts: Vec<CommandAttempt>,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Only hover and focus carry mutations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutations: Option<Vec<DomMutation>>,
}

impl SemanticCommandResult {
    pub fn succeeded(command: SomCommand, attempts: Vec<CommandAttempt>) -> Self {
        Self {
            command,
            attempts,
            status: CommandStatus::Success,
            error: None,
            mutations: None,
        }
    }

    pub fn failed(command: SomCommand, attempts: Vec<CommandAttempt>, error: impl Into<String>) -> Self {
        Self {
            command,
            attempts,
            status: CommandStatus::Failure,
            error: Some(error.into()),
            mutations: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }

    /// The attempt that worked, if any
    pub fn winning(&self) -> Option<&CommandAttempt> {
        self.attempts.iter().find(|a| a.succeeded())
    }

    pub fn failed_attempts(&self) -> Vec<CommandAttempt> {
        self.attempts
            .iter()
            .filter(|a| !a.succeeded())
            .cloned()
            .collect()
    }
}
