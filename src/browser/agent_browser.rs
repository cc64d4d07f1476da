//! agent-browser driver - wraps the agent-browser CLI
//!
//! Implements [`PageDriver`] by running one `agent-browser` command per
//! operation against a named session. Typed selectors are rendered to
//! Playwright selector-engine strings.

use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::browser::driver::{
    ActionOptions, DragTarget, DriverError, DriverResult, ElementOp, KeyboardOp, Navigation,
    PageDriver, PointerOp, StateQuery,
};
use crate::core::{BoundingBox, Config, Point, Viewport};
use crate::som::selector::{SelectorStrategy, TypedSelector, MARKER_ATTRIBUTE};

/// Envelope printed by `agent-browser ... --json`
#[derive(Debug, Deserialize)]
struct AgentBrowserResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Driver for browser automation via the agent-browser CLI
pub struct AgentBrowserDriver {
    /// Session name for isolation
    session_name: String,
    /// Whether to run in headed mode
    headed: bool,
    /// Default command timeout in milliseconds
    default_timeout_ms: AtomicU64,
}

impl AgentBrowserDriver {
    pub fn new(session_name: impl Into<String>) -> Self {
        Self {
            session_name: session_name.into(),
            headed: false,
            default_timeout_ms: AtomicU64::new(30_000),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut driver = Self::new(&config.browser.session_name);
        driver.headed = config.browser.headed;
        driver
    }

    pub fn set_headed(&mut self, headed: bool) {
        self.headed = headed;
    }

    /// Check if agent-browser is installed
    pub async fn is_available() -> bool {
        Command::new("agent-browser")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.load(Ordering::Relaxed))
    }

    /// Run an agent-browser command and return its `data` payload
    async fn run(&self, args: &[&str], timeout: Option<Duration>) -> DriverResult<Value> {
        let mut cmd = Command::new("agent-browser");
        cmd.args(["--session", &self.session_name]);
        if self.headed {
            cmd.arg("--headed");
        }
        cmd.args(args).arg("--json");
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(command = %args.first().copied().unwrap_or_default(), "agent-browser");

        let limit = timeout.unwrap_or_else(|| self.default_timeout());
        let output = match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DriverError::new(
                    "agent-browser not found. Install with: npm install -g agent-browser",
                ))
            }
            Ok(Err(e)) => {
                return Err(DriverError::new(format!(
                    "Failed to run agent-browser: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(DriverError::new(format!(
                    "Timeout {}ms exceeded",
                    limit.as_millis()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Ok(resp) = serde_json::from_str::<AgentBrowserResponse>(stdout.trim()) {
            if resp.success {
                return Ok(resp.data.unwrap_or(Value::Null));
            }
            return Err(DriverError::new(
                resp.error
                    .unwrap_or_else(|| stderr.trim().to_string()),
            ));
        }

        if output.status.success() {
            Ok(Value::String(stdout.trim().to_string()))
        } else {
            Err(DriverError::new(format!(
                "agent-browser command failed: {}",
                stderr.trim()
            )))
        }
    }

    async fn run_on(
        &self,
        verb: &str,
        selector: &TypedSelector,
        extra: &[&str],
        timeout: Duration,
    ) -> DriverResult<Value> {
        let target = engine_selector(selector);
        let mut args = vec![verb, target.as_str()];
        args.extend_from_slice(extra);
        self.run(&args, Some(timeout)).await
    }

    async fn bounding_box(&self, selector: &TypedSelector, timeout: Duration) -> DriverResult<BoundingBox> {
        let target = engine_selector(selector);
        let data = self.run(&["get", "box", target.as_str()], Some(timeout)).await?;
        serde_json::from_value(unwrap_scalar(data))
            .map_err(|e| DriverError::new(format!("unreadable bounding box: {}", e)))
    }

    /// Click or hover at the element's box center, skipping actionability checks
    async fn forced(&self, selector: &TypedSelector, op: &ElementOp, timeout: Duration) -> DriverResult<()> {
        let bbox = self.bounding_box(selector, timeout).await?;
        if !bbox.has_area() {
            return Err(DriverError::new("element has no bounding box"));
        }
        let center = bbox.center();
        match op {
            ElementOp::Click {
                button,
                click_count,
                position,
                ..
            } => {
                let at = position
                    .map(|p| Point::new(bbox.x + p.x, bbox.y + p.y))
                    .unwrap_or(center);
                self.pointer(&PointerOp::Click {
                    at,
                    button: *button,
                    click_count: *click_count,
                })
                .await
            }
            ElementOp::Check | ElementOp::Uncheck => {
                self.pointer(&PointerOp::Click {
                    at: center,
                    button: Default::default(),
                    click_count: 1,
                })
                .await
            }
            ElementOp::Hover { position } => {
                let at = position
                    .map(|p| Point::new(bbox.x + p.x, bbox.y + p.y))
                    .unwrap_or(center);
                self.pointer(&PointerOp::Move(at)).await
            }
            _ => Err(DriverError::new("operation cannot be forced")),
        }
    }
}

impl Default for AgentBrowserDriver {
    fn default() -> Self {
        Self::new("sightline")
    }
}

/// Render a typed selector as a Playwright selector-engine string
pub fn engine_selector(selector: &TypedSelector) -> String {
    let step = match &selector.strategy {
        SelectorStrategy::Marker(id) => format!("[{}={}]", MARKER_ATTRIBUTE, quoted(id)),
        SelectorStrategy::StableId(id) => format!("[id={}]", quoted(id)),
        SelectorStrategy::Label(label) => format!("internal:label={}i", quoted(label)),
        SelectorStrategy::FormName { tag, name } => format!("{}[name={}]", tag, quoted(name)),
        SelectorStrategy::Placeholder(text) => {
            format!("internal:attr=[placeholder={}i]", quoted(text))
        }
        SelectorStrategy::Role { role, name } => match name {
            Some(name) => format!("internal:role={}[name={}i]", role, quoted(name)),
            None => format!("internal:role={}", role),
        },
        SelectorStrategy::Text(text) => format!("internal:text={}i", quoted(text)),
        SelectorStrategy::Css(css) => css.clone(),
    };

    let mut out = match &selector.parent {
        Some(parent) => format!("{} >> {}", engine_selector(parent), step),
        None => step,
    };
    if let Some(index) = selector.nth {
        out.push_str(&format!(" >> nth={}", index));
    }
    out
}

fn quoted(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

/// Commands answer either `{ "<field>": value }` or the value itself
fn unwrap_scalar(data: Value) -> Value {
    match data {
        Value::Object(map) if map.len() == 1 => map.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null),
        other => other,
    }
}

/// Run `action` with `modifiers` held down. Every key that went down is
/// released again, also when a later keydown or the action fails.
async fn holding_modifiers<K, KF, A>(modifiers: &[String], mut key: K, action: A) -> DriverResult<()>
where
    K: FnMut(&'static str, String) -> KF,
    KF: Future<Output = DriverResult<()>>,
    A: Future<Output = DriverResult<()>>,
{
    let mut held = 0;
    let mut outcome = Ok(());
    for modifier in modifiers {
        match key("keydown", modifier.clone()).await {
            Ok(()) => held += 1,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }
    if outcome.is_ok() {
        outcome = action.await;
    }
    for modifier in modifiers[..held].iter().rev() {
        if let Err(e) = key("keyup", modifier.clone()).await {
            debug!(key = %modifier, error = %e, "modifier release failed");
            if outcome.is_ok() {
                outcome = Err(e);
            }
        }
    }
    outcome
}

fn as_bool(value: Value) -> bool {
    match unwrap_scalar(value) {
        Value::Bool(b) => b,
        Value::String(s) => s.trim() == "true",
        _ => false,
    }
}

#[async_trait]
impl PageDriver for AgentBrowserDriver {
    async fn evaluate(&self, script: &str, arg: Value) -> DriverResult<Value> {
        let source = format!("({})({})", script.trim(), arg);
        let data = self.run(&["eval", source.as_str()], None).await?;
        Ok(match unwrap_scalar(data) {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        })
    }

    async fn screenshot(&self, full_page: bool) -> DriverResult<String> {
        let path = std::env::temp_dir().join(format!(
            "sightline-{}-{}.png",
            self.session_name,
            std::process::id()
        ));
        let path_str = path.to_string_lossy().into_owned();
        let mut args = vec!["screenshot", path_str.as_str()];
        if full_page {
            args.push("--full");
        }
        self.run(&args, None).await?;

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| DriverError::new(format!("screenshot not written: {}", e)))?;
        let _ = tokio::fs::remove_file(&path).await;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    async fn viewport(&self) -> DriverResult<Viewport> {
        let value = self
            .evaluate(
                "() => ({ width: window.innerWidth, height: window.innerHeight })",
                Value::Null,
            )
            .await?;
        serde_json::from_value(value)
            .map_err(|e| DriverError::new(format!("unreadable viewport: {}", e)))
    }

    async fn navigate(&self, navigation: &Navigation, timeout: Duration) -> DriverResult<()> {
        let args: Vec<&str> = match navigation {
            Navigation::Goto(url) => vec!["open", url.as_str()],
            Navigation::Back => vec!["back"],
            Navigation::Forward => vec!["forward"],
            Navigation::Reload => vec!["reload"],
        };
        self.run(&args, Some(timeout)).await.map(|_| ())
    }

    async fn perform(
        &self,
        selector: &TypedSelector,
        op: &ElementOp,
        options: &ActionOptions,
    ) -> DriverResult<()> {
        // agent-browser has no force flag; forced actions go through raw input
        if options.force && op.supports_force() {
            return self.forced(selector, op, options.timeout).await;
        }

        let timeout = options.timeout;
        match op {
            ElementOp::Click {
                button,
                click_count,
                modifiers,
                position,
            } => {
                let plain = modifiers.is_empty() && position.is_none() && *button == Default::default();
                match (plain, *click_count) {
                    (true, 1) => self.run_on("click", selector, &[], timeout).await?,
                    (true, 2) => self.run_on("dblclick", selector, &[], timeout).await?,
                    _ => {
                        let press = |verb: &'static str, key: String| async move {
                            self.run(&[verb, key.as_str()], Some(timeout)).await.map(|_| ())
                        };
                        holding_modifiers(modifiers, press, self.forced(selector, op, timeout))
                            .await?;
                        Value::Null
                    }
                };
            }
            ElementOp::Hover { position: None } => {
                self.run_on("hover", selector, &[], timeout).await?;
            }
            ElementOp::Hover { .. } => self.forced(selector, op, timeout).await?,
            ElementOp::MouseDown(button) | ElementOp::MouseUp(button) => {
                self.run_on("hover", selector, &[], timeout).await?;
                let verb = if matches!(op, ElementOp::MouseDown(_)) { "down" } else { "up" };
                self.run(&["mouse", verb, button.as_str()], Some(timeout)).await?;
            }
            ElementOp::DragTo(DragTarget::Element(target)) => {
                let target = engine_selector(target);
                self.run_on("drag", selector, &[target.as_str()], timeout).await?;
            }
            ElementOp::DragTo(DragTarget::Point(point)) => {
                self.run_on("hover", selector, &[], timeout).await?;
                self.pointer(&PointerOp::Down(Default::default())).await?;
                self.pointer(&PointerOp::Move(*point)).await?;
                self.pointer(&PointerOp::Up(Default::default())).await?;
            }
            ElementOp::Fill(text) => {
                self.run_on("fill", selector, &[text.as_str()], timeout).await?;
            }
            ElementOp::Clear => {
                self.run_on("fill", selector, &[""], timeout).await?;
            }
            ElementOp::Type(text) | ElementOp::PressSequentially(text) => {
                self.run_on("type", selector, &[text.as_str()], timeout).await?;
            }
            ElementOp::Press(key) => {
                self.run_on("focus", selector, &[], timeout).await?;
                self.run(&["press", key.as_str()], Some(timeout)).await?;
            }
            ElementOp::SelectOption(value) => {
                self.run_on("select", selector, &[value.as_str()], timeout).await?;
            }
            ElementOp::Check => {
                self.run_on("check", selector, &[], timeout).await?;
            }
            ElementOp::Uncheck => {
                self.run_on("uncheck", selector, &[], timeout).await?;
            }
            ElementOp::Focus => {
                self.run_on("focus", selector, &[], timeout).await?;
            }
            ElementOp::Blur => {
                self.run_on("focus", selector, &[], timeout).await?;
                self.evaluate(
                    "() => document.activeElement && document.activeElement.blur()",
                    Value::Null,
                )
                .await?;
            }
            ElementOp::ScrollIntoView => {
                self.run_on("scrollintoview", selector, &[], timeout).await?;
            }
            ElementOp::Scroll { dx, dy } => {
                self.run_on("hover", selector, &[], timeout).await?;
                self.pointer(&PointerOp::Wheel { dx: *dx, dy: *dy }).await?;
            }
        }
        Ok(())
    }

    async fn pointer(&self, op: &PointerOp) -> DriverResult<()> {
        match op {
            PointerOp::Move(p) => {
                let (x, y) = (p.x.round().to_string(), p.y.round().to_string());
                self.run(&["mouse", "move", x.as_str(), y.as_str()], None).await?;
            }
            PointerOp::Down(button) => {
                self.run(&["mouse", "down", button.as_str()], None).await?;
            }
            PointerOp::Up(button) => {
                self.run(&["mouse", "up", button.as_str()], None).await?;
            }
            PointerOp::Click {
                at,
                button,
                click_count,
            } => {
                self.pointer(&PointerOp::Move(*at)).await?;
                for _ in 0..(*click_count).max(1) {
                    self.pointer(&PointerOp::Down(*button)).await?;
                    self.pointer(&PointerOp::Up(*button)).await?;
                }
            }
            PointerOp::Wheel { dx, dy } => {
                let (dy, dx) = (dy.round().to_string(), dx.round().to_string());
                self.run(&["mouse", "wheel", dy.as_str(), dx.as_str()], None).await?;
            }
        }
        Ok(())
    }

    async fn keyboard(&self, op: &KeyboardOp) -> DriverResult<()> {
        match op {
            KeyboardOp::Press(key) => self.run(&["press", key.as_str()], None).await?,
            KeyboardOp::Type(text) => self.run(&["keyboard", "type", text.as_str()], None).await?,
        };
        Ok(())
    }

    async fn count(&self, selector: &TypedSelector) -> DriverResult<usize> {
        let target = engine_selector(selector);
        let value = unwrap_scalar(self.run(&["get", "count", target.as_str()], None).await?);
        match value {
            Value::Number(n) => Ok(n.as_u64().unwrap_or(0) as usize),
            Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| DriverError::new(format!("unreadable count: {}", s))),
            other => Err(DriverError::new(format!("unreadable count: {}", other))),
        }
    }

    async fn query(&self, selector: &TypedSelector, query: &StateQuery) -> DriverResult<Value> {
        let target = engine_selector(selector);
        let target = target.as_str();
        let value = match query {
            StateQuery::Text => unwrap_scalar(self.run(&["get", "text", target], None).await?),
            StateQuery::Value => unwrap_scalar(self.run(&["get", "value", target], None).await?),
            StateQuery::Visible => json!(as_bool(self.run(&["is", "visible", target], None).await?)),
            StateQuery::Enabled => json!(as_bool(self.run(&["is", "enabled", target], None).await?)),
            StateQuery::Checked => json!(as_bool(self.run(&["is", "checked", target], None).await?)),
            StateQuery::ClassList => {
                let raw = unwrap_scalar(self.run(&["get", "attr", target, "class"], None).await?);
                let classes: Vec<String> = raw
                    .as_str()
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                json!(classes)
            }
            StateQuery::Attribute(name) => {
                unwrap_scalar(self.run(&["get", "attr", target, name.as_str()], None).await?)
            }
        };
        Ok(value)
    }

    async fn wait_for_load_state(&self, timeout: Duration) -> DriverResult<()> {
        self.run(&["wait", "--load", "load"], Some(timeout))
            .await
            .map(|_| ())
    }

    async fn set_default_timeout(&self, timeout: Duration) -> DriverResult<()> {
        self.default_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
        Ok(())
    }
}
