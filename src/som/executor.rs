//! Action execution
//!
//! Runs one oracle command against the page. Navigation and pauses go
//! straight to the browsing context, percentage coordinates become raw
//! pointer and keyboard input, and marker commands walk an ordered list of
//! selectors (raw marker first, then the synthesized ones) with one recovery
//! per selector before falling back to the element's bounding-box centre.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::browser::{
    ActionOptions, DragTarget, DriverError, DriverResult, ElementOp, KeyboardOp, MouseButton,
    Navigation, PageDriver, PointerOp,
};
use crate::core::{BoundingBox, Config, Point, Result, SightlineError, Viewport};
use crate::som::command::{CommandAttempt, DomMutation, SemanticCommandResult, SomAction, SomCommand};
use crate::som::descriptor::{ElementDescriptor, MarkerMap};
use crate::som::heuristics::{plan_recovery, Recovery, RecoveryContext};
use crate::som::reconciler::{ScoreWeights, TargetReconciler};
use crate::som::scripts;
use crate::som::selector::{synthesize, TypedSelector};

/// Selectors tried per marker command, raw marker selector included
pub const SELECTOR_BUDGET: usize = 7;
/// Mutation lists longer than this are treated as a page rebuild and dropped
pub const MUTATION_NOISE_LIMIT: usize = 10;

/// Timeouts and debug switches for the executor
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub action_timeout: Duration,
    pub navigation_timeout: Duration,
    /// Draw a transient dot where coordinate commands land
    pub debug_markers: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout: Duration::from_millis(4_000),
            navigation_timeout: Duration::from_millis(15_000),
            debug_markers: false,
        }
    }
}

impl ExecutorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            action_timeout: config.action_timeout(),
            navigation_timeout: config.navigation_timeout(),
            debug_markers: config.agent.debug_markers,
        }
    }
}

/// Low-level input used by coordinate commands and the bbox fallback
#[derive(Debug, Clone, PartialEq)]
enum RawInput {
    Pointer(PointerOp),
    Keyboard(KeyboardOp),
}

/// Race a driver future against a timer; the timer winning is a failure
async fn timed<F>(limit: Duration, fut: F) -> DriverResult<()>
where
    F: Future<Output = DriverResult<()>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::new(format!(
            "Timeout {}ms exceeded",
            limit.as_millis()
        ))),
    }
}

fn required_value<'c>(command: &'c SomCommand) -> Result<&'c str> {
    command.value.as_deref().ok_or_else(|| {
        SightlineError::protocol(format!("{:?} command needs a value", command.action))
    })
}

fn button_of(command: &SomCommand, fallback: MouseButton) -> MouseButton {
    command.button.unwrap_or(fallback)
}

/// Element operation a marker command maps to
pub fn element_op(command: &SomCommand, drop: Option<DragTarget>) -> Result<ElementOp> {
    let op = match command.action {
        SomAction::Click => ElementOp::Click {
            button: button_of(command, MouseButton::Left),
            click_count: 1,
            modifiers: command.modifiers.clone(),
            position: command.offset,
        },
        SomAction::DoubleClick => ElementOp::Click {
            button: button_of(command, MouseButton::Left),
            click_count: 2,
            modifiers: command.modifiers.clone(),
            position: command.offset,
        },
        SomAction::RightClick => ElementOp::Click {
            button: MouseButton::Right,
            click_count: 1,
            modifiers: command.modifiers.clone(),
            position: command.offset,
        },
        SomAction::Hover => ElementOp::Hover {
            position: command.offset,
        },
        SomAction::MouseDown => ElementOp::MouseDown(button_of(command, MouseButton::Left)),
        SomAction::MouseUp => ElementOp::MouseUp(button_of(command, MouseButton::Left)),
        SomAction::Drag => ElementOp::DragTo(
            drop.ok_or_else(|| SightlineError::protocol("drag command needs a drop target"))?,
        ),
        SomAction::Fill => ElementOp::Fill(command.value.clone().unwrap_or_default()),
        SomAction::Type => ElementOp::Type(required_value(command)?.to_string()),
        SomAction::Clear => ElementOp::Clear,
        SomAction::Press => ElementOp::Press(required_value(command)?.to_string()),
        SomAction::PressSequentially => {
            ElementOp::PressSequentially(required_value(command)?.to_string())
        }
        SomAction::Select => ElementOp::SelectOption(required_value(command)?.to_string()),
        SomAction::Check => ElementOp::Check,
        SomAction::Uncheck => ElementOp::Uncheck,
        SomAction::Focus => ElementOp::Focus,
        SomAction::Blur => ElementOp::Blur,
        SomAction::Scroll => {
            let (dx, dy) = command.scroll_delta();
            ElementOp::Scroll { dx, dy }
        }
        SomAction::ScrollIntoView => ElementOp::ScrollIntoView,
        SomAction::WaitFor
        | SomAction::Navigate
        | SomAction::GoBack
        | SomAction::GoForward
        | SomAction::Reload => {
            return Err(SightlineError::protocol(format!(
                "{:?} does not act on an element",
                command.action
            )))
        }
    };
    Ok(op)
}

/// Raw input sequence for a command aimed at a page point. `None` when the
/// action has no pointer equivalent.
fn point_inputs(command: &SomCommand, at: Point, drop: Option<Point>) -> Option<Vec<RawInput>> {
    use RawInput::{Keyboard, Pointer};

    let click = |button, click_count| Pointer(PointerOp::Click { at, button, click_count });
    let value = command.value.clone().unwrap_or_default();

    let inputs = match command.action {
        SomAction::Click | SomAction::Focus | SomAction::Check | SomAction::Uncheck => {
            vec![click(button_of(command, MouseButton::Left), 1)]
        }
        SomAction::DoubleClick => vec![click(button_of(command, MouseButton::Left), 2)],
        SomAction::RightClick => vec![click(MouseButton::Right, 1)],
        SomAction::Hover => vec![Pointer(PointerOp::Move(at))],
        SomAction::MouseDown => vec![
            Pointer(PointerOp::Move(at)),
            Pointer(PointerOp::Down(button_of(command, MouseButton::Left))),
        ],
        SomAction::MouseUp => vec![
            Pointer(PointerOp::Move(at)),
            Pointer(PointerOp::Up(button_of(command, MouseButton::Left))),
        ],
        SomAction::Drag => {
            let to = drop?;
            vec![
                Pointer(PointerOp::Move(at)),
                Pointer(PointerOp::Down(MouseButton::Left)),
                Pointer(PointerOp::Move(to)),
                Pointer(PointerOp::Up(MouseButton::Left)),
            ]
        }
        // Triple click selects the existing content so typing replaces it
        SomAction::Fill => vec![
            click(MouseButton::Left, 3),
            Keyboard(KeyboardOp::Type(value)),
        ],
        SomAction::Type | SomAction::PressSequentially => vec![
            click(MouseButton::Left, 1),
            Keyboard(KeyboardOp::Type(value)),
        ],
        SomAction::Press => vec![
            click(MouseButton::Left, 1),
            Keyboard(KeyboardOp::Press(value)),
        ],
        SomAction::Clear => vec![
            click(MouseButton::Left, 3),
            Keyboard(KeyboardOp::Press("Backspace".to_string())),
        ],
        SomAction::Scroll => {
            let (dx, dy) = command.scroll_delta();
            vec![Pointer(PointerOp::Move(at)), Pointer(PointerOp::Wheel { dx, dy })]
        }
        _ => return None,
    };
    Some(inputs)
}

/// Raw input for commands that need no target at all
fn untargeted_inputs(command: &SomCommand) -> Option<Vec<RawInput>> {
    let value = command.value.clone().unwrap_or_default();
    let inputs = match command.action {
        SomAction::Press => vec![RawInput::Keyboard(KeyboardOp::Press(value))],
        SomAction::Type | SomAction::PressSequentially => {
            vec![RawInput::Keyboard(KeyboardOp::Type(value))]
        }
        SomAction::Scroll => {
            let (dx, dy) = command.scroll_delta();
            vec![RawInput::Pointer(PointerOp::Wheel { dx, dy })]
        }
        SomAction::MouseDown => vec![RawInput::Pointer(PointerOp::Down(button_of(
            command,
            MouseButton::Left,
        )))],
        SomAction::MouseUp => vec![RawInput::Pointer(PointerOp::Up(button_of(
            command,
            MouseButton::Left,
        )))],
        _ => return None,
    };
    Some(inputs)
}

fn describe_untargeted(command: &SomCommand) -> String {
    let value = command.value.as_deref().unwrap_or_default();
    match command.action {
        SomAction::Press => format!("page.keyboard.press('{}')", value),
        SomAction::Scroll => {
            let (dx, dy) = command.scroll_delta();
            format!("page.mouse.wheel({}, {})", dx, dy)
        }
        SomAction::MouseDown => "page.mouse.down()".to_string(),
        SomAction::MouseUp => "page.mouse.up()".to_string(),
        _ => format!("page.keyboard.type('{}')", value),
    }
}

fn describe_point(at: Point) -> String {
    format!("coordinates({:.0}, {:.0})", at.x, at.y)
}

/// Executes oracle commands against one page
pub struct ActionExecutor<'a> {
    driver: &'a dyn PageDriver,
    config: ExecutorConfig,
    weights: ScoreWeights,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(driver: &'a dyn PageDriver, config: ExecutorConfig) -> Self {
        Self {
            driver,
            config,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Run one command.
    ///
    /// Element failures come back as a failed [`SemanticCommandResult`] with
    /// every attempt listed. `Err` is reserved for malformed commands, a
    /// navigation that interrupted the command, and stale markers.
    pub async fn execute(
        &self,
        command: &SomCommand,
        markers: &MarkerMap,
    ) -> Result<SemanticCommandResult> {
        command.validate()?;

        if command.action.is_navigation() {
            return self.navigate(command).await;
        }
        if command.action.is_wait() {
            let pause = command.pause_duration();
            debug!(ms = pause.as_millis() as u64, "waitFor pause");
            tokio::time::sleep(pause).await;
            // A navigation that landed during the pause has to end the round.
            if let Err(e) = self
                .driver
                .wait_for_load_state(self.config.navigation_timeout)
                .await
            {
                if e.is_navigation() {
                    return Err(e.into());
                }
                debug!(error = %e, "load state after pause");
            }
            return Ok(SemanticCommandResult::succeeded(
                command.clone(),
                vec![CommandAttempt::success(format!(
                    "page.waitForTimeout({})",
                    pause.as_millis()
                ))],
            ));
        }

        let observe = command.action.observes_mutations();
        if observe {
            self.arm_observer().await;
        }

        let mut result = if let Some(som_id) = command.element_ref.as_deref() {
            self.run_on_marker(command, som_id.trim(), markers).await?
        } else if let Some(percent) = command.coordinates {
            self.run_at_coordinates(command, percent.x, percent.y, markers)
                .await?
        } else {
            self.run_untargeted(command).await?
        };

        if observe && result.is_success() {
            result.mutations = self.collect_mutations().await;
        }

        Ok(result)
    }

    async fn navigate(&self, command: &SomCommand) -> Result<SemanticCommandResult> {
        let navigation = match command.action {
            SomAction::Navigate => Navigation::Goto(required_value(command)?.to_string()),
            SomAction::GoBack => Navigation::Back,
            SomAction::GoForward => Navigation::Forward,
            _ => Navigation::Reload,
        };
        let limit = command
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.config.navigation_timeout);

        info!(navigation = %navigation, "navigating");
        let outcome = timed(limit, self.driver.navigate(&navigation, limit)).await;
        let label = navigation.to_string();
        Ok(match outcome {
            Ok(()) => {
                SemanticCommandResult::succeeded(command.clone(), vec![CommandAttempt::success(label)])
            }
            Err(e) => {
                warn!(navigation = %navigation, error = %e, "navigation failed");
                let message = e.message.clone();
                SemanticCommandResult::failed(
                    command.clone(),
                    vec![CommandAttempt::failure(label, message.clone())],
                    message,
                )
            }
        })
    }

    async fn run_inputs(&self, inputs: &[RawInput], limit: Duration) -> DriverResult<()> {
        for input in inputs {
            match input {
                RawInput::Pointer(op) => timed(limit, self.driver.pointer(op)).await?,
                RawInput::Keyboard(op) => timed(limit, self.driver.keyboard(op)).await?,
            }
        }
        Ok(())
    }

    fn command_timeout(&self, command: &SomCommand) -> Duration {
        command
            .timeout
            .map(Duration::from_millis)
            .unwrap_or(self.config.action_timeout)
    }

    /// Finish a raw-input command as a single attempt
    fn single_attempt(
        command: &SomCommand,
        label: String,
        outcome: DriverResult<()>,
    ) -> Result<SemanticCommandResult> {
        match outcome {
            Ok(()) => Ok(SemanticCommandResult::succeeded(
                command.clone(),
                vec![CommandAttempt::success(label)],
            )),
            Err(e) if e.is_navigation() => Err(e.into()),
            Err(e) => Ok(SemanticCommandResult::failed(
                command.clone(),
                vec![CommandAttempt::failure(label, e.message.clone())],
                e.message,
            )),
        }
    }

    async fn run_untargeted(&self, command: &SomCommand) -> Result<SemanticCommandResult> {
        let inputs = untargeted_inputs(command).ok_or_else(|| {
            SightlineError::protocol(format!("{:?} command needs a target", command.action))
        })?;
        let outcome = self.run_inputs(&inputs, self.command_timeout(command)).await;
        Self::single_attempt(command, describe_untargeted(command), outcome)
    }

    async fn viewport(&self) -> Result<Viewport> {
        Ok(self.driver.viewport().await?)
    }

    /// Drop point for a drag, from target coordinates or a target marker's box
    fn drop_point(
        &self,
        command: &SomCommand,
        viewport: &Viewport,
        markers: &MarkerMap,
    ) -> Option<Point> {
        if let Some(target) = command.target_coordinates {
            return Some(viewport.percent_to_pixels(target.x, target.y));
        }
        command
            .target_element_ref
            .as_deref()
            .and_then(|id| markers.get(id))
            .map(|d| d.bbox.center())
    }

    async fn draw_debug_point(&self, at: Point) {
        if !self.config.debug_markers {
            return;
        }
        if let Err(e) = self
            .driver
            .evaluate(scripts::DEBUG_POINT, json!({ "x": at.x, "y": at.y }))
            .await
        {
            debug!(error = %e, "debug point not drawn");
        }
    }

    async fn run_at_coordinates(
        &self,
        command: &SomCommand,
        x_percent: f64,
        y_percent: f64,
        markers: &MarkerMap,
    ) -> Result<SemanticCommandResult> {
        let viewport = self.viewport().await?;
        let at = viewport.percent_to_pixels(x_percent, y_percent);
        let drop = self.drop_point(command, &viewport, markers);
        let label = describe_point(at);

        let Some(inputs) = point_inputs(command, at, drop) else {
            let message = format!("{:?} cannot be performed at coordinates", command.action);
            return Ok(SemanticCommandResult::failed(
                command.clone(),
                vec![CommandAttempt::failure(label, message.clone())],
                message,
            ));
        };

        self.draw_debug_point(at).await;
        debug!(x = at.x, y = at.y, action = ?command.action, "coordinate command");
        let outcome = self.run_inputs(&inputs, self.command_timeout(command)).await;
        Self::single_attempt(command, label, outcome)
    }

    async fn drag_target(
        &self,
        command: &SomCommand,
        markers: &MarkerMap,
    ) -> Result<Option<DragTarget>> {
        if command.action != SomAction::Drag {
            return Ok(None);
        }
        if let Some(target) = command.target_element_ref.as_deref() {
            let target = target.trim();
            if markers.get(target).is_none() {
                return Err(SightlineError::StaleTarget {
                    marker: target.to_string(),
                    duplicates: 0,
                });
            }
            return Ok(Some(DragTarget::Element(TypedSelector::marker(target))));
        }
        match command.target_coordinates {
            Some(p) => {
                let viewport = self.viewport().await?;
                Ok(Some(DragTarget::Point(viewport.percent_to_pixels(p.x, p.y))))
            }
            None => Ok(None),
        }
    }

    async fn try_selector(
        &self,
        selector: &TypedSelector,
        op: &ElementOp,
        options: &ActionOptions,
    ) -> DriverResult<()> {
        debug!(selector = %selector, force = options.force, "attempting");
        timed(options.timeout, self.driver.perform(selector, op, options)).await
    }

    /// Apply a recovery and retry the selector once
    async fn recover(
        &self,
        recovery: Recovery,
        selector: &TypedSelector,
        op: &ElementOp,
        options: &ActionOptions,
    ) -> (String, DriverResult<()>) {
        let mut retry_selector = selector.clone();
        let mut retry_options = *options;
        match &recovery {
            Recovery::ParentScoped(scoped) => retry_selector = scoped.clone(),
            Recovery::ScrollIntoView => {
                if let Err(e) = timed(
                    options.timeout,
                    self.driver.perform(selector, &ElementOp::ScrollIntoView, options),
                )
                .await
                {
                    if e.is_navigation() {
                        return (selector.to_string(), Err(e));
                    }
                    debug!(selector = %selector, error = %e, "scroll into view failed");
                }
            }
            Recovery::Force => retry_options.force = true,
            Recovery::WaitForLoad => {
                if let Err(e) = self
                    .driver
                    .wait_for_load_state(self.config.navigation_timeout)
                    .await
                {
                    if e.is_navigation() {
                        return (selector.to_string(), Err(e));
                    }
                    debug!(error = %e, "load state wait failed");
                }
            }
        }

        let label = match recovery {
            Recovery::ParentScoped(_) => retry_selector.to_string(),
            other => format!("{} ({})", retry_selector, other.label()),
        };
        let outcome = self.try_selector(&retry_selector, op, &retry_options).await;
        (label, outcome)
    }

    async fn run_on_marker(
        &self,
        command: &SomCommand,
        som_id: &str,
        markers: &MarkerMap,
    ) -> Result<SemanticCommandResult> {
        let descriptor = markers.get(som_id).ok_or_else(|| SightlineError::StaleTarget {
            marker: som_id.to_string(),
            duplicates: 0,
        })?;

        let drop = self.drag_target(command, markers).await?;
        let op = element_op(command, drop.clone())?;

        let resolution = TargetReconciler::new(self.driver)
            .with_weights(self.weights)
            .resolve(som_id, descriptor)
            .await?;

        let mut selectors = Vec::with_capacity(SELECTOR_BUDGET);
        match resolution.index {
            Some(index) if resolution.has_duplicates() => {
                selectors.push(TypedSelector::marker(som_id).nth(index))
            }
            Some(_) => selectors.push(TypedSelector::marker(som_id)),
            None => debug!(marker = som_id, "marker unusable, using synthesized selectors"),
        }
        selectors.extend(synthesize(descriptor));
        selectors.truncate(SELECTOR_BUDGET);

        let force = command.force
            || (descriptor.pseudo_rendered
                && matches!(op, ElementOp::Click { .. } | ElementOp::Hover { .. }));
        let options = ActionOptions {
            force,
            timeout: self.command_timeout(command),
        };

        let mut attempts = Vec::new();
        for selector in &selectors {
            let err = match self.try_selector(selector, &op, &options).await {
                Ok(()) => {
                    attempts.push(CommandAttempt::success(selector.to_string()));
                    return Ok(SemanticCommandResult::succeeded(command.clone(), attempts));
                }
                Err(e) if e.is_navigation() => return Err(e.into()),
                Err(e) => e,
            };
            debug!(selector = %selector, error = %err, "selector failed");
            attempts.push(CommandAttempt::failure(selector.to_string(), err.message.clone()));

            let ctx = RecoveryContext {
                selector,
                descriptor: Some(descriptor),
                op: &op,
                options: &options,
            };
            let Some(recovery) = plan_recovery(err.classify(), &ctx) else {
                continue;
            };
            debug!(selector = %selector, recovery = recovery.label(), "retrying with recovery");
            let (label, outcome) = self.recover(recovery, selector, &op, &options).await;
            match outcome {
                Ok(()) => {
                    attempts.push(CommandAttempt::success(label));
                    return Ok(SemanticCommandResult::succeeded(command.clone(), attempts));
                }
                Err(e) if e.is_navigation() => return Err(e.into()),
                Err(e) => attempts.push(CommandAttempt::failure(label, e.message)),
            }
        }

        if let Some(result) = self
            .bbox_fallback(command, descriptor, &resolution_bbox(descriptor, &resolution), &drop, &mut attempts)
            .await?
        {
            return Ok(result);
        }

        let message = attempts
            .last()
            .and_then(|a| a.error.clone())
            .unwrap_or_else(|| format!("no selector could be built for marker {}", som_id));
        warn!(marker = som_id, attempts = attempts.len(), error = %message, "command failed");
        Ok(SemanticCommandResult::failed(command.clone(), attempts, message))
    }

    /// Last resort: aim at the centre of the element's box
    async fn bbox_fallback(
        &self,
        command: &SomCommand,
        descriptor: &ElementDescriptor,
        bbox: &BoundingBox,
        drop: &Option<DragTarget>,
        attempts: &mut Vec<CommandAttempt>,
    ) -> Result<Option<SemanticCommandResult>> {
        if !bbox.has_area() {
            debug!(marker = %descriptor.som_id, "no box to fall back on");
            return Ok(None);
        }
        let drop_point = match drop {
            Some(DragTarget::Point(p)) => Some(*p),
            _ => None,
        };
        let center = bbox.center();
        let Some(inputs) = point_inputs(command, center, drop_point) else {
            return Ok(None);
        };

        let label = describe_point(center);
        debug!(marker = %descriptor.som_id, x = center.x, y = center.y, "coordinate fallback");
        match self.run_inputs(&inputs, self.command_timeout(command)).await {
            Ok(()) => {
                attempts.push(CommandAttempt::success(label));
                Ok(Some(SemanticCommandResult::succeeded(
                    command.clone(),
                    std::mem::take(attempts),
                )))
            }
            Err(e) if e.is_navigation() => Err(e.into()),
            Err(e) => {
                attempts.push(CommandAttempt::failure(label, e.message));
                Ok(None)
            }
        }
    }

    async fn arm_observer(&self) {
        if let Err(e) = self
            .driver
            .evaluate(scripts::OBSERVE_MUTATIONS, json!(null))
            .await
        {
            debug!(error = %e, "mutation observer not armed");
        }
    }

    async fn collect_mutations(&self) -> Option<Vec<DomMutation>> {
        let value = match self
            .driver
            .evaluate(scripts::COLLECT_MUTATIONS, json!(null))
            .await
        {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "mutations not collected");
                return None;
            }
        };
        let mutations: Vec<DomMutation> = serde_json::from_value(value).ok()?;
        if mutations.len() > MUTATION_NOISE_LIMIT {
            debug!(count = mutations.len(), "mutation list discarded as noise");
            return None;
        }
        Some(mutations)
    }
}

/// Live box of the reconciled candidate when duplicates were scored,
/// otherwise the box captured at annotation time
fn resolution_bbox(
    descriptor: &ElementDescriptor,
    resolution: &crate::som::reconciler::TargetResolution,
) -> BoundingBox {
    resolution
        .index
        .and_then(|i| resolution.candidates.iter().find(|c| c.index == i))
        .map(|c| c.candidate.bbox)
        .filter(BoundingBox::has_area)
        .unwrap_or(descriptor.bbox)
}
