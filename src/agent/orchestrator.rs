//! Agent orchestrator
//!
//! Drives the act/verify/extract round trips: stabilize the page, annotate it,
//! ask the oracle, and carry out what it decided.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::agent::host::TestContext;
use crate::agent::loop_state::ActLoopState;
use crate::agent::prompts;
use crate::agent::response::{ActDecision, AfterPreActions, OracleResponse};
use crate::browser::{LoadStateStabilizer, PageDriver, Stabilizer};
use crate::core::{Config, Result, SightlineError};
use crate::llm::{create_provider, Oracle};
use crate::som::command::DEFAULT_WAIT;
use crate::som::{
    ActionExecutor, AnnotateOptions, Annotator, CommandStatus, ExecutorConfig, MarkerMap,
    SemanticCommandResult, SomCommand, VerificationExecutor, VerificationOutcome,
    VerificationRequest,
};

/// Outcome of a successful `act`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActResult {
    pub objective: String,
    pub status: CommandStatus,
    pub results: Vec<SemanticCommandResult>,
    pub rounds: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Overrides the configured confidence threshold
    #[serde(default)]
    pub threshold: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub success: bool,
    pub confidence: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Shape `extract` coerces the oracle's content into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReturnType {
    #[default]
    String,
    StringArray,
    Int,
    IntArray,
}

impl ReturnType {
    pub fn is_list(&self) -> bool {
        matches!(self, Self::StringArray | Self::IntArray)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    #[serde(default)]
    pub return_type: ReturnType,
}

/// Extracted data in the requested shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Extracted {
    Text(String),
    TextList(Vec<String>),
    Int(i64),
    IntList(Vec<i64>),
}

/// How a batch of main commands ended
enum BatchOutcome {
    Done,
    /// Round discarded; ask the oracle again
    Retry,
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse an integer from oracle text, allowing `,` and `_` digit separators
pub fn parse_int(value: &Value) -> Result<i64> {
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    if let Some(f) = value.as_f64() {
        // i64::MAX as f64 rounds up to 2^63, so the upper bound is exclusive
        if !f.is_finite() || f.fract() != 0.0 || f < i64::MIN as f64 || f >= i64::MAX as f64 {
            return Err(SightlineError::Coercion(format!(
                "'{}' is not a whole number in range",
                value
            )));
        }
        return Ok(f as i64);
    }
    let text = value_text(value);
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();
    cleaned
        .parse::<i64>()
        .map_err(|_| SightlineError::Coercion(format!("'{}' is not a number", text.trim())))
}

/// Coerce extracted content into the requested shape
pub fn coerce(response: &OracleResponse, return_type: ReturnType) -> Result<Extracted> {
    let entries: Vec<Value> = match (&response.extracted_content_list, &response.extracted_content) {
        (Some(list), _) => list.clone(),
        (None, Some(Value::Array(items))) => items.clone(),
        (None, Some(value)) => vec![value.clone()],
        (None, None) => {
            return Err(SightlineError::protocol(
                "extract reply has neither extractedContent nor extractedContentList",
            ))
        }
    };

    let single = |kind: &str| -> Result<Value> {
        match entries.as_slice() {
            [only] => Ok(only.clone()),
            [] => Err(SightlineError::Coercion(format!(
                "no content to return as {}",
                kind
            ))),
            many => Err(SightlineError::Coercion(format!(
                "{} entries cannot be returned as a single {}",
                many.len(),
                kind
            ))),
        }
    };

    Ok(match return_type {
        ReturnType::String => Extracted::Text(value_text(&single("string")?)),
        ReturnType::StringArray => Extracted::TextList(entries.iter().map(value_text).collect()),
        ReturnType::Int => Extracted::Int(parse_int(&single("integer")?)?),
        ReturnType::IntArray => Extracted::IntList(
            entries
                .iter()
                .map(parse_int)
                .collect::<Result<Vec<_>>>()?,
        ),
    })
}

/// The test agent
pub struct Agent {
    config: Config,
    oracle: Oracle,
    stabilizer: Arc<dyn Stabilizer>,
    /// Pause taken when the oracle asks to wait
    wait_pause: Duration,
}

impl Agent {
    pub fn new(oracle: Oracle, config: Config) -> Self {
        Self {
            config,
            oracle,
            stabilizer: Arc::new(LoadStateStabilizer::default()),
            wait_pause: DEFAULT_WAIT,
        }
    }

    /// Build an agent with the provider named in the configuration
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = create_provider(&config)?;
        let oracle = Oracle::from_config(provider, &config);
        Ok(Self::new(oracle, config))
    }

    pub fn with_stabilizer(mut self, stabilizer: Arc<dyn Stabilizer>) -> Self {
        self.stabilizer = stabilizer;
        self
    }

    pub fn with_wait_pause(mut self, pause: Duration) -> Self {
        self.wait_pause = pause;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn annotate_options(&self) -> AnnotateOptions {
        AnnotateOptions {
            include_offscreen: self.config.agent.include_offscreen,
            include_disabled: self.config.agent.include_disabled,
        }
    }

    fn executor<'p>(&self, page: &'p dyn PageDriver) -> ActionExecutor<'p> {
        ActionExecutor::new(page, ExecutorConfig::from_config(&self.config))
    }

    /// Stabilize the page and annotate it
    async fn refresh(&self, page: &dyn PageDriver) -> MarkerMap {
        self.stabilizer.wait_until_stable(page).await;
        let markers = Annotator::new(page).annotate(self.annotate_options()).await;
        debug!(markers = markers.len(), "page annotated");
        markers
    }

    /// Mark the interactive elements of the page
    pub async fn annotate(&self, ctx: &TestContext<'_>) -> Result<MarkerMap> {
        let page = ctx.page()?;
        Ok(self.refresh(page).await)
    }

    /// Stretch the host step timeout before a long objective. Falls back to
    /// the driver's default timeout and never fails.
    async fn extend_timeouts(&self, ctx: &TestContext<'_>) {
        let extension = self.config.host_timeout_extension();
        if extension.is_zero() {
            return;
        }
        if let Some(host) = ctx.host {
            let wanted = host.elapsed() + extension;
            let current = host.timeout().unwrap_or_default();
            if current >= wanted || host.set_timeout(wanted) {
                debug!(timeout_secs = wanted.as_secs(), "host timeout extended");
                return;
            }
        }
        if let Some(page) = ctx.page {
            if let Err(e) = page.set_default_timeout(extension).await {
                debug!(error = %e, "could not extend driver timeout");
            }
        }
    }

    async fn screenshot(&self, page: &dyn PageDriver, full_page: bool) -> Result<String> {
        Ok(page.screenshot(full_page).await?)
    }

    /// Carry out a natural-language objective on the page
    pub async fn act(&self, objective: &str, ctx: &TestContext<'_>) -> Result<ActResult> {
        let page = ctx.page()?;
        self.extend_timeouts(ctx).await;
        info!(objective, "act");

        let mut state = ActLoopState::new(self.config.agent.max_wait_retries);
        let mut markers = self.refresh(page).await;

        loop {
            state.next_round();

            let screenshot = match self.screenshot(page, false).await {
                Ok(shot) => shot,
                Err(e) if e.is_round_recoverable() => {
                    warn!(error = %e, "screenshot interrupted, retrying round");
                    state.bump_wait(objective, e.to_string())?;
                    markers = self.refresh(page).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let reply = self
                .oracle
                .ask(
                    prompts::ACT_SYSTEM_PROMPT,
                    &prompts::act_user_prompt(objective, &markers, &state),
                    vec![screenshot],
                )
                .await?;
            let decision = OracleResponse::parse(reply)?.decide();
            debug!(round = state.rounds, decision = ?decision, "oracle decided");

            match decision {
                ActDecision::StepCompleted => {
                    info!(objective, rounds = state.rounds, "step completed");
                    return Ok(self.finish(objective, state));
                }
                ActDecision::Wait { reason } => {
                    let reason = reason.unwrap_or_else(|| "oracle asked to wait".into());
                    info!(reason = %reason, waits = state.wait.count + 1, "waiting");
                    state.bump_wait(objective, reason)?;
                    tokio::time::sleep(self.wait_pause).await;
                    markers = self.refresh(page).await;
                }
                ActDecision::RefreshRequested { reason } => {
                    let reason = reason.unwrap_or_else(|| "oracle asked for fresh markers".into());
                    info!(reason = %reason, "refreshing markers");
                    state.bump_wait(objective, reason)?;
                    markers = self.refresh(page).await;
                }
                ActDecision::RetryAfterPreActions => {
                    state.bump_pre_action(objective, "oracle asked to look again")?;
                }
                ActDecision::ImplicitWait => {
                    info!("no commands from oracle, treating as a wait");
                    state.bump_wait(objective, "oracle sent no commands")?;
                    tokio::time::sleep(self.wait_pause).await;
                    markers = self.refresh(page).await;
                }
                ActDecision::PreActions { commands, then } => {
                    self.run_pre_commands(objective, page, &commands, &markers, &mut state)
                        .await?;
                    markers = self.refresh(page).await;
                    match then {
                        AfterPreActions::RetryQuery => {
                            state.bump_pre_action(objective, "oracle asked to look again")?;
                        }
                        AfterPreActions::ImplicitWait => {
                            state.bump_wait(objective, "no main commands after pre-commands")?;
                        }
                        AfterPreActions::Run(commands) => {
                            if let BatchOutcome::Done = self
                                .run_batch(objective, page, &commands, &mut markers, &mut state)
                                .await?
                            {
                                return Ok(self.finish(objective, state));
                            }
                        }
                    }
                }
                ActDecision::RunCommands(commands) => {
                    if let BatchOutcome::Done = self
                        .run_batch(objective, page, &commands, &mut markers, &mut state)
                        .await?
                    {
                        return Ok(self.finish(objective, state));
                    }
                }
            }
        }
    }

    fn finish(&self, objective: &str, state: ActLoopState) -> ActResult {
        let rounds = state.rounds;
        ActResult {
            objective: objective.to_string(),
            status: CommandStatus::Success,
            results: state.into_results(),
            rounds,
        }
    }

    /// Pre-commands run in order; any failure is fatal
    async fn run_pre_commands(
        &self,
        objective: &str,
        page: &dyn PageDriver,
        commands: &[SomCommand],
        markers: &MarkerMap,
        state: &mut ActLoopState,
    ) -> Result<()> {
        let executor = self.executor(page);
        for command in commands {
            if command.action.is_wait() {
                tokio::time::sleep(command.pause_duration()).await;
                continue;
            }
            debug!(action = ?command.action, "pre-command");
            let result = match executor.execute(command, markers).await {
                Ok(result) => result,
                Err(e) => {
                    return Err(SightlineError::PreCommandFailed {
                        objective: objective.to_string(),
                        message: e.to_string(),
                        attempts: Vec::new(),
                    })
                }
            };
            if !result.is_success() {
                return Err(SightlineError::PreCommandFailed {
                    objective: objective.to_string(),
                    message: result.error.clone().unwrap_or_default(),
                    attempts: result.failed_attempts(),
                });
            }
            state.record(result);
        }
        Ok(())
    }

    /// Waits first, then actions. Every command is reconciled against the
    /// markers the oracle saw; the page is re-annotated after each one.
    async fn run_batch(
        &self,
        objective: &str,
        page: &dyn PageDriver,
        commands: &[SomCommand],
        markers: &mut MarkerMap,
        state: &mut ActLoopState,
    ) -> Result<BatchOutcome> {
        let seen = markers.clone();
        let executor = self.executor(page);
        let (waits, actions): (Vec<&SomCommand>, Vec<&SomCommand>) =
            commands.iter().partition(|c| c.action.is_wait());

        for command in waits.into_iter().chain(actions) {
            match executor.execute(command, &seen).await {
                Ok(result) if result.is_success() => {
                    debug!(action = ?command.action, winning = ?result.winning().map(|a| &a.selector), "command succeeded");
                    state.record(result);
                }
                Ok(result) => {
                    let message = result
                        .error
                        .clone()
                        .unwrap_or_else(|| format!("{:?} failed", command.action));
                    warn!(action = ?command.action, error = %message, "command failed");
                    return Err(SightlineError::CommandFailed {
                        objective: objective.to_string(),
                        message,
                        attempts: result.failed_attempts(),
                    });
                }
                Err(e) if e.is_round_recoverable() => {
                    warn!(error = %e, "round interrupted, discarding its results");
                    state.discard_round();
                    state.bump_wait(objective, e.to_string())?;
                    *markers = self.refresh(page).await;
                    return Ok(BatchOutcome::Retry);
                }
                Err(e) => return Err(e),
            }
            *markers = self.refresh(page).await;
        }
        Ok(BatchOutcome::Done)
    }

    /// Ask the oracle whether the page meets a requirement. Failures are
    /// reported through the host's assertions.
    pub async fn verify(
        &self,
        requirement: &str,
        ctx: &TestContext<'_>,
        options: VerifyOptions,
    ) -> Result<VerifyResult> {
        let page = ctx.page()?;
        let host = ctx.host()?;
        self.extend_timeouts(ctx).await;
        let threshold = options
            .threshold
            .unwrap_or(self.config.agent.confidence_threshold);
        info!(requirement, threshold, "verify");

        let mut refreshed = false;
        let response = loop {
            self.stabilizer.wait_until_stable(page).await;
            let screenshot = self.screenshot(page, true).await?;
            let reply = self
                .oracle
                .ask(
                    prompts::VERIFY_SYSTEM_PROMPT,
                    &prompts::verify_user_prompt(requirement),
                    vec![screenshot],
                )
                .await?;
            let response = OracleResponse::parse(reply)?;
            if response.request_som_refresh == Some(true) && !refreshed {
                debug!("oracle asked for a fresh screenshot");
                refreshed = true;
                continue;
            }
            break response;
        };

        if response.step_completed == Some(true) {
            return Ok(VerifyResult {
                success: true,
                confidence: response.confidence_percent().unwrap_or(100),
                reason: response.reason,
            });
        }

        let (Some(success), Some(confidence)) =
            (response.verification_success, response.confidence_percent())
        else {
            return Err(SightlineError::protocol(
                "verify reply needs verificationSuccess and confidence",
            ));
        };
        let reason = response.reason.clone();
        let suffix = reason
            .as_deref()
            .map(|r| format!(": {}", r))
            .unwrap_or_default();

        host.assert(
            confidence >= threshold,
            &format!(
                "Verification confidence {} is below threshold {}{}",
                confidence, threshold, suffix
            ),
        );
        host.assert(
            success,
            &format!("Verification failed for \"{}\"{}", requirement, suffix),
        );

        Ok(VerifyResult {
            success: success && confidence >= threshold,
            confidence,
            reason,
        })
    }

    /// Ask the oracle for data shown on the page
    pub async fn extract(
        &self,
        requirement: &str,
        ctx: &TestContext<'_>,
        options: ExtractOptions,
    ) -> Result<Extracted> {
        let page = ctx.page()?;
        self.extend_timeouts(ctx).await;
        info!(requirement, return_type = ?options.return_type, "extract");

        self.stabilizer.wait_until_stable(page).await;
        let screenshot = self.screenshot(page, true).await?;
        let reply = self
            .oracle
            .ask(
                prompts::EXTRACT_SYSTEM_PROMPT,
                &prompts::extract_user_prompt(requirement, options.return_type.is_list()),
                vec![screenshot],
            )
            .await?;
        let response = OracleResponse::parse(reply)?;
        coerce(&response, options.return_type)
    }

    /// Check one element property on a freshly annotated page
    pub async fn check_element(
        &self,
        request: &VerificationRequest,
        ctx: &TestContext<'_>,
    ) -> Result<VerificationOutcome> {
        let page = ctx.page()?;
        let markers = self.refresh(page).await;
        let outcome = VerificationExecutor::new(page).verify(request, &markers).await?;
        if let Some(host) = ctx.host {
            host.assert(
                outcome.passed,
                outcome.message.as_deref().unwrap_or(&outcome.expression),
            );
        }
        Ok(outcome)
    }
}
