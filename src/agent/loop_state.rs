//! Act loop state
//!
//! Counters and accumulated results threaded through every round of
//! [`Agent::act`](crate::agent::Agent::act). Kept free of any driver so the
//! bookkeeping can be tested on its own.

use crate::core::{Result, SightlineError};
use crate::som::SemanticCommandResult;

/// A bounded retry counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCounter {
    /// Name used in error messages
    pub name: &'static str,
    pub count: u32,
    pub limit: u32,
}

impl RetryCounter {
    pub fn new(name: &'static str, limit: u32) -> Self {
        Self {
            name,
            count: 0,
            limit,
        }
    }

    /// Count one more retry; going over the limit is fatal for the objective
    pub fn bump(&mut self, objective: &str, reason: impl Into<String>) -> Result<()> {
        self.count += 1;
        if self.count > self.limit {
            return Err(SightlineError::RetryLimit {
                objective: objective.to_string(),
                counter: self.name,
                limit: self.limit,
                reason: reason.into(),
            });
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

/// State of one `act` call
#[derive(Debug, Clone)]
pub struct ActLoopState {
    pub wait: RetryCounter,
    pub pre_action: RetryCounter,
    /// Oracle rounds so far
    pub rounds: u32,
    results: Vec<SemanticCommandResult>,
    /// Length of `results` when the current round began
    round_start: usize,
}

impl ActLoopState {
    pub fn new(limit: u32) -> Self {
        Self {
            wait: RetryCounter::new("wait", limit),
            pre_action: RetryCounter::new("pre-action retry", limit),
            rounds: 0,
            results: Vec::new(),
            round_start: 0,
        }
    }

    /// Start a new oracle round
    pub fn next_round(&mut self) {
        self.rounds += 1;
        self.round_start = self.results.len();
    }

    pub fn bump_wait(&mut self, objective: &str, reason: impl Into<String>) -> Result<()> {
        self.wait.bump(objective, reason)
    }

    /// A pre-action retry starts the wait budget over
    pub fn bump_pre_action(&mut self, objective: &str, reason: impl Into<String>) -> Result<()> {
        self.pre_action.bump(objective, reason)?;
        self.wait.reset();
        Ok(())
    }

    pub fn record(&mut self, result: SemanticCommandResult) {
        self.results.push(result);
    }

    /// Drop everything recorded since the current round began
    pub fn discard_round(&mut self) {
        self.results.truncate(self.round_start);
    }

    pub fn results(&self) -> &[SemanticCommandResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<SemanticCommandResult> {
        self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::som::{CommandAttempt, SomAction, SomCommand};

    fn result() -> SemanticCommandResult {
        SemanticCommandResult::succeeded(
            SomCommand::on_marker(SomAction::Click, "1"),
            vec![CommandAttempt::success("page.getByText('Go')")],
        )
    }

    #[test]
    fn test_counter_allows_limit_then_fails() {
        let mut counter = RetryCounter::new("wait", 2);
        assert!(counter.bump("login", "spinner").is_ok());
        assert!(counter.bump("login", "spinner").is_ok());
        let err = counter.bump("login", "spinner").unwrap_err();
        assert!(err.to_string().contains("retry limit of 2"));
    }

    #[test]
    fn test_pre_action_retry_resets_wait() {
        let mut state = ActLoopState::new(3);
        state.bump_wait("o", "a").unwrap();
        state.bump_wait("o", "b").unwrap();
        state.bump_pre_action("o", "c").unwrap();
        assert_eq!(state.wait.count, 0);
        assert_eq!(state.pre_action.count, 1);
    }

    #[test]
    fn test_discard_round_keeps_earlier_rounds() {
        let mut state = ActLoopState::new(3);
        state.next_round();
        state.record(result());
        state.next_round();
        state.record(result());
        state.record(result());
        state.discard_round();
        assert_eq!(state.results().len(), 1);
        assert_eq!(state.rounds, 2);
    }
}
