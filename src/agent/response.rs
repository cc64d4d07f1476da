//! Oracle response validation
//!
//! The oracle answers every round with one JSON object. Optional fields may be
//! missing, but a present field with the wrong type is a protocol error. For
//! `act`, the flags collapse into a single [`ActDecision`].

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::core::{Result, SightlineError};
use crate::som::SomCommand;

/// Fields the oracle may set in a reply
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OracleResponse {
    #[serde(default)]
    pub pre_commands: Option<Vec<SomCommand>>,
    #[serde(default)]
    pub commands_to_run: Option<Vec<SomCommand>>,
    #[serde(default)]
    pub should_wait: Option<bool>,
    #[serde(default)]
    pub wait_reason: Option<String>,
    #[serde(default)]
    pub needs_retry_after_pre_actions: Option<bool>,
    #[serde(default)]
    pub request_som_refresh: Option<bool>,
    #[serde(default)]
    pub refresh_reason: Option<String>,
    #[serde(default)]
    pub step_completed: Option<bool>,
    #[serde(default)]
    pub verification_success: Option<bool>,
    /// 0-100
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub extracted_content: Option<Value>,
    #[serde(default)]
    pub extracted_content_list: Option<Vec<Value>>,
}

/// What the act loop does with one reply
#[derive(Debug, Clone, PartialEq)]
pub enum ActDecision {
    Wait { reason: Option<String> },
    StepCompleted,
    RefreshRequested { reason: Option<String> },
    PreActions {
        commands: Vec<SomCommand>,
        then: AfterPreActions,
    },
    RetryAfterPreActions,
    RunCommands(Vec<SomCommand>),
    /// No flags and no commands
    ImplicitWait,
}

/// What follows a successful run of pre-commands
#[derive(Debug, Clone, PartialEq)]
pub enum AfterPreActions {
    RetryQuery,
    Run(Vec<SomCommand>),
    ImplicitWait,
}

fn is_set(flag: Option<bool>) -> bool {
    flag.unwrap_or(false)
}

impl OracleResponse {
    /// Validate a raw reply
    pub fn parse(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(SightlineError::protocol(format!(
                "oracle reply must be a JSON object, got {}",
                value
            )));
        }
        let response: Self = serde_json::from_value(value)
            .map_err(|e| SightlineError::protocol(format!("invalid oracle reply: {}", e)))?;
        if let Some(confidence) = response.confidence {
            if !(0.0..=100.0).contains(&confidence) {
                return Err(SightlineError::protocol(format!(
                    "confidence {} is outside 0-100",
                    confidence
                )));
            }
        }
        Ok(response)
    }

    /// Confidence rounded to a whole percentage
    pub fn confidence_percent(&self) -> Option<u8> {
        self.confidence.map(|c| c.round() as u8)
    }

    fn main_commands(&mut self) -> Vec<SomCommand> {
        self.commands_to_run.take().unwrap_or_default()
    }

    fn warn_ignored(&self, reason: &str) {
        let ignored = self.commands_to_run.as_ref().map_or(0, Vec::len)
            + self.pre_commands.as_ref().map_or(0, Vec::len);
        if ignored > 0 {
            warn!(ignored, "oracle sent commands alongside {}, ignoring them", reason);
        }
    }

    /// Collapse the reply into the one decision that governs this round
    pub fn decide(mut self) -> ActDecision {
        if is_set(self.should_wait) {
            self.warn_ignored("shouldWait");
            return ActDecision::Wait {
                reason: self.wait_reason,
            };
        }
        if is_set(self.step_completed) {
            self.warn_ignored("stepCompleted");
            return ActDecision::StepCompleted;
        }
        if is_set(self.request_som_refresh) {
            self.warn_ignored("requestSomRefresh");
            return ActDecision::RefreshRequested {
                reason: self.refresh_reason,
            };
        }

        let retry = is_set(self.needs_retry_after_pre_actions);
        let pre = self.pre_commands.take().unwrap_or_default();
        if !pre.is_empty() {
            let then = if retry {
                self.warn_ignored("needsRetryAfterPreActions");
                AfterPreActions::RetryQuery
            } else {
                let commands = self.main_commands();
                if commands.is_empty() {
                    AfterPreActions::ImplicitWait
                } else {
                    AfterPreActions::Run(commands)
                }
            };
            return ActDecision::PreActions {
                commands: pre,
                then,
            };
        }
        if retry {
            self.warn_ignored("needsRetryAfterPreActions");
            return ActDecision::RetryAfterPreActions;
        }

        let commands = self.main_commands();
        if commands.is_empty() {
            ActDecision::ImplicitWait
        } else {
            ActDecision::RunCommands(commands)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::som::SomAction;
    use serde_json::json;

    fn decide(value: Value) -> ActDecision {
        OracleResponse::parse(value).unwrap().decide()
    }

    #[test]
    fn test_wait_wins_over_commands() {
        let decision = decide(json!({
            "shouldWait": true,
            "waitReason": "spinner",
            "commandsToRun": [{ "action": "click", "elementRef": "3" }]
        }));
        assert_eq!(
            decision,
            ActDecision::Wait {
                reason: Some("spinner".into())
            }
        );
    }

    #[test]
    fn test_precedence_chain() {
        assert_eq!(
            decide(json!({ "stepCompleted": true, "requestSomRefresh": true })),
            ActDecision::StepCompleted
        );
        assert!(matches!(
            decide(json!({ "requestSomRefresh": true, "preCommands": [{ "action": "reload" }] })),
            ActDecision::RefreshRequested { .. }
        ));
        assert_eq!(
            decide(json!({ "needsRetryAfterPreActions": true, "commandsToRun": [{ "action": "reload" }] })),
            ActDecision::RetryAfterPreActions
        );
        assert_eq!(decide(json!({})), ActDecision::ImplicitWait);
        assert_eq!(decide(json!({ "commandsToRun": [] })), ActDecision::ImplicitWait);
    }

    #[test]
    fn test_pre_commands_carry_follow_up() {
        let decision = decide(json!({
            "preCommands": [{ "action": "click", "elementRef": 2 }],
            "commandsToRun": [{ "action": "fill", "elementRef": 5, "value": "hi" }]
        }));
        match decision {
            ActDecision::PreActions {
                commands,
                then: AfterPreActions::Run(main),
            } => {
                assert_eq!(commands[0].action, SomAction::Click);
                assert_eq!(main[0].value.as_deref(), Some("hi"));
            }
            other => panic!("unexpected decision {:?}", other),
        }

        let decision = decide(json!({
            "preCommands": [{ "action": "click", "elementRef": 2 }],
            "needsRetryAfterPreActions": true
        }));
        assert!(matches!(
            decision,
            ActDecision::PreActions {
                then: AfterPreActions::RetryQuery,
                ..
            }
        ));
    }

    #[test]
    fn test_type_mismatches_are_protocol_errors() {
        let err = OracleResponse::parse(json!({ "shouldWait": "yes" })).unwrap_err();
        assert!(matches!(err, SightlineError::Protocol(_)));
        let err = OracleResponse::parse(json!({ "confidence": 140 })).unwrap_err();
        assert!(err.to_string().contains("140"));
        assert!(OracleResponse::parse(json!([1, 2])).is_err());
        // Unknown fields are tolerated
        assert!(OracleResponse::parse(json!({ "thoughts": "..." })).is_ok());
    }
}
