//! Agent module - the act/verify/extract orchestration
//!
//! Contains the round-trip state machine that coordinates the oracle, the
//! annotator and the action executor.

pub mod host;
pub mod loop_state;
pub mod orchestrator;
pub mod prompts;
pub mod response;

pub use host::{AssertionRecord, RecordingHost, TestContext, TestHost};
pub use loop_state::{ActLoopState, RetryCounter};
pub use orchestrator::{
    coerce, parse_int, ActResult, Agent, ExtractOptions, Extracted, ReturnType, VerifyOptions,
    VerifyResult,
};
pub use response::{ActDecision, AfterPreActions, OracleResponse};
