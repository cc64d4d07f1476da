//! Host test framework seam
//!
//! The agent runs inside somebody else's test. The host receives assertion
//! outcomes and may let the agent stretch the step timeout before a long
//! objective.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::browser::PageDriver;
use crate::core::{Result, SightlineError};

/// Test framework the agent reports to
pub trait TestHost: Send + Sync {
    /// Record an assertion; a failed one fails the host's test, not the agent call
    fn assert(&self, passed: bool, message: &str);

    /// Current step timeout, if the host has one
    fn timeout(&self) -> Option<Duration>;

    /// Change the step timeout. `false` when the host exposes no such hook.
    fn set_timeout(&self, timeout: Duration) -> bool;

    /// Time already spent in the current step
    fn elapsed(&self) -> Duration {
        Duration::ZERO
    }
}

/// One assertion seen by a [`RecordingHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionRecord {
    pub passed: bool,
    pub message: String,
}

/// A host that keeps every assertion in memory
#[derive(Debug)]
pub struct RecordingHost {
    started: Instant,
    timeout: Mutex<Option<Duration>>,
    adjustable: bool,
    assertions: Mutex<Vec<AssertionRecord>>,
}

impl Default for RecordingHost {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingHost {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            timeout: Mutex::new(None),
            adjustable: true,
            assertions: Mutex::new(Vec::new()),
        }
    }

    /// A host without a timeout hook
    pub fn fixed_timeout() -> Self {
        Self {
            adjustable: false,
            ..Self::new()
        }
    }

    pub fn assertions(&self) -> Vec<AssertionRecord> {
        self.assertions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn failures(&self) -> Vec<AssertionRecord> {
        self.assertions().into_iter().filter(|a| !a.passed).collect()
    }
}

impl TestHost for RecordingHost {
    fn assert(&self, passed: bool, message: &str) {
        self.assertions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AssertionRecord {
                passed,
                message: message.to_string(),
            });
    }

    fn timeout(&self) -> Option<Duration> {
        *self.timeout.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_timeout(&self, timeout: Duration) -> bool {
        if !self.adjustable {
            return false;
        }
        *self.timeout.lock().unwrap_or_else(|e| e.into_inner()) = Some(timeout);
        true
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Page and host for one agent call
#[derive(Clone, Copy, Default)]
pub struct TestContext<'a> {
    pub page: Option<&'a dyn PageDriver>,
    pub host: Option<&'a dyn TestHost>,
}

impl<'a> TestContext<'a> {
    pub fn new(page: &'a dyn PageDriver, host: &'a dyn TestHost) -> Self {
        Self {
            page: Some(page),
            host: Some(host),
        }
    }

    pub fn page_only(page: &'a dyn PageDriver) -> Self {
        Self {
            page: Some(page),
            host: None,
        }
    }

    pub fn page(&self) -> Result<&'a dyn PageDriver> {
        self.page
            .ok_or_else(|| SightlineError::MissingContext("no page in the test context".into()))
    }

    pub fn host(&self) -> Result<&'a dyn TestHost> {
        self.host
            .ok_or_else(|| SightlineError::MissingContext("no test host in the test context".into()))
    }
}
