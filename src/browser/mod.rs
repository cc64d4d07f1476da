//! Browser module - driver seam and backends
//!
//! [`PageDriver`] is everything the agent needs from a browser; the
//! agent-browser CLI is the shipped backend.

pub mod agent_browser;
pub mod driver;
pub mod stabilizer;

pub use agent_browser::AgentBrowserDriver;
pub use driver::{
    ActionOptions, DragTarget, DriverError, DriverResult, ElementOp, FailureKind, KeyboardOp,
    MouseButton, Navigation, PageDriver, PointerOp, StateQuery,
};
pub use stabilizer::{LoadStateStabilizer, NoopStabilizer, Stabilizer};
