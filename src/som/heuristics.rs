//! Recovery heuristics for failed element actions
//!
//! Each failure kind maps to at most one recovery. Planning is a pure function
//! of the failure and the attempt's context; the executor applies a plan once
//! per selector and moves on.

use crate::browser::{ActionOptions, ElementOp, FailureKind};
use crate::som::descriptor::ElementDescriptor;
use crate::som::selector::{first_stable_class, TypedSelector};

/// What to do before retrying a selector once
#[derive(Debug, Clone, PartialEq)]
pub enum Recovery {
    /// Retry under a selector scoped to the parent's stable class
    ParentScoped(TypedSelector),
    /// Scroll the element into view, then retry
    ScrollIntoView,
    /// Retry skipping actionability checks
    Force,
    /// Wait for the load state to settle, then retry
    WaitForLoad,
}

impl Recovery {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ParentScoped(_) => "parent-scoped",
            Self::ScrollIntoView => "after scroll-into-view",
            Self::Force => "forced",
            Self::WaitForLoad => "after load-state wait",
        }
    }
}

/// Context the planner may look at
#[derive(Debug, Clone, Copy)]
pub struct RecoveryContext<'a> {
    pub selector: &'a TypedSelector,
    pub descriptor: Option<&'a ElementDescriptor>,
    pub op: &'a ElementOp,
    pub options: &'a ActionOptions,
}

/// Pick the single recovery for a classified failure, or give up
pub fn plan_recovery(kind: FailureKind, ctx: &RecoveryContext<'_>) -> Option<Recovery> {
    match kind {
        FailureKind::StrictViolation => {
            if ctx.selector.is_scoped() {
                return None;
            }
            let parent_class = ctx
                .descriptor
                .and_then(|d| d.parent.as_ref())
                .and_then(|p| first_stable_class(&p.classes))?;
            Some(Recovery::ParentScoped(
                ctx.selector
                    .within(TypedSelector::css(format!(".{}", parent_class))),
            ))
        }
        FailureKind::Timeout => {
            if matches!(ctx.op, ElementOp::ScrollIntoView) {
                None
            } else {
                Some(Recovery::ScrollIntoView)
            }
        }
        FailureKind::NotActionable => {
            if ctx.options.force || !ctx.op.supports_force() {
                None
            } else {
                Some(Recovery::Force)
            }
        }
        FailureKind::Detached => Some(Recovery::WaitForLoad),
        FailureKind::Navigation | FailureKind::Other => None,
    }
}
