//! Set-of-Marks: annotation, selector synthesis, reconciliation, execution
//! and verification of oracle commands.

pub mod annotator;
pub mod command;
pub mod descriptor;
pub mod executor;
pub mod heuristics;
pub mod reconciler;
pub mod scan;
pub mod scripts;
pub mod selector;
pub mod verification;

pub use annotator::{select_markers, AnnotateOptions, Annotator};
pub use command::{
    AttemptOutcome, CommandAttempt, CommandStatus, DomMutation, PercentPoint, ScrollDirection,
    SemanticCommandResult, SomAction, SomCommand,
};
pub use descriptor::{ElementDescriptor, MarkerMap, ParentSummary};
pub use executor::{ActionExecutor, ExecutorConfig};
pub use heuristics::{plan_recovery, Recovery};
pub use reconciler::{ScoreWeights, TargetReconciler, TargetResolution};
pub use selector::{synthesize, SelectorStrategy, TypedSelector};
pub use verification::{
    VerificationExecutor, VerificationOutcome, VerificationRequest, VerificationType,
};
