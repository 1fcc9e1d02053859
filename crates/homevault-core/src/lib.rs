//! Run orchestration for homevault.
//!
//! This crate owns everything between a validated configuration and a
//! delivered report: the lock markers that keep runs apart, the resolution of
//! a location descriptor into a (possibly mounted) repository path, the
//! lifecycle state machine, and the step sequencing for each action. Report
//! delivery is reached only through the `ReportSink` trait.

pub mod guard;
pub mod lifecycle;
pub mod orchestrator;
pub mod report;
pub mod resolver;

pub use guard::{pid_alive, Acquisition, LockScope, RunGuard, RunLease, GLOBAL_MARKER};
pub use lifecycle::{validate_transition, Action, RunState};
pub use orchestrator::{Orchestrator, RunRequest, WaitPolicy};
pub use report::{
    ReportSink, RunFailure, RunOutcome, RunReport, SinkError, SkipReason, StepKind, StepOutcome,
};
pub use resolver::{LocationResolver, ResolveError, ResolvedRepository, DEFAULT_MOUNT_ROOT};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
