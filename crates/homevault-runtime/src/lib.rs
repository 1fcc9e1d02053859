//! Execution layer for homevault.
//!
//! This crate runs external programs: the `CommandRunner` trait with its
//! process-backed `SystemRunner` and scripted `MockRunner`, a `/proc/mounts`
//! reader used to decide whether a mount point is live, and `RepositoryEngine`,
//! which turns repository operations into borg command lines and hands the
//! passphrase to the child process environment only.

pub mod engine;
pub mod exec;
pub mod mock;
pub mod mounts;

pub use engine::{RepositoryEngine, PASSPHRASE_ENV};
pub use exec::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use mock::MockRunner;
pub use mounts::MountTable;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
}
