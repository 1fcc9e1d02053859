use crate::CoreError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// What a run does to the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Initialize,
    Snapshot,
    SnapshotAndVerify,
    VerifyData,
    Restore,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Initialize,
        Action::Snapshot,
        Action::SnapshotAndVerify,
        Action::VerifyData,
        Action::Restore,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Snapshot => "snapshot",
            Self::SnapshotAndVerify => "snapshot-and-verify",
            Self::VerifyData => "verify-data",
            Self::Restore => "restore",
        }
    }

    /// Noun used in reports: "Backup creation for 'alpha': Success".
    pub fn report_name(self) -> &'static str {
        match self {
            Self::Initialize => "initialisation",
            Self::Snapshot | Self::SnapshotAndVerify => "creation",
            Self::VerifyData => "verification",
            Self::Restore => "restoration",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    /// Accepts the current names and the legacy ones (`init`, `backup`,
    /// `backup-and-check`, `check-data`) still found in crontabs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialize" | "init" => Ok(Self::Initialize),
            "snapshot" | "backup" => Ok(Self::Snapshot),
            "snapshot-and-verify" | "backup-and-check" => Ok(Self::SnapshotAndVerify),
            "verify-data" | "check-data" => Ok(Self::VerifyData),
            "restore" => Ok(Self::Restore),
            other => Err(format!(
                "unknown action '{other}', expected one of: {}",
                Self::ALL.map(Self::as_str).join(", ")
            )),
        }
    }
}

/// Phase of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Waiting,
    Locked,
    Resolving,
    Operating,
    Releasing,
    Reporting,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Locked => "locked",
            Self::Resolving => "resolving",
            Self::Operating => "operating",
            Self::Releasing => "releasing",
            Self::Reporting => "reporting",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: RunState, to: RunState) -> Result<(), CoreError> {
    use RunState::{Done, Idle, Locked, Operating, Releasing, Reporting, Resolving, Waiting};

    let valid = matches!(
        (from, to),
        (Idle, Waiting | Done)
            | (Waiting, Locked | Reporting | Done)
            | (Locked, Resolving | Releasing)
            | (Resolving, Operating | Releasing)
            | (Operating, Releasing)
            | (Releasing, Reporting)
            | (Reporting, Done)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
