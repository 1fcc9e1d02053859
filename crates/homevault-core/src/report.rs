use crate::lifecycle::Action;
use chrono::{DateTime, Utc};
use homevault_runtime::{CommandOutput, RuntimeError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Engine step recorded in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Init,
    KeyImport,
    KeyExport,
    Create,
    Prune,
    Check,
    Restore,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::KeyImport => "key-import",
            Self::KeyExport => "key-export",
            Self::Create => "create",
            Self::Prune => "prune",
            Self::Check => "check",
            Self::Restore => "restore",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Init => "Initialisation",
            Self::KeyImport => "Key import",
            Self::KeyExport => "Key export",
            Self::Create => "Creation",
            Self::Prune => "Pruning",
            Self::Check => "Check",
            Self::Restore => "Restoration",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub kind: StepKind,
    pub label: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutcome {
    pub fn from_output(kind: StepKind, output: &CommandOutput) -> Self {
        Self {
            kind,
            label: kind.title().to_owned(),
            success: output.success(),
            exit_code: output.status,
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        }
    }

    /// Text of the per-step log attached to the mail report.
    pub fn log_text(&self) -> String {
        let heading = if self.success { "status" } else { "errors" };
        let mut text = format!("{} {heading}:\n", self.label);
        for stream in [&self.stdout, &self.stderr] {
            if !stream.is_empty() {
                text.push_str(stream);
                if !stream.ends_with('\n') {
                    text.push('\n');
                }
            }
        }
        text
    }
}

/// Why a run that passed the lock gate, or tried to, did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RunFailure {
    #[error("exceeded maximum waiting time ({attempts} polls) for another backup")]
    Contention { attempts: u32 },
    #[error("could not resolve the repository location: {message}")]
    Resolution { message: String },
    #[error("{step} step failed: {message}")]
    Engine { step: StepKind, message: String },
    #[error("unexpected error: {message}")]
    Unexpected { message: String },
}

impl RunFailure {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }
}

impl From<RuntimeError> for RunFailure {
    fn from(e: RuntimeError) -> Self {
        Self::unexpected(e.to_string())
    }
}

/// Everything a sink needs to render one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub config: String,
    pub action: Action,
    pub success: bool,
    pub steps: Vec<StepOutcome>,
    pub messages: Vec<String>,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub duration: Option<Duration>,
}

impl RunReport {
    pub fn new(config: impl Into<String>, action: Action, started_at: DateTime<Utc>) -> Self {
        Self {
            config: config.into(),
            action,
            success: true,
            steps: Vec::new(),
            messages: Vec::new(),
            failure: None,
            started_at,
            duration: None,
        }
    }

    /// Mark the run failed. The first failure is kept; later ones only add a
    /// message.
    pub fn fail(&mut self, failure: RunFailure) {
        self.success = false;
        self.messages.push(failure.to_string());
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    pub fn status_word(&self) -> &'static str {
        if self.success {
            "Success"
        } else {
            "Error"
        }
    }

    /// Duration as `H:MM:SS`.
    pub fn duration_text(&self) -> Option<String> {
        self.duration.map(|d| {
            let secs = d.as_secs();
            format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    Inactive,
    AlreadyRunning { pid: i32 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => f.write_str("not active"),
            Self::AlreadyRunning { pid } => write!(f, "already running (pid {pid})"),
        }
    }
}

/// Result of one orchestrator run. Skips never reach a sink.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Skipped { config: String, reason: SkipReason },
    Completed { report: RunReport, delivered: bool },
}

impl RunOutcome {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Completed { report, .. } => Some(report),
            Self::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

#[derive(Debug, Error)]
#[error("{sink} delivery failed: {message}")]
pub struct SinkError {
    pub sink: String,
    pub message: String,
}

impl SinkError {
    pub fn new(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

/// Renders and delivers a finished run report.
pub trait ReportSink {
    fn name(&self) -> &str;
    fn deliver(&self, report: &RunReport) -> Result<(), SinkError>;
}
