//! Report delivery for homevault.
//!
//! `MailSink` renders a run report as a MIME message and hands it to the local
//! mail submission program. `JabberSink` sends a one-line summary through
//! `ejabberdctl`. `Notifier` combines the two the way the alert settings ask
//! for: mail always, instant message only when enabled.

pub mod jabber;
pub mod mail;

pub use jabber::JabberSink;
pub use mail::MailSink;

use homevault_core::{ReportSink, RunReport, SinkError};
use homevault_runtime::{CommandOutput, CommandRunner, RuntimeError};
use homevault_schema::AlertsSection;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no mailer command configured")]
    NoMailer,
    #[error("'{program}' exited with status {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Mail always, jabber when `alerts.jabber` is set.
pub struct Notifier {
    mail: MailSink,
    jabber: Option<JabberSink>,
}

impl Notifier {
    pub fn new(runner: Arc<dyn CommandRunner>, alerts: &AlertsSection) -> Self {
        let jabber = alerts
            .jabber
            .then(|| JabberSink::new(runner.clone(), alerts));
        Self {
            mail: MailSink::new(runner, alerts),
            jabber,
        }
    }

    pub fn sends_jabber(&self) -> bool {
        self.jabber.is_some()
    }
}

impl ReportSink for Notifier {
    fn name(&self) -> &str {
        "notifier"
    }

    /// A failing sink does not stop the next one; the first error is returned.
    fn deliver(&self, report: &RunReport) -> Result<(), SinkError> {
        let mut first_error = None;

        let mut sinks: Vec<&dyn ReportSink> = Vec::with_capacity(2);
        sinks.push(&self.mail);
        if let Some(jabber) = &self.jabber {
            sinks.push(jabber);
        }
        for sink in sinks {
            match sink.deliver(report) {
                Ok(()) => info!("report for '{}' sent via {}", report.config, sink.name()),
                Err(e) => {
                    error!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn check_status(program: &str, output: &CommandOutput) -> Result<(), NotifyError> {
    if output.success() {
        return Ok(());
    }
    Err(NotifyError::Command {
        program: program.to_owned(),
        status: output
            .status
            .map_or_else(|| "signal".to_owned(), |c| c.to_string()),
        stderr: output.stderr.trim().to_owned(),
    })
}
