use crate::{check_status, NotifyError};
use homevault_core::{ReportSink, RunReport, SinkError};
use homevault_runtime::{CommandRunner, Invocation};
use homevault_schema::AlertsSection;
use std::sync::Arc;

/// One-line XMPP summary sent through `ejabberdctl send_message`.
pub struct JabberSink {
    runner: Arc<dyn CommandRunner>,
    command: String,
    from: String,
    recipient: String,
}

impl JabberSink {
    pub fn new(runner: Arc<dyn CommandRunner>, alerts: &AlertsSection) -> Self {
        Self {
            runner,
            command: alerts.jabber_command.clone(),
            from: alerts.from.clone(),
            recipient: alerts.recipient.clone(),
        }
    }

    pub fn message(report: &RunReport) -> String {
        let action = report.action.report_name();
        if report.success {
            format!(
                "Backup {action} finished successfully for '{}' (duration: {})",
                report.config,
                report.duration_text().unwrap_or_else(|| "0:00:00".to_owned())
            )
        } else {
            format!(
                "Backup {action} failed for '{}' (See the email for details)",
                report.config
            )
        }
    }

    fn send(&self, text: String) -> Result<(), NotifyError> {
        // Chat messages carry no subject.
        let invocation = Invocation::new(&self.command, "Sending XMPP message").args([
            "send_message".to_owned(),
            "chat".to_owned(),
            self.from.clone(),
            self.recipient.clone(),
            String::new(),
            text,
        ]);
        let output = self.runner.run(&invocation)?;
        check_status(&self.command, &output)
    }
}

impl ReportSink for JabberSink {
    fn name(&self) -> &str {
        "jabber"
    }

    fn deliver(&self, report: &RunReport) -> Result<(), SinkError> {
        self.send(Self::message(report))
            .map_err(|e| SinkError::new(self.name(), e.to_string()))
    }
}
