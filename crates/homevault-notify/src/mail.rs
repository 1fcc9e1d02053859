use crate::{check_status, NotifyError};
use chrono::{DateTime, Utc};
use homevault_core::{ReportSink, RunReport, SinkError};
use homevault_runtime::{CommandRunner, Invocation};
use homevault_schema::AlertsSection;
use std::fmt::Write as _;
use std::sync::Arc;

/// Header used by Sieve rules to file backup reports.
pub const ALERT_HEADER: &str = "X-Postmaster-Alert";

/// Renders a report as `multipart/mixed` and pipes it to the mailer.
pub struct MailSink {
    runner: Arc<dyn CommandRunner>,
    mailer: Vec<String>,
    from: String,
    recipient: String,
}

impl MailSink {
    pub fn new(runner: Arc<dyn CommandRunner>, alerts: &AlertsSection) -> Self {
        Self {
            runner,
            mailer: alerts.mailer.clone(),
            from: alerts.from.clone(),
            recipient: alerts.recipient.clone(),
        }
    }

    pub fn subject(report: &RunReport) -> String {
        format!(
            "Backup {} for {}: {}",
            report.action.report_name(),
            report.config,
            report.status_word()
        )
    }

    /// Full message text, headers included.
    pub fn render(&self, report: &RunReport, date: DateTime<Utc>) -> String {
        let subject = Self::subject(report);
        let boundary = format!(
            "homevault-{}-{}",
            report.config,
            report.started_at.timestamp()
        );

        let mut msg = String::new();
        let _ = writeln!(msg, "From: {}", self.from);
        let _ = writeln!(msg, "To: {}", self.recipient);
        let _ = writeln!(msg, "Subject: {subject}");
        let _ = writeln!(msg, "Date: {}", date.to_rfc2822());
        let _ = writeln!(msg, "{ALERT_HEADER}: backup");
        let _ = writeln!(msg, "MIME-Version: 1.0");
        let _ = writeln!(
            msg,
            "Content-Type: multipart/mixed; boundary=\"{boundary}\""
        );
        msg.push('\n');

        let summary = summary(&subject, report);
        // Preamble, shown by clients without MIME support.
        msg.push_str(&summary);
        msg.push('\n');

        push_part(&mut msg, &boundary, None, &summary);
        for step in &report.steps {
            let filename = format!("{}.log", step.kind);
            push_part(&mut msg, &boundary, Some(&filename), &step.log_text());
        }
        let _ = writeln!(msg, "--{boundary}--");
        msg
    }

    fn send(&self, message: String) -> Result<(), NotifyError> {
        let (program, args) = self.mailer.split_first().ok_or(NotifyError::NoMailer)?;
        let output = self.runner.run(
            &Invocation::new(program, "Sending report email")
                .args(args.iter().cloned())
                .stdin(message),
        )?;
        check_status(program, &output)
    }
}

fn summary(subject: &str, report: &RunReport) -> String {
    let mut text = format!("{subject}\n");
    for message in &report.messages {
        let _ = writeln!(text, "{message}");
    }
    if let Some(duration) = report.duration_text() {
        let _ = writeln!(text, "Duration: {duration}");
    }
    for step in &report.steps {
        let state = if step.success { "ok" } else { "failed" };
        let _ = writeln!(text, "  {}: {state}", step.label);
    }
    text
}

fn push_part(msg: &mut String, boundary: &str, filename: Option<&str>, body: &str) {
    let _ = writeln!(msg, "--{boundary}");
    msg.push_str("Content-Type: text/plain; charset=\"utf-8\"\n");
    msg.push_str("Content-Transfer-Encoding: 8bit\n");
    if let Some(name) = filename {
        let _ = writeln!(msg, "Content-Disposition: inline; filename=\"{name}\"");
    }
    msg.push('\n');
    msg.push_str(body);
    if !body.ends_with('\n') {
        msg.push('\n');
    }
}

impl ReportSink for MailSink {
    fn name(&self) -> &str {
        "mail"
    }

    fn deliver(&self, report: &RunReport) -> Result<(), SinkError> {
        self.send(self.render(report, Utc::now()))
            .map_err(|e| SinkError::new(self.name(), e.to_string()))
    }
}
