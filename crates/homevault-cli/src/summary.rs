use console::Style;
use homevault_core::{RunOutcome, RunReport};

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn outcome_json(outcome: &RunOutcome) -> Result<String, String> {
    let value = match outcome {
        RunOutcome::Skipped { config, reason } => serde_json::json!({
            "config": config,
            "skipped": reason,
        }),
        RunOutcome::Completed { report, delivered } => serde_json::json!({
            "report": report,
            "delivered": delivered,
        }),
    };
    json_pretty(&value)
}

pub fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Skipped { config, reason } => {
            let skipped = Style::new().yellow().apply_to("skipped");
            println!("{config}: {skipped} ({reason})");
        }
        RunOutcome::Completed { report, delivered } => {
            print_report(report);
            if !delivered {
                let warn = Style::new().yellow().apply_to("warning");
                println!("{warn}: the report could not be delivered, see the log");
            }
        }
    }
}

fn print_report(report: &RunReport) {
    let status = if report.success {
        Style::new().green().bold().apply_to(report.status_word())
    } else {
        Style::new().red().bold().apply_to(report.status_word())
    };
    print!(
        "backup {} for {}: {status}",
        report.action.report_name(),
        report.config
    );
    match report.duration_text() {
        Some(d) => println!(" ({d})"),
        None => println!(),
    }

    for step in &report.steps {
        let mark = if step.success {
            Style::new().green().apply_to("✓")
        } else {
            Style::new().red().apply_to("✗")
        };
        println!("  {mark} {}", step.label);
    }
    for message in &report.messages {
        println!("  {}", Style::new().dim().apply_to(message));
    }
}
