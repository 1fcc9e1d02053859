mod logging;
mod summary;

use clap::Parser;
use homevault_core::{
    Action, LocationResolver, Orchestrator, RunGuard, RunOutcome, RunRequest, WaitPolicy,
};
use homevault_notify::Notifier;
use homevault_runtime::{CommandRunner, RepositoryEngine, SystemRunner};
use homevault_schema::{Passphrase, Settings, DEFAULT_SETTINGS_PATH};
use logging::LogTarget;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_REPORT_ERROR: u8 = 3;

#[derive(Debug, Parser)]
#[command(
    name = "homevault",
    version,
    about = "Run one backup lifecycle action for a configured repository"
)]
struct Cli {
    /// Name of the backup configuration to run.
    #[arg(long)]
    config: String,

    /// Settings file holding alert routing and backup configurations.
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config_file: PathBuf,

    /// File whose first line is the repository passphrase.
    #[arg(long, default_value = "/etc/homevault/backup-key")]
    key_file: PathBuf,

    /// initialize, snapshot, snapshot-and-verify, verify-data or restore.
    #[arg(long, default_value = "snapshot-and-verify")]
    action: Action,

    /// Import this key after initialising a new repository.
    #[arg(long)]
    import_key_path: Option<PathBuf>,

    /// Export the key to this file after initialising a new repository.
    #[arg(long)]
    export_key_path: Option<PathBuf>,

    /// Directory to restore into.
    #[arg(long, default_value = "/")]
    location: PathBuf,

    /// DEBUG, INFO, NOTICE, WARNING, ERROR or CRITICAL.
    #[arg(long, default_value = "INFO")]
    log_level: String,

    /// Log file, `-` for stderr. Defaults to backup-<config>.log in the log directory.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the run report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

/// Everything before the orchestrator is configuration; its errors map to
/// `EXIT_CONFIG_ERROR`. The run itself never returns `Err`.
fn run(cli: &Cli) -> Result<u8, String> {
    let settings = Settings::load(&cli.config_file).map_err(|e| e.to_string())?;
    let backup = settings.backup(&cli.config).map_err(|e| e.to_string())?;

    let level = logging::level_filter(&cli.log_level)?;
    let target = LogTarget::from_arg(cli.log_file.as_deref(), settings.log_file(&backup.name));
    logging::init(level, &target)?;

    let passphrase = Passphrase::load(&cli.key_file).map_err(|e| e.to_string())?;
    info!("Successfully loaded encryption key");

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let guard = RunGuard::new(&settings.paths.run_dir);
    let resolver = LocationResolver::new(runner.clone(), &settings.paths.mount_root);
    let engine = RepositoryEngine::new(runner.clone(), &settings.engine.program, passphrase);
    let notifier = Notifier::new(runner, &settings.alerts);

    let mut request = RunRequest::new(cli.action).restore_target(&cli.location);
    request.import_key.clone_from(&cli.import_key_path);
    request.export_key.clone_from(&cli.export_key_path);

    let mut orchestrator = Orchestrator::new(backup, guard, resolver, engine).with_wait_policy(
        WaitPolicy {
            interval: Duration::from_secs(settings.engine.poll_interval_secs),
            max_attempts: settings.engine.max_wait_attempts,
        },
    );
    let outcome = orchestrator.run(&request, &notifier);

    if cli.json {
        println!("{}", summary::outcome_json(&outcome)?);
    } else {
        summary::print_outcome(&outcome);
    }

    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Skipped { .. } => EXIT_SUCCESS,
        RunOutcome::Completed { report, .. } if !report.success => EXIT_FAILURE,
        RunOutcome::Completed {
            delivered: false, ..
        } => EXIT_REPORT_ERROR,
        RunOutcome::Completed { .. } => EXIT_SUCCESS,
    }
}
