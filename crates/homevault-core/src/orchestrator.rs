use crate::guard::{Acquisition, RunGuard, RunLease};
use crate::lifecycle::{validate_transition, Action, RunState};
use crate::report::{ReportSink, RunFailure, RunOutcome, RunReport, SkipReason, StepKind, StepOutcome};
use crate::resolver::{LocationResolver, ResolvedRepository};
use chrono::Utc;
use homevault_runtime::{CommandOutput, RepositoryEngine, RuntimeError};
use homevault_schema::BackupConfig;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Message added to a report whose repository could not be unmounted.
pub const UNMOUNT_WARNING: &str = "could not unmount the repository location";
const PANIC_MESSAGE: &str = "exception when running backup, see logs for details";

/// Bounded poll on the global marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_attempts: 60,
        }
    }
}

/// What the caller asked this run to do.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub action: Action,
    pub import_key: Option<PathBuf>,
    pub export_key: Option<PathBuf>,
    pub restore_target: PathBuf,
}

impl RunRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            import_key: None,
            export_key: None,
            restore_target: PathBuf::from("/"),
        }
    }

    #[must_use]
    pub fn import_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_key = Some(path.into());
        self
    }

    #[must_use]
    pub fn export_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_key = Some(path.into());
        self
    }

    #[must_use]
    pub fn restore_target(mut self, path: impl Into<PathBuf>) -> Self {
        self.restore_target = path.into();
        self
    }
}

enum Gate {
    Acquired(RunLease),
    Skip(SkipReason),
}

/// Drives one backup configuration through a single run.
///
/// Every exit path after the lock gate releases the mount and both markers,
/// in that order, before the report is handed to the sink. Panics inside the
/// operating phase are caught and turned into an `Unexpected` failure.
pub struct Orchestrator {
    config: BackupConfig,
    guard: RunGuard,
    resolver: LocationResolver,
    engine: RepositoryEngine,
    wait: WaitPolicy,
    history: Vec<RunState>,
}

impl Orchestrator {
    pub fn new(
        config: BackupConfig,
        guard: RunGuard,
        resolver: LocationResolver,
        engine: RepositoryEngine,
    ) -> Self {
        Self {
            config,
            guard,
            resolver,
            engine,
            wait: WaitPolicy::default(),
            history: vec![RunState::Idle],
        }
    }

    #[must_use]
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn state(&self) -> RunState {
        self.history.last().copied().unwrap_or(RunState::Idle)
    }

    /// States visited by the last run, starting at `Idle`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn enter(&mut self, to: RunState) {
        let from = self.state();
        if let Err(e) = validate_transition(from, to) {
            error!("{e}");
        }
        debug!("run '{}': {from} -> {to}", self.config.name);
        self.history.push(to);
    }

    pub fn run(&mut self, request: &RunRequest, sink: &dyn ReportSink) -> RunOutcome {
        self.history = vec![RunState::Idle];
        let name = self.config.name.clone();

        if !self.config.active {
            info!("Skipping backup '{name}': not active");
            self.enter(RunState::Done);
            return RunOutcome::Skipped {
                config: name,
                reason: SkipReason::Inactive,
            };
        }

        self.enter(RunState::Waiting);
        let mut report = RunReport::new(&name, request.action, Utc::now());

        let lease = match self.wait_for_gate() {
            Ok(Gate::Acquired(lease)) => lease,
            Ok(Gate::Skip(reason)) => {
                info!("Skipping backup '{name}': {reason}");
                self.enter(RunState::Done);
                return RunOutcome::Skipped {
                    config: name,
                    reason,
                };
            }
            Err(failure) => {
                error!("{failure}");
                report.fail(failure);
                self.enter(RunState::Reporting);
                return self.deliver(report, sink);
            }
        };

        self.enter(RunState::Locked);
        report.started_at = Utc::now();
        let clock = Instant::now();
        let mut resolved: Option<ResolvedRepository> = None;

        let operated = panic::catch_unwind(AssertUnwindSafe(|| {
            self.operate(request, &mut report, &mut resolved);
        }));
        if let Err(payload) = operated {
            error!(
                "exception on running backup '{name}': {}",
                panic_message(payload.as_ref())
            );
            report.fail(RunFailure::unexpected(PANIC_MESSAGE));
        }

        self.enter(RunState::Releasing);
        if let Some(mut repo) = resolved {
            if let Some(mount_point) = repo.mount_point() {
                debug!("releasing {} for '{name}'", mount_point.display());
            }
            let released = panic::catch_unwind(AssertUnwindSafe(|| {
                self.resolver.release(&mut repo)
            }));
            match released {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("{e}");
                    report.messages.push(UNMOUNT_WARNING.to_owned());
                }
                Err(payload) => {
                    warn!("unmount panicked: {}", panic_message(payload.as_ref()));
                    report.messages.push(UNMOUNT_WARNING.to_owned());
                }
            }
        }
        report.duration = Some(clock.elapsed());

        if let Err(e) = lease.release() {
            warn!("could not remove lock markers for '{name}': {e}");
        }

        self.enter(RunState::Reporting);
        self.deliver(report, sink)
    }

    fn deliver(&mut self, report: RunReport, sink: &dyn ReportSink) -> RunOutcome {
        let delivered = match sink.deliver(&report) {
            Ok(()) => true,
            Err(e) => {
                error!("could not deliver report through {}: {e}", sink.name());
                false
            }
        };
        self.enter(RunState::Done);
        RunOutcome::Completed { report, delivered }
    }

    fn wait_for_gate(&self) -> Result<Gate, RunFailure> {
        let mut attempts = 0;
        loop {
            let acquisition = self
                .guard
                .acquire_run(&self.config.name)
                .map_err(|e| RunFailure::unexpected(e.to_string()))?;
            match acquisition {
                Acquisition::Acquired(lease) => return Ok(Gate::Acquired(lease)),
                Acquisition::ConfigBusy { pid } => {
                    return Ok(Gate::Skip(SkipReason::AlreadyRunning { pid }));
                }
                Acquisition::GlobalBusy { pid } => {
                    if attempts >= self.wait.max_attempts {
                        return Err(RunFailure::Contention { attempts });
                    }
                    debug!("another backup (pid {pid}) is running, waiting");
                    std::thread::sleep(self.wait.interval);
                    attempts += 1;
                    info!("Waited {attempts} time(s) until another backup process finishes");
                }
            }
        }
    }

    fn operate(
        &mut self,
        request: &RunRequest,
        report: &mut RunReport,
        resolved: &mut Option<ResolvedRepository>,
    ) {
        self.enter(RunState::Resolving);
        let repo = match self.resolver.resolve(&self.config) {
            Ok(repo) => resolved.insert(repo).path().to_owned(),
            Err(e) => {
                error!("{e}");
                report.fail(RunFailure::Resolution {
                    message: e.to_string(),
                });
                return;
            }
        };

        self.enter(RunState::Operating);
        info!("running {} for '{}' on {repo}", request.action, self.config.name);
        if let Err(failure) = self.perform(request, &repo, report) {
            error!("{failure}");
            report.fail(failure);
        }
    }

    fn perform(
        &self,
        request: &RunRequest,
        repo: &str,
        report: &mut RunReport,
    ) -> Result<(), RunFailure> {
        match request.action {
            Action::Initialize => self.initialize(request, repo, report),
            Action::Snapshot => self.snapshot(repo, report),
            Action::SnapshotAndVerify => {
                self.snapshot(repo, report)?;
                record(report, StepKind::Check, self.engine.check(repo, false))
            }
            Action::VerifyData => record(report, StepKind::Check, self.engine.check(repo, true)),
            Action::Restore => self.restore(&request.restore_target, repo, report),
        }
    }

    fn initialize(
        &self,
        request: &RunRequest,
        repo: &str,
        report: &mut RunReport,
    ) -> Result<(), RunFailure> {
        if self.is_initialized(repo)? {
            info!("repository for '{}' is already initialised", self.config.name);
            return Ok(());
        }
        record(
            report,
            StepKind::Init,
            self.engine.init(repo, &self.config.encryption),
        )?;

        if let Some(import) = &request.import_key {
            if !self
                .engine
                .probe(repo, "Checking if repository has keys")?
                .success()
            {
                // An imported key replaces the export.
                return record(
                    report,
                    StepKind::KeyImport,
                    self.engine.key_import(repo, import),
                );
            }
        }
        if let Some(export) = &request.export_key {
            record(
                report,
                StepKind::KeyExport,
                self.engine.key_export(repo, export),
            )?;
        }
        Ok(())
    }

    fn is_initialized(&self, repo: &str) -> Result<bool, RunFailure> {
        // Anything but a remote shell target must at least be a directory.
        if !self.config.location.is_remote_shell() && !Path::new(repo).is_dir() {
            return Ok(false);
        }
        Ok(self
            .engine
            .probe(repo, "Checking if repository exists")?
            .success())
    }

    fn snapshot(&self, repo: &str, report: &mut RunReport) -> Result<(), RunFailure> {
        record(report, StepKind::Create, self.engine.create(repo, &self.config))?;
        record(report, StepKind::Prune, self.engine.prune(repo, &self.config))
    }

    fn restore(&self, target: &Path, repo: &str, report: &mut RunReport) -> Result<(), RunFailure> {
        let (last, listing) = self.engine.last_archive(repo)?;
        if !listing.success() {
            report
                .steps
                .push(StepOutcome::from_output(StepKind::Restore, &listing));
            return Err(RunFailure::Engine {
                step: StepKind::Restore,
                message: format!("could not list snapshots: {}", listing.stderr.trim()),
            });
        }
        let Some(archive) = last else {
            warn!("Nothing to restore, backup is empty");
            return Ok(());
        };
        info!("restoring {archive} into {}", target.display());
        record(
            report,
            StepKind::Restore,
            self.engine.extract(repo, &archive, target),
        )
    }
}

/// Append the outcome of an engine step; a non-zero exit is fatal.
fn record(
    report: &mut RunReport,
    kind: StepKind,
    result: Result<CommandOutput, RuntimeError>,
) -> Result<(), RunFailure> {
    let output = result?;
    report.steps.push(StepOutcome::from_output(kind, &output));
    if output.success() {
        Ok(())
    } else {
        Err(RunFailure::Engine {
            step: kind,
            message: output.stderr.trim().to_owned(),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
