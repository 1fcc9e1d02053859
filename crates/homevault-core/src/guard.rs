//! Lock markers enforcing one run per backup configuration and one run
//! machine-wide.
//!
//! A marker is a file holding the decimal PID of its owner. A marker whose
//! process is gone is stale and counts as free; it is overwritten by the next
//! acquisition. Check-and-write happens under an `fs2` exclusive lock so two
//! processes cannot both observe a free scope.

use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const GLOBAL_MARKER: &str = "homevault.pid";
const GUARD_LOCK: &str = "homevault.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockScope {
    Config(String),
    Global,
}

impl LockScope {
    fn file_name(&self) -> String {
        match self {
            Self::Config(name) => format!("homevault-{name}.pid"),
            Self::Global => GLOBAL_MARKER.to_owned(),
        }
    }
}

/// Serializes marker inspection and creation across processes.
struct GuardLock {
    lock_file: File,
}

impl GuardLock {
    fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?;

        file.lock_exclusive()?;

        Ok(Self { lock_file: file })
    }
}

impl Drop for GuardLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Whether a process with this PID exists.
#[allow(unsafe_code)]
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs only the existence and permission
    // check; no signal is delivered.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Result of trying to start a run.
#[derive(Debug)]
pub enum Acquisition {
    Acquired(RunLease),
    ConfigBusy { pid: i32 },
    GlobalBusy { pid: i32 },
}

/// Marker files under the runtime directory.
#[derive(Debug, Clone)]
pub struct RunGuard {
    run_dir: PathBuf,
    pid: u32,
}

impl RunGuard {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self::with_pid(run_dir, std::process::id())
    }

    /// Guard that records `pid` as owner instead of the current process.
    pub fn with_pid(run_dir: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            run_dir: run_dir.into(),
            pid,
        }
    }

    pub fn marker_path(&self, scope: &LockScope) -> PathBuf {
        self.run_dir.join(scope.file_name())
    }

    fn lock(&self) -> Result<GuardLock, CoreError> {
        GuardLock::acquire(&self.run_dir.join(GUARD_LOCK))
    }

    /// PID of the live process holding `scope`, if any.
    pub fn holder(&self, scope: &LockScope) -> Result<Option<i32>, CoreError> {
        let path = self.marker_path(scope);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Ok(pid) = content.trim().parse::<i32>() else {
            warn!("ignoring unreadable lock marker {}", path.display());
            return Ok(None);
        };
        info!("backup is marked as running with pid {pid}");
        if pid_alive(pid) {
            debug!("process {pid} found");
            Ok(Some(pid))
        } else {
            warn!("process {pid} not found, marker {} is stale", path.display());
            Ok(None)
        }
    }

    pub fn is_held(&self, scope: &LockScope) -> Result<bool, CoreError> {
        Ok(self.holder(scope)?.is_some())
    }

    /// Take `scope` if it is free or stale. Returns `false` when a live
    /// process holds it.
    pub fn try_acquire(&self, scope: &LockScope) -> Result<bool, CoreError> {
        let _lock = self.lock()?;
        if self.is_held(scope)? {
            return Ok(false);
        }
        self.write_marker(scope)?;
        Ok(true)
    }

    /// Remove the marker for `scope`; a missing marker is fine.
    pub fn release(&self, scope: &LockScope) -> Result<(), CoreError> {
        match std::fs::remove_file(self.marker_path(scope)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take both the per-configuration and the global scope, or neither.
    pub fn acquire_run(&self, name: &str) -> Result<Acquisition, CoreError> {
        let config = LockScope::Config(name.to_owned());
        let _lock = self.lock()?;

        if let Some(pid) = self.holder(&config)? {
            return Ok(Acquisition::ConfigBusy { pid });
        }
        if let Some(pid) = self.holder(&LockScope::Global)? {
            return Ok(Acquisition::GlobalBusy { pid });
        }

        self.write_marker(&config)?;
        if let Err(e) = self.write_marker(&LockScope::Global) {
            let _ = self.release(&config);
            return Err(e);
        }

        Ok(Acquisition::Acquired(RunLease {
            guard: self.clone(),
            scopes: vec![config, LockScope::Global],
            released: false,
        }))
    }

    fn write_marker(&self, scope: &LockScope) -> Result<(), CoreError> {
        std::fs::create_dir_all(&self.run_dir)?;
        let mut tmp = NamedTempFile::new_in(&self.run_dir)?;
        tmp.write_all(self.pid.to_string().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.marker_path(scope))
            .map_err(|e| CoreError::Io(e.error))?;
        Ok(())
    }
}

/// Both markers of an acquired run. Released in reverse order of acquisition,
/// explicitly or on drop.
#[derive(Debug)]
pub struct RunLease {
    guard: RunGuard,
    scopes: Vec<LockScope>,
    released: bool,
}

impl RunLease {
    pub fn release(mut self) -> Result<(), CoreError> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<(), CoreError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        for scope in self.scopes.iter().rev() {
            if let Err(e) = self.guard.release(scope) {
                warn!("failed to remove lock marker {scope:?}: {e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        let _ = self.release_all();
    }
}
