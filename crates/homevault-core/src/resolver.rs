use homevault_runtime::{CommandRunner, Invocation, MountTable, RuntimeError};
use homevault_schema::{BackupConfig, LocationDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

pub const DEFAULT_MOUNT_ROOT: &str = "/mnt/backup";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported location '{0}'")]
    UnsupportedLocation(String),
    #[error("{scheme} location is not mounted at {}", mount_point.display())]
    NotMounted { scheme: String, mount_point: PathBuf },
    #[error("failed to mount {} : {stderr}", mount_point.display())]
    MountFailed { mount_point: PathBuf, stderr: String },
    #[error("failed to unmount {}: {stderr}", mount_point.display())]
    UnmountFailed { mount_point: PathBuf, stderr: String },
    #[error("resolver I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// A repository location ready for engine invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    path: String,
    mount_point: Option<PathBuf>,
    needs_unmount: bool,
    released: bool,
}

impl ResolvedRepository {
    /// A repository that needs no mount, e.g. a local directory.
    pub fn unmounted(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mount_point: None,
            needs_unmount: false,
            released: false,
        }
    }

    fn mounted(path: impl Into<String>, mount_point: PathBuf) -> Self {
        Self {
            path: path.into(),
            mount_point: Some(mount_point),
            needs_unmount: true,
            released: false,
        }
    }

    /// Repository argument for the engine: a local path or a remote target.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    /// True while an unmount is still owed.
    pub fn needs_unmount(&self) -> bool {
        self.needs_unmount && !self.released
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Turns a location descriptor into a usable repository path, mounting when
/// the scheme requires it, and undoes that mount on release.
pub struct LocationResolver {
    runner: Arc<dyn CommandRunner>,
    mount_root: PathBuf,
    mounts: MountTable,
}

impl LocationResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, mount_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            mount_root: mount_root.into(),
            mounts: MountTable::default(),
        }
    }

    #[must_use]
    pub fn with_mount_table(mut self, mounts: MountTable) -> Self {
        self.mounts = mounts;
        self
    }

    /// Conventional mount point for a backup configuration.
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.mount_root.join(name)
    }

    pub fn resolve(&self, config: &BackupConfig) -> Result<ResolvedRepository, ResolveError> {
        let mount_point = self.mount_point(&config.name);
        debug!("resolving {} for '{}'", config.location, config.name);

        match &config.location {
            LocationDescriptor::RemoteShell { target } => {
                Ok(ResolvedRepository::unmounted(target.clone()))
            }
            LocationDescriptor::LocalDirectory { path } => {
                Ok(ResolvedRepository::unmounted(path.display().to_string()))
            }
            // Mounted out-of-band by the system under the configuration's
            // mount point, which is the repository itself.
            LocationDescriptor::RemovableDevice { .. }
            | LocationDescriptor::ObjectStoreMount { .. } => {
                if !self.mounts.is_mounted(&mount_point) {
                    return Err(ResolveError::NotMounted {
                        scheme: config.location.scheme().to_owned(),
                        mount_point,
                    });
                }
                Ok(ResolvedRepository::mounted(
                    mount_point.display().to_string(),
                    mount_point,
                ))
            }
            LocationDescriptor::RemoteFilesystemMount { remote } => {
                std::fs::create_dir_all(&mount_point)?;
                if self.mounts.is_mounted(&mount_point) {
                    info!("{} is already mounted", mount_point.display());
                } else {
                    let mut invocation = Invocation::new("sshfs", "Mounting repository");
                    if let Some(port) = remote.port {
                        invocation = invocation.args(["-p".to_owned(), port.to_string()]);
                    }
                    let invocation = invocation
                        .arg(remote.source())
                        .arg(mount_point.display().to_string());
                    let output = self.runner.run(&invocation)?;
                    if !output.success() {
                        return Err(ResolveError::MountFailed {
                            mount_point,
                            stderr: output.stderr.trim().to_owned(),
                        });
                    }
                }
                Ok(ResolvedRepository::mounted(
                    mount_point.display().to_string(),
                    mount_point,
                ))
            }
            LocationDescriptor::Unrecognized { .. } => {
                // A manually pre-mounted repository is accepted as a last resort.
                if self.mounts.is_mounted(&mount_point) {
                    info!(
                        "unknown scheme for '{}', using pre-mounted {}",
                        config.name,
                        mount_point.display()
                    );
                    Ok(ResolvedRepository::mounted(
                        mount_point.display().to_string(),
                        mount_point,
                    ))
                } else {
                    error!("unknown or not implemented scheme {}", config.location);
                    Err(ResolveError::UnsupportedLocation(
                        config.location.to_string(),
                    ))
                }
            }
        }
    }

    /// Unmount if needed. Safe to call any number of times; the repository
    /// counts as released even when the unmount command fails.
    pub fn release(&self, repo: &mut ResolvedRepository) -> Result<(), ResolveError> {
        if !repo.needs_unmount() {
            repo.released = true;
            return Ok(());
        }
        repo.released = true;

        let Some(mount_point) = repo.mount_point.clone() else {
            return Ok(());
        };
        let output = self.runner.run(
            &Invocation::new("umount", "Unmounting repository")
                .arg(mount_point.display().to_string()),
        )?;
        if output.success() {
            Ok(())
        } else {
            Err(ResolveError::UnmountFailed {
                mount_point,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homevault_runtime::{CommandOutput, MockRunner};
    use homevault_schema::Retention;

    fn config(name: &str, url: &str) -> BackupConfig {
        BackupConfig {
            name: name.to_owned(),
            location: LocationDescriptor::parse(url).unwrap(),
            retention: Retention {
                daily: 7,
                weekly: 4,
                monthly: 6,
            },
            rate_limit: None,
            active: true,
            compression: None,
            encryption: "keyfile".to_owned(),
            archive_prefix: "{hostname}".to_owned(),
            sources: Vec::new(),
            exclude_from: None,
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        runner: Arc<MockRunner>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                runner: Arc::new(MockRunner::new()),
            }
        }

        fn mount_root(&self) -> PathBuf {
            self.dir.path().join("mnt")
        }

        /// Resolver whose mount table lists the given configuration mount points.
        fn resolver(&self, mounted: &[&str]) -> LocationResolver {
            let mut table = String::new();
            for name in mounted {
                let mp = self.mount_root().join(name);
                std::fs::create_dir_all(&mp).unwrap();
                let canonical = std::fs::canonicalize(&mp).unwrap();
                table.push_str(&format!("dev {} fuse rw 0 0\n", canonical.display()));
            }
            let table_path = self.dir.path().join("mounts");
            std::fs::write(&table_path, table).unwrap();
            LocationResolver::new(self.runner.clone(), self.mount_root())
                .with_mount_table(MountTable::new(table_path))
        }
    }

    #[test]
    fn local_directory_needs_no_mount() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&[]);
        let mut repo = resolver
            .resolve(&config("alpha", "dir:///backup/alpha"))
            .unwrap();
        assert_eq!(repo.path(), "/backup/alpha");
        assert!(!repo.needs_unmount());

        resolver.release(&mut repo).unwrap();
        assert!(fx.runner.calls().is_empty());
    }

    #[test]
    fn remote_shell_uses_fragment_verbatim() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&[]);
        let repo = resolver
            .resolve(&config("alpha", "ssh://borg@nas.lan/./alpha"))
            .unwrap();
        assert_eq!(repo.path(), "borg@nas.lan/./alpha");
        assert!(!repo.needs_unmount());
    }

    #[test]
    fn removable_device_requires_existing_mount() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&[]);
        let err = resolver
            .resolve(&config("alpha", "usb://backup-disk/homebox"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotMounted { .. }));
        assert!(fx.runner.calls().is_empty(), "no implicit mount");
    }

    #[test]
    fn removable_device_repository_is_the_mount_point() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&["alpha"]);
        let mut repo = resolver
            .resolve(&config("alpha", "usb://backup-disk/homebox"))
            .unwrap();
        let expected = fx.mount_root().join("alpha");
        assert_eq!(repo.path(), expected.display().to_string());
        assert_eq!(repo.mount_point(), Some(expected.as_path()));
        assert!(repo.needs_unmount());

        resolver.release(&mut repo).unwrap();
        assert_eq!(
            fx.runner.command_lines(),
            vec![format!("umount {}", fx.mount_root().join("alpha").display())]
        );
    }

    #[test]
    fn object_store_repository_is_the_mount_point() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&["alpha"]);
        let repo = resolver
            .resolve(&config("alpha", "s3fs://bucket/borg/alpha"))
            .unwrap();
        assert_eq!(
            repo.path(),
            fx.mount_root().join("alpha").display().to_string()
        );
    }

    #[test]
    fn sshfs_creates_mount_point_and_mounts() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&[]);
        let mp = fx.mount_root().join("alpha");
        assert!(!mp.exists());

        let repo = resolver
            .resolve(&config("alpha", "sshfs://borg@nas.lan:2222/volume1/backup"))
            .unwrap();

        assert!(mp.is_dir());
        assert_eq!(repo.path(), mp.display().to_string());
        assert!(repo.needs_unmount());
        assert_eq!(
            fx.runner.command_lines(),
            vec![format!(
                "sshfs -p 2222 borg@nas.lan:/volume1/backup {}",
                mp.display()
            )]
        );
    }

    #[test]
    fn sshfs_already_mounted_skips_mount_command() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&["alpha"]);
        let repo = resolver
            .resolve(&config("alpha", "sshfs://nas.lan/backup"))
            .unwrap();
        assert!(repo.needs_unmount());
        assert!(fx.runner.calls().is_empty());
    }

    #[test]
    fn sshfs_mount_failure_is_reported() {
        let fx = Fixture::new();
        fx.runner
            .on(&["sshfs"], CommandOutput::failed(1, "connection refused"));
        let resolver = fx.resolver(&[]);
        let err = resolver
            .resolve(&config("alpha", "sshfs://nas.lan/backup"))
            .unwrap_err();
        match err {
            ResolveError::MountFailed { stderr, .. } => assert_eq!(stderr, "connection refused"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_scheme_falls_back_to_premounted_directory() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&["alpha"]);
        let repo = resolver
            .resolve(&config("alpha", "nfs://server/export"))
            .unwrap();
        assert_eq!(
            repo.path(),
            fx.mount_root().join("alpha").display().to_string()
        );
        assert!(repo.needs_unmount());
    }

    #[test]
    fn unknown_scheme_without_mount_is_unsupported() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&[]);
        let err = resolver
            .resolve(&config("alpha", "nfs://server/export"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedLocation(_)));
    }

    #[test]
    fn release_is_idempotent() {
        let fx = Fixture::new();
        let resolver = fx.resolver(&["alpha"]);
        let mut repo = resolver.resolve(&config("alpha", "s3fs://bucket")).unwrap();

        resolver.release(&mut repo).unwrap();
        resolver.release(&mut repo).unwrap();
        assert!(repo.is_released());
        assert_eq!(fx.runner.calls().len(), 1, "unmount runs exactly once");

        let mut never_mounted = ResolvedRepository::unmounted("/backup/alpha");
        resolver.release(&mut never_mounted).unwrap();
        resolver.release(&mut never_mounted).unwrap();
        assert_eq!(fx.runner.calls().len(), 1);
    }

    #[test]
    fn failed_unmount_is_reported_once() {
        let fx = Fixture::new();
        fx.runner
            .on(&["umount"], CommandOutput::failed(32, "target is busy"));
        let resolver = fx.resolver(&["alpha"]);
        let mut repo = resolver.resolve(&config("alpha", "s3fs://bucket")).unwrap();

        assert!(matches!(
            resolver.release(&mut repo),
            Err(ResolveError::UnmountFailed { .. })
        ));
        resolver.release(&mut repo).unwrap();
        assert!(!repo.needs_unmount());
    }
}
