use crate::location::LocationDescriptor;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/homevault/backup.toml";

/// Exclude-patterns file used when a backup target names none and it exists.
pub const DEFAULT_EXCLUDE_FILE: &str = "/etc/homevault/backup-exclude";

/// Top-level settings file: alert routing, well-known paths, engine tuning,
/// and one `[backups.<name>]` table per backup target.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub alerts: AlertsSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub backups: BTreeMap<String, BackupSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AlertsSection {
    pub from: String,
    pub recipient: String,
    #[serde(default)]
    pub jabber: bool,
    /// Mail submission command; the rendered message is written to its stdin.
    #[serde(default = "default_mailer")]
    pub mailer: Vec<String>,
    #[serde(default = "default_jabber_command")]
    pub jabber_command: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    #[serde(default = "default_run_dir")]
    pub run_dir: PathBuf,
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            run_dir: default_run_dir(),
            mount_root: default_mount_root(),
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_engine_program")]
    pub program: String,
    /// Seconds between two checks of the global lock marker.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_max_wait_attempts")]
    pub max_wait_attempts: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            poll_interval_secs: default_poll_interval(),
            max_wait_attempts: default_max_wait_attempts(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackupSection {
    pub url: String,
    pub keep_daily: i64,
    pub keep_weekly: i64,
    pub keep_monthly: i64,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default = "default_compression")]
    pub compression: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<u64>,
    #[serde(default = "default_encryption")]
    pub encryption: String,
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    #[serde(default = "default_sources")]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub exclude_from: Option<PathBuf>,
}

/// Snapshot retention handed to the prune operation unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub daily: u32,
    pub weekly: u32,
    pub monthly: u32,
}

/// One backup target, validated and ready for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub name: String,
    pub location: LocationDescriptor,
    pub retention: Retention,
    pub rate_limit: Option<u64>,
    pub active: bool,
    pub compression: Option<String>,
    pub encryption: String,
    pub archive_prefix: String,
    pub sources: Vec<PathBuf>,
    pub exclude_from: Option<PathBuf>,
}

fn default_mailer() -> Vec<String> {
    vec![
        "/usr/sbin/sendmail".to_owned(),
        "-t".to_owned(),
        "-oi".to_owned(),
    ]
}

fn default_jabber_command() -> String {
    "ejabberdctl".to_owned()
}

fn default_run_dir() -> PathBuf {
    PathBuf::from("/run")
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/mnt/backup")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log")
}

fn default_engine_program() -> String {
    "borg".to_owned()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_max_wait_attempts() -> u32 {
    60
}

fn default_active() -> bool {
    true
}

#[allow(clippy::unnecessary_wraps)]
fn default_compression() -> Option<String> {
    Some("lz4".to_owned())
}

fn default_encryption() -> String {
    "keyfile".to_owned()
}

fn default_archive_prefix() -> String {
    "{hostname}".to_owned()
}

fn default_sources() -> Vec<PathBuf> {
    vec![PathBuf::from("/home"), PathBuf::from("/var/backups")]
}

impl Settings {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Validate and return the named backup target.
    pub fn backup(&self, name: &str) -> Result<BackupConfig, ConfigError> {
        validate_backup_name(name)?;
        let section = self
            .backups
            .get(name)
            .ok_or_else(|| ConfigError::UnknownBackup(name.to_owned()))?;

        let retention = Retention {
            daily: positive(name, "keep_daily", section.keep_daily)?,
            weekly: positive(name, "keep_weekly", section.keep_weekly)?,
            monthly: positive(name, "keep_monthly", section.keep_monthly)?,
        };

        Ok(BackupConfig {
            name: name.to_owned(),
            location: LocationDescriptor::parse(&section.url)?,
            retention,
            rate_limit: section.rate_limit,
            active: section.active,
            compression: section.compression.clone(),
            encryption: section.encryption.clone(),
            archive_prefix: section.archive_prefix.clone(),
            sources: section.sources.clone(),
            exclude_from: exclude_file(
                section.exclude_from.as_deref(),
                Path::new(DEFAULT_EXCLUDE_FILE),
            ),
        })
    }

    /// Default log file for a backup target: `<log_dir>/backup-<name>.log`.
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.paths.log_dir.join(format!("backup-{name}.log"))
    }
}

/// An explicit setting always wins; otherwise the fallback only if present.
fn exclude_file(configured: Option<&Path>, fallback: &Path) -> Option<PathBuf> {
    match configured {
        Some(path) => Some(path.to_path_buf()),
        None => fallback.is_file().then(|| fallback.to_path_buf()),
    }
}

fn positive(name: &str, field: &'static str, value: i64) -> Result<u32, ConfigError> {
    u32::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidRetention {
            name: name.to_owned(),
            field,
        })
}

/// Backup names end up in lock marker and mount point paths.
fn validate_backup_name(name: &str) -> Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidName(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[alerts]
from = "postmaster@example.org"
recipient = "admin@example.org"
jabber = true

[paths]
run_dir = "/tmp/run"
mount_root = "/tmp/mnt"

[engine]
program = "/usr/local/bin/borg"
poll_interval_secs = 5
max_wait_attempts = 3

[backups.alpha]
url = "dir:///backup/alpha"
keep_daily = 7
keep_weekly = 4
keep_monthly = 6

[backups.qnap1]
url = "sshfs://borg@qnap.lan/share/backup"
keep_daily = 14
keep_weekly = 8
keep_monthly = 12
rate_limit = 5000
compression = "zstd,6"
active = false
sources = ["/home"]
exclude_from = "/etc/homevault/backup-exclude"
"#;

    #[test]
    fn parses_full_settings() {
        let settings = Settings::parse(FULL).expect("should parse");
        assert!(settings.alerts.jabber);
        assert_eq!(settings.alerts.mailer[0], "/usr/sbin/sendmail");
        assert_eq!(settings.paths.run_dir, PathBuf::from("/tmp/run"));
        assert_eq!(settings.paths.log_dir, PathBuf::from("/var/log"));
        assert_eq!(settings.engine.program, "/usr/local/bin/borg");
        assert_eq!(settings.engine.max_wait_attempts, 3);
        assert_eq!(settings.backups.len(), 2);
    }

    #[test]
    fn backup_applies_defaults() {
        let settings = Settings::parse(FULL).unwrap();
        let alpha = settings.backup("alpha").unwrap();
        assert!(alpha.active);
        assert_eq!(alpha.compression.as_deref(), Some("lz4"));
        assert_eq!(alpha.encryption, "keyfile");
        assert_eq!(alpha.archive_prefix, "{hostname}");
        assert_eq!(alpha.sources.len(), 2);
        assert_eq!(alpha.rate_limit, None);
        assert_eq!(
            alpha.retention,
            Retention {
                daily: 7,
                weekly: 4,
                monthly: 6
            }
        );
    }

    #[test]
    fn backup_reads_overrides() {
        let settings = Settings::parse(FULL).unwrap();
        let qnap = settings.backup("qnap1").unwrap();
        assert!(!qnap.active);
        assert_eq!(qnap.rate_limit, Some(5000));
        assert_eq!(qnap.compression.as_deref(), Some("zstd,6"));
        assert_eq!(qnap.location.scheme(), "sshfs");
        assert_eq!(
            qnap.exclude_from,
            Some(PathBuf::from("/etc/homevault/backup-exclude"))
        );
    }

    #[test]
    fn exclude_file_falls_back_to_existing_default() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = dir.path().join("backup-exclude");
        assert_eq!(exclude_file(None, &fallback), None);

        std::fs::write(&fallback, "*.tmp\n").unwrap();
        assert_eq!(exclude_file(None, &fallback), Some(fallback.clone()));

        let explicit = Path::new("/srv/exclude");
        assert_eq!(
            exclude_file(Some(explicit), &fallback),
            Some(explicit.to_path_buf())
        );
    }

    #[test]
    fn unknown_backup_is_an_error() {
        let settings = Settings::parse(FULL).unwrap();
        assert!(matches!(
            settings.backup("beta"),
            Err(ConfigError::UnknownBackup(_))
        ));
    }

    #[test]
    fn rejects_non_positive_retention() {
        let input = r#"
[alerts]
from = "a@b"
recipient = "c@d"

[backups.alpha]
url = "dir:///backup/alpha"
keep_daily = 0
keep_weekly = 4
keep_monthly = -1
"#;
        let settings = Settings::parse(input).unwrap();
        let err = settings.backup("alpha").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidRetention {
                field: "keep_daily",
                ..
            }
        ));
    }

    #[test]
    fn rejects_path_like_names() {
        let settings = Settings::parse(FULL).unwrap();
        assert!(matches!(
            settings.backup("../alpha"),
            Err(ConfigError::InvalidName(_))
        ));
        assert!(matches!(
            settings.backup(".."),
            Err(ConfigError::InvalidName(_))
        ));
    }

    #[test]
    fn rejects_unknown_fields() {
        let input = r#"
[alerts]
from = "a@b"
recipient = "c@d"
unknown_field = true
"#;
        assert!(Settings::parse(input).is_err());
    }

    #[test]
    fn rejects_missing_alerts() {
        assert!(Settings::parse("[backups]\n").is_err());
    }

    #[test]
    fn invalid_url_surfaces_as_config_error() {
        let input = r#"
[alerts]
from = "a@b"
recipient = "c@d"

[backups.alpha]
url = "/backup/alpha"
keep_daily = 1
keep_weekly = 1
keep_monthly = 1
"#;
        let settings = Settings::parse(input).unwrap();
        assert!(matches!(
            settings.backup("alpha"),
            Err(ConfigError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn log_file_is_per_backup() {
        let settings = Settings::parse(FULL).unwrap();
        assert_eq!(
            settings.log_file("alpha"),
            PathBuf::from("/var/log/backup-alpha.log")
        );
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.toml");
        std::fs::write(&path, FULL).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert!(settings.backups.contains_key("alpha"));
    }
}
