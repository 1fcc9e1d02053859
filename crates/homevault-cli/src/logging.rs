use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides `--log-level` with a full filter.
pub const LOG_ENV: &str = "HOMEVAULT_LOG";

/// Map syslog-style level names onto tracing filters.
pub fn level_filter(name: &str) -> Result<&'static str, String> {
    match name.to_ascii_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" | "NOTICE" => Ok("info"),
        "WARN" | "WARNING" => Ok("warn"),
        "ERROR" | "CRITICAL" => Ok("error"),
        other => Err(format!(
            "unknown log level '{other}', expected DEBUG, INFO, NOTICE, WARNING, ERROR or CRITICAL"
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

impl LogTarget {
    /// `-` selects stderr; no argument selects the per-configuration default.
    pub fn from_arg(arg: Option<&Path>, default: PathBuf) -> Self {
        match arg {
            Some(p) if p == Path::new("-") => Self::Stderr,
            Some(p) => Self::File(p.to_path_buf()),
            None => Self::File(default),
        }
    }
}

pub fn init(level: &str, target: &LogTarget) -> Result<(), String> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    let writer = match target {
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("cannot open log file {}: {e}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| format!("failed to install logger: {e}"))
}
