//! Configuration schema for homevault backup orchestration.
//!
//! This crate defines the declarative layer: the TOML settings file
//! (`Settings`), the per-target `BackupConfig` resolved from it, the
//! `LocationDescriptor` tagged over the supported repository schemes, and the
//! redacting `Passphrase` wrapper used to thread key material to the engine.

pub mod config;
pub mod location;
pub mod secret;

pub use config::{
    AlertsSection, BackupConfig, BackupSection, EngineSection, PathsSection, Retention, Settings,
    DEFAULT_EXCLUDE_FILE, DEFAULT_SETTINGS_PATH,
};
pub use location::{LocationDescriptor, RemoteEndpoint};
pub use secret::Passphrase;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("no backup configuration named '{0}'")]
    UnknownBackup(String),
    #[error("invalid backup name '{0}': expected [A-Za-z0-9_.-]+")]
    InvalidName(String),
    #[error("retention value '{field}' for '{name}' must be a positive integer")]
    InvalidRetention { name: String, field: &'static str },
    #[error("invalid location '{url}': {reason}")]
    InvalidLocation { url: String, reason: String },
    #[error("failed to read encryption key '{path}': {source}")]
    KeyFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encryption key file '{0}' is empty")]
    EmptyKey(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_unknown_backup() {
        let e = ConfigError::UnknownBackup("qnap1".to_owned());
        assert!(e.to_string().contains("qnap1"));
    }

    #[test]
    fn config_error_display_invalid_retention() {
        let e = ConfigError::InvalidRetention {
            name: "alpha".to_owned(),
            field: "keep_daily",
        };
        let msg = e.to_string();
        assert!(msg.contains("keep_daily"));
        assert!(msg.contains("alpha"));
    }

    #[test]
    fn config_error_display_invalid_location() {
        let e = ConfigError::InvalidLocation {
            url: "nowhere".to_owned(),
            reason: "missing scheme".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("nowhere"));
        assert!(msg.contains("missing scheme"));
    }
}
