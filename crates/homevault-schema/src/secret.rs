use crate::ConfigError;
use std::fmt;
use std::path::Path;

/// Repository passphrase. Never printed; hand it to the engine through
/// [`expose`](Self::expose) only when building a child process environment.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Read the first line of a key file, without its line terminator.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::KeyFile {
            path: path.display().to_string(),
            source,
        })?;
        let first = content
            .lines()
            .next()
            .unwrap_or_default()
            .trim_end_matches(['\r', '\n']);
        if first.is_empty() {
            return Err(ConfigError::EmptyKey(path.display().to_string()));
        }
        Ok(Self(first.to_owned()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

impl fmt::Display for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}
