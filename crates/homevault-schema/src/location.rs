use crate::ConfigError;
use std::fmt;
use std::path::PathBuf;

/// Where a backup repository lives, parsed once from a URL-like string.
///
/// The scheme set is closed; anything else lands in [`Unrecognized`](Self::Unrecognized)
/// so the resolver can still try the pre-mounted fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationDescriptor {
    /// `dir:///absolute/path`: a directory on a local or already-attached filesystem.
    LocalDirectory { path: PathBuf },
    /// `ssh://...`: a remote repository reached by the engine itself.
    RemoteShell { target: String },
    /// `usb://<label>/<subdir>`: a device mounted out-of-band by systemd.
    RemovableDevice { label: String, subdir: PathBuf },
    /// `s3fs://<bucket>/<subdir>`: an object store mounted out-of-band.
    ObjectStoreMount { bucket: String, subdir: PathBuf },
    /// `sshfs://[user@]host[:port]/path`: a remote directory mounted over fuse.
    RemoteFilesystemMount { remote: RemoteEndpoint },
    Unrecognized { scheme: String, fragment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEndpoint {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl RemoteEndpoint {
    /// The `[user@]host:/path` source argument understood by sshfs.
    pub fn source(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}:{}", self.host, self.path),
            None => format!("{}:{}", self.host, self.path),
        }
    }

    fn parse(url: &str, authority: &str, path: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLocation {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };

        let (user, host_port) = match authority.rsplit_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_owned()), rest),
            Some(_) => return Err(invalid("empty user name")),
            None => (None, authority),
        };
        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| invalid(&format!("invalid port '{port}'")))?;
                (host, Some(port))
            }
            None => (host_port, None),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            user,
            host: host.to_owned(),
            port,
            path: format!("/{}", path.trim_start_matches('/')),
        })
    }
}

impl LocationDescriptor {
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidLocation {
            url: url.to_owned(),
            reason: reason.to_owned(),
        };

        let (scheme, rest) = url
            .trim()
            .split_once("://")
            .ok_or_else(|| invalid("expected <scheme>://<location>"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }

        match scheme.to_ascii_lowercase().as_str() {
            "dir" => {
                if !rest.starts_with('/') || rest.len() < 2 {
                    return Err(invalid("dir:// requires an absolute path"));
                }
                Ok(Self::LocalDirectory {
                    path: PathBuf::from(rest),
                })
            }
            "ssh" => {
                if rest.is_empty() {
                    return Err(invalid("ssh:// requires a remote target"));
                }
                Ok(Self::RemoteShell {
                    target: rest.to_owned(),
                })
            }
            "usb" => {
                let (label, subdir) = split_authority(rest);
                Ok(Self::RemovableDevice {
                    label: label.to_owned(),
                    subdir: PathBuf::from(subdir),
                })
            }
            "s3fs" => {
                let (bucket, subdir) = split_authority(rest);
                Ok(Self::ObjectStoreMount {
                    bucket: bucket.to_owned(),
                    subdir: PathBuf::from(subdir),
                })
            }
            "sshfs" => {
                let (authority, path) = split_authority(rest);
                Ok(Self::RemoteFilesystemMount {
                    remote: RemoteEndpoint::parse(url, authority, path)?,
                })
            }
            other => Ok(Self::Unrecognized {
                scheme: other.to_owned(),
                fragment: rest.to_owned(),
            }),
        }
    }

    pub fn scheme(&self) -> &str {
        match self {
            Self::LocalDirectory { .. } => "dir",
            Self::RemoteShell { .. } => "ssh",
            Self::RemovableDevice { .. } => "usb",
            Self::ObjectStoreMount { .. } => "s3fs",
            Self::RemoteFilesystemMount { .. } => "sshfs",
            Self::Unrecognized { scheme, .. } => scheme,
        }
    }

    /// True when the repository is only reachable through the engine's own
    /// transport, so no local directory checks apply.
    pub fn is_remote_shell(&self) -> bool {
        matches!(self, Self::RemoteShell { .. })
    }
}

/// Split `authority/path` at the first slash; the path keeps no leading slash.
fn split_authority(rest: &str) -> (&str, &str) {
    match rest.split_once('/') {
        Some((authority, path)) => (authority, path.trim_start_matches('/')),
        None => (rest, ""),
    }
}

impl fmt::Display for LocationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalDirectory { path } => write!(f, "dir://{}", path.display()),
            Self::RemoteShell { target } => write!(f, "ssh://{target}"),
            Self::RemovableDevice { label, subdir } => {
                write!(f, "usb://{label}/{}", subdir.display())
            }
            Self::ObjectStoreMount { bucket, subdir } => {
                write!(f, "s3fs://{bucket}/{}", subdir.display())
            }
            Self::RemoteFilesystemMount { remote } => {
                write!(f, "sshfs://")?;
                if let Some(user) = &remote.user {
                    write!(f, "{user}@")?;
                }
                write!(f, "{}", remote.host)?;
                if let Some(port) = remote.port {
                    write!(f, ":{port}")?;
                }
                write!(f, "{}", remote.path)
            }
            Self::Unrecognized { scheme, fragment } => write!(f, "{scheme}://{fragment}"),
        }
    }
}
