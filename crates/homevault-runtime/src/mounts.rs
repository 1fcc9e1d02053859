use std::path::{Path, PathBuf};

pub const PROC_MOUNTS: &str = "/proc/mounts";

/// Reader for a kernel mount table in `/proc/mounts` format.
#[derive(Debug, Clone)]
pub struct MountTable {
    source: PathBuf,
}

impl Default for MountTable {
    fn default() -> Self {
        Self {
            source: PathBuf::from(PROC_MOUNTS),
        }
    }
}

impl MountTable {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Check whether `path` is currently a mount point.
    ///
    /// An unreadable table counts as "not mounted".
    pub fn is_mounted(&self, path: &Path) -> bool {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let wanted = canonical.to_string_lossy();
        let wanted = wanted.trim_end_matches('/');
        let wanted = if wanted.is_empty() { "/" } else { wanted };

        match std::fs::read_to_string(&self.source) {
            Ok(mounts) => mounts
                .lines()
                .filter_map(|line| line.split_whitespace().nth(1))
                .any(|target| unescape(target) == wanted),
            Err(_) => false,
        }
    }
}

/// Undo the octal escapes (`\040` for space, ...) the kernel uses in mount targets.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
