//! Process-level single-instance lease.
//!
//! Two relays on the same bot token would each translate every message, so
//! startup takes an exclusive OS lock on a file and holds it until exit.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::info;

#[derive(Debug)]
pub enum LeaseError {
    /// Could not create or open the lock file.
    Open { path: PathBuf, source: std::io::Error },
    /// Another process holds the lock.
    Held { path: PathBuf, holder: Option<String> },
}

impl fmt::Display for LeaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "failed to open lock file '{}': {}", path.display(), source)
            }
            Self::Held { path, holder: Some(pid) } => {
                write!(f, "another instance (pid {}) holds '{}'", pid, path.display())
            }
            Self::Held { path, holder: None } => {
                write!(f, "another instance holds '{}'", path.display())
            }
        }
    }
}

impl std::error::Error for LeaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } => Some(source),
            Self::Held { .. } => None,
        }
    }
}

/// Held for the lifetime of the process. The OS drops the lock with the file handle.
#[derive(Debug)]
pub struct InstanceLease {
    file: File,
    path: PathBuf,
}

impl InstanceLease {
    pub fn acquire(path: &Path) -> Result<Self, LeaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| LeaseError::Open { path: path.to_path_buf(), source: e })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| LeaseError::Open { path: path.to_path_buf(), source: e })?;

        if file.try_lock_exclusive().is_err() {
            let holder = std::fs::read_to_string(path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            return Err(LeaseError::Held { path: path.to_path_buf(), holder });
        }

        // Record our pid for whoever finds the lock taken.
        file.set_len(0)
            .and_then(|_| write!(file, "{}", std::process::id()))
            .and_then(|_| file.flush())
            .map_err(|e| LeaseError::Open { path: path.to_path_buf(), source: e })?;

        info!("🔒 Acquired instance lease {}", path.display());
        Ok(Self { file, path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLease {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
