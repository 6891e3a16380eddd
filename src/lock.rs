use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use crate::error::PipelineError;

pub const LOCK_FILE: &str = "clustering-pipeline.lock";

/// Exclusive advisory lock held for the lifetime of one pipeline run.
///
/// Released when dropped (the OS also releases it if the process dies).
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the "clustering pipeline" lock in `dir`, failing immediately
    /// when another run holds it
    pub fn acquire(dir: &Path) -> Result<Self, PipelineError> {
        Self::acquire_at(dir.join(LOCK_FILE))
    }

    /// Take the writer lock of a store snapshot, kept next to it as
    /// `<snapshot>.lock`
    pub fn for_store(snapshot: &Path) -> Result<Self, PipelineError> {
        Self::acquire_at(store_lock_path(snapshot))
    }

    fn acquire_at(path: PathBuf) -> Result<Self, PipelineError> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                PipelineError::Artifact(anyhow::anyhow!(
                    "failed to open lock file {:?}: {}",
                    path,
                    e
                ))
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(PipelineError::RunLocked(path));
        }

        // Holder pid is informational only
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());

        debug!("Acquired run lock {:?}", path);
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn store_lock_path(snapshot: &Path) -> PathBuf {
    let mut path = snapshot.as_os_str().to_owned();
    path.push(".lock");
    PathBuf::from(path)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = RunLock::acquire(dir.path()).unwrap();

        let err = RunLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::RunLocked(_)));

        drop(first);
        assert!(RunLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_store_lock_sits_next_to_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("store.json");
        let held = RunLock::for_store(&snapshot).unwrap();
        assert_eq!(held.path(), dir.path().join("store.json.lock"));

        assert!(matches!(
            RunLock::for_store(&snapshot).unwrap_err(),
            PipelineError::RunLocked(_)
        ));
        // a run lock in the same directory is a different lock
        assert!(RunLock::acquire(dir.path()).is_ok());
    }
}
