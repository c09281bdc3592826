use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{LockError, UtilError};
use crate::Result;

const LOCK_SUFFIX: &str = ".lock";

/// RAII lock file guard over a target path.
///
/// Follows the classic lock file protocol: `<path>.lock` is created with
/// `O_CREAT|O_EXCL`, new content is written to it, and `commit` atomically
/// renames it over the target. If the guard is dropped without committing,
/// the lock file is removed and the target is untouched.
#[derive(Debug)]
pub struct Lockfile {
    /// Final destination (without the `.lock` suffix).
    target: PathBuf,
    /// The `.lock` path actually held on disk.
    lock_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl Lockfile {
    /// Take the lock for `target`, failing if another holder exists.
    pub fn acquire(target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let lock_path = PathBuf::from(format!("{}{}", target.display(), LOCK_SUFFIX));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    UtilError::Lock(LockError::AlreadyLocked {
                        path: lock_path.clone(),
                    })
                } else {
                    UtilError::Lock(LockError::Create {
                        path: lock_path.clone(),
                        source: e,
                    })
                }
            })?;

        Ok(Self {
            target,
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    /// Non-blocking variant: `Ok(None)` when another holder has the lock.
    pub fn try_acquire(target: impl AsRef<Path>) -> Result<Option<Self>> {
        match Self::acquire(target) {
            Ok(lock) => Ok(Some(lock)),
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The final destination path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The `.lock` path held on disk.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Flush, sync, and atomically rename the lock file over the target.
    pub fn commit(mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().and_then(|_| file.sync_all()).map_err(|e| {
                UtilError::Lock(LockError::Commit {
                    path: self.lock_path.clone(),
                    source: e,
                })
            })?;
        }
        self.file.take();

        fs::rename(&self.lock_path, &self.target).map_err(|e| {
            UtilError::Lock(LockError::Commit {
                path: self.lock_path.clone(),
                source: e,
            })
        })?;

        self.committed = true;
        Ok(())
    }

    /// Drop the lock without touching the target.
    pub fn rollback(mut self) -> Result<()> {
        self.file.take();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Write for Lockfile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .flush()
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
