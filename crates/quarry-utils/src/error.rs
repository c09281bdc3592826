use std::path::PathBuf;

/// Errors from the utility layer.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the lock file protocol.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock already held: {path}")]
    AlreadyLocked { path: PathBuf },

    #[error("failed to create lock file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to commit lock file {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
