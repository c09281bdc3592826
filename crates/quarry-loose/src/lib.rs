//! Loose object storage: one zlib-compressed file per object.
//!
//! A loose object lives at `objects/XX/YYYY...` where `XX` is the first
//! digest byte in hex and `YYYY...` the remaining 38 characters. The file
//! holds the deflated frame `"{kind} {size}\0{content}"`.

mod read;
mod write;

pub use write::WriteOutcome;

use std::path::{Path, PathBuf};

use quarry_hash::ObjectId;

/// Interface to a loose object directory.
pub struct LooseStore {
    objects_dir: PathBuf,
    compression: flate2::Compression,
}

impl LooseStore {
    /// Open the loose store rooted at `objects_dir`.
    pub fn open(objects_dir: impl AsRef<Path>) -> Self {
        Self {
            objects_dir: objects_dir.as_ref().to_path_buf(),
            compression: flate2::Compression::default(),
        }
    }

    /// Set the zlib compression level (0-9).
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression = flate2::Compression::new(level);
    }

    /// On-disk path for an id.
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.objects_dir.join(id.loose_path())
    }

    /// Root of the objects directory.
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }
}

/// Errors from loose object operations.
#[derive(Debug, thiserror::Error)]
pub enum LooseError {
    #[error("corrupt loose object {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("decompression failed for {id}: {source}")]
    Decompress {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("hash mismatch at {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Object(#[from] quarry_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] quarry_hash::HashError),
}
