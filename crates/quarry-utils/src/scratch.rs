use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::Result;

/// A temporary output file that becomes visible only on `persist`.
///
/// The file is created in the same directory as its eventual target so the
/// final rename stays on one filesystem and is atomic. Dropping an
/// unpersisted `ScratchFile` deletes it, so a crash mid-write can never
/// leave a half-written file under the canonical name.
pub struct ScratchFile {
    inner: Option<tempfile::NamedTempFile>,
}

impl ScratchFile {
    /// Create a scratch file inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            inner: Some(tempfile::NamedTempFile::new_in(dir)?),
        })
    }

    /// Create a scratch file next to `target`.
    pub fn beside(target: impl AsRef<Path>) -> Result<Self> {
        let dir = target.as_ref().parent().unwrap_or(Path::new("."));
        Self::in_dir(dir)
    }

    /// Current on-disk path of the scratch file.
    pub fn path(&self) -> &Path {
        self.inner
            .as_ref()
            .map(|f| f.path())
            .unwrap_or(Path::new(""))
    }

    /// Flush, sync, and rename into place under `target`.
    pub fn persist(mut self, target: impl AsRef<Path>) -> Result<()> {
        if let Some(mut file) = self.inner.take() {
            file.flush()?;
            file.as_file().sync_all()?;
            file.persist(target.as_ref())
                .map_err(|e| crate::UtilError::Io(e.error))?;
        }
        Ok(())
    }
}

impl Write for ScratchFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("scratch file already persisted"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::other("scratch file already persisted"))?
            .flush()
    }
}
