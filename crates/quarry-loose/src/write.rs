use std::fs;
use std::io::Write;

use flate2::write::ZlibEncoder;
use quarry_hash::ObjectId;
use quarry_object::{frame, Object, ObjectKind};
use quarry_utils::scratch::ScratchFile;

use crate::{LooseError, LooseStore};

/// Result of a loose write.
///
/// Writing a duplicate is an expected, recognized outcome: content
/// addressing makes the second write a no-op, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The object was new and has been stored.
    Created(ObjectId),
    /// An object with this id already existed; nothing was written.
    AlreadyExists(ObjectId),
}

impl WriteOutcome {
    /// The id of the written (or pre-existing) object.
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Created(id) | Self::AlreadyExists(id) => *id,
        }
    }

    /// Whether this write created a new object.
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

impl LooseStore {
    /// Write a parsed object.
    pub fn write(&self, obj: &Object) -> Result<WriteOutcome, LooseError> {
        self.write_raw(obj.kind(), &obj.serialize_content())
    }

    /// Frame, hash, compress, and store raw content of a known kind.
    ///
    /// The frame is hashed before anything touches the disk; when the id
    /// already exists the stored file is left alone. New objects are
    /// written through a scratch file in the objects directory and only
    /// renamed into place once complete.
    pub fn write_raw(
        &self,
        kind: ObjectKind,
        content: &[u8],
    ) -> Result<WriteOutcome, LooseError> {
        let header = frame::write_header(kind, content.len());
        let id = frame::hash_object(kind, content)?;

        if self.contains(&id) {
            return Ok(WriteOutcome::AlreadyExists(id));
        }

        let final_path = self.object_path(&id);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut scratch = ScratchFile::in_dir(self.objects_dir()).map_err(util_io)?;
        {
            let mut encoder = ZlibEncoder::new(&mut scratch, self.compression());
            encoder.write_all(&header)?;
            encoder.write_all(content)?;
            encoder.finish()?;
        }

        // Loose objects are immutable once visible; 0444 matches that.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(scratch.path(), fs::Permissions::from_mode(0o444))?;
        }

        match scratch.persist(&final_path) {
            Ok(()) => Ok(WriteOutcome::Created(id)),
            // Another writer got there first; content addressing makes
            // that equivalent to our own success.
            Err(_) if final_path.exists() => Ok(WriteOutcome::AlreadyExists(id)),
            Err(e) => Err(util_io(e)),
        }
    }

    /// Write from a stream with a declared size.
    pub fn write_stream(
        &self,
        kind: ObjectKind,
        size: usize,
        reader: &mut dyn std::io::Read,
    ) -> Result<WriteOutcome, LooseError> {
        let mut content = Vec::with_capacity(size);
        reader.read_to_end(&mut content)?;
        if content.len() != size {
            return Err(LooseError::Corrupt {
                id: String::new(),
                reason: format!(
                    "stream size mismatch: declared {size}, got {}",
                    content.len()
                ),
            });
        }
        self.write_raw(kind, &content)
    }

    fn compression(&self) -> flate2::Compression {
        self.compression
    }
}

fn util_io(e: quarry_utils::UtilError) -> LooseError {
    match e {
        quarry_utils::UtilError::Io(io) => LooseError::Io(io),
        other => LooseError::Io(std::io::Error::other(other.to_string())),
    }
}
