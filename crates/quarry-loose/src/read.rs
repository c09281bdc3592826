use std::fs;
use std::io::Read;

use flate2::read::ZlibDecoder;
use quarry_hash::{Hasher, ObjectId};
use quarry_object::{frame, Object, ObjectKind};

use crate::{LooseError, LooseStore};

impl LooseStore {
    /// Whether a loose object exists.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    /// Read a loose object by id.
    ///
    /// Returns `Ok(None)` when the object does not exist. The decompressed
    /// frame is re-hashed and checked against the id derived from the file
    /// path, so a corrupted file fails with
    /// [`HashMismatch`](LooseError::HashMismatch) instead of yielding wrong
    /// content.
    pub fn read(&self, id: &ObjectId) -> Result<Option<Object>, LooseError> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        let frame_bytes = decompress_all(&compressed, id)?;

        let actual = Hasher::digest(&frame_bytes)?;
        if actual != *id {
            return Err(LooseError::HashMismatch {
                path,
                expected: id.to_hex(),
                actual: actual.to_hex(),
            });
        }

        Ok(Some(Object::parse(&frame_bytes)?))
    }

    /// Read just `(kind, size)` from a bounded decompression prefix.
    ///
    /// Returns `Ok(None)` when the object does not exist.
    pub fn read_header(
        &self,
        id: &ObjectId,
    ) -> Result<Option<(ObjectKind, usize)>, LooseError> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LooseError::Io(e)),
        };

        // Frame headers fit well within 64 bytes.
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut buf = [0u8; 64];
        let mut filled = 0;

        loop {
            if filled >= buf.len() {
                return Err(LooseError::Corrupt {
                    id: id.to_hex(),
                    reason: "frame header exceeds 64 bytes".into(),
                });
            }
            let n = decoder
                .read(&mut buf[filled..])
                .map_err(|e| LooseError::Decompress {
                    id: id.to_hex(),
                    source: e,
                })?;
            if n == 0 {
                return Err(LooseError::Corrupt {
                    id: id.to_hex(),
                    reason: "unexpected EOF before header terminator".into(),
                });
            }
            filled += n;
            if buf[..filled].contains(&0) {
                break;
            }
        }

        let (kind, size, _header_len) = frame::parse_header(&buf[..filled])?;
        Ok(Some((kind, size)))
    }
}

fn decompress_all(compressed: &[u8], id: &ObjectId) -> Result<Vec<u8>, LooseError> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| LooseError::Decompress {
            id: id.to_hex(),
            source: e,
        })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_object_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let id = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        assert!(store.read(&id).unwrap().is_none());
        assert!(!store.contains(&id));
    }

    #[test]
    fn read_header_without_full_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let id = store
            .write_raw(ObjectKind::Blob, &vec![b'x'; 4096])
            .unwrap()
            .id();

        let (kind, size) = store.read_header(&id).unwrap().unwrap();
        assert_eq!(kind, ObjectKind::Blob);
        assert_eq!(size, 4096);
    }

    #[test]
    fn corrupted_object_fails_with_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let id = store.write_raw(ObjectKind::Blob, b"pristine").unwrap().id();

        // Overwrite the stored file with a frame that hashes differently.
        let path = store.object_path(&id);
        let mut perms = fs::metadata(&path).unwrap().permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(0o644);
        }
        fs::set_permissions(&path, perms).unwrap();
        let mut corrupt = Vec::new();
        {
            let mut enc =
                flate2::write::ZlibEncoder::new(&mut corrupt, flate2::Compression::default());
            enc.write_all(b"blob 8\0tampered").unwrap();
            enc.finish().unwrap();
        }
        fs::write(&path, &corrupt).unwrap();

        match store.read(&id) {
            Err(LooseError::HashMismatch { expected, .. }) => {
                assert_eq!(expected, id.to_hex());
            }
            other => panic!("expected HashMismatch, got {other:?}"),
        }
    }

    #[test]
    fn garbage_file_fails_to_decompress() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path());
        let id = ObjectId::from_hex("aa39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();

        let path = store.object_path(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not zlib at all").unwrap();

        assert!(matches!(
            store.read(&id),
            Err(LooseError::Decompress { .. })
        ));
    }
}
