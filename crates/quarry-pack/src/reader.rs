//! Reading `.pack` files through their index.

use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::bufread::ZlibDecoder;
use memmap2::Mmap;
use quarry_hash::{Hasher, ObjectId, ID_LEN};
use quarry_object::ObjectKind;

use crate::delta::apply_delta;
use crate::entry::parse_entry_header;
use crate::index::PackIndex;
use crate::{
    PackEntryKind, PackError, PackedObject, MAX_DELTA_CHAIN, PACK_HEADER_LEN, PACK_MAGIC,
    PACK_VERSION,
};

/// A memory-mapped packfile with its index.
pub struct PackReader {
    data: Mmap,
    index: PackIndex,
    path: PathBuf,
    object_count: u32,
}

impl PackReader {
    /// Open a `.pack` file and the `.idx` beside it.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self, PackError> {
        let path = pack_path.as_ref().to_path_buf();
        let idx_path = path.with_extension("idx");

        let file = std::fs::File::open(&path)?;
        let data = unsafe { Mmap::map(&file)? };

        let object_count = validate_header(&data)?;

        let index = PackIndex::open(&idx_path)?;
        if index.len() != object_count {
            return Err(PackError::InvalidFormat {
                offset: 8,
                reason: format!(
                    "pack has {object_count} objects but index has {}",
                    index.len()
                ),
            });
        }

        Ok(Self {
            data,
            index,
            path,
            object_count,
        })
    }

    /// Read an object by id; `None` when this pack does not hold it.
    pub fn read_object(&self, id: &ObjectId) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(id) {
            Some(offset) => self.read_at_offset(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Read an object by id with an external resolver for ref-delta bases
    /// that live outside this pack (thin packs, cross-pack deltas).
    pub fn read_object_with(
        &self,
        id: &ObjectId,
        resolve_base: impl Fn(&ObjectId) -> Option<(ObjectKind, Vec<u8>)>,
    ) -> Result<Option<PackedObject>, PackError> {
        match self.index.lookup(id) {
            Some(offset) => self.resolve_at(offset, &resolve_base).map(Some),
            None => Ok(None),
        }
    }

    /// Read the object stored at a known entry offset.
    pub fn read_at_offset(&self, offset: u64) -> Result<PackedObject, PackError> {
        self.resolve_at(offset, &|_| None)
    }

    /// Walk the delta chain iteratively: collect delta payloads inward
    /// until a full object appears, then apply them back out.
    fn resolve_at(
        &self,
        offset: u64,
        resolve_base: &dyn Fn(&ObjectId) -> Option<(ObjectKind, Vec<u8>)>,
    ) -> Result<PackedObject, PackError> {
        let mut chain: Vec<Vec<u8>> = Vec::new();
        let mut current = offset;

        loop {
            if chain.len() >= MAX_DELTA_CHAIN {
                return Err(PackError::DeltaChainTooDeep {
                    offset,
                    max_depth: MAX_DELTA_CHAIN,
                });
            }

            let header = parse_entry_header(&self.data[current as usize..], current)?;
            let payload = self.inflate(header.data_offset, header.declared_size, current)?;

            match header.kind {
                PackEntryKind::Object(kind) => {
                    let mut data = payload;
                    for delta in chain.iter().rev() {
                        data = apply_delta(&data, delta)?;
                    }
                    return Ok(PackedObject { kind, data });
                }
                PackEntryKind::OfsDelta { base_offset } => {
                    chain.push(payload);
                    current = base_offset;
                }
                PackEntryKind::RefDelta { base_id } => {
                    chain.push(payload);
                    if let Some(base_offset) = self.index.lookup(&base_id) {
                        current = base_offset;
                    } else if let Some((kind, base_data)) = resolve_base(&base_id) {
                        let mut data = base_data;
                        for delta in chain.iter().rev() {
                            data = apply_delta(&data, delta)?;
                        }
                        return Ok(PackedObject { kind, data });
                    } else {
                        return Err(PackError::UnresolvedDelta {
                            offset: current,
                            base: base_id.to_hex(),
                        });
                    }
                }
            }
        }
    }

    /// Whether this pack holds `id`.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Number of objects in the pack.
    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    /// The pack's index.
    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    /// Path to the `.pack` file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw mapped bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Recompute the stream hash and compare it with the trailer.
    pub fn verify_checksum(&self) -> Result<(), PackError> {
        let content = &self.data[..self.data.len() - ID_LEN];
        let stored = ObjectId::from_bytes(&self.data[self.data.len() - ID_LEN..])
            .expect("trailer is 20 bytes");

        let mut hasher = Hasher::new();
        hasher.update(content);
        let computed = hasher.finalize()?;

        if computed != stored {
            return Err(PackError::HashMismatch {
                expected: stored,
                actual: computed,
            });
        }
        Ok(())
    }

    /// Iterate every object, in index (id-sorted) order.
    pub fn iter(&self) -> PackObjectIter<'_> {
        PackObjectIter { pack: self, pos: 0 }
    }

    fn inflate(
        &self,
        data_offset: u64,
        declared_size: u64,
        entry_offset: u64,
    ) -> Result<Vec<u8>, PackError> {
        let compressed = &self.data[data_offset as usize..];
        let mut decoder = ZlibDecoder::new(compressed);
        let mut out = Vec::with_capacity(declared_size as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| PackError::InvalidFormat {
                offset: entry_offset,
                reason: format!("inflate failed: {e}"),
            })?;
        if out.len() as u64 != declared_size {
            return Err(PackError::InvalidFormat {
                offset: entry_offset,
                reason: format!(
                    "declared size {declared_size} but payload inflated to {}",
                    out.len()
                ),
            });
        }
        Ok(out)
    }
}

/// Validate a pack header, returning the object count.
pub fn validate_header(data: &[u8]) -> Result<u32, PackError> {
    if data.len() < PACK_HEADER_LEN + ID_LEN {
        return Err(PackError::InvalidFormat {
            offset: 0,
            reason: "file too small".into(),
        });
    }
    if &data[0..4] != PACK_MAGIC {
        return Err(PackError::InvalidFormat {
            offset: 0,
            reason: "bad pack magic".into(),
        });
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(PackError::UnsupportedVersion(version));
    }
    Ok(u32::from_be_bytes([data[8], data[9], data[10], data[11]]))
}

/// Iterator over `(id, object)` pairs in a pack.
pub struct PackObjectIter<'a> {
    pack: &'a PackReader,
    pos: u32,
}

impl Iterator for PackObjectIter<'_> {
    type Item = Result<(ObjectId, PackedObject), PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.pack.object_count {
            return None;
        }
        let id = self.pack.index.id_at(self.pos);
        let offset = self.pack.index.offset_at(self.pos);
        self.pos += 1;
        Some(self.pack.read_at_offset(offset).map(|obj| (id, obj)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.pack.object_count - self.pos) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::compute_delta;
    use crate::writer::{write_pack_index, PackWriter};
    use quarry_object::frame;

    fn write_simple_pack(
        dir: &Path,
        name: &str,
        objects: &[(ObjectKind, &[u8])],
    ) -> (PathBuf, Vec<ObjectId>) {
        let pack_path = dir.join(format!("{name}.pack"));
        let mut writer = PackWriter::create(&pack_path).unwrap();
        let mut ids = Vec::new();
        for (kind, content) in objects {
            let (id, _) = writer.add_object(*kind, content).unwrap();
            ids.push(id);
        }
        let mut entries = writer.entries();
        let (_, checksum) = writer.finish().unwrap();
        write_pack_index(&pack_path.with_extension("idx"), &mut entries, &checksum).unwrap();
        (pack_path, ids)
    }

    #[test]
    fn read_single_blob() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"Hello, packfile world!";
        let (path, ids) = write_simple_pack(dir.path(), "one", &[(ObjectKind::Blob, content)]);

        let pack = PackReader::open(&path).unwrap();
        assert_eq!(pack.object_count(), 1);

        let obj = pack.read_object(&ids[0]).unwrap().unwrap();
        assert_eq!(obj.kind, ObjectKind::Blob);
        assert_eq!(obj.data, content);
    }

    #[test]
    fn read_multiple_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let commit: &[u8] = b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\nauthor T <t@t> 0 +0000\ncommitter T <t@t> 0 +0000\n\nmsg\n";
        let objects = vec![
            (ObjectKind::Blob, b"blob content".as_slice()),
            (ObjectKind::Blob, b"another blob".as_slice()),
            (ObjectKind::Commit, commit),
        ];
        let (path, ids) = write_simple_pack(dir.path(), "multi", &objects);

        let pack = PackReader::open(&path).unwrap();
        assert_eq!(pack.object_count(), 3);
        for (i, (kind, content)) in objects.iter().enumerate() {
            let obj = pack.read_object(&ids[i]).unwrap().unwrap();
            assert_eq!(obj.kind, *kind);
            assert_eq!(obj.data, *content);
        }
    }

    #[test]
    fn missing_object_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let (path, ids) = write_simple_pack(dir.path(), "one", &[(ObjectKind::Blob, b"x")]);
        let pack = PackReader::open(&path).unwrap();

        assert!(pack.contains(&ids[0]));
        let missing = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        assert!(!pack.contains(&missing));
        assert_eq!(pack.read_object(&missing).unwrap(), None);
    }

    #[test]
    fn read_ofs_delta_chain() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("delta.pack");

        let base = b"Hello, this is the base object content for delta testing!";
        let target = b"Hello, this is the modified object content for delta testing!";

        let mut writer = PackWriter::create(&pack_path).unwrap();
        let (base_id, base_offset) = writer.add_object(ObjectKind::Blob, base).unwrap();

        let target_id = frame::hash_object(ObjectKind::Blob, target).unwrap();
        let delta = compute_delta(base, target);
        writer
            .add_ofs_delta(base_offset, target_id, &delta)
            .unwrap();

        let mut entries = writer.entries();
        let (_, checksum) = writer.finish().unwrap();
        write_pack_index(&pack_path.with_extension("idx"), &mut entries, &checksum).unwrap();

        let pack = PackReader::open(&pack_path).unwrap();
        assert_eq!(pack.read_object(&base_id).unwrap().unwrap().data, base);
        let resolved = pack.read_object(&target_id).unwrap().unwrap();
        assert_eq!(resolved.kind, ObjectKind::Blob);
        assert_eq!(resolved.data, target);
    }

    #[test]
    fn ref_delta_outside_pack_uses_resolver() {
        let dir = tempfile::tempdir().unwrap();
        let pack_path = dir.path().join("thin.pack");

        let base = b"external base content, long enough to delta against";
        let base_id = frame::hash_object(ObjectKind::Blob, base).unwrap();
        let target = b"external base content, slightly edited to delta against";
        let target_id = frame::hash_object(ObjectKind::Blob, target).unwrap();

        let mut writer = PackWriter::create(&pack_path).unwrap();
        let delta = compute_delta(base, target);
        writer.add_ref_delta(base_id, target_id, &delta).unwrap();
        let mut entries = writer.entries();
        let (_, checksum) = writer.finish().unwrap();
        write_pack_index(&pack_path.with_extension("idx"), &mut entries, &checksum).unwrap();

        let pack = PackReader::open(&pack_path).unwrap();

        // Without a resolver the base never appears.
        assert!(matches!(
            pack.read_object(&target_id),
            Err(PackError::UnresolvedDelta { .. })
        ));

        let resolved = pack
            .read_object_with(&target_id, |id| {
                (*id == base_id).then(|| (ObjectKind::Blob, base.to_vec()))
            })
            .unwrap()
            .unwrap();
        assert_eq!(resolved.data, target);
    }

    #[test]
    fn verify_checksum_detects_flipped_bit() {
        let dir = tempfile::tempdir().unwrap();
        let (path, _) = write_simple_pack(dir.path(), "sum", &[(ObjectKind::Blob, b"payload")]);

        let pack = PackReader::open(&path).unwrap();
        pack.verify_checksum().unwrap();
        drop(pack);

        // Flip one content byte and re-open; the index still matches the
        // object count so open succeeds, but verification must not.
        let mut bytes = std::fs::read(&path).unwrap();
        let at = PACK_HEADER_LEN + 1;
        bytes[at] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let pack = PackReader::open(&path).unwrap();
        assert!(matches!(
            pack.verify_checksum(),
            Err(PackError::HashMismatch { .. })
        ));
    }

    #[test]
    fn iterate_all_objects() {
        let dir = tempfile::tempdir().unwrap();
        let objects = vec![
            (ObjectKind::Blob, b"first".as_slice()),
            (ObjectKind::Blob, b"second".as_slice()),
            (ObjectKind::Blob, b"third".as_slice()),
        ];
        let (path, ids) = write_simple_pack(dir.path(), "iter", &objects);
        let pack = PackReader::open(&path).unwrap();

        let mut seen = Vec::new();
        for item in pack.iter() {
            let (id, obj) = item.unwrap();
            assert!(!obj.data.is_empty());
            seen.push(id);
        }
        assert_eq!(seen.len(), 3);
        for id in ids {
            assert!(seen.contains(&id));
        }
    }
}
