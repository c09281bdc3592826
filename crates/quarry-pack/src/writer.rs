//! Writing `.pack` and `.idx` files.
//!
//! A writer may legally emit every object as a full (non-delta) entry;
//! delta entries exist for producers that want the size win.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use quarry_hash::{FanoutTable, Hasher, ObjectId};
use quarry_object::{frame, ObjectKind};
use quarry_utils::scratch::ScratchFile;

use crate::entry::{encode_entry_header, encode_ofs_offset};
use crate::{PackError, INDEX_MAGIC, INDEX_VERSION, PACK_HEADER_LEN, PACK_MAGIC, PACK_VERSION};

struct WrittenEntry {
    id: ObjectId,
    offset: u64,
    crc32: u32,
}

/// Builder for a new packfile.
pub struct PackWriter {
    file: std::fs::File,
    path: PathBuf,
    object_count: u32,
    entries: Vec<WrittenEntry>,
    position: u64,
}

impl PackWriter {
    /// Create a pack at `path` and write a placeholder header; the object
    /// count is fixed up in [`finish`](Self::finish).
    pub fn create(path: impl AsRef<Path>) -> Result<Self, PackError> {
        let path = path.as_ref().to_path_buf();
        let mut file = std::fs::File::create(&path)?;

        let mut header = [0u8; PACK_HEADER_LEN];
        header[0..4].copy_from_slice(PACK_MAGIC);
        header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
        file.write_all(&header)?;

        Ok(Self {
            file,
            path,
            object_count: 0,
            entries: Vec::new(),
            position: PACK_HEADER_LEN as u64,
        })
    }

    /// Append a full (non-delta) object. Returns its id and entry offset.
    pub fn add_object(
        &mut self,
        kind: ObjectKind,
        content: &[u8],
    ) -> Result<(ObjectId, u64), PackError> {
        let id = frame::hash_object(kind, content)?;
        let offset = self.position;

        let header = encode_entry_header(kind.pack_type(), content.len() as u64);
        let compressed = deflate(content)?;

        let crc32 = crc_of(&[&header, &compressed]);
        self.write_bytes(&header)?;
        self.write_bytes(&compressed)?;

        self.record(id, offset, crc32);
        Ok((id, offset))
    }

    /// Append a ref-delta entry naming its base by id.
    ///
    /// `target_id` is the id the delta resolves to; the writer cannot
    /// compute it without the base content.
    pub fn add_ref_delta(
        &mut self,
        base_id: ObjectId,
        target_id: ObjectId,
        delta: &[u8],
    ) -> Result<u64, PackError> {
        let offset = self.position;
        let header = encode_entry_header(7, delta.len() as u64);
        let compressed = deflate(delta)?;

        let crc32 = crc_of(&[&header, base_id.as_bytes(), &compressed]);
        self.write_bytes(&header)?;
        self.write_bytes(base_id.as_bytes())?;
        self.write_bytes(&compressed)?;

        self.record(target_id, offset, crc32);
        Ok(offset)
    }

    /// Append an ofs-delta entry whose base entry starts at the absolute
    /// offset `base_offset` earlier in this pack.
    pub fn add_ofs_delta(
        &mut self,
        base_offset: u64,
        target_id: ObjectId,
        delta: &[u8],
    ) -> Result<u64, PackError> {
        let offset = self.position;
        assert!(base_offset < offset, "ofs-delta base must precede the entry");

        let header = encode_entry_header(6, delta.len() as u64);
        let distance = encode_ofs_offset(offset - base_offset);
        let compressed = deflate(delta)?;

        let crc32 = crc_of(&[&header, &distance, &compressed]);
        self.write_bytes(&header)?;
        self.write_bytes(&distance)?;
        self.write_bytes(&compressed)?;

        self.record(target_id, offset, crc32);
        Ok(offset)
    }

    /// Entries written so far, for index construction.
    pub fn entries(&self) -> Vec<(ObjectId, u64, u32)> {
        self.entries
            .iter()
            .map(|e| (e.id, e.offset, e.crc32))
            .collect()
    }

    /// Offset the next entry would land at.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Fix the header's object count, append the trailer checksum, and
    /// return the pack path with its checksum.
    pub fn finish(mut self) -> Result<(PathBuf, ObjectId), PackError> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut header = [0u8; PACK_HEADER_LEN];
        header[0..4].copy_from_slice(PACK_MAGIC);
        header[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
        header[8..12].copy_from_slice(&self.object_count.to_be_bytes());
        self.file.write_all(&header)?;
        self.file.sync_all()?;
        drop(self.file);

        // The header changed after the fact, so hash the finished stream.
        let content = std::fs::read(&self.path)?;
        let mut hasher = Hasher::new();
        hasher.update(&content);
        let checksum = hasher.finalize()?;

        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(checksum.as_bytes())?;
        file.sync_all()?;

        Ok((self.path, checksum))
    }

    fn record(&mut self, id: ObjectId, offset: u64, crc32: u32) {
        self.entries.push(WrittenEntry { id, offset, crc32 });
        self.object_count += 1;
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<(), PackError> {
        self.file.write_all(data)?;
        self.position += data.len() as u64;
        Ok(())
    }
}

/// Write a v2 pack index from `(id, offset, crc32)` entries.
///
/// Entries are sorted in place by id. The index lands under `idx_path`
/// only after it is completely written (scratch file + rename). Returns
/// the index's own trailer checksum.
pub fn write_pack_index(
    idx_path: &Path,
    entries: &mut [(ObjectId, u64, u32)],
    pack_checksum: &ObjectId,
) -> Result<ObjectId, PackError> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let ids: Vec<ObjectId> = entries.iter().map(|(id, _, _)| *id).collect();

    let mut buf = Vec::new();
    buf.extend_from_slice(&INDEX_MAGIC);
    buf.extend_from_slice(&INDEX_VERSION.to_be_bytes());
    buf.extend_from_slice(&FanoutTable::build(&ids).to_bytes());

    for id in &ids {
        buf.extend_from_slice(id.as_bytes());
    }
    for (_, _, crc) in entries.iter() {
        buf.extend_from_slice(&crc.to_be_bytes());
    }

    // Offsets past 2^31 spill into the trailing 64-bit table.
    let mut large_offsets: Vec<u64> = Vec::new();
    for (_, offset, _) in entries.iter() {
        if *offset >= 0x8000_0000 {
            let spill = large_offsets.len() as u32;
            buf.extend_from_slice(&(0x8000_0000u32 | spill).to_be_bytes());
            large_offsets.push(*offset);
        } else {
            buf.extend_from_slice(&(*offset as u32).to_be_bytes());
        }
    }
    for offset in &large_offsets {
        buf.extend_from_slice(&offset.to_be_bytes());
    }

    buf.extend_from_slice(pack_checksum.as_bytes());

    let mut hasher = Hasher::new();
    hasher.update(&buf);
    let index_checksum = hasher.finalize()?;
    buf.extend_from_slice(index_checksum.as_bytes());

    let mut scratch = ScratchFile::beside(idx_path).map_err(scratch_io)?;
    scratch.write_all(&buf)?;
    scratch.persist(idx_path).map_err(scratch_io)?;

    Ok(index_checksum)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut out = Vec::new();
    let mut encoder = ZlibEncoder::new(&mut out, Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(out)
}

fn crc_of(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

fn scratch_io(e: quarry_utils::UtilError) -> PackError {
    match e {
        quarry_utils::UtilError::Io(io) => PackError::Io(io),
        other => PackError::Io(std::io::Error::other(other.to_string())),
    }
}
