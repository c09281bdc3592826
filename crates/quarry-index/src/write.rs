//! Staging index serialization and tree building.

use std::io::Write;
use std::path::Path;

use quarry_hash::{Hasher, ObjectId};
use quarry_object::{EntryMode, ObjectKind, Tree, TreeEntry};
use quarry_odb::Odb;
use quarry_utils::lockfile::Lockfile;

use crate::entry::{Stage, StageEntry};
use crate::read::INDEX_SIGNATURE;
use crate::{Index, IndexError};

/// Write the index to `path` through the lock file protocol: the new file
/// appears under its final name only once completely written and hashed.
pub(crate) fn write_index(index: &Index, path: &Path) -> Result<(), IndexError> {
    let mut lock = Lockfile::acquire(path).map_err(|_| IndexError::LockFailed {
        path: path.to_path_buf(),
    })?;

    let data = serialize_index(index)?;
    lock.write_all(&data)?;
    lock.commit().map_err(|_| IndexError::LockFailed {
        path: path.to_path_buf(),
    })?;

    Ok(())
}

/// Serialize to the version 2 layout with a trailing hash over every byte
/// written before it.
pub(crate) fn serialize_index(index: &Index) -> Result<Vec<u8>, IndexError> {
    let mut buf = Vec::new();

    buf.extend_from_slice(INDEX_SIGNATURE);
    buf.extend_from_slice(&2u32.to_be_bytes());
    buf.extend_from_slice(&(index.len() as u32).to_be_bytes());

    for entry in index.iter() {
        write_entry(&mut buf, entry);
    }

    let checksum = Hasher::digest(&buf)
        .map_err(|_| IndexError::InvalidHeader("checksum computation failed".into()))?;
    buf.extend_from_slice(checksum.as_bytes());

    Ok(buf)
}

fn write_entry(buf: &mut Vec<u8>, entry: &StageEntry) {
    let record_start = buf.len();

    buf.extend_from_slice(&entry.stat.ctime_sec.to_be_bytes());
    buf.extend_from_slice(&entry.stat.ctime_nsec.to_be_bytes());
    buf.extend_from_slice(&entry.stat.mtime_sec.to_be_bytes());
    buf.extend_from_slice(&entry.stat.mtime_nsec.to_be_bytes());
    buf.extend_from_slice(&entry.stat.dev.to_be_bytes());
    buf.extend_from_slice(&entry.stat.ino.to_be_bytes());
    buf.extend_from_slice(&entry.mode.raw().to_be_bytes());
    buf.extend_from_slice(&entry.stat.uid.to_be_bytes());
    buf.extend_from_slice(&entry.stat.gid.to_be_bytes());
    buf.extend_from_slice(&entry.stat.size.to_be_bytes());
    buf.extend_from_slice(entry.id.as_bytes());
    buf.extend_from_slice(&entry.flags_word().to_be_bytes());
    buf.extend_from_slice(&entry.path);

    // Nul terminator plus padding to the next multiple of eight.
    let record_len = StageEntry::ondisk_len(entry.path.len(), false);
    buf.resize(record_start + record_len, 0);
}

/// Build tree objects from the resolved (stage-0) entries, writing every
/// tree through the store. Returns the root tree id.
pub(crate) fn write_tree_from_index(index: &Index, odb: &Odb) -> Result<ObjectId, IndexError> {
    let entries: Vec<&StageEntry> = index
        .iter()
        .filter(|e| e.stage == Stage::Merged)
        .collect();

    if entries.is_empty() {
        let empty = Tree::new().serialize_content();
        return Ok(odb.write_raw(ObjectKind::Tree, &empty)?.id());
    }

    build_tree(&entries, b"", odb)
}

fn build_tree(
    entries: &[&StageEntry],
    prefix: &[u8],
    odb: &Odb,
) -> Result<ObjectId, IndexError> {
    let mut tree = Tree::new();
    let mut i = 0;

    while i < entries.len() {
        let entry = entries[i];
        let local = &entry.path[prefix.len()..];

        if let Some(slash) = local.iter().position(|&b| b == b'/') {
            let dir_name = &local[..slash];

            // Entries are path-sorted, so one subtree is one contiguous run.
            let subtree_end = entries[i..]
                .iter()
                .position(|e| {
                    let p = &e.path[prefix.len()..];
                    !p.starts_with(dir_name) || (p.len() > slash && p[slash] != b'/')
                })
                .map(|n| i + n)
                .unwrap_or(entries.len());

            let mut sub_prefix = prefix.to_vec();
            sub_prefix.extend_from_slice(dir_name);
            sub_prefix.push(b'/');

            let sub_id = build_tree(&entries[i..subtree_end], &sub_prefix, odb)?;
            tree.entries.push(TreeEntry {
                mode: EntryMode::Tree,
                name: dir_name.into(),
                id: sub_id,
            });
            i = subtree_end;
        } else {
            tree.entries.push(TreeEntry {
                mode: entry.mode,
                name: local.into(),
                id: entry.id,
            });
            i += 1;
        }
    }

    tree.sort();
    Ok(odb.write_raw(ObjectKind::Tree, &tree.serialize_content())?.id())
}
