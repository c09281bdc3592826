//! Staging index file parsing (versions 2, 3, and 4).

use bstr::BString;
use quarry_hash::{ObjectId, ID_LEN};
use quarry_object::EntryMode;

use crate::entry::{Stage, StageEntry, Stat, FIXED_ENTRY_LEN};
use crate::{Index, IndexError};

/// Magic bytes at the start of every staging index file.
pub(crate) const INDEX_SIGNATURE: &[u8; 4] = b"DIRC";

/// Parse a staging index from raw bytes.
///
/// The trailing checksum is recorded but not enforced here; callers that
/// want strictness use [`Index::verify_checksum`].
pub(crate) fn parse_index(data: &[u8]) -> Result<Index, IndexError> {
    if data.len() < 12 + ID_LEN {
        return Err(IndexError::InvalidHeader("index file too short".into()));
    }

    if &data[0..4] != INDEX_SIGNATURE {
        return Err(IndexError::InvalidHeader(format!(
            "bad signature: expected DIRC, got {:?}",
            &data[0..4]
        )));
    }
    let version = be_u32(&data[4..]);
    if !(2..=4).contains(&version) {
        return Err(IndexError::UnsupportedVersion(version));
    }
    let entry_count = be_u32(&data[8..]) as usize;

    let content_end = data.len() - ID_LEN;
    let mut cursor = 12;
    let mut entries = Vec::with_capacity(entry_count);
    let mut prev_path = BString::default();

    for _ in 0..entry_count {
        let (entry, next) = parse_entry(data, cursor, version, &prev_path, content_end)?;
        prev_path = entry.path.clone();
        entries.push(entry);
        cursor = next;
    }

    // Extension blocks sit between the entries and the checksum. This
    // core maintains none of their invariants, so they are skipped rather
    // than carried stale through a rewrite.
    while cursor + 8 <= content_end {
        let ext_len = be_u32(&data[cursor + 4..]) as usize;
        cursor += 8;
        if cursor + ext_len > content_end {
            return Err(IndexError::InvalidEntry {
                offset: cursor,
                reason: "extension data exceeds index bounds".into(),
            });
        }
        cursor += ext_len;
    }

    let checksum = ObjectId::from_bytes(&data[content_end..])
        .map_err(|_| IndexError::InvalidHeader("invalid trailing checksum".into()))?;

    Ok(Index {
        version,
        entries,
        checksum,
    })
}

fn parse_entry(
    data: &[u8],
    start: usize,
    version: u32,
    prev_path: &BString,
    content_end: usize,
) -> Result<(StageEntry, usize), IndexError> {
    if start + FIXED_ENTRY_LEN > content_end {
        return Err(IndexError::InvalidEntry {
            offset: start,
            reason: "entry too short".into(),
        });
    }

    let stat = Stat {
        ctime_sec: be_u32(&data[start..]),
        ctime_nsec: be_u32(&data[start + 4..]),
        mtime_sec: be_u32(&data[start + 8..]),
        mtime_nsec: be_u32(&data[start + 12..]),
        dev: be_u32(&data[start + 16..]),
        ino: be_u32(&data[start + 20..]),
        uid: be_u32(&data[start + 28..]),
        gid: be_u32(&data[start + 32..]),
        size: be_u32(&data[start + 36..]),
    };
    let mode_raw = be_u32(&data[start + 24..]);

    let id_at = start + 40;
    let id = ObjectId::from_bytes(&data[id_at..id_at + ID_LEN]).map_err(|_| {
        IndexError::InvalidEntry {
            offset: start,
            reason: "invalid object id".into(),
        }
    })?;

    let flags = be_u16(&data[id_at + ID_LEN..]);
    let mut cursor = start + FIXED_ENTRY_LEN;

    let assume_valid = flags & 0x8000 != 0;
    let extended = flags & 0x4000 != 0;
    let stage = Stage::from_u8(((flags >> 12) & 0x03) as u8).map_err(|_| {
        IndexError::InvalidEntry {
            offset: start,
            reason: "invalid stage bits".into(),
        }
    })?;

    let mut intent_to_add = false;
    let mut skip_worktree = false;
    if extended {
        if version < 3 {
            return Err(IndexError::InvalidEntry {
                offset: start,
                reason: "extended flags in a version 2 index".into(),
            });
        }
        if cursor + 2 > content_end {
            return Err(IndexError::InvalidEntry {
                offset: start,
                reason: "truncated extended flags".into(),
            });
        }
        let ext = be_u16(&data[cursor..]);
        cursor += 2;
        intent_to_add = ext & 0x2000 != 0;
        skip_worktree = ext & 0x4000 != 0;
    }

    let path = if version == 4 {
        parse_v4_path(data, &mut cursor, prev_path, content_end)?
    } else {
        let nul = data[cursor..content_end]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| IndexError::InvalidEntry {
                offset: start,
                reason: "missing nul in path".into(),
            })?;
        let path = BString::from(&data[cursor..cursor + nul]);

        // Fixed fields + path + nul + padding round up to a multiple of
        // eight, measured from the record start.
        let record_len = StageEntry::ondisk_len(nul, extended);
        cursor = (start + record_len).min(content_end);
        path
    };

    let entry = StageEntry {
        path,
        id,
        mode: EntryMode::from_raw(mode_raw),
        stage,
        stat,
        assume_valid,
        intent_to_add,
        skip_worktree,
    };
    Ok((entry, cursor))
}

/// Version 4 paths: a varint strip count against the previous path, then
/// a nul-terminated suffix, no padding.
fn parse_v4_path(
    data: &[u8],
    cursor: &mut usize,
    prev_path: &BString,
    content_end: usize,
) -> Result<BString, IndexError> {
    let (strip, consumed) = read_varint(&data[*cursor..content_end]);
    *cursor += consumed;

    let nul = data[*cursor..content_end]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| IndexError::InvalidEntry {
            offset: *cursor,
            reason: "missing nul in compressed path".into(),
        })?;
    let suffix = &data[*cursor..*cursor + nul];
    *cursor += nul + 1;

    let keep = prev_path.len().saturating_sub(strip);
    let mut path = BString::from(&prev_path[..keep]);
    path.extend_from_slice(suffix);
    Ok(path)
}

fn read_varint(data: &[u8]) -> (usize, usize) {
    let mut value: usize = 0;
    let mut shift = 0;
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        i += 1;
        value |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    (value, i)
}

fn be_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn be_u16(data: &[u8]) -> u16 {
    u16::from_be_bytes([data[0], data[1]])
}
