//! The `"{kind} {size}\0"` framing that precedes every stored object.
//!
//! The frame, not the bare content, is what gets hashed and compressed:
//! identity is derived from kind + size + content together.

use quarry_hash::{HashError, Hasher, ObjectId};

use crate::{ObjectError, ObjectKind};

/// Parse a framing header.
///
/// Returns `(kind, content_size, header_length)` where `header_length`
/// includes the null terminator.
pub fn parse_header(data: &[u8]) -> Result<(ObjectKind, usize, usize), ObjectError> {
    let null_pos = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| ObjectError::InvalidHeader("missing null terminator".into()))?;

    let header = &data[..null_pos];
    let space_pos = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ObjectError::InvalidHeader("missing space in header".into()))?;

    let kind = ObjectKind::from_bytes(&header[..space_pos])?;

    let size_str = std::str::from_utf8(&header[space_pos + 1..])
        .map_err(|_| ObjectError::InvalidHeader("non-ASCII size".into()))?;
    let content_size: usize = size_str
        .parse()
        .map_err(|_| ObjectError::InvalidHeader(format!("invalid size: {size_str}")))?;

    Ok((kind, content_size, null_pos + 1))
}

/// Write a framing header: `"{kind} {size}\0"`.
pub fn write_header(kind: ObjectKind, content_size: usize) -> Vec<u8> {
    format!("{kind} {content_size}\0").into_bytes()
}

/// Hash a frame without materializing it: `"{kind} {len}\0{content}"`.
pub fn hash_object(kind: ObjectKind, content: &[u8]) -> Result<ObjectId, HashError> {
    let mut h = Hasher::new();
    h.update(&write_header(kind, content.len()));
    h.update(content);
    h.finalize()
}
