//! Pack entry header codecs.
//!
//! Every entry starts with a byte whose low four bits seed a size varint,
//! whose bits 5-7 carry the type number, and whose top bit flags
//! continuation. Delta entries are trailed by their base reference: a raw
//! 20-byte id for ref-deltas, or a distinct negative-offset varint for
//! ofs-deltas (each continuation byte adds an extra +1; that correction
//! must match existing packs bit for bit).

use quarry_hash::{ObjectId, ID_LEN};
use quarry_object::ObjectKind;

use crate::{PackEntryKind, PackError};

/// Parsed entry header.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub kind: PackEntryKind,
    /// Size the entry claims its decompressed payload has.
    pub declared_size: u64,
    /// Absolute offset where the compressed payload starts.
    pub data_offset: u64,
    /// Bytes consumed by the header (including any base reference).
    pub header_len: usize,
}

/// Parse an entry header beginning at `data[0]`, which sits at absolute
/// offset `entry_offset` in the pack.
pub fn parse_entry_header(data: &[u8], entry_offset: u64) -> Result<EntryHeader, PackError> {
    let corrupt = |reason: &str| PackError::InvalidFormat {
        offset: entry_offset,
        reason: reason.into(),
    };

    let mut pos = 0;
    let first = *data.first().ok_or_else(|| corrupt("truncated entry header"))?;
    pos += 1;

    let type_num = (first >> 4) & 0x07;
    let mut size: u64 = (first & 0x0f) as u64;
    let mut shift = 4;

    let mut byte = first;
    while byte & 0x80 != 0 {
        byte = *data.get(pos).ok_or_else(|| corrupt("truncated size varint"))?;
        pos += 1;
        size |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }

    let kind = match type_num {
        1..=4 => {
            let object_kind =
                ObjectKind::from_pack_type(type_num).expect("type numbers 1-4 map to kinds");
            PackEntryKind::Object(object_kind)
        }
        6 => {
            // Negative offset back to the base entry.
            let mut c = *data
                .get(pos)
                .ok_or_else(|| corrupt("truncated ofs-delta offset"))?;
            pos += 1;
            let mut distance = (c & 0x7f) as u64;
            while c & 0x80 != 0 {
                c = *data
                    .get(pos)
                    .ok_or_else(|| corrupt("truncated ofs-delta offset"))?;
                pos += 1;
                distance += 1;
                distance = (distance << 7) + (c & 0x7f) as u64;
            }
            if distance == 0 || distance > entry_offset {
                return Err(corrupt("ofs-delta base offset out of range"));
            }
            PackEntryKind::OfsDelta {
                base_offset: entry_offset - distance,
            }
        }
        7 => {
            let end = pos + ID_LEN;
            if end > data.len() {
                return Err(corrupt("truncated ref-delta base id"));
            }
            let base_id = ObjectId::from_bytes(&data[pos..end])
                .map_err(|_| corrupt("invalid ref-delta base id"))?;
            pos = end;
            PackEntryKind::RefDelta { base_id }
        }
        // 5 is reserved by the format; 0 is never valid.
        other => {
            return Err(PackError::InvalidFormat {
                offset: entry_offset,
                reason: format!("reserved entry type {other}"),
            })
        }
    };

    Ok(EntryHeader {
        kind,
        declared_size: size,
        data_offset: entry_offset + pos as u64,
        header_len: pos,
    })
}

/// Encode a type-and-size entry header. Delta base references are appended
/// separately by the caller.
pub fn encode_entry_header(type_num: u8, size: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    let mut s = size;

    let mut c = (type_num << 4) | (s & 0x0f) as u8;
    s >>= 4;

    while s > 0 {
        buf.push(c | 0x80);
        c = (s & 0x7f) as u8;
        s >>= 7;
    }
    buf.push(c);
    buf
}

/// Encode an ofs-delta negative offset.
pub fn encode_ofs_offset(distance: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    let mut d = distance;

    buf.push((d & 0x7f) as u8);
    d >>= 7;
    while d > 0 {
        d -= 1;
        buf.push(0x80 | (d & 0x7f) as u8);
        d >>= 7;
    }
    buf.reverse();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_header_roundtrip() {
        let header = encode_entry_header(3, 100);
        let parsed = parse_entry_header(&header, 0).unwrap();
        assert_eq!(parsed.kind, PackEntryKind::Object(ObjectKind::Blob));
        assert_eq!(parsed.declared_size, 100);
        assert_eq!(parsed.header_len, header.len());
        assert_eq!(parsed.data_offset, header.len() as u64);
    }

    #[test]
    fn small_commit_header_is_one_byte() {
        // (1 << 4) | 5, no continuation.
        let parsed = parse_entry_header(&[0x15], 0).unwrap();
        assert_eq!(parsed.kind, PackEntryKind::Object(ObjectKind::Commit));
        assert_eq!(parsed.declared_size, 5);
        assert_eq!(parsed.header_len, 1);
    }

    #[test]
    fn large_size_roundtrip() {
        for size in [0u64, 15, 16, 2047, 2048, 1_000_000, u32::MAX as u64 + 7] {
            let header = encode_entry_header(2, size);
            let parsed = parse_entry_header(&header, 0).unwrap();
            assert_eq!(parsed.declared_size, size, "size {size}");
        }
    }

    #[test]
    fn reserved_type_five_rejected() {
        // (5 << 4) | 1
        let err = parse_entry_header(&[0x51], 0).unwrap_err();
        assert!(matches!(err, PackError::InvalidFormat { .. }));
    }

    #[test]
    fn type_zero_rejected() {
        assert!(parse_entry_header(&[0x01], 0).is_err());
    }

    #[test]
    fn ofs_offset_roundtrip() {
        for distance in [1u64, 127, 128, 129, 255, 256, 16511, 16512, 1_000_000] {
            let encoded = encode_ofs_offset(distance);

            let mut pos = 0;
            let mut c = encoded[pos];
            pos += 1;
            let mut decoded = (c & 0x7f) as u64;
            while c & 0x80 != 0 {
                c = encoded[pos];
                pos += 1;
                decoded += 1;
                decoded = (decoded << 7) + (c & 0x7f) as u64;
            }
            assert_eq!(decoded, distance, "distance {distance}");
            assert_eq!(pos, encoded.len());
        }
    }

    #[test]
    fn ofs_two_byte_boundary_is_exact() {
        // The +1 correction makes 128 the first two-byte value and its
        // encoding 0x80 0x00.
        assert_eq!(encode_ofs_offset(127), vec![0x7f]);
        assert_eq!(encode_ofs_offset(128), vec![0x80, 0x00]);
        assert_eq!(encode_ofs_offset(129), vec![0x80, 0x01]);
    }

    #[test]
    fn ofs_delta_header_resolves_base_offset() {
        let mut data = encode_entry_header(6, 20);
        data.extend_from_slice(&encode_ofs_offset(100));
        let parsed = parse_entry_header(&data, 500).unwrap();
        assert_eq!(parsed.kind, PackEntryKind::OfsDelta { base_offset: 400 });
    }

    #[test]
    fn ofs_delta_beyond_start_rejected() {
        let mut data = encode_entry_header(6, 20);
        data.extend_from_slice(&encode_ofs_offset(100));
        assert!(parse_entry_header(&data, 50).is_err());
    }

    #[test]
    fn ref_delta_header_carries_base_id() {
        let base_id = ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        let mut data = encode_entry_header(7, 33);
        data.extend_from_slice(base_id.as_bytes());
        let parsed = parse_entry_header(&data, 12).unwrap();
        assert_eq!(parsed.kind, PackEntryKind::RefDelta { base_id });
        assert_eq!(parsed.header_len, data.len());
    }

    #[test]
    fn truncated_ref_delta_rejected() {
        let mut data = encode_entry_header(7, 33);
        data.extend_from_slice(&[0u8; 10]);
        assert!(parse_entry_header(&data, 12).is_err());
    }
}
