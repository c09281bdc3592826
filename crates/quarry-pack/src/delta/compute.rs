//! Delta calculation.
//!
//! The encoder walks the target left to right against a suffix index over
//! the base. Whenever the longest base match for the unconsumed remainder
//! reaches the minimum length it becomes a copy instruction; otherwise
//! literal bytes accumulate into inserts up to the next position where a
//! minimum-length match begins.

use super::suffix::SuffixIndex;
use super::{encode_copy, encode_insert, write_size, MAX_COPY, MAX_INSERT};

/// Matches shorter than this never pay for a copy instruction.
pub const MIN_MATCH: usize = 3;

/// Compute a delta stream that transforms `base` into `target`.
///
/// The result always round-trips through `apply_delta`; it is not
/// guaranteed to be the smallest possible encoding.
pub fn compute_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut delta = Vec::new();
    delta.extend_from_slice(&write_size(base.len()));
    delta.extend_from_slice(&write_size(target.len()));

    if target.is_empty() {
        return delta;
    }

    let index = SuffixIndex::build(base);
    let mut tpos = 0;

    while tpos < target.len() {
        let rem = &target[tpos..];
        match index.longest_match(rem) {
            Some((offset, len)) if len >= MIN_MATCH => {
                emit_copy(&mut delta, offset, len);
                tpos += len;
            }
            _ => {
                let run = literal_run_len(&index, rem);
                emit_inserts(&mut delta, &rem[..run]);
                tpos += run;
            }
        }
    }

    delta
}

/// How far the literal run extends: up to the nearest future position
/// whose minimum-length seed occurs in the base, or the whole remainder.
fn literal_run_len(index: &SuffixIndex<'_>, rem: &[u8]) -> usize {
    for j in 1..rem.len() {
        if rem.len() - j < MIN_MATCH {
            break;
        }
        if index.contains(&rem[j..j + MIN_MATCH]) {
            return j;
        }
    }
    rem.len()
}

/// Emit a copy, splitting lengths beyond the 24-bit field.
fn emit_copy(delta: &mut Vec<u8>, offset: usize, mut len: usize) {
    let mut at = offset;
    while len > 0 {
        let chunk = len.min(MAX_COPY);
        delta.extend_from_slice(&encode_copy(at as u32, chunk));
        at += chunk;
        len -= chunk;
    }
}

/// Emit literals in insert-sized chunks.
fn emit_inserts(delta: &mut Vec<u8>, mut literal: &[u8]) {
    while !literal.is_empty() {
        let chunk = literal.len().min(MAX_INSERT);
        delta.extend_from_slice(&encode_insert(&literal[..chunk]));
        literal = &literal[chunk..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{apply_delta, parse_ops, DeltaOp};

    fn roundtrip(base: &[u8], target: &[u8]) {
        let delta = compute_delta(base, target);
        let rebuilt = apply_delta(base, &delta).unwrap();
        assert_eq!(rebuilt, target);
    }

    #[test]
    fn overlapping_base_yields_single_copy() {
        let delta = compute_delta(b"defabc", b"def");
        let (_, _, ops) = parse_ops(&delta).unwrap();
        assert_eq!(ops, vec![DeltaOp::Copy { offset: 0, len: 3 }]);
        assert_eq!(apply_delta(b"defabc", &delta).unwrap(), b"def");
    }

    #[test]
    fn disjoint_content_yields_single_insert() {
        let delta = compute_delta(b"abc", b"def");
        let (_, _, ops) = parse_ops(&delta).unwrap();
        assert_eq!(ops, vec![DeltaOp::Insert(b"def".to_vec())]);
        assert_eq!(apply_delta(b"abc", &delta).unwrap(), b"def");
    }

    #[test]
    fn identical_content() {
        let data = b"The quick brown fox jumps over the lazy dog";
        roundtrip(data, data);
    }

    #[test]
    fn empty_target() {
        roundtrip(b"something", b"");
    }

    #[test]
    fn empty_base() {
        roundtrip(b"", b"all literal content");
    }

    #[test]
    fn short_matches_become_literals() {
        // Every shared substring is below MIN_MATCH; the encoder must not
        // emit copies for them.
        let delta = compute_delta(b"ab", b"abab");
        let (_, _, ops) = parse_ops(&delta).unwrap();
        assert!(ops.iter().all(|op| matches!(op, DeltaOp::Insert(_))));
        assert_eq!(apply_delta(b"ab", &delta).unwrap(), b"abab");
    }

    #[test]
    fn literal_run_stops_at_next_match() {
        // "XY" has no base match; "hello world" resumes copying.
        let base = b"hello world";
        let target = b"XYhello world";
        let delta = compute_delta(base, target);
        let (_, _, ops) = parse_ops(&delta).unwrap();
        assert_eq!(
            ops,
            vec![
                DeltaOp::Insert(b"XY".to_vec()),
                DeltaOp::Copy { offset: 0, len: 11 },
            ]
        );
    }

    #[test]
    fn long_inserts_split_at_127() {
        let base = b"zzz";
        let target: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
        let delta = compute_delta(base, &target);
        let (_, _, ops) = parse_ops(&delta).unwrap();
        for op in &ops {
            if let DeltaOp::Insert(data) = op {
                assert!(data.len() <= 127);
            }
        }
        assert_eq!(apply_delta(base, &delta).unwrap(), target);
    }

    #[test]
    fn edit_in_the_middle() {
        let base: Vec<u8> = (0..2048u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut target = base.clone();
        target[4096] ^= 0xff;
        target[4097] ^= 0xff;
        roundtrip(&base, &target);

        let delta = compute_delta(&base, &target);
        assert!(delta.len() < target.len() / 4);
    }

    #[test]
    fn prepend_and_append() {
        let base = b"0123456789abcdef0123456789abcdef";
        let mut target = b"HEAD_".to_vec();
        target.extend_from_slice(base);
        target.extend_from_slice(b"_TAIL");
        roundtrip(base, &target);
    }

    #[test]
    fn binary_content_roundtrips() {
        let base: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
        let target: Vec<u8> = (0..=255u8).rev().cycle().take(900).collect();
        roundtrip(&base, &target);
    }
}
