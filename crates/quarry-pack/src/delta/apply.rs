//! Delta resolution: replay an instruction stream against a base.

use std::io::Read;

use super::COPY_ZERO_LEN;
use crate::PackError;

/// Resolve a delta held in memory.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    apply_delta_from(base, delta)
}

/// Resolve a delta consumed through a streaming reader.
///
/// Instruction parsing may need bytes beyond a single read from the
/// source, so input flows through an internal lookahead buffer that
/// refills on demand.
pub fn apply_delta_from<R: Read>(base: &[u8], reader: R) -> Result<Vec<u8>, PackError> {
    let mut src = Lookahead::new(reader);

    let base_size = read_varint(&mut src)?.ok_or_else(|| truncated(&src, "base size"))?;
    let target_size = read_varint(&mut src)?.ok_or_else(|| truncated(&src, "target size"))?;

    if base_size != base.len() {
        return Err(PackError::InvalidDelta {
            offset: 0,
            reason: format!(
                "base size mismatch: delta says {base_size}, base is {}",
                base.len()
            ),
        });
    }

    let mut out = Vec::with_capacity(target_size);

    while let Some(cmd) = src.next_byte()? {
        if cmd & 0x80 != 0 {
            // Copy instruction.
            let mut offset: usize = 0;
            let mut len: usize = 0;

            for (bit, shift) in [(0x01u8, 0), (0x02, 8), (0x04, 16), (0x08, 24)] {
                if cmd & bit != 0 {
                    let byte = src
                        .next_byte()?
                        .ok_or_else(|| truncated(&src, "copy offset"))?;
                    offset |= (byte as usize) << shift;
                }
            }
            for (bit, shift) in [(0x10u8, 0), (0x20, 8), (0x40, 16)] {
                if cmd & bit != 0 {
                    let byte = src
                        .next_byte()?
                        .ok_or_else(|| truncated(&src, "copy length"))?;
                    len |= (byte as usize) << shift;
                }
            }
            if len == 0 {
                len = COPY_ZERO_LEN;
            }

            if offset + len > base.len() {
                return Err(PackError::InvalidDelta {
                    offset: src.consumed(),
                    reason: format!(
                        "copy out of bounds: offset={offset}, len={len}, base_len={}",
                        base.len()
                    ),
                });
            }
            out.extend_from_slice(&base[offset..offset + len]);
        } else if cmd != 0 {
            // Insert instruction.
            src.take(cmd as usize, &mut out)
                .map_err(|_| truncated(&src, "insert data"))?;
        } else {
            return Err(PackError::InvalidDelta {
                offset: src.consumed().saturating_sub(1),
                reason: "reserved opcode 0".into(),
            });
        }
    }

    if out.len() != target_size {
        return Err(PackError::InvalidDelta {
            offset: src.consumed(),
            reason: format!(
                "target size mismatch: delta says {target_size}, got {}",
                out.len()
            ),
        });
    }

    Ok(out)
}

fn truncated<R: Read>(src: &Lookahead<R>, what: &str) -> PackError {
    PackError::InvalidDelta {
        offset: src.consumed(),
        reason: format!("truncated {what}"),
    }
}

fn read_varint<R: Read>(src: &mut Lookahead<R>) -> Result<Option<usize>, PackError> {
    let mut value: usize = 0;
    let mut shift = 0;
    loop {
        let byte = match src.next_byte()? {
            Some(b) => b,
            None => return Ok(None),
        };
        value |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
    }
}

/// Buffered byte source over a streaming reader.
struct Lookahead<R> {
    inner: R,
    buf: Box<[u8; 8192]>,
    start: usize,
    end: usize,
    consumed: u64,
    eof: bool,
}

impl<R: Read> Lookahead<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Box::new([0u8; 8192]),
            start: 0,
            end: 0,
            consumed: 0,
            eof: false,
        }
    }

    /// Bytes handed out so far (for error positions).
    fn consumed(&self) -> u64 {
        self.consumed
    }

    fn refill(&mut self) -> Result<(), PackError> {
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        while !self.eof && self.end < self.buf.len() {
            let n = self.inner.read(&mut self.buf[self.end..])?;
            if n == 0 {
                self.eof = true;
            } else {
                self.end += n;
                break;
            }
        }
        Ok(())
    }

    /// Next byte, or `None` at end of stream.
    fn next_byte(&mut self) -> Result<Option<u8>, PackError> {
        if self.start == self.end {
            self.refill()?;
            if self.start == self.end {
                return Ok(None);
            }
        }
        let byte = self.buf[self.start];
        self.start += 1;
        self.consumed += 1;
        Ok(Some(byte))
    }

    /// Append exactly `n` bytes to `out`, erroring at a short stream.
    fn take(&mut self, mut n: usize, out: &mut Vec<u8>) -> Result<(), PackError> {
        while n > 0 {
            if self.start == self.end {
                self.refill()?;
                if self.start == self.end {
                    return Err(PackError::InvalidDelta {
                        offset: self.consumed,
                        reason: "unexpected end of stream".into(),
                    });
                }
            }
            let chunk = n.min(self.end - self.start);
            out.extend_from_slice(&self.buf[self.start..self.start + chunk]);
            self.start += chunk;
            self.consumed += chunk as u64;
            n -= chunk;
        }
        Ok(())
    }
}
