//! Unsigned LEB128 varints, as used for manifest counts and lengths.

use crate::error::{AtaError, Result};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

pub fn put_uvarint(out: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        out.push((x as u8) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

/// Decode one varint from the front of `buf`, advancing it.
pub fn get_uvarint(buf: &mut &[u8]) -> Result<u64> {
    let mut x: u64 = 0;
    let mut s: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let Some(&byte) = buf.get(i) else {
            return Err(AtaError::Format("truncated varint".into()));
        };
        if byte < 0x80 {
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(AtaError::Format("varint overflows u64".into()));
            }
            x |= (byte as u64) << s;
            *buf = &buf[i + 1..];
            return Ok(x);
        }
        x |= ((byte & 0x7f) as u64) << s;
        s += 7;
    }
    Err(AtaError::Format("varint too long".into()))
}

pub fn uvarint_len(mut x: u64) -> usize {
    let mut n = 1;
    while x >= 0x80 {
        x >>= 7;
        n += 1;
    }
    n
}
