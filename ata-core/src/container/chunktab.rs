//! Fixed-size chunk descriptor records, as embedded in the manifest.

use crate::crypto::aead::TAG_LEN;
use crate::error::Result;
use crate::util::buf::ByteReader;

/// offset (8) | stored_len (8) | plain_len (8) | tag (16)
pub const ENTRY_SIZE: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Archive-wide chunk ordinal; also the nonce counter. Not stored: it is
    /// the chunk's position across all entries in manifest order.
    pub seq: u64,
    /// Absolute container offset of the stored bytes.
    pub offset: u64,
    pub stored_len: u64,
    pub plain_len: u64,
    /// AEAD tag, or a truncated BLAKE3 checksum of the stored bytes when the
    /// archive is not encrypted.
    pub tag: [u8; TAG_LEN],
}

impl ChunkDescriptor {
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.stored_len)
    }
}

pub fn write_entry(out: &mut Vec<u8>, d: &ChunkDescriptor) {
    out.extend_from_slice(&d.offset.to_le_bytes());
    out.extend_from_slice(&d.stored_len.to_le_bytes());
    out.extend_from_slice(&d.plain_len.to_le_bytes());
    out.extend_from_slice(&d.tag);
}

pub fn read_entry(r: &mut ByteReader<'_>, seq: u64) -> Result<ChunkDescriptor> {
    Ok(ChunkDescriptor {
        seq,
        offset: r.u64_le()?,
        stored_len: r.u64_le()?,
        plain_len: r.u64_le()?,
        tag: r.array()?,
    })
}
