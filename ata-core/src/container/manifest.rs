//! The manifest: one record per logical entry, written once after all chunk
//! data so its size never has to be known up front.
//!
//! ```text
//! entry_count (varint) ; repeated {
//!     path_len (varint) + path, kind (u8), size (u64), perms (u32), mtime (i64),
//!     checksum (32), chunk_count (varint), repeated chunk descriptor (40),
//!     [symlink] target_len (varint) + target }
//! ```

use crate::chunking::fixed::MAX_CHUNK_SIZE;
use crate::container::chunktab::{self, ChunkDescriptor, ENTRY_SIZE};
use crate::error::{AtaError, Result};
use crate::policy::Limits;
use crate::util::buf::ByteReader;
use crate::util::sanitize::EntryPath;
use crate::util::varint::put_uvarint;
use std::collections::HashSet;
use std::ops::Range;

pub const CHECKSUM_LEN: usize = 32;
/// Permission bits kept in the manifest.
pub const MODE_MASK: u32 = 0o7777;

// path_len + 1-byte path + kind + size + perms + mtime + checksum + chunk_count
const MIN_ENTRY_LEN: usize = 1 + 1 + 1 + 8 + 4 + 8 + CHECKSUM_LEN + 1;

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File = 0,
    Dir = 1,
    Symlink = 2,
}

impl EntryKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(EntryKind::File),
            1 => Ok(EntryKind::Dir),
            2 => Ok(EntryKind::Symlink),
            other => Err(AtaError::Format(format!("unknown entry kind {other}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "symlink",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: EntryPath,
    pub kind: EntryKind,
    /// Plaintext length for files, target length for symlinks, 0 for dirs.
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
    pub checksum: [u8; CHECKSUM_LEN],
    pub chunks: Vec<ChunkDescriptor>,
    pub link_target: Option<String>,
}

impl ManifestEntry {
    pub fn new(path: EntryPath, kind: EntryKind, mode: u32, mtime: i64) -> Self {
        Self {
            path,
            kind,
            size: 0,
            mode: mode & MODE_MASK,
            mtime,
            checksum: [0u8; CHECKSUM_LEN],
            chunks: Vec::new(),
            link_target: None,
        }
    }

    /// Bytes this entry occupies in the chunk data region.
    pub fn stored_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.stored_len).sum()
    }

    fn check_shape(&self) -> Result<()> {
        let bad = |msg: String| Err(AtaError::Format(format!("entry {}: {msg}", self.path)));
        match self.kind {
            EntryKind::File => {
                if self.link_target.is_some() {
                    return bad("file with link target".into());
                }
                let mut sum = 0u64;
                for c in &self.chunks {
                    sum = sum
                        .checked_add(c.plain_len)
                        .ok_or_else(|| AtaError::Format("chunk length overflow".into()))?;
                }
                if sum != self.size {
                    return bad(format!("chunks hold {sum} bytes, size says {}", self.size));
                }
            }
            EntryKind::Dir => {
                if !self.chunks.is_empty() || self.size != 0 || self.link_target.is_some() {
                    return bad("directory with content".into());
                }
            }
            EntryKind::Symlink => {
                if !self.chunks.is_empty() {
                    return bad("symlink with chunks".into());
                }
                match &self.link_target {
                    Some(t) if t.len() as u64 == self.size && !t.is_empty() => {}
                    _ => return bad("symlink target missing or size mismatch".into()),
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, path: &EntryPath) -> Option<usize> {
        self.entries.iter().position(|e| &e.path == path)
    }

    pub fn chunk_count(&self) -> u64 {
        self.entries.iter().map(|e| e.chunks.len() as u64).sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_entries(&self.entries)
    }

    /// Parse and validate a manifest whose chunk data must lie in `data`.
    pub fn decode(bytes: &[u8], data: Range<u64>, limits: &Limits) -> Result<Self> {
        let mut r = ByteReader::new(bytes, "manifest");
        let count = r.uvarint()?;
        if let Some(max) = limits.max_entries {
            if count > max {
                return Err(AtaError::LimitExceeded(format!(
                    "manifest has {count} entries, limit is {max}"
                )));
            }
        }
        if count > (r.remaining() / MIN_ENTRY_LEN) as u64 {
            return Err(AtaError::Format(format!(
                "entry count {count} does not fit in {} manifest bytes",
                bytes.len()
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut seen = HashSet::with_capacity(count as usize);
        let mut seq = 0u64;
        let mut prev_end = data.start;
        let mut total = 0u64;

        for _ in 0..count {
            let path_bytes = r.len_prefixed()?;
            let path_str = std::str::from_utf8(path_bytes)
                .map_err(|_| AtaError::Format("entry path is not UTF-8".into()))?;
            let path = EntryPath::parse(path_str)
                .map_err(|e| AtaError::Format(format!("unsafe entry path: {e}")))?;
            let kind = EntryKind::from_u8(r.u8()?)?;
            let size = r.u64_le()?;
            let mode = r.u32_le()?;
            if mode & !MODE_MASK != 0 {
                return Err(AtaError::Format(format!("entry {path}: bad mode {mode:o}")));
            }
            let mtime = r.i64_le()?;
            let checksum: [u8; CHECKSUM_LEN] = r.array()?;

            let n_chunks = r.uvarint()?;
            if n_chunks > (r.remaining() / ENTRY_SIZE) as u64 {
                return Err(AtaError::Format(format!(
                    "entry {path}: {n_chunks} chunk records exceed manifest"
                )));
            }
            let mut chunks = Vec::with_capacity(n_chunks as usize);
            for _ in 0..n_chunks {
                let d = chunktab::read_entry(&mut r, seq)?;
                if d.plain_len == 0 || d.plain_len > MAX_CHUNK_SIZE as u64 {
                    return Err(AtaError::Format(format!(
                        "entry {path}: chunk plain length {} out of range",
                        d.plain_len
                    )));
                }
                let end = d.end().ok_or_else(|| AtaError::Format("chunk offset overflow".into()))?;
                if d.offset < prev_end || end > data.end {
                    return Err(AtaError::Format(format!(
                        "entry {path}: chunk at {} (+{}) outside data region",
                        d.offset, d.stored_len
                    )));
                }
                prev_end = end;
                seq += 1;
                chunks.push(d);
            }

            let link_target = if kind == EntryKind::Symlink {
                let t = r.len_prefixed()?;
                Some(
                    String::from_utf8(t.to_vec())
                        .map_err(|_| AtaError::Format("symlink target is not UTF-8".into()))?,
                )
            } else {
                None
            };

            let entry = ManifestEntry {
                path,
                kind,
                size,
                mode,
                mtime,
                checksum,
                chunks,
                link_target,
            };
            entry.check_shape()?;

            total = total.saturating_add(entry.size);
            if let Some(max) = limits.max_uncompressed {
                if total > max {
                    return Err(AtaError::LimitExceeded(format!(
                        "archive expands to more than {max} bytes"
                    )));
                }
            }
            if !seen.insert(entry.path.clone()) {
                return Err(AtaError::Format(format!("duplicate entry {}", entry.path)));
            }
            entries.push(entry);
        }

        if !r.is_empty() {
            return Err(AtaError::Format(format!(
                "{} trailing bytes after manifest",
                r.remaining()
            )));
        }
        Ok(Self { entries })
    }
}

pub fn encode_entries(entries: &[ManifestEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + entries.len() * 96);
    put_uvarint(&mut out, entries.len() as u64);
    for e in entries {
        let path = e.path.to_string();
        put_uvarint(&mut out, path.len() as u64);
        out.extend_from_slice(path.as_bytes());
        out.push(e.kind as u8);
        out.extend_from_slice(&e.size.to_le_bytes());
        out.extend_from_slice(&e.mode.to_le_bytes());
        out.extend_from_slice(&e.mtime.to_le_bytes());
        out.extend_from_slice(&e.checksum);
        put_uvarint(&mut out, e.chunks.len() as u64);
        for c in &e.chunks {
            chunktab::write_entry(&mut out, c);
        }
        if let Some(t) = &e.link_target {
            put_uvarint(&mut out, t.len() as u64);
            out.extend_from_slice(t.as_bytes());
        }
    }
    out
}

/// Accumulates entries in traversal order while chunk results arrive.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    done: Vec<ManifestEntry>,
    open: Option<ManifestEntry>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a file entry; chunks are attached until `finish`.
    pub fn begin(&mut self, entry: ManifestEntry) -> Result<()> {
        if let Some(open) = &self.open {
            return Err(AtaError::InvalidState(format!(
                "entry {} still open while beginning {}",
                open.path, entry.path
            )));
        }
        self.open = Some(entry);
        Ok(())
    }

    pub fn push_chunk(&mut self, desc: ChunkDescriptor) -> Result<()> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| AtaError::InvalidState("chunk without an open entry".into()))?;
        open.chunks.push(desc);
        Ok(())
    }

    pub fn finish(&mut self, size: u64, checksum: [u8; CHECKSUM_LEN]) -> Result<&ManifestEntry> {
        let mut entry = self
            .open
            .take()
            .ok_or_else(|| AtaError::InvalidState("finish without an open entry".into()))?;
        entry.size = size;
        entry.checksum = checksum;
        entry.check_shape()?;
        self.done.push(entry);
        Ok(&self.done[self.done.len() - 1])
    }

    /// Add an entry that carries no chunk data (directory or symlink).
    pub fn push_complete(&mut self, entry: ManifestEntry) -> Result<()> {
        if self.open.is_some() {
            return Err(AtaError::InvalidState("entry still open".into()));
        }
        entry.check_shape()?;
        self.done.push(entry);
        Ok(())
    }

    /// Finished entries only; a half-written file is left out.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.done
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_entries(&self.done)
    }

    pub fn into_manifest(self) -> Manifest {
        Manifest { entries: self.done }
    }
}
