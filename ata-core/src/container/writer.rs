//! Append-only container writer: header, chunk data, manifest, trailer.
//! Nothing already written is ever revisited, so any `Write` sink works.

use crate::container::superblock::{HEADER_LEN, Superblock};
use crate::container::tail::Trailer;
use crate::error::{AtaError, Result};
use std::io::Write;

/// Small Write adapter that counts bytes written.
struct CountingWriter<W: Write> {
    inner: W,
    n: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let k = self.inner.write(buf)?;
        self.n += k as u64;
        Ok(k)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

pub struct ContainerWriter<W: Write> {
    out: CountingWriter<W>,
    chunks: u64,
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(inner: W, header: &Superblock) -> Result<Self> {
        let mut out = CountingWriter { inner, n: 0 };
        header.write_to(&mut out)?;
        debug_assert_eq!(out.n, HEADER_LEN);
        Ok(Self { out, chunks: 0 })
    }

    /// Current absolute offset; the next chunk starts here.
    pub fn position(&self) -> u64 {
        self.out.n
    }

    pub fn chunks_written(&self) -> u64 {
        self.chunks
    }

    /// Append one stored chunk. Returns `(offset, len)` of what was written.
    pub fn append_chunk(&mut self, stored: &[u8]) -> Result<(u64, u64)> {
        let offset = self.out.n;
        self.out.write_all(stored)?;
        self.chunks += 1;
        Ok((offset, self.out.n - offset))
    }

    /// Write the manifest and trailer, flush, and hand back the sink.
    /// `complete == false` marks an archive abandoned part way through.
    pub fn finish(mut self, manifest: &[u8], complete: bool) -> Result<W> {
        let manifest_offset = self.out.n;
        self.out.write_all(manifest)?;
        let manifest_len = self.out.n - manifest_offset;
        if manifest_len != manifest.len() as u64 {
            return Err(AtaError::InvalidState("short manifest write".into()));
        }
        Trailer {
            manifest_offset,
            manifest_len,
            complete,
        }
        .write_to(&mut self.out)?;
        self.out.flush()?;
        Ok(self.out.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::container::tail::TAIL_LEN;
    use crate::crypto::aead::CipherId;

    #[test]
    fn offsets_follow_header() {
        let sb = Superblock::new(CodecId::None, CipherId::None, [0; 16], None).unwrap();
        let mut w = ContainerWriter::new(Vec::new(), &sb).unwrap();
        assert_eq!(w.append_chunk(b"abc").unwrap(), (HEADER_LEN, 3));
        assert_eq!(w.append_chunk(b"de").unwrap(), (HEADER_LEN + 3, 2));
        assert_eq!(w.chunks_written(), 2);
        let bytes = w.finish(b"MAN", true).unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN + 5 + 3 + TAIL_LEN);
        let t = Trailer::decode(&bytes[bytes.len() - TAIL_LEN as usize..]).unwrap();
        assert_eq!(t.manifest_offset, HEADER_LEN + 5);
        assert_eq!(t.manifest_len, 3);
        assert!(t.complete);
    }
}
