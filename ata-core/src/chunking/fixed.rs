//! Fixed-size chunking.
//!
//! Files are cut into `chunk_size` slices; only the last one may be shorter.
//! Every chunk is compressed and encrypted independently so chunks can be
//! processed in parallel, at the cost of cross-chunk compression ratio.

use crate::error::{AtaError, Result};
use std::io::{ErrorKind, Read, Write};

pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;
/// Upper bound accepted on write and on read; keeps per-chunk allocations sane.
pub const MAX_CHUNK_SIZE: usize = 256 * 1024 * 1024;

pub fn validate_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(AtaError::InvalidOption(format!(
            "chunk size must be in 1..={MAX_CHUNK_SIZE}, got {chunk_size}"
        )));
    }
    Ok(())
}

pub struct Chunker;

impl Chunker {
    /// Lazily split `reader` into `(index, bytes)` pairs.
    pub fn split<R: Read>(reader: R, chunk_size: usize) -> Result<Chunks<R>> {
        validate_chunk_size(chunk_size)?;
        Ok(Chunks {
            reader,
            chunk_size,
            index: 0,
            done: false,
        })
    }

    /// Write ordered chunks back out; returns the number of bytes written.
    pub fn join<I, W>(chunks: I, mut out: W) -> Result<u64>
    where
        I: IntoIterator<Item = Vec<u8>>,
        W: Write,
    {
        let mut total = 0u64;
        for c in chunks {
            out.write_all(&c)?;
            total += c.len() as u64;
        }
        Ok(total)
    }
}

pub struct Chunks<R: Read> {
    reader: R,
    chunk_size: usize,
    index: u64,
    done: bool,
}

impl<R: Read> Chunks<R> {
    // Fill up to chunk_size bytes; short only at EOF.
    fn fill(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled < buf.len() {
            buf.truncate(filled);
            buf.shrink_to_fit();
        }
        Ok(buf)
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fill() {
            Ok(buf) if buf.is_empty() => {
                self.done = true;
                None
            }
            Ok(buf) => {
                if buf.len() < self.chunk_size {
                    self.done = true;
                }
                let idx = self.index;
                self.index += 1;
                Some(Ok((idx, buf)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens(data: &[u8], size: usize) -> Vec<usize> {
        Chunker::split(data, size)
            .unwrap()
            .map(|c| c.unwrap().1.len())
            .collect()
    }

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(lens(&[], 4).is_empty());
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        assert_eq!(lens(&[0u8; 12], 4), vec![4, 4, 4]);
    }

    #[test]
    fn one_extra_byte_gives_one_byte_chunk() {
        assert_eq!(lens(&[0u8; 13], 4), vec![4, 4, 4, 1]);
    }

    #[test]
    fn indices_are_sequential() {
        let idx: Vec<u64> = Chunker::split(&[1u8; 10][..], 3)
            .unwrap()
            .map(|c| c.unwrap().0)
            .collect();
        assert_eq!(idx, vec![0, 1, 2, 3]);
    }

    #[test]
    fn short_reads_still_fill_chunks() {
        // A reader that hands out one byte at a time.
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.0.is_empty() || buf.is_empty() {
                    return Ok(0);
                }
                buf[0] = self.0[0];
                self.0 = &self.0[1..];
                Ok(1)
            }
        }
        let data: Vec<u8> = (0..9).collect();
        let chunks: Vec<Vec<u8>> = Chunker::split(Trickle(&data), 4)
            .unwrap()
            .map(|c| c.unwrap().1)
            .collect();
        assert_eq!(chunks, vec![vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8]]);
    }

    #[test]
    fn join_reverses_split() {
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let chunks = Chunker::split(&data[..], 64)
            .unwrap()
            .map(|c| c.unwrap().1);
        let mut out = Vec::new();
        let n = Chunker::join(chunks, &mut out).unwrap();
        assert_eq!(n, 1000);
        assert_eq!(out, data);
    }

    #[test]
    fn rejects_zero_chunk_size() {
        assert!(Chunker::split(&b"x"[..], 0).is_err());
    }
}
