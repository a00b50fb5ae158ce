use super::opened::Opened;
use crate::container::manifest::{EntryKind, ManifestEntry};
use crate::error::{AtaError, Result};
use crate::pipeline::EntryDigest;
use crate::sched::{CancelToken, DEFAULT_QUEUE_DEPTH, Scheduler};
use crate::util::sanitize::EntryPath;
use std::io::{self, Cursor, Read, Seek};

/// Streams one file entry. The whole entry (every chunk plus the entry
/// checksum) is verified when the reader is created, so a damaged entry
/// yields no bytes at all. Chunks are authenticated again as they are
/// streamed.
pub struct EntryReader<'a, R: Read + Seek> {
    archive: &'a mut Opened<R>,
    entry: ManifestEntry,
    cur: usize,
    cur_buf: Cursor<Vec<u8>>,
    digest: Option<EntryDigest>,
    produced: u64,
}

impl<R: Read + Seek> Opened<R> {
    /// Random access to a single file entry.
    pub fn open_entry(&mut self, path: &EntryPath) -> Result<EntryReader<'_, R>> {
        self.ensure_usable()?;
        let idx = self
            .manifest()
            .find(path)
            .ok_or_else(|| AtaError::EntryNotFound(path.to_string()))?;
        let entry = self.manifest().entries[idx].clone();
        if entry.kind != EntryKind::File {
            return Err(AtaError::InvalidOption(format!(
                "{path} is a {}, not a file",
                entry.kind.as_str()
            )));
        }
        let sched = Scheduler::new(Scheduler::default_workers(), DEFAULT_QUEUE_DEPTH)?;
        self.stream_file(&entry, &mut io::sink(), &sched, &CancelToken::new())?;
        let digest = self.pipeline.entry_digest(&entry);
        Ok(EntryReader {
            archive: self,
            entry,
            cur: 0,
            cur_buf: Cursor::new(Vec::new()),
            digest: Some(digest),
            produced: 0,
        })
    }
}

impl<R: Read + Seek> EntryReader<'_, R> {
    pub fn entry(&self) -> &ManifestEntry {
        &self.entry
    }

    fn load_next(&mut self) -> Result<bool> {
        let Some(d) = self.entry.chunks.get(self.cur) else {
            return Ok(false);
        };
        let stored = self.archive.reader.read_stored(d.offset, d.stored_len)?;
        let plain = self.archive.pipeline.open(d, stored)?;
        if let Some(digest) = self.digest.as_mut() {
            digest.update(&plain);
        }
        self.produced += plain.len() as u64;
        self.cur += 1;
        self.cur_buf = Cursor::new(plain);
        Ok(true)
    }

    fn check_end(&mut self) -> Result<()> {
        let Some(digest) = self.digest.take() else {
            return Ok(());
        };
        if self.produced != self.entry.size {
            return Err(AtaError::CorruptData(format!(
                "entry {}: produced {} bytes, expected {}",
                self.entry.path, self.produced, self.entry.size
            )));
        }
        digest.verify(self.entry.size, &self.entry.checksum, &self.entry.path)
    }
}

fn to_io(e: AtaError) -> io::Error {
    match e {
        AtaError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

impl<R: Read + Seek> Read for EntryReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.cur_buf.read(out)?;
            if n > 0 || out.is_empty() {
                return Ok(n);
            }
            if !self.load_next().map_err(to_io)? {
                self.check_end().map_err(to_io)?;
                return Ok(0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::KdfParams;
    use crate::entry::{PassphraseProvider, SourceEntry};
    use crate::pack::writer::{CreateOptions, create};
    use crate::read::opened::OpenOptions;
    use secrecy::SecretString;

    #[test]
    fn streams_one_entry_across_chunks() {
        let body: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let src = vec![
            SourceEntry::file_from_bytes(EntryPath::parse("a").unwrap(), b"aaa".to_vec()),
            SourceEntry::file_from_bytes(EntryPath::parse("b").unwrap(), body.clone()),
        ];
        let opts = CreateOptions {
            chunk_size: 64,
            workers: 1,
            ..CreateOptions::default()
        };
        let (bytes, _) = create(Vec::new(), src.into_iter().map(Ok), &opts, None).unwrap();
        let mut o = Opened::open(Cursor::new(bytes), None, &OpenOptions::default()).unwrap();

        let mut out = Vec::new();
        o.open_entry(&EntryPath::parse("b").unwrap())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, body);

        assert!(matches!(
            o.open_entry(&EntryPath::parse("zzz").unwrap()),
            Err(AtaError::EntryNotFound(_))
        ));
    }

    #[test]
    fn damaged_later_chunk_yields_nothing() {
        let body: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 253) as u8).collect();
        let src = vec![SourceEntry::file_from_bytes(EntryPath::parse("f").unwrap(), body)];
        let opts = CreateOptions {
            chunk_size: 1024,
            workers: 2,
            encrypt: true,
            kdf: KdfParams::FLOOR,
            salt: Some([9; 16]),
            ..CreateOptions::default()
        };
        let pass = SecretString::from("pw");
        let provider = &pass as &dyn PassphraseProvider;
        let (mut bytes, _) = create(Vec::new(), src.into_iter().map(Ok), &opts, Some(provider)).unwrap();

        let path = EntryPath::parse("f").unwrap();
        let third = {
            let o = Opened::open(Cursor::new(bytes.clone()), Some(provider), &OpenOptions::default())
                .unwrap();
            let e = &o.manifest().entries[o.manifest().find(&path).unwrap()];
            assert_eq!(e.chunks.len(), 4);
            e.chunks[2]
        };
        bytes[third.offset as usize] ^= 0x04;

        let mut o = Opened::open(Cursor::new(bytes), Some(provider), &OpenOptions::default()).unwrap();
        let mut out = Vec::new();
        let res = o.open_entry(&path).and_then(|mut r| Ok(r.read_to_end(&mut out)?));
        assert!(matches!(res, Err(AtaError::Authentication(_))), "{res:?}");
        assert!(out.is_empty());
    }
}
