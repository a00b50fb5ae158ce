//! Boundaries between the engine and the outside world: where entries come
//! from on create, where they go on extract, and where passphrases come from.

use crate::container::manifest::ManifestEntry;
use crate::error::{AtaError, Result};
use crate::util::sanitize::EntryPath;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

pub enum SourceKind {
    File(Box<dyn Read + Send>),
    Dir,
    Symlink(String),
}

impl std::fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::File(_) => f.write_str("File(..)"),
            SourceKind::Dir => f.write_str("Dir"),
            SourceKind::Symlink(t) => write!(f, "Symlink({t:?})"),
        }
    }
}

/// One logical entry offered for archiving.
#[derive(Debug)]
pub struct SourceEntry {
    pub path: EntryPath,
    pub kind: SourceKind,
    /// Size hint; the archived size is whatever the reader yields.
    pub size: u64,
    pub mode: u32,
    pub mtime: i64,
}

impl SourceEntry {
    pub fn file_from_bytes(path: EntryPath, data: Vec<u8>) -> Self {
        Self {
            path,
            size: data.len() as u64,
            kind: SourceKind::File(Box::new(Cursor::new(data))),
            mode: 0o644,
            mtime: 0,
        }
    }

    pub fn dir(path: EntryPath) -> Self {
        Self {
            path,
            kind: SourceKind::Dir,
            size: 0,
            mode: 0o755,
            mtime: 0,
        }
    }

    pub fn symlink(path: EntryPath, target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            path,
            size: target.len() as u64,
            kind: SourceKind::Symlink(target),
            mode: 0o777,
            mtime: 0,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mtime(mut self, mtime: i64) -> Self {
        self.mtime = mtime;
        self
    }
}

/// Ordered stream of entries to archive. Any matching iterator qualifies.
pub trait EntrySource: Iterator<Item = Result<SourceEntry>> {}

impl<I: Iterator<Item = Result<SourceEntry>>> EntrySource for I {}

/// A file being materialized. Dropping it without `commit` must leave no
/// trace at the destination.
pub trait StagedFile: Write {
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Receives verified entries during extraction.
pub trait EntrySink {
    fn directory(&mut self, entry: &ManifestEntry) -> Result<()>;
    fn symlink(&mut self, entry: &ManifestEntry, target: &str) -> Result<()>;
    fn begin_file(&mut self, entry: &ManifestEntry) -> Result<Box<dyn StagedFile + '_>>;
    /// Called once after the last entry.
    fn finish(&mut self) -> Result<()>;
    /// Remove everything this sink created. Used when an all-or-nothing
    /// extraction fails after verification, e.g. on a full disk.
    fn rollback(&mut self) -> Result<()>;
}

pub trait PassphraseProvider {
    fn passphrase(&self) -> Result<SecretString>;
}

impl PassphraseProvider for SecretString {
    fn passphrase(&self) -> Result<SecretString> {
        Ok(self.clone())
    }
}

/// Provider that never has a passphrase; opening an encrypted archive with it
/// fails with `MissingPassphrase`.
pub struct NoPassphrase;

impl PassphraseProvider for NoPassphrase {
    fn passphrase(&self) -> Result<SecretString> {
        Err(AtaError::MissingPassphrase)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryNode {
    File { data: Vec<u8>, mode: u32, mtime: i64 },
    Dir { mode: u32 },
    Symlink { target: String },
}

/// Sink that keeps everything in a map; used by tests and `verify`-style
/// callers that want the bytes.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub nodes: BTreeMap<String, MemoryNode>,
    pub finished: bool,
    added: Vec<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        match self.nodes.get(path) {
            Some(MemoryNode::File { data, .. }) => Some(data),
            _ => None,
        }
    }
}

struct MemoryStaged<'a> {
    sink: &'a mut MemorySink,
    path: String,
    mode: u32,
    mtime: i64,
    buf: Vec<u8>,
}

impl Write for MemoryStaged<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StagedFile for MemoryStaged<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        let s = *self;
        s.sink.added.push(s.path.clone());
        s.sink.nodes.insert(
            s.path,
            MemoryNode::File {
                data: s.buf,
                mode: s.mode,
                mtime: s.mtime,
            },
        );
        Ok(())
    }
}

impl EntrySink for MemorySink {
    fn directory(&mut self, entry: &ManifestEntry) -> Result<()> {
        self.added.push(entry.path.to_string());
        self.nodes
            .insert(entry.path.to_string(), MemoryNode::Dir { mode: entry.mode });
        Ok(())
    }

    fn symlink(&mut self, entry: &ManifestEntry, target: &str) -> Result<()> {
        self.added.push(entry.path.to_string());
        self.nodes.insert(
            entry.path.to_string(),
            MemoryNode::Symlink {
                target: target.to_string(),
            },
        );
        Ok(())
    }

    fn begin_file(&mut self, entry: &ManifestEntry) -> Result<Box<dyn StagedFile + '_>> {
        Ok(Box::new(MemoryStaged {
            path: entry.path.to_string(),
            mode: entry.mode,
            mtime: entry.mtime,
            buf: Vec::new(),
            sink: self,
        }))
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        for path in self.added.drain(..) {
            self.nodes.remove(&path);
        }
        self.finished = false;
        Ok(())
    }
}
