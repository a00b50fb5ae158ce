use crate::container::manifest::{EntryKind, Manifest};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub chunks: u64,
    /// Plaintext bytes across all files.
    pub logical_bytes: u64,
    /// Bytes in the chunk data region.
    pub stored_bytes: u64,
}

impl Stats {
    pub fn from_manifest(m: &Manifest) -> Self {
        let mut s = Stats::default();
        for e in &m.entries {
            match e.kind {
                EntryKind::File => {
                    s.files += 1;
                    s.logical_bytes += e.size;
                }
                EntryKind::Dir => s.dirs += 1,
                EntryKind::Symlink => s.symlinks += 1,
            }
            s.chunks += e.chunks.len() as u64;
            s.stored_bytes += e.stored_bytes();
        }
        s
    }

    /// stored / logical; 1.0 for an archive without file data.
    pub fn compression_ratio(&self) -> f64 {
        if self.logical_bytes == 0 {
            1.0
        } else {
            self.stored_bytes as f64 / self.logical_bytes as f64
        }
    }
}
