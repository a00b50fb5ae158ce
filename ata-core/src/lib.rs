#![forbid(unsafe_code)]

pub mod entry;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod sched;
pub mod stats;

pub mod util {
    pub mod buf;
    pub mod hash_forward;
    pub mod sanitize;
    pub mod varint;
}

pub mod chunking {
    pub mod fixed;
}

pub mod codec;

pub mod crypto {
    pub mod aead;
    pub mod kdf;
    pub mod nonce;
}

pub mod container {
    pub mod chunktab;
    pub mod manifest;
    pub mod reader;
    pub mod superblock;
    pub mod tail;
    pub mod writer;
}

pub mod pack {
    pub mod walker;
    pub mod writer;
}

pub mod read {
    pub mod extract;
    pub mod fs_sink;
    pub mod opened;
    pub mod stream;
}

pub mod list;

// Re-exports: stable API surface
pub use entry::{EntrySink, EntrySource, PassphraseProvider, SourceEntry, SourceKind};
pub use error::{AtaError, Result};
pub use list::list;
pub use pack::walker::FsEntrySource;
pub use pack::writer::{Archiver, CreateOptions, create};
pub use policy::{FailureMode, Limits, Policy};
pub use read::extract::{EntryOutcome, ExtractOptions, ExtractReport};
pub use read::fs_sink::FsEntrySink;
pub use read::opened::{OpenOptions, Opened};
pub use sched::CancelToken;
pub use util::sanitize::EntryPath;
