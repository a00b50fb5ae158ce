use crate::codec::CodecId;
use crate::container::manifest::ManifestEntry;
use crate::container::reader::ContainerReader;
use crate::error::Result;
use crate::policy::Limits;
use crate::stats::Stats;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ListedEntry {
    pub path: String,
    pub kind: &'static str,
    pub mode: u32,
    pub size: u64,
    pub stored: u64,
    pub mtime: i64,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

impl From<&ManifestEntry> for ListedEntry {
    fn from(e: &ManifestEntry) -> Self {
        Self {
            path: e.path.to_string(),
            kind: e.kind.as_str(),
            mode: e.mode,
            size: e.size,
            stored: e.stored_bytes(),
            mtime: e.mtime,
            chunks: e.chunks.len(),
            link_target: e.link_target.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Listing {
    pub compression: CodecId,
    pub encrypted: bool,
    pub complete: bool,
    pub entries: Vec<ListedEntry>,
    pub stats: Stats,
}

/// Read entry metadata only. No passphrase is needed and no chunk is touched.
pub fn list(archive: &Path) -> Result<Listing> {
    list_from(BufReader::new(File::open(archive)?), &Limits::default())
}

pub fn list_from<R: Read + Seek>(inner: R, limits: &Limits) -> Result<Listing> {
    let r = ContainerReader::open(inner, limits)?;
    let m = r.manifest();
    Ok(Listing {
        compression: r.header().compression,
        encrypted: r.header().is_encrypted(),
        complete: r.is_complete(),
        entries: m.entries.iter().map(ListedEntry::from).collect(),
        stats: Stats::from_manifest(m),
    })
}
