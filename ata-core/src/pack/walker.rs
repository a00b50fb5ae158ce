//! Filesystem entry source.
//!
//! Each input becomes a top-level entry named after its last path component;
//! directories are walked depth-first in file-name order without following
//! links. Files are opened only when the engine reaches them.

use crate::container::manifest::MODE_MASK;
use crate::entry::{SourceEntry, SourceKind};
use crate::error::{AtaError, Result};
use crate::util::sanitize::EntryPath;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

enum PlannedKind {
    File,
    Dir,
    Symlink(String),
}

struct Planned {
    fs_path: PathBuf,
    path: EntryPath,
    kind: PlannedKind,
    size: u64,
    mode: u32,
    mtime: i64,
}

pub struct FsEntrySource {
    planned: std::vec::IntoIter<Planned>,
    skipped: Vec<PathBuf>,
}

fn mode_from(md: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        md.permissions().mode() & MODE_MASK
    }
    #[cfg(not(unix))]
    {
        if md.is_dir() { 0o755 } else { 0o644 }
    }
}

fn mtime_from(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn root_name(root: &Path) -> Result<String> {
    let name = match root.file_name() {
        Some(n) => n.to_os_string(),
        None => fs::canonicalize(root)?
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| {
                AtaError::InvalidPath(format!("cannot name input {}", root.display()))
            })?,
    };
    name.into_string()
        .map_err(|_| AtaError::InvalidPath(format!("non UTF-8 input {}", root.display())))
}

impl FsEntrySource {
    /// Plan the walk over `inputs`. Inputs that do not exist are skipped with
    /// a warning; having nothing left is an error.
    pub fn new<P: AsRef<Path>>(inputs: &[P]) -> Result<Self> {
        let mut planned = Vec::new();
        let mut skipped = Vec::new();

        for input in inputs {
            let root = input.as_ref();
            if fs::symlink_metadata(root).is_err() {
                warn!(input = %root.display(), "input does not exist, skipping");
                skipped.push(root.to_path_buf());
                continue;
            }
            let base = EntryPath::from_components([root_name(root)?])?;

            for e in WalkDir::new(root).follow_links(false).sort_by_file_name() {
                let e = e.map_err(|e| std::io::Error::other(e.to_string()))?;
                let rel = e.path().strip_prefix(root).map_err(|_| {
                    AtaError::InvalidPath(format!("{} escapes its input", e.path().display()))
                })?;
                let mut path = base.clone();
                for c in rel.components() {
                    let c = c.as_os_str().to_str().ok_or_else(|| {
                        AtaError::InvalidPath(format!("non UTF-8 path {}", e.path().display()))
                    })?;
                    path = path.join(c)?;
                }

                let md = e.path().symlink_metadata()?;
                let ft = e.file_type();
                let kind = if ft.is_dir() {
                    PlannedKind::Dir
                } else if ft.is_file() {
                    PlannedKind::File
                } else if ft.is_symlink() {
                    let target = fs::read_link(e.path())?;
                    let target = target.into_os_string().into_string().map_err(|_| {
                        AtaError::InvalidPath(format!(
                            "non UTF-8 link target at {}",
                            e.path().display()
                        ))
                    })?;
                    PlannedKind::Symlink(target)
                } else {
                    warn!(path = %e.path().display(), "unsupported file type, skipping");
                    continue;
                };
                planned.push(Planned {
                    fs_path: e.path().to_path_buf(),
                    path,
                    size: if ft.is_file() { md.len() } else { 0 },
                    kind,
                    mode: mode_from(&md),
                    mtime: mtime_from(&md),
                });
            }
        }

        if planned.is_empty() {
            return Err(AtaError::InvalidOption("no valid inputs".into()));
        }
        debug!(entries = planned.len(), skipped = skipped.len(), "walk planned");
        Ok(Self {
            planned: planned.into_iter(),
            skipped,
        })
    }

    /// Inputs that were missing when the walk was planned.
    pub fn skipped(&self) -> &[PathBuf] {
        &self.skipped
    }
}

impl Iterator for FsEntrySource {
    type Item = Result<SourceEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let p = self.planned.next()?;
        let kind = match p.kind {
            PlannedKind::Dir => SourceKind::Dir,
            PlannedKind::Symlink(t) => SourceKind::Symlink(t),
            PlannedKind::File => match File::open(&p.fs_path) {
                Ok(f) => SourceKind::File(Box::new(f)),
                Err(e) => return Some(Err(e.into())),
            },
        };
        Some(Ok(SourceEntry {
            path: p.path,
            kind,
            size: p.size,
            mode: p.mode,
            mtime: p.mtime,
        }))
    }
}
