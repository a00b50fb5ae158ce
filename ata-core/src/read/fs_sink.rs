//! Materializes entries under a destination directory.
//!
//! Files are written to a temporary file next to their destination and
//! renamed into place on commit, so a rejected entry never appears. No write
//! goes through a symlink that already exists under the destination.
//! Everything the sink creates is remembered so it can be rolled back; files
//! it replaced are not restored.

use crate::container::manifest::ManifestEntry;
use crate::entry::{EntrySink, StagedFile};
use crate::error::{AtaError, Result};
use crate::util::sanitize::EntryPath;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub struct FsEntrySink {
    root: PathBuf,
    // applied at finish so read-only directories can still be filled
    dirs: Vec<(PathBuf, usize, u32, i64)>,
    // in creation order
    created: Vec<PathBuf>,
}

fn system_time(mtime: i64) -> SystemTime {
    if mtime >= 0 {
        UNIX_EPOCH + Duration::from_secs(mtime as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(mtime.unsigned_abs())
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_readonly(mode & 0o222 == 0);
    fs::set_permissions(path, perms)
}

impl FsEntrySink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            dirs: Vec::new(),
            created: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create missing ancestors of `path`, refusing symlinks and non-directories
    /// on the way. Returns the destination of `path` itself.
    fn prepare(&mut self, path: &EntryPath) -> Result<PathBuf> {
        let comps = path.components();
        let mut cur = self.root.clone();
        for c in &comps[..comps.len() - 1] {
            cur.push(c);
            match fs::symlink_metadata(&cur) {
                Ok(md) if md.file_type().is_symlink() => {
                    return Err(AtaError::InvalidPath(format!(
                        "{path}: ancestor {} is a symlink",
                        cur.display()
                    )));
                }
                Ok(md) if md.is_dir() => {}
                Ok(_) => {
                    return Err(AtaError::InvalidPath(format!(
                        "{path}: ancestor {} is not a directory",
                        cur.display()
                    )));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir(&cur)?;
                    self.created.push(cur.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(path.to_fs_path(&self.root))
    }
}

struct FsStaged<'a> {
    tmp: NamedTempFile,
    dest: PathBuf,
    mode: u32,
    mtime: i64,
    // `None` when `dest` already existed
    created: Option<&'a mut Vec<PathBuf>>,
}

impl Write for FsStaged<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

impl StagedFile for FsStaged<'_> {
    fn commit(self: Box<Self>) -> Result<()> {
        let FsStaged {
            mut tmp,
            dest,
            mode,
            mtime,
            created,
        } = *self;
        tmp.flush()?;
        tmp.as_file().set_modified(system_time(mtime))?;
        set_mode(tmp.path(), mode)?;
        if fs::symlink_metadata(&dest).is_ok_and(|md| md.is_dir()) {
            return Err(AtaError::InvalidPath(format!(
                "{} exists and is a directory",
                dest.display()
            )));
        }
        tmp.persist(&dest).map_err(|e| e.error)?;
        debug!(path = %dest.display(), "file committed");
        if let Some(created) = created {
            created.push(dest);
        }
        Ok(())
    }
}

impl EntrySink for FsEntrySink {
    fn directory(&mut self, entry: &ManifestEntry) -> Result<()> {
        let dest = self.prepare(&entry.path)?;
        match fs::symlink_metadata(&dest) {
            Ok(md) if md.is_dir() => {}
            Ok(_) => {
                return Err(AtaError::InvalidPath(format!(
                    "{} exists and is not a directory",
                    dest.display()
                )));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&dest)?;
                self.created.push(dest.clone());
            }
            Err(e) => return Err(e.into()),
        }
        self.dirs
            .push((dest, entry.path.components().len(), entry.mode, entry.mtime));
        Ok(())
    }

    fn symlink(&mut self, entry: &ManifestEntry, target: &str) -> Result<()> {
        let dest = self.prepare(&entry.path)?;
        match fs::symlink_metadata(&dest) {
            Ok(md) if md.is_dir() => {
                return Err(AtaError::InvalidPath(format!(
                    "{} exists and is a directory",
                    dest.display()
                )));
            }
            Ok(_) => fs::remove_file(&dest)?,
            Err(_) => {}
        }
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(target, &dest)?;
            self.created.push(dest);
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = target;
            Err(AtaError::InvalidOption(format!(
                "cannot create symlink {}: unsupported platform",
                dest.display()
            )))
        }
    }

    fn begin_file(&mut self, entry: &ManifestEntry) -> Result<Box<dyn StagedFile + '_>> {
        let dest = self.prepare(&entry.path)?;
        let parent = dest.parent().unwrap_or(&self.root).to_path_buf();
        let tmp = NamedTempFile::new_in(&parent)?;
        let fresh = fs::symlink_metadata(&dest).is_err();
        Ok(Box::new(FsStaged {
            tmp,
            dest,
            mode: entry.mode,
            mtime: entry.mtime,
            created: fresh.then_some(&mut self.created),
        }))
    }

    fn finish(&mut self) -> Result<()> {
        // deepest first so a parent's mtime is set after its children changed
        self.dirs.sort_by(|a, b| b.1.cmp(&a.1));
        for (dir, _, mode, mtime) in self.dirs.drain(..) {
            if let Ok(f) = fs::File::open(&dir) {
                if let Err(e) = f.set_modified(system_time(mtime)) {
                    warn!(path = %dir.display(), error = %e, "could not set directory mtime");
                }
            }
            set_mode(&dir, mode)?;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.dirs.clear();
        let mut first = None;
        // newest first so directories are empty by the time they are removed
        for path in self.created.drain(..).rev() {
            let res = match fs::symlink_metadata(&path) {
                Ok(md) if md.is_dir() => fs::remove_dir(&path),
                Ok(_) => fs::remove_file(&path),
                Err(e) => Err(e),
            };
            match res {
                Ok(()) => debug!(path = %path.display(), "rolled back"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not roll back");
                    first.get_or_insert(e);
                }
            }
        }
        match first {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
