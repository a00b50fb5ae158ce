//! Archive-relative entry paths.

use crate::error::{AtaError, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A relative path stored in the manifest: one or more components, never
/// absolute, never `.`/`..`, and no component contains a separator or NUL.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryPath(Vec<String>);

fn check_component(c: &str) -> Result<()> {
    if c.is_empty() || c == "." || c == ".." {
        return Err(AtaError::InvalidPath(format!("bad component {c:?}")));
    }
    if c.contains(['/', '\\', '\0']) {
        return Err(AtaError::InvalidPath(format!(
            "component {c:?} contains a separator or NUL"
        )));
    }
    Ok(())
}

impl EntryPath {
    pub fn from_components<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts: Vec<String> = parts.into_iter().map(Into::into).collect();
        if parts.is_empty() {
            return Err(AtaError::InvalidPath("empty path".into()));
        }
        for p in &parts {
            check_component(p)?;
        }
        Ok(Self(parts))
    }

    /// Parse the `/`-joined form used on disk and in the CLI.
    pub fn parse(s: &str) -> Result<Self> {
        if s.starts_with('/') {
            return Err(AtaError::InvalidPath(format!("absolute path: {s}")));
        }
        Self::from_components(s.split('/'))
    }

    /// Convert a relative filesystem path, keeping only normal components.
    pub fn from_fs_path(p: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for comp in p.components() {
            match comp {
                Component::Normal(os) => {
                    let s = os.to_str().ok_or_else(|| {
                        AtaError::InvalidPath(format!("non UTF-8 path: {}", p.display()))
                    })?;
                    parts.push(s.to_string());
                }
                Component::CurDir => {}
                _ => {
                    return Err(AtaError::InvalidPath(format!(
                        "not a relative path: {}",
                        p.display()
                    )));
                }
            }
        }
        Self::from_components(parts)
    }

    pub fn components(&self) -> &[String] {
        &self.0
    }

    pub fn join(&self, name: &str) -> Result<Self> {
        check_component(name)?;
        let mut parts = self.0.clone();
        parts.push(name.to_string());
        Ok(Self(parts))
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Resolve under `root`. Components are validated at construction, so the
    /// result never escapes `root` lexically.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for c in &self.0 {
            out.push(c);
        }
        out
    }
}

impl fmt::Display for EntryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl std::str::FromStr for EntryPath {
    type Err = AtaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
