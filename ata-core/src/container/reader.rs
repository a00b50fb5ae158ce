use crate::container::manifest::Manifest;
use crate::container::superblock::{HEADER_LEN, Superblock};
use crate::container::tail::{TAIL_LEN, Trailer, read_tail_at_eof};
use crate::error::{AtaError, Result};
use crate::policy::Limits;
use std::io::{Read, Seek, SeekFrom};

/// Random-access view over a finished container.
pub struct ContainerReader<R: Read + Seek> {
    inner: R,
    header: Superblock,
    trailer: Trailer,
    manifest: Manifest,
}

impl<R: Read + Seek> ContainerReader<R> {
    /// Parse header, trailer (from EOF) and manifest. The manifest is checked
    /// against `limits` before anything else is trusted.
    pub fn open(mut inner: R, limits: &Limits) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let header = Superblock::read_from(&mut inner)?;
        let (trailer, file_len) = read_tail_at_eof(&mut inner)?;

        let manifest_end = trailer
            .manifest_offset
            .checked_add(trailer.manifest_len)
            .and_then(|e| e.checked_add(TAIL_LEN));
        if trailer.manifest_offset < HEADER_LEN || manifest_end != Some(file_len) {
            return Err(AtaError::Format(format!(
                "manifest range {}+{} does not fit a {file_len}-byte archive",
                trailer.manifest_offset, trailer.manifest_len
            )));
        }

        let len = usize::try_from(trailer.manifest_len)
            .map_err(|_| AtaError::Format("manifest too large".into()))?;
        let mut bytes = vec![0u8; len];
        inner.seek(SeekFrom::Start(trailer.manifest_offset))?;
        inner.read_exact(&mut bytes)?;
        let manifest = Manifest::decode(&bytes, HEADER_LEN..trailer.manifest_offset, limits)?;

        Ok(Self {
            inner,
            header,
            trailer,
            manifest,
        })
    }

    pub fn header(&self) -> &Superblock {
        &self.header
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn is_complete(&self) -> bool {
        self.trailer.complete
    }

    /// Bytes of the chunk data region.
    pub fn data_len(&self) -> u64 {
        self.trailer.manifest_offset - HEADER_LEN
    }

    /// Read `len` stored bytes at absolute `offset`. Bounds were checked when
    /// the manifest was decoded.
    pub fn read_stored(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .filter(|&e| offset >= HEADER_LEN && e <= self.trailer.manifest_offset)
            .ok_or_else(|| AtaError::Format(format!("read {offset}+{len} outside data region")))?;
        let n = usize::try_from(end - offset)
            .map_err(|_| AtaError::Format("chunk too large".into()))?;
        let mut buf = vec![0u8; n];
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
