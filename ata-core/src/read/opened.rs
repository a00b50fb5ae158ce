use crate::codec::CompressionContext;
use crate::container::manifest::Manifest;
use crate::container::reader::ContainerReader;
use crate::container::superblock::Superblock;
use crate::crypto::kdf::SessionKeys;
use crate::entry::PassphraseProvider;
use crate::error::{AtaError, Result};
use crate::pipeline::ChunkPipeline;
use crate::policy::Limits;
use crate::util::sanitize::EntryPath;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Accept an archive whose trailer says creation did not finish.
    pub allow_incomplete: bool,
    pub limits: Limits,
}

/// `Opened → Extracting → Closed`, or `Failed` on an archive-wide error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtractState {
    Opened,
    Extracting,
    Closed,
    Failed(String),
}

/// An archive opened for reading: header and manifest parsed, keys derived.
pub struct Opened<R: Read + Seek = BufReader<File>> {
    pub(crate) reader: ContainerReader<R>,
    pub(crate) pipeline: ChunkPipeline,
    pub(crate) state: ExtractState,
}

impl Opened<BufReader<File>> {
    pub fn open_path(
        path: &Path,
        passphrase: Option<&dyn PassphraseProvider>,
        opts: &OpenOptions,
    ) -> Result<Self> {
        let f = File::open(path)?;
        Self::open(BufReader::new(f), passphrase, opts)
    }
}

impl<R: Read + Seek> Opened<R> {
    /// Parse the container and, for encrypted archives, derive the session
    /// keys. KDF parameters below the floor are rejected, never adjusted.
    pub fn open(
        inner: R,
        passphrase: Option<&dyn PassphraseProvider>,
        opts: &OpenOptions,
    ) -> Result<Self> {
        let reader = ContainerReader::open(inner, &opts.limits)?;
        if !reader.is_complete() {
            if !opts.allow_incomplete {
                return Err(AtaError::IncompleteArchive(
                    "creation did not finish; partial recovery must be requested".into(),
                ));
            }
            warn!(
                entries = reader.manifest().len(),
                "archive is incomplete; only finished entries are available"
            );
        }

        let header = reader.header();
        let keys = match header.kdf {
            Some(kdf) => {
                kdf.validate()?;
                let provider = passphrase.ok_or(AtaError::MissingPassphrase)?;
                Some(SessionKeys::from_passphrase(
                    &provider.passphrase()?,
                    &header.kdf_salt,
                    &kdf,
                )?)
            }
            None => None,
        };
        let compression = CompressionContext {
            codec: header.compression,
            level: 0,
        };
        let pipeline =
            ChunkPipeline::new(compression, header.encryption, header.kdf_salt, keys.as_ref())?;
        debug!(
            entries = reader.manifest().len(),
            encrypted = header.is_encrypted(),
            complete = reader.is_complete(),
            "archive opened"
        );

        Ok(Self {
            reader,
            pipeline,
            state: ExtractState::Opened,
        })
    }

    pub fn header(&self) -> &Superblock {
        self.reader.header()
    }

    pub fn manifest(&self) -> &Manifest {
        self.reader.manifest()
    }

    pub fn is_complete(&self) -> bool {
        self.reader.is_complete()
    }

    pub fn state(&self) -> &ExtractState {
        &self.state
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match &self.state {
            ExtractState::Opened => Ok(()),
            other => Err(AtaError::InvalidState(format!("archive is {other:?}"))),
        }
    }

    pub(crate) fn transition(&mut self, next: ExtractState) {
        debug!(from = ?self.state, to = ?next, "extract state");
        self.state = next;
    }

    /// Manifest indices selected by `paths`, in manifest order. A directory
    /// selects everything beneath it. Unknown paths are returned separately.
    pub(crate) fn select(&self, paths: Option<&[EntryPath]>) -> (Vec<usize>, Vec<EntryPath>) {
        let entries = &self.manifest().entries;
        let Some(paths) = paths else {
            return ((0..entries.len()).collect(), Vec::new());
        };
        let mut missing = Vec::new();
        let mut wanted = vec![false; entries.len()];
        for p in paths {
            let mut hit = false;
            for (i, e) in entries.iter().enumerate() {
                if e.path.components().starts_with(p.components()) {
                    wanted[i] = true;
                    hit = true;
                }
            }
            if !hit {
                missing.push(p.clone());
            }
        }
        let picked = wanted
            .iter()
            .enumerate()
            .filter_map(|(i, &w)| w.then_some(i))
            .collect();
        (picked, missing)
    }
}
