use crate::chunking::fixed::{Chunker, Chunks, DEFAULT_CHUNK_SIZE, validate_chunk_size};
use crate::codec::CompressionContext;
use crate::container::chunktab::ChunkDescriptor;
use crate::container::manifest::{CHECKSUM_LEN, EntryKind, ManifestBuilder, ManifestEntry};
use crate::container::superblock::Superblock;
use crate::container::writer::ContainerWriter;
use crate::crypto::aead::CipherId;
use crate::crypto::kdf::{KdfParams, SALT_LEN, SessionKeys, random_salt};
use crate::crypto::nonce::NonceSequence;
use crate::entry::{EntrySource, PassphraseProvider, SourceEntry, SourceKind};
use crate::error::{AtaError, Result};
use crate::pipeline::{ChunkPipeline, EntryDigest, SealedChunk};
use crate::sched::{CancelToken, DEFAULT_QUEUE_DEPTH, Scheduler};
use crate::stats::Stats;
use crate::util::sanitize::EntryPath;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Read, Write};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    pub compression: CompressionContext,
    pub chunk_size: usize,
    /// 0 means one worker per CPU.
    pub workers: usize,
    pub queue_depth: usize,
    pub encrypt: bool,
    pub kdf: KdfParams,
    /// When true, zero timestamps in the manifest for reproducible output.
    pub deterministic: bool,
    /// Fixed salt instead of a random one. Only useful for reproducible
    /// test vectors; never reuse a salt with the same passphrase.
    #[serde(skip)]
    pub salt: Option<[u8; SALT_LEN]>,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            compression: CompressionContext::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 0,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            encrypt: false,
            kdf: KdfParams::default(),
            deterministic: false,
            salt: None,
        }
    }
}

impl CreateOptions {
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            Scheduler::default_workers()
        } else {
            self.workers
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateState {
    Idle,
    Collecting,
    Processing,
    Finalizing,
    Closed,
    Failed(String),
}

/// One unit of the global job stream. Only `Chunk` does real work on a
/// worker; the others ride along to keep the sink's view ordered.
enum Job {
    Open(ManifestEntry),
    Chunk { seq: u64, data: Vec<u8> },
    Close { size: u64, checksum: [u8; CHECKSUM_LEN] },
    Whole(ManifestEntry),
}

enum Done {
    Open(ManifestEntry),
    Chunk(Result<SealedChunk>),
    Close { size: u64, checksum: [u8; CHECKSUM_LEN] },
    Whole(ManifestEntry),
}

struct OpenFile {
    chunks: Chunks<Box<dyn Read + Send>>,
    digest: EntryDigest,
    size: u64,
}

/// Turns entries into jobs on the coordinating thread. Nonce counters are
/// allocated here, once per chunk, in stream order.
struct JobStream<'a, S> {
    source: S,
    pipeline: &'a ChunkPipeline,
    nonces: &'a NonceSequence,
    seen: &'a mut HashSet<EntryPath>,
    chunk_size: usize,
    deterministic: bool,
    current: Option<OpenFile>,
}

impl<S: EntrySource> JobStream<'_, S> {
    fn next_file_job(&mut self, mut cur: OpenFile) -> Result<Job> {
        match cur.chunks.next() {
            Some(Ok((_, data))) => {
                let seq = self.nonces.next()?;
                cur.digest.update(&data);
                cur.size += data.len() as u64;
                self.current = Some(cur);
                Ok(Job::Chunk { seq, data })
            }
            Some(Err(e)) => Err(e),
            None => {
                let size = cur.size;
                Ok(Job::Close {
                    size,
                    checksum: cur.digest.finalize(size),
                })
            }
        }
    }

    fn start_entry(&mut self, src: SourceEntry) -> Result<Job> {
        if !self.seen.insert(src.path.clone()) {
            return Err(AtaError::InvalidPath(format!("duplicate entry {}", src.path)));
        }
        let mtime = if self.deterministic { 0 } else { src.mtime };
        match src.kind {
            SourceKind::File(reader) => {
                let entry = ManifestEntry::new(src.path, EntryKind::File, src.mode, mtime);
                self.current = Some(OpenFile {
                    chunks: Chunker::split(reader, self.chunk_size)?,
                    digest: self.pipeline.entry_digest(&entry),
                    size: 0,
                });
                Ok(Job::Open(entry))
            }
            SourceKind::Dir => {
                let mut entry = ManifestEntry::new(src.path, EntryKind::Dir, src.mode, mtime);
                entry.checksum = self
                    .pipeline
                    .entry_digest(&entry)
                    .finalize(0);
                Ok(Job::Whole(entry))
            }
            SourceKind::Symlink(target) => {
                if target.is_empty() {
                    return Err(AtaError::InvalidPath(format!(
                        "symlink {} has an empty target",
                        src.path
                    )));
                }
                let mut entry = ManifestEntry::new(src.path, EntryKind::Symlink, src.mode, mtime);
                let mut digest = self.pipeline.entry_digest(&entry);
                digest.update(target.as_bytes());
                entry.size = target.len() as u64;
                entry.checksum = digest.finalize(entry.size);
                entry.link_target = Some(target);
                Ok(Job::Whole(entry))
            }
        }
    }
}

impl<S: EntrySource> Iterator for JobStream<'_, S> {
    type Item = Result<Job>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(cur) = self.current.take() {
            return Some(self.next_file_job(cur));
        }
        match self.source.next()? {
            Ok(src) => Some(self.start_entry(src)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Streaming archive creation.
///
/// `Idle → Processing ⇄ Collecting → Finalizing → Closed`; any error moves to
/// `Failed` after the container has been sealed with an incomplete trailer.
pub struct Archiver<W: Write> {
    state: CreateState,
    writer: Option<ContainerWriter<W>>,
    out: Option<W>,
    pipeline: ChunkPipeline,
    sched: Scheduler,
    nonces: NonceSequence,
    builder: ManifestBuilder,
    seen: HashSet<EntryPath>,
    stats: Stats,
    cancel: CancelToken,
    chunk_size: usize,
    deterministic: bool,
}

impl<W: Write> Archiver<W> {
    /// Validate options, derive keys and write the header.
    pub fn new(
        out: W,
        opts: &CreateOptions,
        passphrase: Option<&dyn PassphraseProvider>,
    ) -> Result<Self> {
        validate_chunk_size(opts.chunk_size)?;
        let salt = match opts.salt {
            Some(s) => s,
            None => random_salt()?,
        };
        let (encryption, kdf, keys) = if opts.encrypt {
            opts.kdf.validate()?;
            let provider = passphrase.ok_or(AtaError::MissingPassphrase)?;
            let keys = SessionKeys::from_passphrase(&provider.passphrase()?, &salt, &opts.kdf)?;
            (CipherId::XChaCha20Poly1305, Some(opts.kdf), Some(keys))
        } else {
            (CipherId::None, None, None)
        };

        let header = Superblock::new(opts.compression.codec, encryption, salt, kdf)?;
        let pipeline = ChunkPipeline::new(opts.compression, encryption, salt, keys.as_ref())?;
        let sched = Scheduler::new(opts.effective_workers(), opts.queue_depth)?;
        let writer = ContainerWriter::new(out, &header)?;
        debug!(
            codec = ?opts.compression.codec,
            level = opts.compression.level,
            encrypted = opts.encrypt,
            workers = sched.workers(),
            window = sched.window(),
            "archive header written"
        );

        Ok(Self {
            state: CreateState::Idle,
            writer: Some(writer),
            out: None,
            pipeline,
            sched,
            nonces: NonceSequence::new(),
            builder: ManifestBuilder::new(),
            seen: HashSet::new(),
            stats: Stats::default(),
            cancel: CancelToken::new(),
            chunk_size: opts.chunk_size,
            deterministic: opts.deterministic,
        })
    }

    pub fn state(&self) -> &CreateState {
        &self.state
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Handle that stops an in-progress `append` from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Archive every entry of `source`, in order. May be called repeatedly.
    pub fn append<S: EntrySource>(&mut self, source: S) -> Result<()> {
        match self.state {
            CreateState::Idle | CreateState::Collecting => {}
            ref other => {
                return Err(AtaError::InvalidState(format!("cannot append in state {other:?}")));
            }
        }
        self.transition(CreateState::Processing);

        let chunk_size = self.chunk_size;
        let deterministic = self.deterministic;
        let Self {
            writer,
            pipeline,
            sched,
            nonces,
            builder,
            seen,
            stats,
            cancel,
            ..
        } = self;
        let writer = writer
            .as_mut()
            .ok_or_else(|| AtaError::InvalidState("container already finalized".into()))?;

        let pipeline: &ChunkPipeline = pipeline;
        let jobs = JobStream {
            source,
            pipeline,
            nonces,
            seen,
            chunk_size,
            deterministic,
            current: None,
        };
        let work = |job: Job| match job {
            Job::Chunk { seq, data } => Done::Chunk(pipeline.seal(seq, &data)),
            Job::Open(e) => Done::Open(e),
            Job::Close { size, checksum } => Done::Close { size, checksum },
            Job::Whole(e) => Done::Whole(e),
        };
        let sink = |done: Done| -> Result<()> {
            match done {
                Done::Open(e) => builder.begin(e),
                Done::Chunk(sealed) => {
                    let s = sealed?;
                    let (offset, stored_len) = writer.append_chunk(&s.stored)?;
                    stats.chunks += 1;
                    stats.stored_bytes += stored_len;
                    builder.push_chunk(ChunkDescriptor {
                        seq: s.seq,
                        offset,
                        stored_len,
                        plain_len: s.plain_len,
                        tag: s.tag,
                    })
                }
                Done::Close { size, checksum } => {
                    let e = builder.finish(size, checksum)?;
                    debug!(path = %e.path, size, chunks = e.chunks.len(), "file archived");
                    stats.files += 1;
                    stats.logical_bytes += size;
                    Ok(())
                }
                Done::Whole(e) => {
                    match e.kind {
                        EntryKind::Dir => stats.dirs += 1,
                        _ => stats.symlinks += 1,
                    }
                    debug!(path = %e.path, kind = e.kind.as_str(), "entry archived");
                    builder.push_complete(e)
                }
            }
        };

        match sched.run(jobs, work, sink, cancel) {
            Ok(_) => {
                self.transition(CreateState::Collecting);
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Write manifest and complete trailer; returns the output and totals.
    pub fn finish(mut self) -> Result<(W, Stats)> {
        match self.state {
            CreateState::Idle | CreateState::Collecting => {}
            ref other => {
                return Err(AtaError::InvalidState(format!("cannot finish in state {other:?}")));
            }
        }
        self.transition(CreateState::Finalizing);
        let writer = self
            .writer
            .take()
            .ok_or_else(|| AtaError::InvalidState("container already finalized".into()))?;
        let out = writer.finish(&self.builder.encode(), true)?;
        self.transition(CreateState::Closed);
        info!(
            files = self.stats.files,
            dirs = self.stats.dirs,
            symlinks = self.stats.symlinks,
            chunks = self.stats.chunks,
            logical = self.stats.logical_bytes,
            stored = self.stats.stored_bytes,
            "archive complete"
        );
        Ok((out, self.stats))
    }

    /// Stop here: keep finished entries and mark the archive incomplete.
    pub fn abort(&mut self, reason: &str) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.fail(&AtaError::InvalidState(reason.to_string()));
        Ok(())
    }

    /// The output once the container has been sealed (complete or not).
    pub fn into_inner(self) -> Option<W> {
        self.out
    }

    fn fail(&mut self, err: &AtaError) {
        warn!(error = %err, entries = self.builder.entries().len(), "archive creation stopped");
        if let Some(writer) = self.writer.take() {
            match writer.finish(&self.builder.encode(), false) {
                Ok(out) => self.out = Some(out),
                Err(e) => warn!(error = %e, "could not write incomplete trailer"),
            }
        }
        self.transition(CreateState::Failed(err.to_string()));
    }

    fn transition(&mut self, next: CreateState) {
        debug!(from = ?self.state, to = ?next, "create state");
        self.state = next;
    }
}

/// Archive `source` into `out` in one go.
pub fn create<W: Write, S: EntrySource>(
    out: W,
    source: S,
    opts: &CreateOptions,
    passphrase: Option<&dyn PassphraseProvider>,
) -> Result<(W, Stats)> {
    let mut archiver = Archiver::new(out, opts, passphrase)?;
    archiver.append(source)?;
    archiver.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::container::reader::ContainerReader;
    use crate::policy::Limits;
    use std::io::Cursor;

    fn p(s: &str) -> EntryPath {
        EntryPath::parse(s).unwrap()
    }

    fn small_opts() -> CreateOptions {
        CreateOptions {
            chunk_size: 8,
            workers: 2,
            queue_depth: 1,
            salt: Some([1; SALT_LEN]),
            ..CreateOptions::default()
        }
    }

    #[test]
    fn writes_entries_in_source_order() {
        let src = vec![
            SourceEntry::dir(p("d")),
            SourceEntry::file_from_bytes(p("d/a"), b"0123456789abcdef!".to_vec()),
            SourceEntry::file_from_bytes(p("d/empty"), Vec::new()),
            SourceEntry::symlink(p("d/l"), "a"),
        ];
        let (bytes, stats) = create(Vec::new(), src.into_iter().map(Ok), &small_opts(), None).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.dirs, 1);
        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.chunks, 3);
        assert_eq!(stats.logical_bytes, 17);

        let r = ContainerReader::open(Cursor::new(bytes), &Limits::default()).unwrap();
        let names: Vec<String> = r.manifest().entries.iter().map(|e| e.path.to_string()).collect();
        assert_eq!(names, ["d", "d/a", "d/empty", "d/l"]);
        let seqs: Vec<u64> = r.manifest().entries[1].chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, [0, 1, 2]);
        assert!(r.is_complete());
        assert_eq!(r.header().compression, CodecId::Zstd);
    }

    #[test]
    fn duplicate_paths_abort_creation() {
        let src = vec![
            SourceEntry::file_from_bytes(p("x"), b"1".to_vec()),
            SourceEntry::file_from_bytes(p("x"), b"2".to_vec()),
        ];
        let mut a = Archiver::new(Vec::new(), &small_opts(), None).unwrap();
        assert!(matches!(a.append(src.into_iter().map(Ok)), Err(AtaError::InvalidPath(_))));
        assert!(matches!(a.state(), CreateState::Failed(_)));
        let bytes = a.into_inner().unwrap();
        let r = ContainerReader::open(Cursor::new(bytes), &Limits::default()).unwrap();
        assert!(!r.is_complete());
        assert_eq!(r.manifest().len(), 1);
    }

    #[test]
    fn encryption_requires_passphrase() {
        let opts = CreateOptions {
            encrypt: true,
            kdf: KdfParams::FLOOR,
            ..small_opts()
        };
        assert!(matches!(
            Archiver::new(Vec::new(), &opts, None),
            Err(AtaError::MissingPassphrase)
        ));
    }

    #[test]
    fn finish_after_failure_is_rejected() {
        let mut a = Archiver::new(Vec::new(), &small_opts(), None).unwrap();
        a.abort("user request").unwrap();
        assert!(matches!(a.finish(), Err(AtaError::InvalidState(_))));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let o: CreateOptions = serde_json::from_str(r#"{"chunk_size": 1024}"#).unwrap();
        assert_eq!(o.chunk_size, 1024);
        assert_eq!(o.compression, CompressionContext::default());
        assert!(!o.encrypt);
    }
}
