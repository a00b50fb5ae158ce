//! Verified extraction.
//!
//! Every chunk is authenticated before it is decoded, and a file is only
//! committed to the sink once its size and entry checksum match. Failures are
//! recorded per entry; whether one failure stops the rest is the caller's
//! choice (`FailureMode`).

use crate::container::manifest::{EntryKind, ManifestEntry};
use crate::entry::EntrySink;
use crate::error::{AtaError, Result};
use crate::policy::{FailureMode, Policy};
use crate::read::opened::{ExtractState, Opened};
use crate::sched::{CancelToken, DEFAULT_QUEUE_DEPTH, Scheduler};
use crate::util::hash_forward::HashingForward;
use crate::util::sanitize::EntryPath;
use std::io::{Read, Seek, Write};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ExtractOptions {
    pub policy: Policy,
    /// Entries to extract; `None` means all of them.
    pub paths: Option<Vec<EntryPath>>,
    /// 0 means one worker per CPU.
    pub workers: usize,
    pub queue_depth: usize,
    pub cancel: CancelToken,
}

impl ExtractOptions {
    /// No `Default`: the failure mode must be chosen.
    pub fn new(failure_mode: FailureMode) -> Self {
        Self {
            policy: Policy::new(failure_mode),
            paths: None,
            workers: 0,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_paths(mut self, paths: Vec<EntryPath>) -> Self {
        self.paths = Some(paths);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    fn scheduler(&self) -> Result<Scheduler> {
        let workers = if self.workers == 0 {
            Scheduler::default_workers()
        } else {
            self.workers
        };
        Scheduler::new(workers, self.queue_depth)
    }
}

#[derive(Debug)]
pub enum EntryOutcome {
    Ok,
    Failed(AtaError),
}

#[derive(Debug)]
pub struct EntryReport {
    pub path: EntryPath,
    /// `None` when the requested path is not in the archive.
    pub kind: Option<EntryKind>,
    pub outcome: EntryOutcome,
}

impl EntryReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, EntryOutcome::Ok)
    }
}

#[derive(Debug)]
pub struct ExtractReport {
    pub entries: Vec<EntryReport>,
    /// False when the archive's trailer marks it incomplete.
    pub archive_complete: bool,
    /// Whether anything was handed to the sink.
    pub materialized: bool,
}

impl ExtractReport {
    /// Every requested entry verified and the archive is complete.
    pub fn is_success(&self) -> bool {
        self.archive_complete && self.entries.iter().all(EntryReport::is_ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&EntryPath, &AtaError)> {
        self.entries.iter().filter_map(|r| match &r.outcome {
            EntryOutcome::Failed(e) => Some((&r.path, e)),
            EntryOutcome::Ok => None,
        })
    }
}

// Errors that end the whole run rather than one entry.
fn is_fatal(e: &AtaError) -> bool {
    matches!(
        e,
        AtaError::Cancelled | AtaError::WorkerPanicked { .. } | AtaError::InvalidState(_)
    )
}

impl<R: Read + Seek> Opened<R> {
    /// Verify and materialize the selected entries into `sink`.
    pub fn extract(
        &mut self,
        sink: &mut dyn EntrySink,
        opts: &ExtractOptions,
    ) -> Result<ExtractReport> {
        self.ensure_usable()?;
        self.transition(ExtractState::Extracting);
        let result = self.extract_inner(sink, opts);
        match &result {
            Ok(_) => self.transition(ExtractState::Closed),
            Err(e) => self.transition(ExtractState::Failed(e.to_string())),
        }
        result
    }

    /// Full verification pass; nothing is materialized.
    pub fn verify(&mut self, opts: &ExtractOptions) -> Result<ExtractReport> {
        self.ensure_usable()?;
        self.transition(ExtractState::Extracting);
        let result = self.run_pass(None, opts);
        match &result {
            Ok(_) => self.transition(ExtractState::Opened),
            Err(e) => self.transition(ExtractState::Failed(e.to_string())),
        }
        result
    }

    fn extract_inner(
        &mut self,
        sink: &mut dyn EntrySink,
        opts: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let all_or_nothing = opts.policy.failure_mode == FailureMode::AllOrNothing;
        if all_or_nothing {
            let check = self.run_pass(None, opts)?;
            if check.entries.iter().any(|r| !r.is_ok()) {
                warn!(
                    failed = check.failures().count(),
                    "verification failed; nothing extracted"
                );
                return Ok(check);
            }
        }
        let result = self.run_pass(Some(&mut *sink), opts);
        let wrote_everything = result
            .as_ref()
            .is_ok_and(|r| r.entries.iter().all(EntryReport::is_ok));
        if all_or_nothing && !wrote_everything {
            warn!("writing failed after verification; removing extracted entries");
            let undone = sink.rollback();
            if let (Err(e), Err(_)) = (&undone, &result) {
                warn!(error = %e, "rollback incomplete");
            }
            let mut report = result?;
            undone?;
            report.materialized = false;
            return Ok(report);
        }
        let report = result?;
        info!(
            entries = report.entries.len(),
            failed = report.failures().count(),
            complete = report.archive_complete,
            "extraction finished"
        );
        Ok(report)
    }

    fn run_pass(
        &mut self,
        mut sink: Option<&mut dyn EntrySink>,
        opts: &ExtractOptions,
    ) -> Result<ExtractReport> {
        let sched = opts.scheduler()?;
        let (picked, missing) = self.select(opts.paths.as_deref());
        let selected: Vec<ManifestEntry> = picked
            .iter()
            .map(|&i| self.manifest().entries[i].clone())
            .collect();

        let mut entries = Vec::with_capacity(selected.len() + missing.len());
        for p in missing {
            warn!(path = %p, "requested entry not in archive");
            entries.push(EntryReport {
                kind: None,
                outcome: EntryOutcome::Failed(AtaError::EntryNotFound(p.to_string())),
                path: p,
            });
        }

        for entry in &selected {
            if opts.cancel.is_cancelled() {
                return Err(AtaError::Cancelled);
            }
            let res = self.process_entry(
                entry,
                sink.as_deref_mut(),
                &opts.policy,
                &sched,
                &opts.cancel,
            );
            let outcome = match res {
                Ok(()) => {
                    debug!(path = %entry.path, kind = entry.kind.as_str(), "entry ok");
                    EntryOutcome::Ok
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    warn!(path = %entry.path, error = %e, "entry failed");
                    EntryOutcome::Failed(e)
                }
            };
            entries.push(EntryReport {
                path: entry.path.clone(),
                kind: Some(entry.kind),
                outcome,
            });
        }

        let materialized = sink.is_some();
        if let Some(s) = sink {
            s.finish()?;
        }
        Ok(ExtractReport {
            entries,
            archive_complete: self.is_complete(),
            materialized,
        })
    }

    fn process_entry(
        &mut self,
        entry: &ManifestEntry,
        sink: Option<&mut (dyn EntrySink + '_)>,
        policy: &Policy,
        sched: &Scheduler,
        cancel: &CancelToken,
    ) -> Result<()> {
        match entry.kind {
            EntryKind::Dir => {
                self.pipeline
                    .entry_digest(entry)
                    .verify(0, &entry.checksum, &entry.path)?;
                match sink {
                    Some(s) => s.directory(entry),
                    None => Ok(()),
                }
            }
            EntryKind::Symlink => {
                let target = entry
                    .link_target
                    .as_deref()
                    .ok_or_else(|| AtaError::Format(format!("symlink {} has no target", entry.path)))?;
                let mut digest = self.pipeline.entry_digest(entry);
                digest.update(target.as_bytes());
                digest.verify(entry.size, &entry.checksum, &entry.path)?;
                if !policy.allow_symlinks {
                    return Err(AtaError::InvalidPath(format!(
                        "symlink {} refused by policy",
                        entry.path
                    )));
                }
                match sink {
                    Some(s) => s.symlink(entry, target),
                    None => Ok(()),
                }
            }
            EntryKind::File => match sink {
                Some(s) => {
                    let mut staged = s.begin_file(entry)?;
                    self.stream_file(entry, &mut staged, sched, cancel)?;
                    staged.commit()
                }
                None => self.stream_file(entry, &mut std::io::sink(), sched, cancel),
            },
        }
    }

    /// Authenticate, decode and write every chunk of `entry` in order, then
    /// check the size and entry checksum. Output written before a failure is
    /// left for the caller to discard.
    pub(super) fn stream_file(
        &mut self,
        entry: &ManifestEntry,
        out: &mut dyn Write,
        sched: &Scheduler,
        cancel: &CancelToken,
    ) -> Result<()> {
        let Self {
            reader, pipeline, ..
        } = self;
        let pipeline = &*pipeline;
        let mut digest = pipeline.entry_digest(entry);
        let written = {
            let mut hw = HashingForward::new(&mut *out, digest.hasher_mut());
            let tasks = entry
                .chunks
                .iter()
                .map(|d| reader.read_stored(d.offset, d.stored_len).map(|b| (d, b)));
            sched.run(
                tasks,
                |(d, stored)| pipeline.open(d, stored),
                |plain: Result<Vec<u8>>| {
                    hw.write_all(&plain?)?;
                    Ok(())
                },
                cancel,
            )?;
            hw.flush()?;
            hw.counted
        };
        if written != entry.size {
            return Err(AtaError::CorruptData(format!(
                "entry {}: produced {written} bytes, expected {}",
                entry.path, entry.size
            )));
        }
        digest.verify(entry.size, &entry.checksum, &entry.path)
    }
}
