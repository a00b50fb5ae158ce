use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ata_core::codec::{CodecId, zstdc};
use ata_core::entry::PassphraseProvider;
use ata_core::error::{AtaError, Result};
use ata_core::list::ListedEntry;
use ata_core::{
    CreateOptions, EntryPath, ExtractOptions, ExtractReport, FailureMode, FsEntrySink,
    FsEntrySource, OpenOptions, Opened, list,
};
use secrecy::{ExposeSecret, SecretString};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};

use super::config::{Config, ExtractConfig};
use crate::presentation::cli::{Compression, ReadArgs};

pub const PASSPHRASE_ENV: &str = "ATA_PASSPHRASE";

/// `ATA_PASSPHRASE` if set, otherwise an interactive prompt. Only asked
/// when the archive is (or will be) encrypted.
pub struct PromptPassphrase {
    confirm: bool,
}

impl PromptPassphrase {
    pub fn new(confirm: bool) -> Self {
        Self { confirm }
    }
}

impl PassphraseProvider for PromptPassphrase {
    fn passphrase(&self) -> Result<SecretString> {
        if let Ok(v) = std::env::var(PASSPHRASE_ENV) {
            if !v.is_empty() {
                return Ok(SecretString::from(v));
            }
        }
        let first = SecretString::from(rpassword::prompt_password("Passphrase: ")?);
        if first.expose_secret().is_empty() {
            return Err(AtaError::MissingPassphrase);
        }
        if self.confirm {
            let again = SecretString::from(rpassword::prompt_password("Repeat passphrase: ")?);
            if first.expose_secret() != again.expose_secret() {
                return Err(AtaError::InvalidOption("passphrases do not match".into()));
            }
        }
        Ok(first)
    }
}

/// Command-line overrides for `create`. `None` keeps the config value.
pub struct CreateFlags {
    pub compression: Option<Compression>,
    pub level: Option<i32>,
    pub chunk_size: Option<usize>,
    pub jobs: Option<usize>,
    pub encrypt: bool,
    pub deterministic: bool,
}

impl CreateFlags {
    fn apply(self, opts: &mut CreateOptions) {
        match self.compression {
            Some(Compression::Zstd) => {
                opts.compression.codec = CodecId::Zstd;
                if opts.compression.level == 0 {
                    opts.compression.level = zstdc::DEFAULT_LEVEL;
                }
            }
            Some(Compression::None) => opts.compression.codec = CodecId::None,
            None => {}
        }
        if let Some(l) = self.level {
            opts.compression.level = l;
        }
        if let Some(c) = self.chunk_size {
            opts.chunk_size = c;
        }
        if let Some(j) = self.jobs {
            opts.workers = j;
        }
        opts.encrypt |= self.encrypt;
        opts.deterministic |= self.deterministic;
    }
}

pub fn handle_create(
    archive: PathBuf,
    inputs: Vec<PathBuf>,
    flags: CreateFlags,
    config: Config,
) -> Result<ExitCode> {
    let mut opts = config.create;
    flags.apply(&mut opts);

    let source = FsEntrySource::new(&inputs)?;
    let prompt = PromptPassphrase::new(true);
    let provider = opts.encrypt.then_some(&prompt as &dyn PassphraseProvider);
    let out = BufWriter::new(File::create(&archive)?);
    let (out, stats) = ata_core::create(out, source, &opts, provider)?;
    out.into_inner()
        .map_err(|e| AtaError::Io(e.into_error()))?
        .sync_all()?;

    info!(archive = %archive.display(), "archive written");
    eprintln!(
        "create: {} files, {} dirs, {} symlinks, {} chunks, {} -> {} bytes (ratio {:.3})",
        stats.files,
        stats.dirs,
        stats.symlinks,
        stats.chunks,
        stats.logical_bytes,
        stats.stored_bytes,
        stats.compression_ratio()
    );
    Ok(ExitCode::SUCCESS)
}

fn format_mtime(secs: i64) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]");
    OffsetDateTime::from_unix_timestamp(secs)
        .ok()
        .and_then(|t| t.format(&fmt).ok())
        .unwrap_or_else(|| secs.to_string())
}

fn long_line(e: &ListedEntry) -> String {
    let mut line = format!(
        "{:<7} {:04o} {:>12} {:>12} {} {:>6} {}",
        e.kind,
        e.mode,
        e.size,
        e.stored,
        format_mtime(e.mtime),
        e.chunks,
        e.path
    );
    if let Some(t) = &e.link_target {
        line.push_str(" -> ");
        line.push_str(t);
    }
    line
}

pub fn handle_list(archive: PathBuf, long: bool, json: bool) -> Result<ExitCode> {
    let listing = list(&archive)?;
    let mut out = std::io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &listing).map_err(std::io::Error::from)?;
        writeln!(out)?;
        return Ok(ExitCode::SUCCESS);
    }
    if !listing.complete {
        warn!("archive is incomplete; only entries finished before the interruption are listed");
    }
    for e in &listing.entries {
        if long {
            writeln!(out, "{}", long_line(e))?;
        } else {
            writeln!(out, "{}", e.path)?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn open_archive(archive: &Path, allow_incomplete: bool, cfg: &ExtractConfig) -> Result<Opened> {
    let opts = OpenOptions {
        allow_incomplete,
        limits: cfg.limits.clone(),
    };
    let prompt = PromptPassphrase::new(false);
    Opened::open_path(archive, Some(&prompt), &opts)
}

fn extract_options(
    all_or_nothing: bool,
    read: &ReadArgs,
    cfg: &ExtractConfig,
    paths: &[String],
) -> Result<ExtractOptions> {
    let mode = if all_or_nothing {
        FailureMode::AllOrNothing
    } else {
        cfg.failure_mode.unwrap_or(FailureMode::BestEffort)
    };
    let mut opts = ExtractOptions::new(mode);
    if let Some(w) = read.jobs.or(cfg.workers) {
        opts = opts.with_workers(w);
    }
    if !paths.is_empty() {
        let parsed = paths
            .iter()
            .map(|p| EntryPath::parse(p))
            .collect::<Result<Vec<_>>>()?;
        opts = opts.with_paths(parsed);
    }
    Ok(opts)
}

/// Print failures and pick the exit code. Partial results are never
/// reported as success.
fn conclude(cmd: &str, report: &ExtractReport) -> ExitCode {
    for (path, err) in report.failures() {
        eprintln!("{cmd}: {path}: {err}");
    }
    if !report.archive_complete {
        eprintln!("{cmd}: archive is incomplete; recovered entries only");
    }
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        if !report.materialized && cmd == "extract" {
            eprintln!("{cmd}: nothing was written");
        }
        ExitCode::FAILURE
    }
}

pub fn handle_extract(
    archive: PathBuf,
    paths: Vec<String>,
    dest: PathBuf,
    all_or_nothing: bool,
    read: ReadArgs,
    config: Config,
) -> Result<ExitCode> {
    let opts = extract_options(all_or_nothing, &read, &config.extract, &paths)?;
    let mut opened = open_archive(&archive, read.allow_incomplete, &config.extract)?;
    let mut sink = FsEntrySink::new(dest)?;
    let report = opened.extract(&mut sink, &opts)?;
    info!(
        entries = report.entries.len(),
        ok = report.entries.iter().filter(|r| r.is_ok()).count(),
        "extraction finished"
    );
    Ok(conclude("extract", &report))
}

pub fn handle_verify(archive: PathBuf, read: ReadArgs, config: Config) -> Result<ExitCode> {
    let opts = extract_options(false, &read, &config.extract, &[])?;
    let mut opened = open_archive(&archive, read.allow_incomplete, &config.extract)?;
    let report = opened.verify(&opts)?;
    let code = conclude("verify", &report);
    if report.is_success() {
        println!("Archive is valid");
    }
    Ok(code)
}

pub fn handle_cat(
    archive: PathBuf,
    path: String,
    allow_incomplete: bool,
    config: Config,
) -> Result<ExitCode> {
    let path = EntryPath::parse(&path)?;
    let mut opened = open_archive(&archive, allow_incomplete, &config.extract)?;
    let mut reader = opened.open_entry(&path)?;
    let mut out = std::io::stdout().lock();
    std::io::copy(&mut reader, &mut out)?;
    out.flush()?;
    Ok(ExitCode::SUCCESS)
}
