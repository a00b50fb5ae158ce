#![allow(dead_code)]

use ata_core::crypto::kdf::KdfParams;
use ata_core::entry::{MemorySink, SourceEntry};
use ata_core::{CreateOptions, EntryPath, ExtractOptions, FailureMode, OpenOptions, Opened};
use secrecy::SecretString;
use std::io::Cursor;

pub fn p(s: &str) -> EntryPath {
    EntryPath::parse(s).unwrap()
}

pub fn secret(s: &str) -> SecretString {
    SecretString::from(s)
}

pub fn opts(workers: usize, chunk_size: usize) -> CreateOptions {
    CreateOptions {
        chunk_size,
        workers,
        kdf: KdfParams::FLOOR,
        salt: Some([0x5a; 16]),
        ..CreateOptions::default()
    }
}

pub fn encrypted(workers: usize, chunk_size: usize) -> CreateOptions {
    CreateOptions {
        encrypt: true,
        ..opts(workers, chunk_size)
    }
}

/// Deterministic pseudo-random bytes.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            x as u8
        })
        .collect()
}

/// `a.txt` and `dir/b.bin`, as a fresh source.
pub fn small_tree() -> Vec<SourceEntry> {
    vec![
        SourceEntry::file_from_bytes(p("a.txt"), b"hello\n".to_vec()),
        SourceEntry::dir(p("dir")),
        SourceEntry::file_from_bytes(p("dir/b.bin"), noise(300_000, 7)),
    ]
}

pub fn build(src: Vec<SourceEntry>, o: &CreateOptions, pass: Option<&str>) -> Vec<u8> {
    let s = pass.map(secret);
    let provider = s.as_ref().map(|s| s as &dyn ata_core::PassphraseProvider);
    ata_core::create(Vec::new(), src.into_iter().map(Ok), o, provider)
        .unwrap()
        .0
}

pub fn open(bytes: Vec<u8>, pass: Option<&str>) -> ata_core::Result<Opened<Cursor<Vec<u8>>>> {
    let s = pass.map(secret);
    let provider = s.as_ref().map(|s| s as &dyn ata_core::PassphraseProvider);
    Opened::open(Cursor::new(bytes), provider, &OpenOptions::default())
}

pub fn extract_all(
    bytes: Vec<u8>,
    pass: Option<&str>,
    mode: FailureMode,
) -> (ata_core::ExtractReport, MemorySink) {
    let mut o = open(bytes, pass).unwrap();
    let mut sink = MemorySink::new();
    let report = o.extract(&mut sink, &ExtractOptions::new(mode)).unwrap();
    (report, sink)
}
