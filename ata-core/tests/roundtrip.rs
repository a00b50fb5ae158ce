mod common;

use ata_core::entry::{MemoryNode, SourceEntry};
use ata_core::{FailureMode, list::list_from, policy::Limits};
use common::*;
use proptest::prelude::*;
use std::io::Cursor;

fn varied_tree() -> Vec<SourceEntry> {
    vec![
        SourceEntry::dir(p("root")).with_mode(0o750).with_mtime(1_700_000_000),
        SourceEntry::file_from_bytes(p("root/empty"), Vec::new()),
        SourceEntry::file_from_bytes(p("root/exact"), noise(4096, 1)).with_mode(0o600),
        SourceEntry::file_from_bytes(p("root/plus_one"), noise(4097, 2)),
        SourceEntry::dir(p("root/a")),
        SourceEntry::dir(p("root/a/b")),
        SourceEntry::dir(p("root/a/b/c")),
        SourceEntry::file_from_bytes(p("root/a/b/c/deep.txt"), b"deep".to_vec()).with_mode(0o755),
        SourceEntry::symlink(p("root/link"), "a/b/c/deep.txt"),
    ]
}

fn check_varied(sink: &ata_core::entry::MemorySink) {
    assert_eq!(sink.file("root/empty"), Some(&[][..]));
    assert_eq!(sink.file("root/exact"), Some(&noise(4096, 1)[..]));
    assert_eq!(sink.file("root/plus_one"), Some(&noise(4097, 2)[..]));
    assert_eq!(sink.file("root/a/b/c/deep.txt"), Some(&b"deep"[..]));
    assert_eq!(
        sink.nodes.get("root/link"),
        Some(&MemoryNode::Symlink {
            target: "a/b/c/deep.txt".into()
        })
    );
    assert_eq!(sink.nodes.get("root"), Some(&MemoryNode::Dir { mode: 0o750 }));
    match sink.nodes.get("root/exact") {
        Some(MemoryNode::File { mode, .. }) => assert_eq!(*mode, 0o600),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn plain_roundtrip_single_and_multi_worker() {
    for workers in [1, 4] {
        let bytes = build(varied_tree(), &opts(workers, 1024), None);
        let (report, sink) = extract_all(bytes, None, FailureMode::BestEffort);
        assert!(report.is_success());
        check_varied(&sink);
    }
}

#[test]
fn encrypted_roundtrip() {
    let bytes = build(varied_tree(), &encrypted(3, 1000), Some("pw"));
    let (report, sink) = extract_all(bytes, Some("pw"), FailureMode::AllOrNothing);
    assert!(report.is_success());
    assert!(report.materialized);
    check_varied(&sink);
}

#[test]
fn stored_codec_roundtrip() {
    let mut o = opts(2, 512);
    o.compression.codec = ata_core::codec::CodecId::None;
    let bytes = build(varied_tree(), &o, None);
    let (report, sink) = extract_all(bytes, None, FailureMode::BestEffort);
    assert!(report.is_success());
    check_varied(&sink);
}

#[test]
fn output_is_identical_across_worker_counts() {
    let one = build(varied_tree(), &encrypted(1, 700), Some("k"));
    let many = build(varied_tree(), &encrypted(4, 700), Some("k"));
    assert_eq!(one, many);

    let one = build(varied_tree(), &opts(1, 333), None);
    let many = build(varied_tree(), &opts(6, 333), None);
    assert_eq!(one, many);
}

#[test]
fn deterministic_mode_zeroes_mtimes() {
    let mut o = opts(2, 1024);
    o.deterministic = true;
    let bytes = build(varied_tree(), &o, None);
    let listing = list_from(Cursor::new(bytes), &Limits::default()).unwrap();
    assert!(listing.entries.iter().all(|e| e.mtime == 0));
}

#[test]
fn listing_is_idempotent_and_needs_no_passphrase() {
    let bytes = build(small_tree(), &encrypted(2, 64 * 1024), Some("secret"));
    let first = list_from(Cursor::new(bytes.clone()), &Limits::default()).unwrap();
    let second = list_from(Cursor::new(bytes), &Limits::default()).unwrap();
    assert_eq!(first.entries, second.entries);
    assert!(first.encrypted);
    assert!(first.complete);
    let names: Vec<&str> = first.entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(names, ["a.txt", "dir", "dir/b.bin"]);
    assert_eq!(first.stats.files, 2);
    assert_eq!(first.stats.logical_bytes, 6 + 300_000);
}

#[test]
fn limits_reject_oversized_manifests() {
    let bytes = build(varied_tree(), &opts(1, 1024), None);
    let limits = Limits {
        max_entries: Some(3),
        max_uncompressed: None,
    };
    assert!(matches!(
        list_from(Cursor::new(bytes.clone()), &limits),
        Err(ata_core::AtaError::LimitExceeded(_))
    ));
    let limits = Limits {
        max_entries: None,
        max_uncompressed: Some(100),
    };
    assert!(matches!(
        list_from(Cursor::new(bytes), &limits),
        Err(ata_core::AtaError::LimitExceeded(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn arbitrary_files_roundtrip(
        files in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..3000), 0..8),
        chunk_size in 1usize..2048,
        workers in 1usize..5,
    ) {
        let src: Vec<SourceEntry> = files
            .iter()
            .enumerate()
            .map(|(i, data)| SourceEntry::file_from_bytes(p(&format!("f{i}")), data.clone()))
            .collect();
        let bytes = build(src, &opts(workers, chunk_size), None);
        let (report, sink) = extract_all(bytes, None, FailureMode::BestEffort);
        prop_assert!(report.is_success());
        prop_assert_eq!(sink.nodes.len(), files.len());
        for (i, data) in files.iter().enumerate() {
            prop_assert_eq!(sink.file(&format!("f{i}")), Some(&data[..]));
        }
    }
}
