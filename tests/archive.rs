use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use kira_bioassay::archive::{ArchiveItem, BioassayArchive, SkipReason, scan_units};
use kira_bioassay::error::KiraError;

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn record_json(aid: u64) -> Vec<u8> {
    format!(r#"{{"PC_AssaySubmit":{{"assay":{{"descr":{{"aid":{{"id":{aid}}}}}}}}}}}"#).into_bytes()
}

fn zip_bytes(members: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn write_zip(path: &Path, members: &[(&str, Vec<u8>)]) {
    let mut file = File::create(path).unwrap();
    file.write_all(&zip_bytes(members)).unwrap();
}

fn aids(items: &[ArchiveItem]) -> Vec<u64> {
    items
        .iter()
        .filter_map(|item| match item {
            ArchiveItem::Record { record, .. } => Some(record.aid().get()),
            ArchiveItem::Skipped { .. } => None,
        })
        .collect()
}

#[test]
fn yields_records_in_listing_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("0000001_0001000.zip");
    write_zip(
        &path,
        &[
            ("0000001_0001000/3.json.gz", gzip(&record_json(3))),
            ("0000001_0001000/README", b"ignored".to_vec()),
            ("0000001_0001000/1.json.gz", gzip(&record_json(1))),
        ],
    );

    let mut archive = BioassayArchive::open(&path).unwrap();
    assert_eq!(archive.member_count(), 2);
    let items: Vec<_> = archive.records().collect();
    assert_eq!(aids(&items), vec![3, 1]);
}

#[test]
fn sequence_is_restartable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unit.zip");
    write_zip(&path, &[("5.json.gz", gzip(&record_json(5)))]);

    let mut archive = BioassayArchive::open(&path).unwrap();
    let first: Vec<_> = archive.records().collect();
    let second: Vec<_> = archive.records().collect();
    assert_eq!(aids(&first), aids(&second));
}

#[test]
fn bad_member_is_skipped_and_rest_continues() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unit.zip");
    write_zip(
        &path,
        &[
            ("1.json.gz", gzip(&[0xc3, 0x28, 0xa0, 0xa1])),
            ("2.json.gz", b"not gzip".to_vec()),
            ("3.json.gz", gzip(b"{\"unexpected\": true}")),
            ("4.json.gz", gzip(&record_json(4))),
        ],
    );

    let mut archive = BioassayArchive::open(&path).unwrap();
    let items: Vec<_> = archive.records().collect();
    assert_eq!(items.len(), 4);
    assert_matches!(&items[0], ArchiveItem::Skipped { reason: SkipReason::NotUtf8(_), member } if member == "1.json.gz");
    assert_matches!(&items[1], ArchiveItem::Skipped { reason: SkipReason::Decompress(_), .. });
    assert_matches!(&items[2], ArchiveItem::Skipped { reason: SkipReason::Json(_), .. });
    assert_eq!(aids(&items), vec![4]);
}

#[test]
fn nested_archives_are_flattened() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outer.zip");
    let inner_a = zip_bytes(&[
        ("10.json.gz", gzip(&record_json(10))),
        ("11.json.gz", gzip(&record_json(11))),
    ]);
    let inner_b = zip_bytes(&[("12.json.gz", gzip(&record_json(12)))]);
    write_zip(
        &path,
        &[
            ("a.zip", inner_a),
            ("broken.zip", b"PK but not really".to_vec()),
            ("b.zip", inner_b),
        ],
    );

    let mut archive = BioassayArchive::open(&path).unwrap();
    let items: Vec<_> = archive.records().collect();
    assert_eq!(aids(&items), vec![10, 11, 12]);
    assert!(items.iter().any(|item| matches!(
        item,
        ArchiveItem::Skipped { member, reason: SkipReason::CorruptInner(_) } if member == "broken.zip"
    )));
    assert_matches!(&items[0], ArchiveItem::Record { member, .. } if member == "a.zip/10.json.gz");
}

#[test]
fn corrupt_outer_archive_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.zip");
    fs::write(&path, b"definitely not a zip file").unwrap();
    assert_matches!(
        BioassayArchive::open(&path),
        Err(KiraError::CorruptArchive { .. })
    );
}

#[test]
fn scan_lists_zip_units_sorted() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["0002001_0003000.zip", "README.zip", "0000001_0001000.zip", "notes.txt"] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    fs::create_dir(dir.path().join("folder.zip")).unwrap();

    let units = scan_units(dir.path()).unwrap();
    let names: Vec<_> = units
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["0000001_0001000.zip", "0002001_0003000.zip"]);
}
