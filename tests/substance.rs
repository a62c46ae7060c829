use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use kira_bioassay::error::KiraError;
use kira_bioassay::substance::{
    DataItemNotation, LineNotation, SdfRecord, extract_substances, read_structure_file,
    scan_structure_files,
};

const RECORD: &str = "\
aspirin
  -OEChem-

 13 13  0     0  0  0  0  0  0999 V2000
M  END
> <PUBCHEM_SUBSTANCE_ID>
2244

> <PUBCHEM_EXT_DATASOURCE_REGID>
multi
line

> <PUBCHEM_SMILES>
CC(=O)OC1=CC=CC=C1C(=O)O

$$$$
";

/// Treats every structure as unconvertible.
struct NoNotation;

impl LineNotation for NoNotation {
    fn line_notation(&self, _record: &SdfRecord) -> Result<Option<String>, KiraError> {
        Ok(None)
    }
}

#[test]
fn reads_gzip_structure_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Substance_000000001_000500000.sdf.gz");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(RECORD.as_bytes()).unwrap();
    fs::write(&path, encoder.finish().unwrap()).unwrap();

    let records = read_structure_file(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].item("PUBCHEM_EXT_DATASOURCE_REGID"), Some("multi\nline"));

    let rows = extract_substances(
        &records,
        "PUBCHEM_SUBSTANCE_ID",
        &DataItemNotation::new("PUBCHEM_SMILES"),
    )
    .unwrap();
    assert_eq!(rows[0].substance_id, 2244);
    assert_eq!(rows[0].structure.as_deref(), Some("CC(=O)OC1=CC=CC=C1C(=O)O"));

    let rows = extract_substances(&records, "PUBCHEM_SUBSTANCE_ID", &NoNotation).unwrap();
    assert_eq!(rows[0].structure, None);
}

#[test]
fn uncompressed_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.sdf.gz");
    fs::write(&path, RECORD).unwrap();
    assert_matches!(read_structure_file(&path), Err(KiraError::StructureFile(_)));
}

#[test]
fn scan_only_lists_structure_files() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.sdf.gz", "a.sdf.gz", "a.sdf.gz.md5", "c.sdf"] {
        fs::write(dir.path().join(name), b"").unwrap();
    }
    let files = scan_structure_files(dir.path()).unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.sdf.gz", "b.sdf.gz"]);
}
