use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use flate2::read::GzDecoder;
use regex::Regex;
use serde::Serialize;

use crate::error::KiraError;

pub const STRUCTURE_SUFFIX: &str = ".sdf.gz";
const RECORD_TERMINATOR: &str = "$$$$";
const MOLFILE_END: &str = "M  END";

fn data_header_re() -> &'static Regex {
    static DATA_HEADER_RE: OnceLock<Regex> = OnceLock::new();
    DATA_HEADER_RE.get_or_init(|| Regex::new(r"^>\s*.*?<([^>]+)>").expect("valid data header regex"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdfRecord {
    pub molfile: String,
    pub data_items: Vec<(String, String)>,
}

impl SdfRecord {
    pub fn item(&self, name: &str) -> Option<&str> {
        self.data_items
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

pub fn parse_sdf(text: &str) -> Result<Vec<SdfRecord>, KiraError> {
    let mut records = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line == RECORD_TERMINATOR {
            records.push(parse_record(&current, records.len())?);
            current.clear();
        } else {
            current.push(line);
        }
    }
    if current.iter().any(|line| !line.trim().is_empty()) {
        records.push(parse_record(&current, records.len())?);
    }
    Ok(records)
}

fn parse_record(lines: &[&str], position: usize) -> Result<SdfRecord, KiraError> {
    let end = lines
        .iter()
        .position(|line| line.trim_end() == MOLFILE_END)
        .ok_or_else(|| {
            KiraError::StructureFile(format!("record {} has no '{MOLFILE_END}' line", position + 1))
        })?;
    let molfile = lines[..=end].join("\n");

    let mut data_items = Vec::new();
    let mut rest = lines[end + 1..].iter();
    while let Some(line) = rest.next() {
        let Some(captures) = data_header_re().captures(line) else {
            continue;
        };
        let name = captures[1].to_string();
        let mut value = Vec::new();
        for value_line in rest.by_ref() {
            if value_line.trim().is_empty() {
                break;
            }
            value.push(*value_line);
        }
        data_items.push((name, value.join("\n")));
    }
    Ok(SdfRecord {
        molfile,
        data_items,
    })
}

pub fn read_structure_file(path: &Path) -> Result<Vec<SdfRecord>, KiraError> {
    let file = File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .map_err(|err| KiraError::StructureFile(format!("{}: {err}", path.display())))?;
    parse_sdf(&text)
}

/// Converts one parsed structure into a line notation such as SMILES.
/// `Ok(None)` means the structure could not be expressed and is stored as null.
pub trait LineNotation: Send + Sync {
    fn line_notation(&self, record: &SdfRecord) -> Result<Option<String>, KiraError>;
}

#[derive(Debug, Clone)]
pub struct DataItemNotation {
    field: String,
}

impl DataItemNotation {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl LineNotation for DataItemNotation {
    fn line_notation(&self, record: &SdfRecord) -> Result<Option<String>, KiraError> {
        Ok(record
            .item(&self.field)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubstanceRow {
    pub substance_id: i64,
    pub structure: Option<String>,
}

pub fn extract_substances(
    records: &[SdfRecord],
    id_field: &str,
    notation: &dyn LineNotation,
) -> Result<Vec<SubstanceRow>, KiraError> {
    records
        .iter()
        .enumerate()
        .map(|(position, record)| {
            let raw = record.item(id_field).ok_or_else(|| {
                KiraError::StructureFile(format!("record {} lacks {id_field}", position + 1))
            })?;
            let substance_id = raw.trim().parse::<i64>().map_err(|_| {
                KiraError::StructureFile(format!(
                    "record {} has non-numeric {id_field}: {raw}",
                    position + 1
                ))
            })?;
            Ok(SubstanceRow {
                substance_id,
                structure: notation.line_notation(record)?,
            })
        })
        .collect()
}

pub fn scan_structure_files(dir: &Path) -> Result<Vec<PathBuf>, KiraError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| KiraError::Filesystem(format!("read dir {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(STRUCTURE_SUFFIX))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.split('.').next().unwrap_or(name).to_string())
        .unwrap_or_else(|| path.display().to_string())
}
