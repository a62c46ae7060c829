use std::fmt;
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use zip::ZipArchive;

use crate::error::KiraError;
use crate::record::BioassayRecord;

pub const RECORD_SUFFIX: &str = ".json.gz";
pub const ARCHIVE_SUFFIX: &str = ".zip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SkipReason {
    Read(String),
    Decompress(String),
    NotUtf8(String),
    Json(String),
    CorruptInner(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Read(message) => write!(f, "read failed: {message}"),
            SkipReason::Decompress(message) => write!(f, "gzip decode failed: {message}"),
            SkipReason::NotUtf8(message) => write!(f, "not UTF-8: {message}"),
            SkipReason::Json(message) => write!(f, "invalid record: {message}"),
            SkipReason::CorruptInner(message) => write!(f, "corrupt inner archive: {message}"),
        }
    }
}

#[derive(Debug)]
pub enum ArchiveItem {
    Record {
        member: String,
        record: Box<BioassayRecord>,
    },
    Skipped {
        member: String,
        reason: SkipReason,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    Record,
    Nested,
}

#[derive(Debug, Clone)]
struct MemberRef {
    index: usize,
    name: String,
    kind: MemberKind,
}

pub struct BioassayArchive {
    path: PathBuf,
    zip: ZipArchive<File>,
    members: Vec<MemberRef>,
}

impl fmt::Debug for BioassayArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BioassayArchive")
            .field("path", &self.path)
            .field("members", &self.members.len())
            .finish()
    }
}

impl BioassayArchive {
    pub fn open(path: &Path) -> Result<Self, KiraError> {
        let file = File::open(path)
            .map_err(|err| KiraError::Filesystem(format!("open zip {}: {err}", path.display())))?;
        let mut zip = ZipArchive::new(file).map_err(|err| KiraError::CorruptArchive {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let members = list_members(&mut zip).map_err(|message| KiraError::CorruptArchive {
            path: path.display().to_string(),
            message,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            zip,
            members,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn records(&mut self) -> Records<'_> {
        Records {
            archive: self,
            next_member: 0,
            inner: None,
        }
    }
}

struct InnerArchive {
    name: String,
    zip: ZipArchive<Cursor<Vec<u8>>>,
    members: Vec<MemberRef>,
    next: usize,
}

pub struct Records<'a> {
    archive: &'a mut BioassayArchive,
    next_member: usize,
    inner: Option<InnerArchive>,
}

impl Iterator for Records<'_> {
    type Item = ArchiveItem;

    fn next(&mut self) -> Option<ArchiveItem> {
        loop {
            if let Some(inner) = self.inner.as_mut() {
                if let Some(member) = inner.members.get(inner.next).cloned() {
                    inner.next += 1;
                    let label = format!("{}/{}", inner.name, member.name);
                    return Some(decode_member(&mut inner.zip, member.index, label));
                }
                self.inner = None;
            }

            let member = self.archive.members.get(self.next_member)?.clone();
            self.next_member += 1;
            match member.kind {
                MemberKind::Record => {
                    return Some(decode_member(
                        &mut self.archive.zip,
                        member.index,
                        member.name,
                    ));
                }
                MemberKind::Nested => match open_inner(&mut self.archive.zip, &member) {
                    Ok(inner) => self.inner = Some(inner),
                    Err(reason) => {
                        return Some(ArchiveItem::Skipped {
                            member: member.name,
                            reason,
                        });
                    }
                },
            }
        }
    }
}

fn list_members<R: Read + Seek>(zip: &mut ZipArchive<R>) -> Result<Vec<MemberRef>, String> {
    let mut members = Vec::new();
    for index in 0..zip.len() {
        let entry = zip.by_index(index).map_err(|err| err.to_string())?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let kind = if name.ends_with(RECORD_SUFFIX) {
            MemberKind::Record
        } else if name.ends_with(ARCHIVE_SUFFIX) {
            MemberKind::Nested
        } else {
            continue;
        };
        members.push(MemberRef { index, name, kind });
    }
    Ok(members)
}

fn read_entry<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    index: usize,
) -> Result<Vec<u8>, SkipReason> {
    let mut entry = zip
        .by_index(index)
        .map_err(|err| SkipReason::Read(err.to_string()))?;
    let mut bytes = Vec::new();
    entry
        .read_to_end(&mut bytes)
        .map_err(|err| SkipReason::Read(err.to_string()))?;
    Ok(bytes)
}

fn open_inner<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    member: &MemberRef,
) -> Result<InnerArchive, SkipReason> {
    let bytes = read_entry(zip, member.index)?;
    let mut inner =
        ZipArchive::new(Cursor::new(bytes)).map_err(|err| SkipReason::CorruptInner(err.to_string()))?;
    let members = list_members(&mut inner)
        .map_err(SkipReason::CorruptInner)?
        .into_iter()
        .filter(|candidate| candidate.kind == MemberKind::Record)
        .collect();
    Ok(InnerArchive {
        name: member.name.clone(),
        zip: inner,
        members,
        next: 0,
    })
}

fn decode_member<R: Read + Seek>(
    zip: &mut ZipArchive<R>,
    index: usize,
    member: String,
) -> ArchiveItem {
    match read_entry(zip, index).and_then(|bytes| decode_record(&bytes)) {
        Ok(record) => ArchiveItem::Record {
            member,
            record: Box::new(record),
        },
        Err(reason) => {
            tracing::warn!(member = %member, reason = %reason, "skipping archive member");
            ArchiveItem::Skipped { member, reason }
        }
    }
}

pub fn decode_record(compressed: &[u8]) -> Result<BioassayRecord, SkipReason> {
    let mut raw = Vec::new();
    GzDecoder::new(compressed)
        .read_to_end(&mut raw)
        .map_err(|err| SkipReason::Decompress(err.to_string()))?;
    let text = String::from_utf8(raw).map_err(|err| SkipReason::NotUtf8(err.to_string()))?;
    BioassayRecord::from_slice(text.as_bytes()).map_err(|err| SkipReason::Json(err.to_string()))
}

pub fn scan_units(dir: &Path) -> Result<Vec<PathBuf>, KiraError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| KiraError::Filesystem(format!("read dir {}: {err}", dir.display())))?;
    let mut units = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with("README") || !name.ends_with(ARCHIVE_SUFFIX) || !path.is_file() {
            continue;
        }
        units.push(path);
    }
    units.sort();
    Ok(units)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn decode_record_reports_each_failure() {
        let ok = gzip(br#"{"PC_AssaySubmit":{"assay":{"descr":{"aid":{"id":5}}}}}"#);
        assert_eq!(decode_record(&ok).unwrap().aid().get(), 5);

        assert!(matches!(decode_record(b"plain"), Err(SkipReason::Decompress(_))));
        assert!(matches!(
            decode_record(&gzip(&[0xff, 0xfe, 0x00])),
            Err(SkipReason::NotUtf8(_))
        ));
        assert!(matches!(decode_record(&gzip(b"{}")), Err(SkipReason::Json(_))));
    }
}
