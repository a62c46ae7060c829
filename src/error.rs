use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid bioassay id: {0}")]
    InvalidBioassayId(String),

    #[error("invalid protein accession: {0}")]
    InvalidProteinAccession(String),

    #[error("invalid UniProt accession: {0}")]
    InvalidUniprotId(String),

    #[error("missing config file kira-ba.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no {0} configured (set it in kira-ba.json or pass it on the command line)")]
    MissingInput(&'static str),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("corrupt archive {path}: {message}")]
    CorruptArchive { path: String, message: String },

    #[error("malformed bioassay record: {0}")]
    RecordShape(String),

    #[error("test id {tid} used in data but not declared in results of AID {aid}")]
    UndeclaredTestId { aid: u64, tid: i64 },

    #[error("test id {tid} declared more than once in results of AID {aid}")]
    DuplicateTestId { aid: u64, tid: i64 },

    #[error("unregistered unit code {code} for test id {tid}")]
    UnknownUnitCode { tid: i64, code: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("structure file error: {0}")]
    StructureFile(String),

    #[error("PubChem request failed: {0}")]
    PubchemHttp(String),

    #[error("PubChem returned status {status}: {message}")]
    PubchemStatus { status: u16, message: String },
}

impl From<rusqlite::Error> for KiraError {
    fn from(err: rusqlite::Error) -> Self {
        if is_foreign_key_violation(&err) {
            KiraError::ForeignKey(err.to_string())
        } else if is_key_violation(&err) {
            KiraError::DuplicateKey(err.to_string())
        } else {
            KiraError::Database(err.to_string())
        }
    }
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(inner, message) => {
            inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
                || message
                    .as_deref()
                    .is_some_and(|text| text.starts_with("FOREIGN KEY constraint failed"))
        }
        _ => false,
    }
}

fn is_key_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => matches!(
            inner.extended_code,
            rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        ),
        _ => false,
    }
}
