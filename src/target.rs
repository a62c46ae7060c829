use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use serde::Serialize;

use crate::domain::ProteinAccession;
use crate::error::KiraError;
use crate::record::BioassayRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "accession", rename_all = "snake_case")]
pub enum TargetResolution {
    NoTarget,
    NoProteinAccession,
    Protein(ProteinAccession),
}

impl TargetResolution {
    pub fn accession(&self) -> Option<&ProteinAccession> {
        match self {
            TargetResolution::Protein(accession) => Some(accession),
            _ => None,
        }
    }
}

pub fn resolve_target(record: &BioassayRecord) -> TargetResolution {
    let Some(target) = record.targets().and_then(|targets| targets.first()) else {
        return TargetResolution::NoTarget;
    };
    let raw = target
        .mol_id
        .as_ref()
        .and_then(|mol_id| mol_id.protein_accession.as_deref());
    match raw.map(str::parse::<ProteinAccession>) {
        Some(Ok(accession)) => TargetResolution::Protein(accession),
        Some(Err(err)) => {
            tracing::debug!(aid = %record.aid(), error = %err, "unusable protein accession");
            TargetResolution::NoProteinAccession
        }
        None => TargetResolution::NoProteinAccession,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetXref {
    pub protein_accession: String,
    pub uniprot_id: Option<String>,
}

const ACCESSION_HEADER: &str = "ProteinAccession";
const UNIPROT_HEADER: &str = "UniProt";

pub fn read_protein_xrefs(path: &Path) -> Result<Vec<TargetXref>, KiraError> {
    let file = File::open(path)
        .map_err(|err| KiraError::Filesystem(format!("open {}: {err}", path.display())))?;
    parse_protein_xrefs(BufReader::new(file))
}

pub fn parse_protein_xrefs<R: BufRead>(reader: R) -> Result<Vec<TargetXref>, KiraError> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => line.map_err(|err| KiraError::Filesystem(err.to_string()))?,
        None => return Ok(Vec::new()),
    };
    let columns: Vec<&str> = header.trim_end_matches('\r').split('\t').collect();
    let find = |name: &str| {
        columns
            .iter()
            .position(|column| column.trim().trim_start_matches('#') == name)
            .ok_or_else(|| KiraError::Filesystem(format!("cross-reference file lacks column {name}")))
    };
    let accession_at = find(ACCESSION_HEADER)?;
    let uniprot_at = find(UNIPROT_HEADER)?;

    let mut seen = std::collections::HashSet::new();
    let mut xrefs = Vec::new();
    for line in lines {
        let line = line.map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        let Some(raw) = fields.get(accession_at).map(|v| v.trim()).filter(|v| !v.is_empty())
        else {
            continue;
        };
        // Stored unversioned, matching what resolve_target produces.
        let accession = match raw.parse::<ProteinAccession>() {
            Ok(accession) => accession.as_str().to_string(),
            Err(_) => continue,
        };
        if !seen.insert(accession.clone()) {
            continue;
        }
        let uniprot_id = fields
            .get(uniprot_at)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string());
        xrefs.push(TargetXref {
            protein_accession: accession,
            uniprot_id,
        });
    }
    Ok(xrefs)
}
