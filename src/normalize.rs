use std::collections::HashMap;

use serde::Serialize;

use crate::codes::{self, ACTIVITY_COLUMN, ActivityOutcome};
use crate::domain::BioassayId;
use crate::error::KiraError;
use crate::record::{BioassayRecord, ResultColumn, SubstanceEntry, value_to_cell};
use crate::table::{AssayTable, CellValue, RowBuilder, TableBuilder};
use crate::target::{TargetResolution, resolve_target};

pub const SID_COLUMN: &str = "sid";

#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Table(AssayTable),
    /// The record has no `data` or no `results` section.
    NoData,
}

impl Normalized {
    pub fn table(&self) -> Option<&AssayTable> {
        match self {
            Normalized::Table(table) => Some(table),
            Normalized::NoData => None,
        }
    }

    pub fn into_table(self) -> Option<AssayTable> {
        match self {
            Normalized::Table(table) => Some(table),
            Normalized::NoData => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub protein_only: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self { protein_only: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeStats {
    pub entries: usize,
    pub entries_without_data: usize,
    pub null_outcomes: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizedAssay {
    pub bioassay_id: BioassayId,
    pub name: Option<String>,
    pub target: TargetResolution,
    pub normalized: Normalized,
    pub stats: Option<NormalizeStats>,
}

pub fn measurement_column_name(column: &ResultColumn) -> Result<String, KiraError> {
    let unit = match (column.unit, column.sunit.as_deref()) {
        (Some(code), _) => codes::decode_unit(column.tid, code)?,
        (None, Some(custom)) => custom,
        (None, None) => "",
    };
    Ok(format!("{} ({})", column.name, unit))
}

pub fn column_names_by_tid(
    aid: BioassayId,
    results: &[ResultColumn],
) -> Result<HashMap<i64, String>, KiraError> {
    let mut names = HashMap::with_capacity(results.len());
    for column in results {
        if names.contains_key(&column.tid) {
            return Err(KiraError::DuplicateTestId {
                aid: aid.get(),
                tid: column.tid,
            });
        }
        names.insert(column.tid, measurement_column_name(column)?);
    }
    Ok(names)
}

pub fn normalize(record: &BioassayRecord) -> Result<Normalized, KiraError> {
    normalize_with_stats(record).map(|(normalized, _)| normalized)
}

pub fn normalize_with_stats(
    record: &BioassayRecord,
) -> Result<(Normalized, Option<NormalizeStats>), KiraError> {
    let (Some(data), Some(results)) = (record.data(), record.results()) else {
        return Ok((Normalized::NoData, None));
    };
    let aid = record.aid();
    let names = column_names_by_tid(aid, results)?;

    let mut stats = NormalizeStats {
        entries: data.len(),
        entries_without_data: 0,
        null_outcomes: 0,
    };
    let mut builder = TableBuilder::new();
    for entry in data {
        match normalize_entry(aid, entry, &names)? {
            Some((row, outcome)) => {
                if outcome.is_none() {
                    stats.null_outcomes += 1;
                }
                builder.push_row(row);
            }
            None => stats.entries_without_data += 1,
        }
    }

    if stats.null_outcomes > 0 {
        tracing::debug!(
            aid = %aid,
            rows = stats.null_outcomes,
            "outcome missing or unregistered; Activity left null"
        );
    }
    Ok((Normalized::Table(builder.finish()), Some(stats)))
}

fn normalize_entry(
    aid: BioassayId,
    entry: &SubstanceEntry,
    names: &HashMap<i64, String>,
) -> Result<Option<(RowBuilder, Option<ActivityOutcome>)>, KiraError> {
    let measurements = match entry.data.as_deref() {
        Some(measurements) if !measurements.is_empty() => measurements,
        _ => return Ok(None),
    };

    let mut row = RowBuilder::new();
    row.set(SID_COLUMN, CellValue::Integer(entry.sid));
    for (name, value) in entry.passthrough_fields() {
        row.set(name, value_to_cell(value));
    }
    for measurement in measurements {
        let name = names
            .get(&measurement.tid)
            .ok_or(KiraError::UndeclaredTestId {
                aid: aid.get(),
                tid: measurement.tid,
            })?;
        row.set(name.clone(), measurement.value.to_cell());
    }

    let outcome = entry.outcome.as_ref().and_then(ActivityOutcome::decode);
    let activity = outcome
        .map(|outcome| CellValue::Text(outcome.label().to_string()))
        .unwrap_or(CellValue::Null);
    row.set(ACTIVITY_COLUMN, activity);
    Ok(Some((row, outcome)))
}

/// Normalizes a record and resolves its target.
///
/// In protein-only mode an assay without a protein accession keeps only its
/// id; its measurement rows are not produced.
pub fn normalize_assay(
    record: &BioassayRecord,
    options: NormalizeOptions,
) -> Result<NormalizedAssay, KiraError> {
    let target = resolve_target(record);
    let (normalized, stats) = if options.protein_only && target.accession().is_none() {
        (Normalized::NoData, None)
    } else {
        normalize_with_stats(record)?
    };
    Ok(NormalizedAssay {
        bioassay_id: record.aid(),
        name: record.name().map(str::to_string),
        target,
        normalized,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::{Value, json};

    use super::*;

    fn record(data: Option<Value>, results: Option<Value>) -> BioassayRecord {
        let mut descr = json!({ "aid": { "id": 1 } });
        if let Some(results) = results {
            descr["results"] = results;
        }
        let mut submit = json!({ "assay": { "descr": descr } });
        if let Some(data) = data {
            submit["data"] = data;
        }
        BioassayRecord::from_value(json!({ "PC_AssaySubmit": submit })).unwrap()
    }

    #[test]
    fn unit_suffix_rules() {
        let with_code = ResultColumn {
            tid: 1,
            name: "IC50".into(),
            unit: Some(5),
            sunit: Some("ignored".into()),
            descr: None,
            kind: None,
        };
        assert_eq!(measurement_column_name(&with_code).unwrap(), "IC50 (um)");

        let custom = ResultColumn {
            unit: None,
            sunit: Some("counts".into()),
            ..with_code.clone()
        };
        assert_eq!(measurement_column_name(&custom).unwrap(), "IC50 (counts)");

        let bare = ResultColumn {
            unit: None,
            sunit: None,
            ..with_code
        };
        assert_eq!(measurement_column_name(&bare).unwrap(), "IC50 ()");
    }

    #[test]
    fn missing_sections_give_no_data() {
        let only_results = record(None, Some(json!([{ "tid": 1, "name": "x" }])));
        assert_eq!(normalize(&only_results).unwrap(), Normalized::NoData);
        let only_data = record(Some(json!([{ "sid": 1, "outcome": 2 }])), None);
        assert_eq!(normalize(&only_data).unwrap(), Normalized::NoData);
    }

    #[test]
    fn duplicate_declaration_fails_record() {
        let raw = record(
            Some(json!([])),
            Some(json!([{ "tid": 1, "name": "a" }, { "tid": 1, "name": "b" }])),
        );
        assert_matches!(
            normalize(&raw),
            Err(KiraError::DuplicateTestId { aid: 1, tid: 1 })
        );
    }

    #[test]
    fn empty_measurement_list_is_skipped() {
        let raw = record(
            Some(json!([{ "sid": 1, "outcome": 1, "data": [] }])),
            Some(json!([{ "tid": 1, "name": "a" }])),
        );
        let table = normalize(&raw).unwrap().into_table().unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn protein_only_reduces_untargeted_assay() {
        let raw = record(
            Some(json!([{ "sid": 1, "outcome": 2, "data": [{ "tid": 1, "value": { "ival": 3 } }] }])),
            Some(json!([{ "tid": 1, "name": "a" }])),
        );
        let reduced = normalize_assay(&raw, NormalizeOptions { protein_only: true }).unwrap();
        assert_eq!(reduced.normalized, Normalized::NoData);
        assert_eq!(reduced.target, TargetResolution::NoTarget);

        let full = normalize_assay(&raw, NormalizeOptions { protein_only: false }).unwrap();
        assert_eq!(full.normalized.table().map(|t| t.row_count()), Some(1));
    }
}
