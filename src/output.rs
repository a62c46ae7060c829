use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    BioassaysReport, BuildReport, ProgressEvent, ProgressSink, QueryReport, SubstancesReport,
    TargetsReport, UniprotMapReport,
};
use crate::store::StoreStatus;
use crate::table::CellValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        let message = event.message.trim();
        match event.elapsed {
            Some(elapsed) => eprintln!("{message} ({:.1}s)", elapsed.as_secs_f64()),
            None => eprintln!("{message}"),
        }
    }
}

impl TextOutput {
    pub fn targets(report: &TargetsReport) -> String {
        format!("targets: {} loaded from {}", report.targets, report.source)
    }

    pub fn substances(report: &SubstancesReport) -> String {
        let mut text = format!(
            "substances: {} from {}/{} files",
            report.substances, report.loaded_files, report.files
        );
        for failure in &report.failed {
            text.push_str(&format!("\n  failed {}: {}", failure.file, failure.message));
        }
        text
    }

    pub fn bioassays(report: &BioassaysReport) -> String {
        let mut text = format!(
            "bioassays: {} rows from {} records ({} empty, {} excluded by source) in {} units",
            report.rows,
            report.stored_records,
            report.empty_records,
            report.source_skipped,
            report.units
        );
        if report.accessions_dropped > 0 {
            text.push_str(&format!(
                "\n  {} records stored without an unknown protein accession",
                report.accessions_dropped
            ));
        }
        if !report.skipped.is_empty() {
            text.push_str(&format!(
                "\n  {} units or members skipped (see ingest_errors)",
                report.skipped.len()
            ));
        }
        text
    }

    pub fn uniprot_map(report: &UniprotMapReport) -> String {
        let mut text = format!(
            "uniprot map: {} links for {} proteins",
            report.links, report.proteins
        );
        if !report.failed.is_empty() {
            text.push_str(&format!("\n  {} lookups failed", report.failed.len()));
        }
        text
    }

    pub fn query(report: &QueryReport) -> String {
        if report.rows.is_empty() {
            return format!("no bioassay rows for {}", report.uniprot_id);
        }
        let mut lines = Vec::with_capacity(report.rows.len() + 1);
        lines.push(report.columns.join("\t"));
        for row in &report.rows {
            lines.push(row.iter().map(cell_text).collect::<Vec<_>>().join("\t"));
        }
        lines.join("\n")
    }

    pub fn build(report: &BuildReport) -> String {
        [
            Self::targets(&report.targets),
            Self::substances(&report.substances),
            Self::bioassays(&report.bioassays),
        ]
        .join("\n")
    }

    pub fn status(status: &StoreStatus) -> String {
        format!(
            "database: {}\ntargets: {}\nsubstances: {} ({} failed files)\nbioassay rows: {} ({} columns)\nassay targets: {}\nuniprot links: {}\ningest errors: {}",
            status.database.as_deref().unwrap_or("<memory>"),
            status.targets,
            status.substances,
            status.substance_errors,
            status.bioassay_rows,
            status.bioassay_columns.len(),
            status.bioassay_targets,
            status.uniprot_links,
            status.ingest_errors
        )
    }
}

fn cell_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        CellValue::Integer(value) => value.to_string(),
        CellValue::Real(value) => value.to_string(),
        CellValue::Boolean(value) => value.to_string(),
        CellValue::Text(value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bioassay_summary_mentions_skips() {
        let report = BioassaysReport {
            units: 2,
            rows: 10,
            stored_records: 3,
            skipped: vec![crate::app::SkippedUnit {
                unit: "0000001_0001000.zip".to_string(),
                member: None,
                reason: "corrupt".to_string(),
            }],
            ..BioassaysReport::default()
        };
        let text = TextOutput::bioassays(&report);
        assert!(text.starts_with("bioassays: 10 rows from 3 records"));
        assert!(text.contains("1 units or members skipped"));
    }

    #[test]
    fn query_prints_tab_separated_rows() {
        let report = QueryReport {
            uniprot_id: "Q11111".to_string(),
            bioassays: vec![1],
            columns: vec!["bioassay_id".to_string(), "sid".to_string(), "smiles".to_string()],
            rows: vec![
                vec![CellValue::Integer(1), CellValue::Integer(101), CellValue::Text("CCO".into())],
                vec![CellValue::Integer(1), CellValue::Integer(102), CellValue::Null],
            ],
        };
        assert_eq!(
            TextOutput::query(&report),
            "bioassay_id\tsid\tsmiles\n1\t101\tCCO\n1\t102\t"
        );
    }
}
