use std::path::Path;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::archive::{ArchiveItem, BioassayArchive, scan_units};
use crate::config::ResolvedConfig;
use crate::domain::UniprotId;
use crate::error::KiraError;
use crate::normalize::{NormalizeOptions, normalize_assay};
use crate::pug::AssayIndexClient;
use crate::record::BioassayRecord;
use crate::store::{BIOASSAY_ID_COLUMN, StoreStatus, TableStore, stage};
use crate::substance::{
    LineNotation, extract_substances, file_label, read_structure_file, scan_structure_files,
};
use crate::table::CellValue;
use crate::target::read_protein_xrefs;

#[derive(Debug, Clone, Serialize)]
pub struct TargetsReport {
    pub source: String,
    pub targets: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubstancesReport {
    pub files: usize,
    pub loaded_files: usize,
    pub substances: usize,
    pub failed: Vec<FileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedUnit {
    pub unit: String,
    pub member: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BioassaysReport {
    pub protein_only: bool,
    pub units: usize,
    pub records: usize,
    pub stored_records: usize,
    pub empty_records: usize,
    pub source_skipped: usize,
    pub rows: usize,
    pub columns_added: usize,
    pub accessions_dropped: usize,
    pub skipped: Vec<SkippedUnit>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UniprotMapReport {
    pub proteins: usize,
    pub links: usize,
    pub failed: Vec<LookupFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupFailure {
    pub uniprot_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub uniprot_id: String,
    pub bioassays: Vec<u64>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub targets: TargetsReport,
    pub substances: SubstancesReport,
    pub bioassays: BioassaysReport,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: String, elapsed: Option<Duration>) {
    sink.event(ProgressEvent { message, elapsed });
}

pub struct App<C: AssayIndexClient, N: LineNotation> {
    store: TableStore,
    index: C,
    notation: N,
    config: ResolvedConfig,
}

impl<C: AssayIndexClient, N: LineNotation> App<C, N> {
    pub fn new(store: TableStore, index: C, notation: N, config: ResolvedConfig) -> Self {
        Self {
            store,
            index,
            notation,
            config,
        }
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn build(&mut self, sink: &dyn ProgressSink) -> Result<BuildReport, KiraError> {
        let targets = self.rebuild_targets(sink)?;
        let substances = self.rebuild_substances(sink)?;
        let bioassays = self.rebuild_bioassays(sink)?;
        Ok(BuildReport {
            targets,
            substances,
            bioassays,
        })
    }

    pub fn rebuild_targets(&mut self, sink: &dyn ProgressSink) -> Result<TargetsReport, KiraError> {
        let path = self.config.protein_xrefs()?.clone();
        phase(sink, format!("phase=Targets; reading {path}"), None);
        let start = Instant::now();
        let xrefs = read_protein_xrefs(path.as_std_path())?;
        let targets = self.store.replace_targets(&xrefs)?;
        tracing::info!(targets, source = %path, "target relation loaded");
        phase(
            sink,
            format!("phase=Targets; loaded {targets} targets"),
            Some(start.elapsed()),
        );
        Ok(TargetsReport {
            source: path.to_string(),
            targets,
        })
    }

    pub fn rebuild_substances(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<SubstancesReport, KiraError> {
        let dir = self.config.substance_dir()?.clone();
        self.store.reset_substances()?;
        let files = scan_structure_files(dir.as_std_path())?;
        let start = Instant::now();
        let mut report = SubstancesReport {
            files: files.len(),
            ..SubstancesReport::default()
        };

        for (position, file) in files.iter().enumerate() {
            let label = file_label(file);
            phase(
                sink,
                format!("phase=Substances; file {}/{} {label}", position + 1, files.len()),
                None,
            );
            match self.load_structure_file(file) {
                Ok(count) => {
                    report.loaded_files += 1;
                    report.substances += count;
                }
                Err(err @ KiraError::Database(_)) => return Err(err),
                Err(err) => {
                    let message = err.to_string();
                    tracing::warn!(file = %label, error = %message, "structure file failed");
                    self.store.record_substance_error(&label, &message)?;
                    report.failed.push(FileFailure {
                        file: label,
                        message,
                    });
                }
            }
        }

        phase(
            sink,
            format!(
                "phase=Substances; {} substances from {} files",
                report.substances, report.loaded_files
            ),
            Some(start.elapsed()),
        );
        Ok(report)
    }

    fn load_structure_file(&mut self, file: &Path) -> Result<usize, KiraError> {
        let records = read_structure_file(file)?;
        let rows = extract_substances(&records, &self.config.substance_id_field, &self.notation)?;
        self.store.insert_substances(&rows)
    }

    pub fn rebuild_bioassays(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<BioassaysReport, KiraError> {
        let dir = self.config.bioassay_dir()?.clone();
        self.store.reset_bioassays()?;
        let units = scan_units(dir.as_std_path())?;
        let options = NormalizeOptions {
            protein_only: self.config.protein_only,
        };
        let start = Instant::now();
        let mut report = BioassaysReport {
            protein_only: options.protein_only,
            units: units.len(),
            ..BioassaysReport::default()
        };

        for (position, unit) in units.iter().enumerate() {
            let unit_name = unit_label(unit);
            phase(
                sink,
                format!("phase=Bioassays; unit {}/{} {unit_name}", position + 1, units.len()),
                None,
            );
            let mut archive = match BioassayArchive::open(unit) {
                Ok(archive) => archive,
                Err(err @ (KiraError::CorruptArchive { .. } | KiraError::Filesystem(_))) => {
                    tracing::warn!(unit = %unit_name, error = %err, "skipping archive unit");
                    self.skip(&mut report, &unit_name, None, err.to_string())?;
                    continue;
                }
                Err(err) => return Err(err),
            };

            for item in archive.records() {
                match item {
                    ArchiveItem::Skipped { member, reason } => {
                        self.skip(&mut report, &unit_name, Some(member), reason.to_string())?;
                    }
                    ArchiveItem::Record { member, record } => {
                        report.records += 1;
                        self.load_record(&mut report, &unit_name, member, &record, options)?;
                    }
                }
            }
        }

        tracing::info!(
            units = report.units,
            records = report.records,
            rows = report.rows,
            skipped = report.skipped.len(),
            "bioassay relation rebuilt"
        );
        phase(
            sink,
            format!(
                "phase=Bioassays; {} rows from {} records",
                report.rows, report.stored_records
            ),
            Some(start.elapsed()),
        );
        Ok(report)
    }

    fn load_record(
        &mut self,
        report: &mut BioassaysReport,
        unit: &str,
        member: String,
        record: &BioassayRecord,
        options: NormalizeOptions,
    ) -> Result<(), KiraError> {
        if let Some(source) = record.source_name()
            && self.config.skips_source(source)
        {
            tracing::debug!(aid = %record.aid(), source, "assay source excluded");
            report.source_skipped += 1;
            return Ok(());
        }

        let assay = match normalize_assay(record, options) {
            Ok(assay) => assay,
            Err(
                err @ (KiraError::UndeclaredTestId { .. }
                | KiraError::DuplicateTestId { .. }
                | KiraError::UnknownUnitCode { .. }),
            ) => {
                tracing::warn!(aid = %record.aid(), error = %err, "skipping inconsistent record");
                return self.skip(report, unit, Some(member), err.to_string());
            }
            Err(err) => return Err(err),
        };

        let accession = assay.target.accession();
        let stored = self
            .store
            .record_target_association(assay.bioassay_id, accession, assay.name.as_deref())
            .and_then(|()| {
                self.store.store_record(
                    assay.bioassay_id,
                    accession,
                    &assay.normalized,
                    self.config.record_empty_assays,
                )
            });
        let outcome = match stored {
            Ok(outcome) => outcome,
            Err(
                err @ (KiraError::Database(_)
                | KiraError::ForeignKey(_)
                | KiraError::DuplicateKey(_)),
            ) => {
                tracing::warn!(aid = %assay.bioassay_id, error = %err, "record not stored");
                return self.skip(report, unit, Some(member), err.to_string());
            }
            Err(err) => return Err(err),
        };

        if outcome.rows == 0 || assay.normalized.table().is_none_or(|table| table.is_empty()) {
            report.empty_records += 1;
        } else {
            report.stored_records += 1;
            report.rows += outcome.rows;
        }
        report.columns_added += outcome.columns_added.len();
        if outcome.accession_dropped {
            report.accessions_dropped += 1;
        }
        Ok(())
    }

    fn skip(
        &mut self,
        report: &mut BioassaysReport,
        unit: &str,
        member: Option<String>,
        reason: String,
    ) -> Result<(), KiraError> {
        self.store
            .record_ingest_error(stage::BIOASSAY, unit, member.as_deref(), &reason)?;
        report.skipped.push(SkippedUnit {
            unit: unit.to_string(),
            member,
            reason,
        });
        Ok(())
    }

    pub fn rebuild_uniprot_assay_map(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<UniprotMapReport, KiraError> {
        self.store.reset_uniprot_map()?;
        let ids = self.store.uniprot_ids()?;
        let interval = Duration::from_millis(self.config.request_interval_ms);
        let start = Instant::now();
        let mut report = UniprotMapReport {
            proteins: ids.len(),
            ..UniprotMapReport::default()
        };

        let mut last_call: Option<Instant> = None;
        for (position, id) in ids.iter().enumerate() {
            if let Some(last) = last_call {
                let waited = last.elapsed();
                if waited < interval {
                    std::thread::sleep(interval - waited);
                }
            }
            phase(
                sink,
                format!("phase=UniprotMap; {}/{} {id}", position + 1, ids.len()),
                None,
            );
            last_call = Some(Instant::now());
            match self.index.assay_ids_for_protein(id) {
                Ok(assays) => {
                    report.links += self.store.insert_uniprot_assays(id, &assays)?;
                }
                Err(err) => {
                    let message = err.to_string();
                    tracing::warn!(uniprot = %id, error = %message, "assay lookup failed");
                    self.store.record_ingest_error(
                        stage::UNIPROT_MAP,
                        id.as_str(),
                        None,
                        &message,
                    )?;
                    report.failed.push(LookupFailure {
                        uniprot_id: id.to_string(),
                        message,
                    });
                }
            }
        }

        phase(
            sink,
            format!("phase=UniprotMap; {} links", report.links),
            Some(start.elapsed()),
        );
        Ok(report)
    }

    pub fn query_uniprot(
        &self,
        uniprot: &UniprotId,
        sink: &dyn ProgressSink,
    ) -> Result<QueryReport, KiraError> {
        phase(sink, format!("phase=Query; {uniprot}"), None);
        let start = Instant::now();
        let found = self.store.bioassays_for_uniprot(uniprot)?;

        let mut bioassays: Vec<u64> = Vec::new();
        if let Some(position) = found
            .columns
            .iter()
            .position(|name| name == BIOASSAY_ID_COLUMN)
        {
            for row in &found.rows {
                if let Some(CellValue::Integer(aid)) = row.get(position)
                    && bioassays.last() != Some(&(*aid as u64))
                {
                    bioassays.push(*aid as u64);
                }
            }
        }
        tracing::info!(
            uniprot = %uniprot,
            rows = found.rows.len(),
            assays = bioassays.len(),
            "query finished"
        );
        phase(
            sink,
            format!(
                "phase=Query; {} rows from {} assays",
                found.rows.len(),
                bioassays.len()
            ),
            Some(start.elapsed()),
        );
        Ok(QueryReport {
            uniprot_id: uniprot.to_string(),
            bioassays,
            columns: found.columns,
            rows: found.rows,
        })
    }

    pub fn status(&self, sink: &dyn ProgressSink) -> Result<StoreStatus, KiraError> {
        phase(sink, "phase=Status; counting rows".to_string(), None);
        self.store.status()
    }
}

fn unit_label(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
