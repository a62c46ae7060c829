use std::collections::HashSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, ToSql, params};
use serde::Serialize;

use crate::domain::{BioassayId, ProteinAccession, UniprotId};
use crate::error::KiraError;
use crate::normalize::{Normalized, SID_COLUMN};
use crate::substance::SubstanceRow;
use crate::table::{AssayTable, CellValue, Column};
use crate::target::TargetXref;

pub const BIOASSAY_TABLE: &str = "bioassay";
pub const BIOASSAY_ID_COLUMN: &str = "bioassay_id";
pub const ACCESSION_COLUMN: &str = "protein_accession";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS target (
        protein_accession TEXT PRIMARY KEY,
        uniprot_id TEXT
    );
    CREATE TABLE IF NOT EXISTS bioassay_target (
        bioassay_id INTEGER PRIMARY KEY,
        protein_accession TEXT,
        name TEXT
    );
    CREATE TABLE IF NOT EXISTS bioassay_uniprot (
        bioassay_id INTEGER NOT NULL,
        uniprot_id TEXT NOT NULL,
        PRIMARY KEY (bioassay_id, uniprot_id)
    );
    CREATE TABLE IF NOT EXISTS substance (
        substance_id INTEGER PRIMARY KEY,
        smiles TEXT
    );
    CREATE TABLE IF NOT EXISTS substance_errors (
        filename TEXT PRIMARY KEY,
        error_message TEXT
    );
    CREATE TABLE IF NOT EXISTS ingest_errors (
        stage TEXT NOT NULL,
        unit TEXT NOT NULL,
        member TEXT,
        reason TEXT NOT NULL,
        recorded_at TEXT NOT NULL
    );
";

pub mod stage {
    pub const BIOASSAY: &str = "bioassay";
    pub const UNIPROT_MAP: &str = "uniprot_map";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    pub rows: usize,
    pub created_relation: bool,
    pub columns_added: Vec<String>,
    pub accession_dropped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub database: Option<String>,
    pub targets: u64,
    pub substances: u64,
    pub substance_errors: u64,
    pub bioassay_targets: u64,
    pub bioassay_rows: u64,
    pub bioassay_columns: Vec<String>,
    pub uniprot_links: u64,
    pub ingest_errors: u64,
}

pub struct TableStore {
    conn: Connection,
    path: Option<Utf8PathBuf>,
}

impl TableStore {
    pub fn open(path: &Utf8Path) -> Result<Self, KiraError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        Self::initialize(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, KiraError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, path: Option<Utf8PathBuf>) -> Result<Self, KiraError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Replaces the target relation. Stored bioassay rows whose accession is no
    /// longer a target keep their rows with the accession nulled.
    pub fn replace_targets(&mut self, xrefs: &[TargetXref]) -> Result<usize, KiraError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        tx.execute("DELETE FROM target", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO target (protein_accession, uniprot_id) VALUES (?1, ?2)",
            )?;
            for xref in xrefs {
                stmt.execute(params![xref.protein_accession, xref.uniprot_id])?;
            }
        }
        if table_exists(&tx, BIOASSAY_TABLE)? {
            let orphaned = tx.execute(
                &format!(
                    "UPDATE {table} SET {column} = NULL
                     WHERE {column} IS NOT NULL
                       AND {column} NOT IN (SELECT protein_accession FROM target)",
                    table = quote_ident(BIOASSAY_TABLE),
                    column = quote_ident(ACCESSION_COLUMN)
                ),
                [],
            )?;
            if orphaned > 0 {
                tracing::warn!(rows = orphaned, "bioassay rows lost their target accession");
            }
        }
        tx.commit()?;
        Ok(xrefs.len())
    }

    pub fn uniprot_ids(&self) -> Result<Vec<UniprotId>, KiraError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT uniprot_id FROM target WHERE uniprot_id IS NOT NULL ORDER BY uniprot_id",
        )?;
        let raw = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match value.parse::<UniprotId>() {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unusable UniProt id in target relation");
                    None
                }
            })
            .collect())
    }

    pub fn reset_bioassays(&mut self) -> Result<(), KiraError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};
             DELETE FROM bioassay_target;",
            quote_ident(BIOASSAY_TABLE)
        ))?;
        tx.execute(
            "DELETE FROM ingest_errors WHERE stage = ?1",
            params![stage::BIOASSAY],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn record_target_association(
        &mut self,
        bioassay_id: BioassayId,
        accession: Option<&ProteinAccession>,
        name: Option<&str>,
    ) -> Result<(), KiraError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO bioassay_target (bioassay_id, protein_accession, name)
             VALUES (?1, ?2, ?3)",
            params![
                bioassay_id.get() as i64,
                accession.map(ProteinAccession::as_str),
                name
            ],
        )?;
        Ok(())
    }

    pub fn bioassay_columns(&self) -> Result<Vec<String>, KiraError> {
        table_columns(&self.conn, BIOASSAY_TABLE)
    }

    /// Stores the rows of one normalized record.
    ///
    /// Columns the relation lacks are added before the insert, in the same
    /// transaction. An accession rejected by the `target` foreign key is
    /// nulled and the record retried once. A record without rows stores a
    /// bookkeeping row only when `record_empty` is set.
    pub fn store_record(
        &mut self,
        bioassay_id: BioassayId,
        accession: Option<&ProteinAccession>,
        normalized: &Normalized,
        record_empty: bool,
    ) -> Result<StoreOutcome, KiraError> {
        let table = normalized.table().filter(|table| !table.is_empty());
        if table.is_none() && !record_empty {
            return Ok(StoreOutcome::default());
        }

        match self.try_store(bioassay_id, accession, table) {
            Err(KiraError::ForeignKey(message)) if accession.is_some() => {
                tracing::warn!(
                    aid = %bioassay_id,
                    accession = accession.map(ProteinAccession::as_str).unwrap_or_default(),
                    error = %message,
                    "accession not in target relation; storing rows without it"
                );
                let mut outcome = self.try_store(bioassay_id, None, table)?;
                outcome.accession_dropped = true;
                Ok(outcome)
            }
            other => other,
        }
    }

    fn try_store(
        &mut self,
        bioassay_id: BioassayId,
        accession: Option<&ProteinAccession>,
        table: Option<&AssayTable>,
    ) -> Result<StoreOutcome, KiraError> {
        let columns: &[Column] = table.map(|table| table.columns.as_slice()).unwrap_or(&[]);
        let tx = self.conn.transaction()?;
        let mut outcome = evolve_schema(&tx, columns)?;

        let mut names = vec![quote_ident(BIOASSAY_ID_COLUMN), quote_ident(ACCESSION_COLUMN)];
        names.extend(columns.iter().map(|column| quote_ident(&column.name)));
        let placeholders = (1..=names.len())
            .map(|position| format!("?{position}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(BIOASSAY_TABLE),
            names.join(", ")
        );

        let aid = bioassay_id.get() as i64;
        let accession = accession.map(ProteinAccession::as_str);
        {
            let mut stmt = tx.prepare(&sql)?;
            match table {
                Some(table) => {
                    for row in &table.rows {
                        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(names.len());
                        values.push(&aid);
                        values.push(&accession);
                        values.extend(row.iter().map(|cell| cell as &dyn ToSql));
                        stmt.execute(values.as_slice())?;
                    }
                    outcome.rows = table.rows.len();
                }
                None => {
                    stmt.execute(params![aid, accession])?;
                    outcome.rows = 1;
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    pub fn reset_substances(&mut self) -> Result<(), KiraError> {
        self.conn
            .execute_batch("DELETE FROM substance; DELETE FROM substance_errors;")?;
        Ok(())
    }

    pub fn insert_substances(&mut self, rows: &[SubstanceRow]) -> Result<usize, KiraError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO substance (substance_id, smiles) VALUES (?1, ?2)")?;
            for row in rows {
                stmt.execute(params![row.substance_id, row.structure])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn record_substance_error(&mut self, filename: &str, message: &str) -> Result<(), KiraError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO substance_errors (filename, error_message) VALUES (?1, ?2)",
            params![filename, message],
        )?;
        Ok(())
    }

    pub fn record_ingest_error(
        &mut self,
        stage: &str,
        unit: &str,
        member: Option<&str>,
        reason: &str,
    ) -> Result<(), KiraError> {
        self.conn.execute(
            "INSERT INTO ingest_errors (stage, unit, member, reason, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![stage, unit, member, reason, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn reset_uniprot_map(&mut self) -> Result<(), KiraError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM bioassay_uniprot", [])?;
        tx.execute(
            "DELETE FROM ingest_errors WHERE stage = ?1",
            params![stage::UNIPROT_MAP],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn insert_uniprot_assays(
        &mut self,
        uniprot: &UniprotId,
        assays: &[BioassayId],
    ) -> Result<usize, KiraError> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO bioassay_uniprot (bioassay_id, uniprot_id) VALUES (?1, ?2)",
            )?;
            for aid in assays {
                inserted += stmt.execute(params![aid.get() as i64, uniprot.as_str()])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Bioassay rows whose accession maps to `uniprot`, with the UniProt id and
    /// the substance structure appended. Rows without a loaded substance are
    /// left out.
    pub fn bioassays_for_uniprot(&self, uniprot: &UniprotId) -> Result<QueryRows, KiraError> {
        let existing = self.bioassay_columns()?;
        if !existing
            .iter()
            .any(|name| name.eq_ignore_ascii_case(SID_COLUMN))
        {
            return Ok(QueryRows::default());
        }

        let sql = format!(
            "SELECT b.*, t.uniprot_id AS uniprot_id, s.smiles AS smiles
             FROM {table} AS b
             JOIN target AS t ON t.protein_accession = b.{accession}
             JOIN substance AS s ON s.substance_id = b.{sid}
             WHERE t.uniprot_id = ?1
             ORDER BY b.{aid}, b.rowid",
            table = quote_ident(BIOASSAY_TABLE),
            accession = quote_ident(ACCESSION_COLUMN),
            sid = quote_ident(SID_COLUMN),
            aid = quote_ident(BIOASSAY_ID_COLUMN),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let width = columns.len();
        let rows = stmt
            .query_map(params![uniprot.as_str()], |row| {
                (0..width)
                    .map(|index| row.get::<_, SqlValue>(index).map(CellValue::from))
                    .collect::<Result<Vec<_>, _>>()
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(QueryRows { columns, rows })
    }

    pub fn row_count(&self, table: &str) -> Result<u64, KiraError> {
        if !table_exists(&self.conn, table)? {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    pub fn status(&self) -> Result<StoreStatus, KiraError> {
        Ok(StoreStatus {
            database: self.path.as_ref().map(|path| path.to_string()),
            targets: self.row_count("target")?,
            substances: self.row_count("substance")?,
            substance_errors: self.row_count("substance_errors")?,
            bioassay_targets: self.row_count("bioassay_target")?,
            bioassay_rows: self.row_count(BIOASSAY_TABLE)?,
            bioassay_columns: self.bioassay_columns()?,
            uniprot_links: self.row_count("bioassay_uniprot")?,
            ingest_errors: self.row_count("ingest_errors")?,
        })
    }
}

fn evolve_schema(conn: &Connection, columns: &[Column]) -> Result<StoreOutcome, KiraError> {
    let mut outcome = StoreOutcome::default();
    let existing = table_columns(conn, BIOASSAY_TABLE)?;

    if existing.is_empty() {
        let mut definitions = vec![
            format!("{} INTEGER NOT NULL", quote_ident(BIOASSAY_ID_COLUMN)),
            format!(
                "{} TEXT REFERENCES target(protein_accession)",
                quote_ident(ACCESSION_COLUMN)
            ),
        ];
        definitions.extend(
            columns
                .iter()
                .map(|column| format!("{} {}", quote_ident(&column.name), column.sql_type)),
        );
        conn.execute_batch(&format!(
            "CREATE TABLE {} ({})",
            quote_ident(BIOASSAY_TABLE),
            definitions.join(", ")
        ))?;
        outcome.created_relation = true;
        return Ok(outcome);
    }

    let known: HashSet<String> = existing.iter().map(|name| name.to_ascii_lowercase()).collect();
    for column in columns {
        if known.contains(&column.name.to_ascii_lowercase()) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(BIOASSAY_TABLE),
            quote_ident(&column.name),
            column.sql_type
        ))?;
        tracing::debug!(column = %column.name, sql_type = %column.sql_type, "added bioassay column");
        outcome.columns_added.push(column.name.clone());
    }
    Ok(outcome)
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, KiraError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, KiraError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_double_quotes() {
        assert_eq!(quote_ident("IC50 (nm)"), "\"IC50 (nm)\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn fresh_store_has_no_bioassay_relation() {
        let store = TableStore::open_in_memory().unwrap();
        assert!(store.bioassay_columns().unwrap().is_empty());
        assert_eq!(store.row_count(BIOASSAY_TABLE).unwrap(), 0);
    }

    #[test]
    fn uniprot_links_ignore_duplicates() {
        let mut store = TableStore::open_in_memory().unwrap();
        let id: UniprotId = "P69905".parse().unwrap();
        let assays = [BioassayId::new(1), BioassayId::new(2), BioassayId::new(1)];
        assert_eq!(store.insert_uniprot_assays(&id, &assays).unwrap(), 2);
        assert_eq!(store.insert_uniprot_assays(&id, &assays[..1]).unwrap(), 0);
    }
}
