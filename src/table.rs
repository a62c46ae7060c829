use std::collections::HashMap;
use std::fmt;

use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            CellValue::Null => None,
            CellValue::Integer(_) => Some(SqlType::Integer),
            CellValue::Real(_) => Some(SqlType::Real),
            CellValue::Boolean(_) => Some(SqlType::Boolean),
            CellValue::Text(_) => Some(SqlType::Text),
        }
    }
}

impl ToSql for CellValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            CellValue::Null => SqlValue::Null,
            CellValue::Integer(value) => SqlValue::Integer(*value),
            CellValue::Real(value) => SqlValue::Real(*value),
            CellValue::Boolean(value) => SqlValue::Integer(i64::from(*value)),
            CellValue::Text(value) => return Ok(ToSqlOutput::from(value.as_str())),
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

impl From<SqlValue> for CellValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => CellValue::Null,
            SqlValue::Integer(value) => CellValue::Integer(value),
            SqlValue::Real(value) => CellValue::Real(value),
            SqlValue::Text(value) => CellValue::Text(value),
            SqlValue::Blob(bytes) => CellValue::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlType {
    Integer,
    Real,
    Boolean,
    Text,
}

impl SqlType {
    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
        }
    }

    pub fn widen(self, other: SqlType) -> SqlType {
        use SqlType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Real) | (Real, Integer) => Real,
            (Integer, Boolean) | (Boolean, Integer) => Integer,
            (Real, Boolean) | (Boolean, Real) => Real,
            _ => Text,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBuilder {
    cells: Vec<(String, CellValue)>,
    index: HashMap<String, usize>,
}

impl RowBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: CellValue) -> &mut Self {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        match self.index.get(&key) {
            Some(position) => self.cells[*position].1 = value,
            None => {
                self.index.insert(key, self.cells.len());
                self.cells.push((name, value));
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&CellValue> {
        let position = self.index.get(&name.to_ascii_lowercase())?;
        self.cells.get(*position).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TableBuilder {
    columns: Vec<(String, Option<SqlType>)>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<(usize, CellValue)>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_row(&mut self, row: RowBuilder) {
        let mut cells = Vec::with_capacity(row.cells.len());
        for (name, value) in row.cells {
            let key = name.to_ascii_lowercase();
            let position = match self.index.get(&key) {
                Some(position) => *position,
                None => {
                    self.columns.push((name, None));
                    self.index.insert(key, self.columns.len() - 1);
                    self.columns.len() - 1
                }
            };
            if let Some(found) = value.sql_type() {
                let slot = &mut self.columns[position].1;
                *slot = Some(match *slot {
                    Some(current) => current.widen(found),
                    None => found,
                });
            }
            cells.push((position, value));
        }
        self.rows.push(cells);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn finish(self) -> AssayTable {
        let columns: Vec<Column> = self
            .columns
            .into_iter()
            .map(|(name, sql_type)| Column {
                name,
                sql_type: sql_type.unwrap_or(SqlType::Text),
            })
            .collect();
        let width = columns.len();
        let rows = self
            .rows
            .into_iter()
            .map(|cells| {
                let mut row = vec![CellValue::Null; width];
                for (position, value) in cells {
                    row[position] = value;
                }
                row
            })
            .collect();
        AssayTable { columns, rows }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssayTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<CellValue>>,
}

impl AssayTable {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|column| column.name.as_str())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&CellValue> {
        let index = self.column_index(name)?;
        self.rows.get(row).and_then(|cells| cells.get(index))
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_follow_first_seen_order() {
        let mut builder = TableBuilder::new();
        let mut first = RowBuilder::new();
        first.set("sid", CellValue::Integer(1)).set("A ()", CellValue::Real(1.0));
        let mut second = RowBuilder::new();
        second.set("sid", CellValue::Integer(2)).set("B ()", CellValue::Text("x".into()));
        builder.push_row(first);
        builder.push_row(second);

        let table = builder.finish();
        let names: Vec<_> = table.column_names().collect();
        assert_eq!(names, vec!["sid", "A ()", "B ()"]);
        assert_eq!(table.cell(0, "B ()"), Some(&CellValue::Null));
        assert_eq!(table.cell(1, "A ()"), Some(&CellValue::Null));
    }

    #[test]
    fn column_type_widens_within_a_table() {
        let mut builder = TableBuilder::new();
        for value in [CellValue::Null, CellValue::Integer(3), CellValue::Real(0.5)] {
            let mut row = RowBuilder::new();
            row.set("v", value);
            builder.push_row(row);
        }
        let table = builder.finish();
        assert_eq!(table.columns[0].sql_type, SqlType::Real);
    }

    #[test]
    fn all_null_column_defaults_to_text() {
        let mut builder = TableBuilder::new();
        let mut row = RowBuilder::new();
        row.set("comment", CellValue::Null);
        builder.push_row(row);
        assert_eq!(builder.finish().columns[0].sql_type, SqlType::Text);
    }

    #[test]
    fn row_set_is_case_insensitive() {
        let mut row = RowBuilder::new();
        row.set("IC50 (nm)", CellValue::Real(1.0));
        row.set("ic50 (NM)", CellValue::Real(2.0));
        assert_eq!(row.len(), 1);
        assert_eq!(row.get("IC50 (nm)"), Some(&CellValue::Real(2.0)));
    }

    #[test]
    fn wide_rows_keep_cells_in_their_columns() {
        let mut builder = TableBuilder::new();
        for offset in 0..3_i64 {
            let mut row = RowBuilder::new();
            for tid in (0..400_i64).rev() {
                if (tid + offset) % 3 != 0 {
                    row.set(format!("m{tid} ()"), CellValue::Integer(tid * 10 + offset));
                }
            }
            builder.push_row(row);
        }
        let table = builder.finish();
        assert_eq!(table.columns.len(), 400);
        assert_eq!(table.rows.iter().map(Vec::len).max(), Some(400));
        assert_eq!(table.cell(0, "m1 ()"), Some(&CellValue::Integer(10)));
        assert_eq!(table.cell(0, "M0 ()"), Some(&CellValue::Null));
        assert_eq!(table.cell(1, "m0 ()"), Some(&CellValue::Integer(1)));
        assert_eq!(table.cell(2, "m399 ()"), Some(&CellValue::Integer(3992)));
        assert_eq!(table.cell(2, "m1 ()"), Some(&CellValue::Null));
    }

    #[test]
    fn widen_mixed_types() {
        assert_eq!(SqlType::Integer.widen(SqlType::Text), SqlType::Text);
        assert_eq!(SqlType::Boolean.widen(SqlType::Integer), SqlType::Integer);
        assert_eq!(SqlType::Real.widen(SqlType::Real), SqlType::Real);
    }
}
