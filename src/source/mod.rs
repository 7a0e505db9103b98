//! Legacy tabular source.
//!
//! A Shamela `.bok` file is a Jet/Access database. Opening that format is
//! left to the embedder: anything that can list tables and hand back their
//! cells implements [`LegacySource`]. [`MemorySource`] holds tables built in
//! memory and [`JsonSource`] reads a JSON export of them.

#[cfg(feature = "json")]
mod json;

use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::error::Result;

#[cfg(feature = "json")]
pub use json::JsonSource;

/// Access system table that never holds book data.
pub const SYSTEM_TABLE: &str = "MSysObjects";

/// One raw cell as stored by the legacy database.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Real(f64),
}

impl CellValue {
    pub fn is_text(&self) -> bool {
        matches!(self, CellValue::Text(_))
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

impl From<Vec<u8>> for CellValue {
    fn from(value: Vec<u8>) -> Self {
        CellValue::Bytes(value)
    }
}

static NULL_CELL: CellValue = CellValue::Null;

/// A parsed table: column name → cells in row order.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    cells: HashMap<String, Vec<CellValue>>,
}

impl Table {
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let cells = columns.iter().map(|c| (c.clone(), Vec::new())).collect();
        Self { columns, cells }
    }

    /// Build a table from row-major data. Short rows are padded with nulls.
    pub fn from_rows(
        columns: impl IntoIterator<Item = impl Into<String>>,
        rows: impl IntoIterator<Item = Vec<CellValue>>,
    ) -> Self {
        let mut table = Self::new(columns);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn push_row(&mut self, row: Vec<CellValue>) {
        let mut row = row.into_iter();
        for column in &self.columns {
            let cell = row.next().unwrap_or_default();
            self.cells.entry(column.clone()).or_default().push(cell);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.cells.contains_key(name)
    }

    /// All cells of a column; empty if the column does not exist.
    pub fn column(&self, name: &str) -> &[CellValue] {
        self.cells.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A single cell; missing columns and rows read as null.
    pub fn cell(&self, column: &str, row: usize) -> &CellValue {
        self.column(column).get(row).unwrap_or(&NULL_CELL)
    }

    pub fn row_count(&self) -> usize {
        self.cells.values().map(Vec::len).max().unwrap_or(0)
    }
}

/// Name, schema and size of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
}

/// Every user table of a source, sorted by name.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    pub tables: Vec<TableInfo>,
}

impl TableCatalog {
    pub fn get(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

/// Read access to a legacy tabular database.
pub trait LegacySource {
    /// Names of every table, including system tables.
    fn table_names(&self) -> Vec<String>;

    fn column_names(&self, table: &str) -> Vec<String>;

    fn row_count(&self, table: &str) -> usize;

    /// Parse a table's rows.
    fn rows(&self, table: &str) -> Result<Table>;

    /// Catalog of user tables (the system table is excluded).
    fn catalog(&self) -> TableCatalog {
        let mut names: Vec<String> = self
            .table_names()
            .into_iter()
            .filter(|n| n != SYSTEM_TABLE)
            .collect();
        names.sort();
        TableCatalog {
            tables: names
                .into_iter()
                .map(|name| TableInfo {
                    columns: self.column_names(&name),
                    row_count: self.row_count(&name),
                    name,
                })
                .collect(),
        }
    }
}

/// Tables held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    tables: BTreeMap<String, Table>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, table: Table) -> Self {
        self.insert(name, table);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }
}

impl LegacySource for MemorySource {
    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn column_names(&self, table: &str) -> Vec<String> {
        self.tables
            .get(table)
            .map(|t| t.columns().to_vec())
            .unwrap_or_default()
    }

    fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(Table::row_count).unwrap_or(0)
    }

    fn rows(&self, table: &str) -> Result<Table> {
        Ok(self.tables.get(table).cloned().unwrap_or_default())
    }
}
