//! JSON export of a legacy database.
//!
//! ```json
//! {"tables": {"b1": {"columns": ["id", "nass"], "rows": [[1, "..."]]}}}
//! ```
//!
//! Byte cells are written as `{"bytes": [..]}` or `{"hex": ".."}`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::{CellValue, LegacySource, Table};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct Export {
    tables: BTreeMap<String, TableExport>,
}

#[derive(Debug, Deserialize)]
struct TableExport {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// A legacy source backed by a JSON table dump.
#[derive(Debug, Clone, Default)]
pub struct JsonSource {
    tables: BTreeMap<String, Table>,
}

impl JsonSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read(path.as_ref())?;
        Self::from_slice(&data)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let export: Export = serde_json::from_slice(data)?;
        let mut tables = BTreeMap::new();
        for (name, table) in export.tables {
            let rows = table
                .rows
                .into_iter()
                .map(|row| row.into_iter().map(cell_from_json).collect::<Result<Vec<_>>>())
                .collect::<Result<Vec<_>>>()
                .map_err(|e| Error::SourceStructure(format!("table {name}: {e}")))?;
            tables.insert(name, Table::from_rows(table.columns, rows));
        }
        Ok(Self { tables })
    }
}

fn cell_from_json(value: Value) -> Result<CellValue> {
    Ok(match value {
        Value::Null => CellValue::Null,
        Value::Bool(b) => CellValue::Int(i64::from(b)),
        Value::String(s) => CellValue::Text(s),
        Value::Number(n) => match n.as_i64() {
            Some(i) => CellValue::Int(i),
            None => CellValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::Object(map) => {
            if let Some(Value::Array(items)) = map.get("bytes") {
                let bytes = items
                    .iter()
                    .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(|| Error::SourceStructure("bad byte array".into()))?;
                CellValue::Bytes(bytes)
            } else if let Some(Value::String(hex)) = map.get("hex") {
                CellValue::Bytes(decode_hex(hex)?)
            } else {
                return Err(Error::SourceStructure("unknown cell object".into()));
            }
        }
        Value::Array(_) => return Err(Error::SourceStructure("unexpected array cell".into())),
    })
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    let digits: String = value.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    hex::decode(digits).map_err(|e| Error::SourceStructure(format!("invalid hex cell: {e}")))
}

impl LegacySource for JsonSource {
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
