//! Ledger table kept in a local JSON file, for offline runs and tests.

use crate::error::CommitError;
use crate::ledger::sink::{LedgerTable, TableRow};
use crate::ledger::util::{read_json_state, write_json_atomic};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalTableFile {
    #[serde(default)]
    table: String,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct LocalTable {
    path: PathBuf,
    table: String,
}

impl LocalTable {
    pub fn new(path: &Path, table: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            table: table.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<LocalTableFile, CommitError> {
        let data = read_json_state::<LocalTableFile>(&self.path)
            .map_err(|err| CommitError::Io(err.to_string()))?;
        Ok(data.unwrap_or_else(|| LocalTableFile {
            table: self.table.clone(),
            rows: Vec::new(),
        }))
    }

    fn save(&self, data: &LocalTableFile) -> Result<(), CommitError> {
        write_json_atomic(&self.path, data).map_err(|err| CommitError::Io(err.to_string()))
    }
}

impl LedgerTable for LocalTable {
    fn describe(&self) -> String {
        format!("local:{}#{}", self.path.display(), self.table)
    }

    fn append_row(&mut self, values: &[Value]) -> Result<u64, CommitError> {
        let mut data = self.load()?;
        data.rows.push(values.to_vec());
        let index = (data.rows.len() - 1) as u64;
        self.save(&data)?;
        Ok(index)
    }

    fn read_rows(&mut self) -> Result<Vec<TableRow>, CommitError> {
        let data = self.load()?;
        Ok(data
            .rows
            .into_iter()
            .enumerate()
            .map(|(i, values)| TableRow {
                index: i as u64,
                values,
            })
            .collect())
    }

    fn write_row(&mut self, index: u64, values: &[Value]) -> Result<(), CommitError> {
        let mut data = self.load()?;
        let Some(slot) = data.rows.get_mut(index as usize) else {
            return Err(CommitError::InvalidResponse(format!(
                "row {index} out of range for {}",
                self.path.display()
            )));
        };
        *slot = values.to_vec();
        self.save(&data)
    }
}
