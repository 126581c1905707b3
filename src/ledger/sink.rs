use crate::error::CommitError;
use crate::ledger::config::FillMode;
use crate::ledger::record::LedgerRecord;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub index: u64,
    pub values: Vec<Value>,
}

impl TableRow {
    /// Every cell null or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(|v| match v {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        })
    }
}

/// Row-level access to the remote ledger table. Implementations mutate
/// remote state and are not idempotent.
pub trait LedgerTable {
    fn describe(&self) -> String;
    /// Append at the logical end; returns the new row's index.
    fn append_row(&mut self, values: &[Value]) -> Result<u64, CommitError>;
    /// All data rows, top to bottom.
    fn read_rows(&mut self) -> Result<Vec<TableRow>, CommitError>;
    fn write_row(&mut self, index: u64, values: &[Value]) -> Result<(), CommitError>;
}

impl<T: LedgerTable + ?Sized> LedgerTable for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn append_row(&mut self, values: &[Value]) -> Result<u64, CommitError> {
        (**self).append_row(values)
    }

    fn read_rows(&mut self) -> Result<Vec<TableRow>, CommitError> {
        (**self).read_rows()
    }

    fn write_row(&mut self, index: u64, values: &[Value]) -> Result<(), CommitError> {
        (**self).write_row(index, values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommitStrategy {
    Appended,
    FilledEmpty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitOutcome {
    pub committed_index: u64,
    pub receipt: String,
    pub strategy: CommitStrategy,
}

pub struct LedgerAppendClient<T> {
    table: T,
    fill_mode: FillMode,
    source_kind: String,
}

impl<T: LedgerTable> LedgerAppendClient<T> {
    pub fn new(table: T, fill_mode: FillMode, source_kind: &str) -> Self {
        Self {
            table,
            fill_mode,
            source_kind: source_kind.to_string(),
        }
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    #[cfg(test)]
    pub fn table_mut(&mut self) -> &mut T {
        &mut self.table
    }

    pub fn append(&mut self, record: &LedgerRecord) -> Result<u64, CommitError> {
        self.table.append_row(&record.to_values())
    }

    /// Overwrite the lowest-index blank row. `None` means there was no blank
    /// row and the caller should append instead.
    pub fn fill_first_empty(&mut self, record: &LedgerRecord) -> Result<Option<u64>, CommitError> {
        let rows = self.table.read_rows()?;
        let Some(target) = rows.iter().filter(|r| r.is_blank()).map(|r| r.index).min() else {
            return Ok(None);
        };
        self.table.write_row(target, &record.to_values())?;
        Ok(Some(target))
    }

    /// Tag the receipt, then fill a blank row (fill mode) or append.
    pub fn commit(&mut self, mut record: LedgerRecord) -> Result<CommitOutcome, CommitError> {
        let receipt = record.receipt(&self.source_kind);
        record.tag_receipt(&receipt);

        if self.fill_mode == FillMode::FillFirstEmpty
            && let Some(index) = self.fill_first_empty(&record)?
        {
            return Ok(CommitOutcome {
                committed_index: index,
                receipt,
                strategy: CommitStrategy::FilledEmpty,
            });
        }

        let index = self.append(&record)?;
        Ok(CommitOutcome {
            committed_index: index,
            receipt,
            strategy: CommitStrategy::Appended,
        })
    }
}

/// In-process table used by unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryTable {
    pub rows: Vec<Vec<Value>>,
    pub fail_appends: bool,
    pub append_calls: usize,
}

#[cfg(test)]
impl MemoryTable {
    pub fn with_blank_row_at(len: usize, blank_at: usize) -> Self {
        let mut rows = Vec::with_capacity(len);
        for i in 0..len {
            if i == blank_at {
                rows.push(vec![Value::Null, Value::String("  ".to_string())]);
            } else {
                rows.push(vec![Value::String(format!("row {i}"))]);
            }
        }
        Self {
            rows,
            ..Self::default()
        }
    }
}

#[cfg(test)]
impl LedgerTable for MemoryTable {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn append_row(&mut self, values: &[Value]) -> Result<u64, CommitError> {
        self.append_calls += 1;
        if self.fail_appends {
            return Err(CommitError::Status {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        self.rows.push(values.to_vec());
        Ok((self.rows.len() - 1) as u64)
    }

    fn read_rows(&mut self) -> Result<Vec<TableRow>, CommitError> {
        Ok(self
            .rows
            .iter()
            .enumerate()
            .map(|(i, values)| TableRow {
                index: i as u64,
                values: values.clone(),
            })
            .collect())
    }

    fn write_row(&mut self, index: u64, values: &[Value]) -> Result<(), CommitError> {
        let slot = self
            .rows
            .get_mut(index as usize)
            .ok_or_else(|| CommitError::InvalidResponse(format!("no row {index}")))?;
        *slot = values.to_vec();
        Ok(())
    }
}
