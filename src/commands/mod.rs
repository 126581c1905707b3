pub mod dedupe;
pub mod find_rows;
pub mod list_tables;
pub mod log_spend;
pub mod parse;
pub mod status;
pub mod watch_buy;

use anyhow::Result;
use serde::Serialize;

use crate::graph::workbook::GraphWorkbook;
use crate::ledger::config::{SinkKind, SpendLedgerConfig};
use crate::ledger::local_table::LocalTable;
use crate::ledger::paths::LedgerPaths;
use crate::ledger::sink::LedgerTable;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// The configured ledger table behind a trait object.
pub fn open_ledger_table(
    paths: &LedgerPaths,
    cfg: &SpendLedgerConfig,
) -> Result<Box<dyn LedgerTable>> {
    match cfg.ledger.sink {
        SinkKind::Local => Ok(Box::new(LocalTable::new(
            &paths.local_table_file,
            &cfg.ledger.table,
        ))),
        SinkKind::Graph => Ok(Box::new(GraphWorkbook::from_config(&cfg.ledger)?)),
    }
}
