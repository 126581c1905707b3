use anyhow::Result;

use crate::commands::CommandReport;
use crate::graph::workbook::GraphWorkbook;
use crate::ledger::config::{SinkKind, load_config};
use crate::ledger::local_table::LocalTable;
use crate::ledger::paths::resolve_paths;
use crate::ledger::record::LEDGER_COLUMNS;
use crate::ledger::sink::LedgerTable;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.config_file)?;
    let mut report = CommandReport::new("list-tables");
    report.detail(format!("sink={}", cfg.ledger.sink.as_str()));

    match cfg.ledger.sink {
        SinkKind::Local => {
            let mut table = LocalTable::new(&paths.local_table_file, &cfg.ledger.table);
            report.detail(format!("table={}", cfg.ledger.table));
            report.detail(format!("path={}", table.path().display()));
            report.detail(format!("columns={}", LEDGER_COLUMNS.join(",")));
            match table.read_rows() {
                Ok(rows) => report.detail(format!("rows={}", rows.len())),
                Err(err) => report.issue(format!("local table unreadable: {err}")),
            }
        }
        SinkKind::Graph => {
            let mut workbook = GraphWorkbook::from_config(&cfg.ledger)?;
            match workbook.list_tables() {
                Ok(tables) => {
                    if !tables.iter().any(|t| t.name == cfg.ledger.table) {
                        report.issue(format!(
                            "configured table `{}` not found in workbook",
                            cfg.ledger.table
                        ));
                    }
                    for table in tables {
                        report.detail(format!("table={} id={}", table.name, table.id));
                    }
                }
                Err(err) => report.issue(format!("failed to list workbook tables: {err}")),
            }
        }
    }

    Ok(report)
}
