use anyhow::{Context, Result};

use crate::commands::{CommandReport, open_ledger_table};
use crate::error::LedgerErrorCode;
use crate::ledger::audit;
use crate::ledger::config::load_config;
use crate::ledger::paths::resolve_paths;
use crate::ledger::record::LedgerRecord;
use crate::ledger::sink::LedgerAppendClient;

/// One hand-entered ledger row; the field names follow the table columns.
#[derive(Debug, Clone, Default)]
pub struct LogSpendOptions {
    pub ts_iso: String,
    pub chat_id: String,
    pub message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub item: String,
    pub price: f64,
    pub currency: String,
    pub category: String,
    pub project_code: String,
    pub notes: String,
    pub raw_text: String,
}

impl LogSpendOptions {
    fn into_record(self) -> LedgerRecord {
        LedgerRecord {
            ts_iso: self.ts_iso,
            chat_id: self.chat_id,
            message_id: self.message_id,
            author_id: self.author_id,
            author_name: self.author_name,
            item: self.item,
            price: self.price,
            currency: self.currency,
            category: self.category,
            project_code: self.project_code,
            notes: self.notes,
            raw_text: self.raw_text,
        }
    }
}

pub fn run(opts: LogSpendOptions) -> Result<CommandReport> {
    let mut report = CommandReport::new("log-spend");
    if !opts.price.is_finite() {
        report.issue(format!("invalid --price {}", opts.price));
        return Ok(report);
    }

    let paths = resolve_paths()?;
    let cfg = load_config(&paths.config_file)?;
    let table = open_ledger_table(&paths, &cfg)?;
    let mut client = LedgerAppendClient::new(table, cfg.ledger.fill_mode, &cfg.watch.source_kind);
    let record = opts.into_record();
    let message_id = record.message_id.clone();

    match client.commit(record) {
        Ok(outcome) => {
            report.detail(format!("table={}", client.table().describe()));
            report.detail(format!("committed_index={}", outcome.committed_index));
            report.detail(format!("receipt={}", outcome.receipt));
            report.detail(format!("strategy={:?}", outcome.strategy));
            audit::append_event(
                &paths,
                "log-spend",
                "ok",
                &format!("receipt={} index={}", outcome.receipt, outcome.committed_index),
            )
            .context("failed to write audit event")?;
        }
        Err(err) => {
            report.issue(format!(
                "{}: message {message_id}: {err}",
                LedgerErrorCode::E008CommitFailed.as_str()
            ));
            let _ = audit::append_event(&paths, "log-spend", "failed", &err.to_string());
        }
    }
    Ok(report)
}
