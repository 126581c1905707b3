use anyhow::Result;

use crate::commands::CommandReport;
use crate::error::LedgerErrorCode;
use crate::ledger::config::load_config;
use crate::ledger::dedupe::DedupStore;
use crate::ledger::paths::resolve_paths;
use crate::ledger::watermark::WatermarkStore;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("ledger_home={}", paths.ledger_home.display()));
    report.detail(format!("dedupe_file={}", paths.dedupe_file.display()));
    report.detail(format!("watermark_file={}", paths.watermark_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("sessions_dir={}", paths.sessions_dir.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));

    if !paths.sessions_dir.exists() {
        report.issue(format!(
            "missing sessions dir ({}); set CLAWDBOT_SESSIONS_DIR",
            paths.sessions_dir.display()
        ));
    }

    match load_config(&paths.config_file) {
        Ok(cfg) => {
            report.detail(format!("config.source_kind={}", cfg.watch.source_kind));
            report.detail(format!("config.max_per_run={}", cfg.watch.max_per_run));
            report.detail(format!("config.sink={}", cfg.ledger.sink.as_str()));
            report.detail(format!("config.fill_mode={}", cfg.ledger.fill_mode.as_str()));
            report.detail(format!("config.table={}", cfg.ledger.table));
        }
        Err(err) => report.issue(format!("config invalid: {err:#}")),
    }

    match DedupStore::open(&paths.dedupe_file) {
        Ok(store) => report.detail(format!("dedupe.entries={}", store.len())),
        Err(err) => report.issue(format!("{}: {err}", LedgerErrorCode::E007StateCorrupt.as_str())),
    }

    match WatermarkStore::open(&paths.watermark_file) {
        Ok(store) => {
            for (conversation, state) in store.conversations() {
                report.detail(format!(
                    "watermark.{conversation}={} (updated_at={})",
                    state.last_message_id, state.updated_at
                ));
            }
        }
        Err(err) => report.issue(format!("{}: {err}", LedgerErrorCode::E007StateCorrupt.as_str())),
    }

    Ok(report)
}
