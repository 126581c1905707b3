use anyhow::{Context, Result};

use crate::commands::open_ledger_table;
use crate::error::LedgerErrorCode;
use crate::ledger::audit;
use crate::ledger::config::load_config;
use crate::ledger::dedupe::DedupStore;
use crate::ledger::draft::HeuristicExtractor;
use crate::ledger::lock::acquire_run_lock;
use crate::ledger::orchestrator::{Orchestrator, RunOptions, RunSummary};
use crate::ledger::paths::resolve_paths;
use crate::ledger::sink::LedgerAppendClient;
use crate::ledger::transcript::TranscriptScanner;
use crate::ledger::watermark::WatermarkStore;

#[derive(Debug, Clone, Default)]
pub struct WatchBuyOptions {
    pub conversation_id: String,
    pub max_per_run: Option<u64>,
    pub init_only: bool,
}

pub fn run(opts: &WatchBuyOptions) -> Result<RunSummary> {
    let conversation_id = opts.conversation_id.trim();
    if conversation_id.is_empty() {
        anyhow::bail!("--conversation must not be empty");
    }

    let paths = resolve_paths()?;
    let cfg = load_config(&paths.config_file)?;
    let lock = acquire_run_lock(&paths, conversation_id)?;
    tracing::debug!(lock = %lock.path().display(), "acquired run lock");

    let state_code = LedgerErrorCode::E007StateCorrupt.as_str();
    let mut dedupe = DedupStore::open(&paths.dedupe_file).context(state_code)?;
    let mut watermarks = WatermarkStore::open(&paths.watermark_file).context(state_code)?;
    let extractor = HeuristicExtractor::new(&cfg.extractor)?;
    let scanner = TranscriptScanner::new(
        &paths.sessions_dir,
        conversation_id,
        &cfg.watch.intent_keywords,
        cfg.watch.tail_scan_bytes,
    );
    let table = open_ledger_table(&paths, &cfg)?;
    let mut client = LedgerAppendClient::new(table, cfg.ledger.fill_mode, &cfg.watch.source_kind);

    let run_opts = RunOptions {
        conversation_id: conversation_id.to_string(),
        source_kind: cfg.watch.source_kind.clone(),
        max_per_run: opts.max_per_run.unwrap_or(cfg.watch.max_per_run).max(1),
        init_only: opts.init_only,
    };

    let result = Orchestrator::new(
        &scanner,
        &mut dedupe,
        &mut watermarks,
        &extractor,
        &mut client,
    )
    .run(&run_opts);

    let summary = match result {
        Ok(summary) => summary,
        Err(err) => {
            let _ = audit::append_event(&paths, "watch-buy", "failed", &format!("{err:#}"));
            return Err(err).with_context(|| format!("watch run for {conversation_id} failed"));
        }
    };

    audit::append_event(
        &paths,
        "watch-buy",
        if summary.ok { "ok" } else { "aborted" },
        &format!(
            "conversation={} state={:?} last_message_id={:?} appended={} skipped={} errors={}",
            summary.conversation_id,
            summary.state,
            summary.last_message_id,
            summary.appended.len(),
            summary.skipped.len(),
            summary.errors.len()
        ),
    )?;

    Ok(summary)
}
