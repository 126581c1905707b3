//! One watch run over a conversation: INIT -> DISCOVER -> STEADY.
//!
//! The first run for a conversation only records the highest message id it
//! can see and commits nothing. Later runs walk candidates above the
//! watermark in ascending order; each is skipped as a duplicate, skipped as
//! incomplete, or committed and then marked in the dedup store.
//!
//! Known limitation: a message that arrives while the first run is
//! discovering is covered by the initial watermark and never committed.

use crate::error::{LedgerErrorCode, StorageError};
use crate::ledger::dedupe::{DedupStore, dedupe_key};
use crate::ledger::draft::{DraftExtractor, DraftField};
use crate::ledger::record::LedgerRecord;
use crate::ledger::sink::{CommitStrategy, LedgerAppendClient, LedgerTable};
use crate::ledger::transcript::TranscriptScanner;
use crate::ledger::watermark::WatermarkStore;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No watermark yet and nothing to discover.
    Init,
    /// Watermark initialized from the current transcript; nothing committed.
    Discover,
    Steady,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub conversation_id: String,
    pub source_kind: String,
    pub max_per_run: u64,
    /// Re-run discovery even when a watermark exists.
    pub init_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppendedMessage {
    pub message_id: u64,
    pub receipt: String,
    pub committed_index: u64,
    pub strategy: CommitStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    AlreadySeen,
    NeedsClarification,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedMessage {
    pub message_id: u64,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<DraftField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunError {
    pub message_id: u64,
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub ok: bool,
    pub conversation_id: String,
    pub state: RunState,
    pub previous_message_id: Option<u64>,
    pub last_message_id: Option<u64>,
    pub candidates: usize,
    pub appended: Vec<AppendedMessage>,
    pub skipped: Vec<SkippedMessage>,
    pub errors: Vec<RunError>,
    pub capped: bool,
}

impl RunSummary {
    fn new(conversation_id: &str, previous: Option<u64>, candidates: usize) -> Self {
        Self {
            ok: true,
            conversation_id: conversation_id.to_string(),
            state: RunState::Init,
            previous_message_id: previous,
            last_message_id: previous,
            candidates,
            appended: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            capped: false,
        }
    }
}

/// Explicit handles for everything one run reads or mutates.
pub struct Orchestrator<'a, E, T> {
    scanner: &'a TranscriptScanner,
    dedupe: &'a mut DedupStore,
    watermarks: &'a mut WatermarkStore,
    extractor: &'a E,
    client: &'a mut LedgerAppendClient<T>,
}

impl<'a, E: DraftExtractor, T: LedgerTable> Orchestrator<'a, E, T> {
    pub fn new(
        scanner: &'a TranscriptScanner,
        dedupe: &'a mut DedupStore,
        watermarks: &'a mut WatermarkStore,
        extractor: &'a E,
        client: &'a mut LedgerAppendClient<T>,
    ) -> Self {
        Self {
            scanner,
            dedupe,
            watermarks,
            extractor,
            client,
        }
    }

    pub fn run(&mut self, opts: &RunOptions) -> Result<RunSummary> {
        let conversation_id = opts.conversation_id.as_str();
        let previous = self.watermarks.get(conversation_id);
        let candidates = self
            .scanner
            .scan_ordered()
            .context("failed to scan session transcripts")?;
        let mut summary = RunSummary::new(conversation_id, previous, candidates.len());

        let Some(watermark) = previous.filter(|_| !opts.init_only) else {
            self.discover(&mut summary, candidates.last().map(|e| e.message_id))?;
            return Ok(summary);
        };

        summary.state = RunState::Steady;
        let mut evaluated = watermark;
        let mut committed = 0u64;

        for envelope in candidates.into_iter().filter(|e| e.message_id > watermark) {
            if committed >= opts.max_per_run {
                summary.capped = true;
                tracing::info!(
                    conversation_id,
                    max_per_run = opts.max_per_run,
                    "run cap reached; remaining candidates left for next run"
                );
                break;
            }

            let message_id = envelope.message_id;
            let key = dedupe_key(&opts.source_kind, conversation_id, message_id);
            if self.dedupe.seen(&key) {
                tracing::debug!(message_id, key = %key, "already committed");
                summary.skipped.push(SkippedMessage {
                    message_id,
                    reason: SkipReason::AlreadySeen,
                    missing_fields: Vec::new(),
                });
                evaluated = message_id;
                continue;
            }

            let draft = match self.extractor.extract(&envelope.raw_text) {
                Ok(draft) => draft,
                Err(err) => {
                    tracing::warn!(message_id, error = %err, "extractor failed; message skipped");
                    summary.errors.push(RunError {
                        message_id,
                        code: LedgerErrorCode::E009DraftFailed.as_str(),
                        error: err.to_string(),
                    });
                    evaluated = message_id;
                    continue;
                }
            };

            let Some(complete) = draft.complete() else {
                let missing = draft
                    .missing_fields
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                tracing::debug!(message_id, missing = %missing, "draft incomplete");
                summary.skipped.push(SkippedMessage {
                    message_id,
                    reason: SkipReason::NeedsClarification,
                    missing_fields: draft.missing_fields.iter().copied().collect(),
                });
                evaluated = message_id;
                continue;
            };

            let record = LedgerRecord::from_envelope(&envelope, &complete);
            let outcome = match self.client.commit(record) {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(
                        message_id,
                        table = %self.client.table().describe(),
                        error = %err,
                        "commit failed; run aborted"
                    );
                    summary.ok = false;
                    summary.errors.push(RunError {
                        message_id,
                        code: LedgerErrorCode::E008CommitFailed.as_str(),
                        error: err.to_string(),
                    });
                    break;
                }
            };

            let meta = dedupe_meta(&outcome.receipt, outcome.committed_index, outcome.strategy);
            if let Err(err) = self.dedupe.mark(&key, meta) {
                // The row is in the table but unrecorded locally; keep the
                // progress made so far and stop before anything else commits.
                self.save_watermark(conversation_id, evaluated, &mut summary)?;
                return Err(anyhow::Error::new(err).context(format!(
                    "row {} committed for message {message_id} but dedup mark failed",
                    outcome.committed_index
                )));
            }

            tracing::info!(
                message_id,
                receipt = %outcome.receipt,
                committed_index = outcome.committed_index,
                strategy = ?outcome.strategy,
                "committed ledger row"
            );
            summary.appended.push(AppendedMessage {
                message_id,
                receipt: outcome.receipt,
                committed_index: outcome.committed_index,
                strategy: outcome.strategy,
            });
            committed += 1;
            evaluated = message_id;
        }

        self.save_watermark(conversation_id, evaluated, &mut summary)?;
        Ok(summary)
    }

    fn discover(&mut self, summary: &mut RunSummary, max_seen: Option<u64>) -> Result<()> {
        let conversation_id = summary.conversation_id.clone();
        match max_seen {
            Some(max) => {
                self.save_watermark(&conversation_id, max, summary)?;
                summary.state = RunState::Discover;
                tracing::info!(
                    conversation_id = %conversation_id,
                    watermark = ?summary.last_message_id,
                    "initialized watermark; nothing committed this run"
                );
            }
            None if summary.previous_message_id.is_some() => {
                summary.state = RunState::Discover;
            }
            None => {
                tracing::info!(conversation_id = %conversation_id, "no candidates yet; staying uninitialized");
            }
        }
        Ok(())
    }

    fn save_watermark(
        &mut self,
        conversation_id: &str,
        message_id: u64,
        summary: &mut RunSummary,
    ) -> Result<(), StorageError> {
        self.watermarks.advance(conversation_id, message_id)?;
        summary.last_message_id = self.watermarks.get(conversation_id);
        Ok(())
    }
}

fn dedupe_meta(
    receipt: &str,
    committed_index: u64,
    strategy: CommitStrategy,
) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("receipt".to_string(), json!(receipt));
    meta.insert("committed_index".to_string(), json!(committed_index));
    meta.insert("strategy".to_string(), json!(strategy));
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DraftError;
    use crate::ledger::config::{ExtractorConfig, FillMode};
    use crate::ledger::draft::{Draft, HeuristicExtractor};
    use crate::ledger::paths::{LedgerPaths, test_paths};
    use crate::ledger::record::NOTES_COLUMN;
    use crate::ledger::sink::MemoryTable;
    use crate::ledger::transcript::{group_text, user_line};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    const CHAT: &str = "-1003711269809";

    /// Heuristic extractor that fails on any text containing `boom`. Text
    /// containing `jam` turns the dedup file into a directory, so the mark
    /// that follows that message's commit cannot be written.
    struct FlakyExtractor {
        inner: HeuristicExtractor,
        dedupe_file: PathBuf,
    }

    impl DraftExtractor for FlakyExtractor {
        fn extract(&self, raw_text: &str) -> Result<Draft, DraftError> {
            if raw_text.contains("boom") {
                return Err(DraftError::Malformed("scripted failure".to_string()));
            }
            if raw_text.contains("jam") {
                let _ = fs::remove_file(&self.dedupe_file);
                fs::create_dir_all(&self.dedupe_file).expect("jam dedup file");
            }
            self.inner.extract(raw_text)
        }
    }

    struct Harness {
        _tmp: TempDir,
        paths: LedgerPaths,
        extractor: FlakyExtractor,
        client: LedgerAppendClient<MemoryTable>,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = tempdir().expect("tempdir");
            let paths = test_paths(tmp.path());
            fs::create_dir_all(&paths.sessions_dir).expect("sessions dir");
            let dedupe_file = paths.dedupe_file.clone();
            Self {
                _tmp: tmp,
                paths,
                extractor: FlakyExtractor {
                    inner: HeuristicExtractor::new(&ExtractorConfig::default()).expect("extractor"),
                    dedupe_file,
                },
                client: LedgerAppendClient::new(MemoryTable::default(), FillMode::Append, "telegram"),
            }
        }

        fn write_messages(&self, file: &str, messages: &[(u64, &str)]) {
            let body = messages
                .iter()
                .map(|(id, text)| {
                    user_line(
                        &group_text(CHAT, "Haowei Zhang", 999, text, *id),
                        1_769_756_340_000,
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            fs::write(self.paths.sessions_dir.join(file), body).expect("write session");
        }

        fn run_with(&mut self, max_per_run: u64, init_only: bool) -> Result<RunSummary> {
            let scanner =
                TranscriptScanner::new(&self.paths.sessions_dir, CHAT, &["buy".to_string()], 64 * 1024);
            let mut dedupe = DedupStore::open(&self.paths.dedupe_file)?;
            let mut watermarks = WatermarkStore::open(&self.paths.watermark_file)?;
            let mut orchestrator = Orchestrator::new(
                &scanner,
                &mut dedupe,
                &mut watermarks,
                &self.extractor,
                &mut self.client,
            );
            orchestrator.run(&RunOptions {
                conversation_id: CHAT.to_string(),
                source_kind: "telegram".to_string(),
                max_per_run,
                init_only,
            })
        }

        fn run(&mut self) -> RunSummary {
            self.run_with(50, false).expect("run")
        }

        fn dedupe(&self) -> DedupStore {
            DedupStore::open(&self.paths.dedupe_file).expect("dedupe")
        }
    }

    #[test]
    fn first_run_discovers_without_committing() {
        let mut h = Harness::new();
        h.write_messages(
            "s.jsonl",
            &[(10, "buy gloves $3 DE"), (14, "buy tips $4 DP"), (12, "buy vials $5 LP")],
        );

        let summary = h.run();
        assert!(summary.ok);
        assert_eq!(summary.state, RunState::Discover);
        assert_eq!(summary.previous_message_id, None);
        assert_eq!(summary.last_message_id, Some(14));
        assert!(summary.appended.is_empty());
        assert!(h.client.table().rows.is_empty());
        assert_eq!(h.dedupe().len(), 0);
    }

    #[test]
    fn empty_first_run_stays_uninitialized() {
        let mut h = Harness::new();
        let summary = h.run();
        assert_eq!(summary.state, RunState::Init);
        assert_eq!(summary.last_message_id, None);
        assert!(!h.paths.watermark_file.exists());
    }

    #[test]
    fn steady_run_commits_new_message_and_marks_dedupe() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(10, "buy gloves $3 DE")]);
        h.run();

        h.write_messages("b.jsonl", &[(11, "buy Bunnings nitrile gloves $28.50 DE")]);
        let summary = h.run();

        assert!(summary.ok);
        assert_eq!(summary.state, RunState::Steady);
        assert_eq!(summary.last_message_id, Some(11));
        assert_eq!(summary.appended.len(), 1);
        assert_eq!(summary.appended[0].message_id, 11);
        assert_eq!(summary.appended[0].receipt, format!("telegram:{CHAT}:11"));

        let row = &h.client.table().rows[0];
        assert_eq!(row[5], json!("Bunnings nitrile gloves"));
        assert_eq!(row[6], json!(28.5));
        assert_eq!(row[7], json!("AUD"));
        assert_eq!(row[8], json!("Lab consumables"));
        assert_eq!(row[9], json!("DE"));
        assert_eq!(row[NOTES_COLUMN], json!(format!("receipt=telegram:{CHAT}:11")));

        let dedupe = h.dedupe();
        let entry = dedupe
            .get(&format!("telegram:{CHAT}:message:11"))
            .expect("dedup entry");
        assert_eq!(entry.meta.get("committed_index"), Some(&json!(0)));
    }

    #[test]
    fn second_run_on_unchanged_transcript_appends_nothing() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages("b.jsonl", &[(2, "buy tips $4 DP"), (3, "buy vials $5 LP")]);

        assert_eq!(h.run().appended.len(), 2);
        let again = h.run();
        assert!(again.appended.is_empty());
        assert_eq!(again.last_message_id, Some(3));
        assert_eq!(h.client.table().rows.len(), 2);
    }

    #[test]
    fn seen_messages_are_skipped_without_parsing() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();

        // Marked by an operator but still above the watermark.
        let mut dedupe = h.dedupe();
        dedupe
            .mark(&format!("telegram:{CHAT}:message:2"), Map::new())
            .expect("mark");
        h.write_messages("b.jsonl", &[(2, "buy boom $4 DP")]);

        let summary = h.run();
        assert!(summary.errors.is_empty());
        assert_eq!(summary.skipped[0].reason, SkipReason::AlreadySeen);
        assert_eq!(summary.last_message_id, Some(2));
    }

    #[test]
    fn incomplete_drafts_are_skipped_permanently() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages("b.jsonl", &[(2, "buy more pipette tips")]);

        for _ in 0..3 {
            let summary = h.run();
            assert!(summary.appended.is_empty());
            assert_eq!(summary.last_message_id, Some(2));
        }
        assert!(h.client.table().rows.is_empty());
        assert!(!h.dedupe().seen(&format!("telegram:{CHAT}:message:2")));
    }

    #[test]
    fn incomplete_draft_reports_missing_fields() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages("b.jsonl", &[(2, "buy more pipette tips")]);

        let summary = h.run();
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].reason, SkipReason::NeedsClarification);
        assert!(summary.skipped[0].missing_fields.contains(&DraftField::Amount));
    }

    #[test]
    fn commit_failure_keeps_watermark_before_failed_message() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages(
            "b.jsonl",
            &[(2, "buy more pipette tips"), (3, "buy tips $4 DP"), (4, "buy vials $5 LP")],
        );

        h.client.table_mut().fail_appends = true;
        let failed = h.run();
        assert!(!failed.ok);
        assert_eq!(failed.errors.len(), 1);
        assert_eq!(failed.errors[0].message_id, 3);
        assert_eq!(failed.errors[0].code, "E008_COMMIT_FAILED");
        assert_eq!(failed.last_message_id, Some(2));
        assert_eq!(h.client.table().append_calls, 1);
        assert!(!h.dedupe().seen(&format!("telegram:{CHAT}:message:3")));

        h.client.table_mut().fail_appends = false;
        let retried = h.run();
        assert!(retried.ok);
        assert_eq!(
            retried.appended.iter().map(|a| a.message_id).collect::<Vec<_>>(),
            vec![3, 4]
        );
        assert_eq!(retried.last_message_id, Some(4));
    }

    #[test]
    fn mark_failure_after_commit_keeps_prior_progress_and_fails() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(10, "buy gloves $3 DE")]);
        h.run();
        h.write_messages(
            "b.jsonl",
            &[(11, "buy tips $4 DP"), (12, "buy jam jars $5 LP"), (13, "buy vials $6 LP")],
        );

        let err = h.run_with(50, false).expect_err("mark failure is fatal");
        assert!(format!("{err:#}").contains("dedup mark failed"));
        assert_eq!(h.client.table().rows.len(), 2);
        assert_eq!(
            h.client.table().rows[1][NOTES_COLUMN],
            json!(format!("receipt=telegram:{CHAT}:12"))
        );

        let watermarks = WatermarkStore::open(&h.paths.watermark_file).expect("watermarks");
        assert_eq!(watermarks.get(CHAT), Some(11));
    }

    #[test]
    fn extractor_failure_is_recorded_and_passed() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages("b.jsonl", &[(2, "buy boom $3 DE"), (3, "buy tips $4 DP")]);

        let summary = h.run();
        assert!(summary.ok);
        assert_eq!(summary.errors[0].code, "E009_DRAFT_FAILED");
        assert_eq!(summary.appended.len(), 1);
        assert_eq!(summary.last_message_id, Some(3));
    }

    #[test]
    fn cap_ends_run_early_and_resumes_next_time() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages(
            "b.jsonl",
            &[(2, "buy tips $4 DP"), (3, "buy vials $5 LP"), (4, "buy tubes $6 ASG")],
        );

        let first = h.run_with(2, false).expect("capped run");
        assert!(first.ok);
        assert!(first.capped);
        assert_eq!(first.appended.len(), 2);
        assert_eq!(first.last_message_id, Some(3));

        let second = h.run_with(2, false).expect("resume");
        assert!(!second.capped);
        assert_eq!(second.appended[0].message_id, 4);
    }

    #[test]
    fn init_only_never_lowers_the_watermark() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(5, "buy gloves $3 DE")]);
        h.run();
        h.write_messages("b.jsonl", &[(9, "buy tips $4 DP")]);

        let reinit = h.run_with(50, true).expect("init only");
        assert_eq!(reinit.state, RunState::Discover);
        assert_eq!(reinit.last_message_id, Some(9));
        assert!(reinit.appended.is_empty());

        fs::remove_file(h.paths.sessions_dir.join("b.jsonl")).expect("remove");
        let lowered = h.run_with(50, true).expect("init only again");
        assert_eq!(lowered.last_message_id, Some(9));
    }

    #[test]
    fn corrupt_dedup_state_aborts_before_any_commit() {
        let mut h = Harness::new();
        h.write_messages("a.jsonl", &[(1, "buy gloves $3 DE")]);
        h.run();
        h.write_messages("b.jsonl", &[(2, "buy tips $4 DP")]);
        fs::create_dir_all(&h.paths.ledger_home).expect("home");
        fs::write(&h.paths.dedupe_file, "{ not json").expect("corrupt");

        let err = h.run_with(50, false).expect_err("corrupt state is fatal");
        assert!(err.to_string().contains("corrupt"));
        assert!(h.client.table().rows.is_empty());
    }
}
