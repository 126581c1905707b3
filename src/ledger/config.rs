use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

pub const DEFAULT_PROJECT_CODES: [&str; 9] = [
    "DE",
    "DE Est",
    "KC8 CO2R",
    "KC8 pH swing",
    "ASG",
    "DP",
    "LP",
    "Startup",
    "Pursuit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FillMode {
    Append,
    FillFirstEmpty,
}

impl FillMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FillMode::Append => "append",
            FillMode::FillFirstEmpty => "fill-first-empty",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "append" => Some(FillMode::Append),
            "fill-first-empty" | "fill" | "fill_first_empty" => Some(FillMode::FillFirstEmpty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    Graph,
    Local,
}

impl SinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SinkKind::Graph => "graph",
            SinkKind::Local => "local",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "graph" | "excel" => Some(SinkKind::Graph),
            "local" | "file" => Some(SinkKind::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub source_kind: String,
    pub max_per_run: u64,
    pub intent_keywords: Vec<String>,
    pub tail_scan_bytes: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            source_kind: "telegram".to_string(),
            max_per_run: 50,
            intent_keywords: vec!["buy".to_string()],
            tail_scan_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSinkConfig {
    pub sink: SinkKind,
    pub fill_mode: FillMode,
    pub table: String,
    pub share_url: Option<String>,
    pub drive_id: Option<String>,
    pub item_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LedgerSinkConfig {
    fn default() -> Self {
        Self {
            sink: SinkKind::Graph,
            fill_mode: FillMode::Append,
            table: "Ledger".to_string(),
            share_url: None,
            drive_id: None,
            item_id: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub project_codes: Vec<String>,
    pub dollar_currency: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            project_codes: DEFAULT_PROJECT_CODES.iter().map(|s| s.to_string()).collect(),
            dollar_currency: "AUD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpendLedgerConfig {
    pub watch: WatchConfig,
    pub ledger: LedgerSinkConfig,
    pub extractor: ExtractorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSpendLedgerConfig {
    watch: Option<WatchConfig>,
    ledger: Option<LedgerSinkConfig>,
    extractor: Option<ExtractorConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional_string(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn validate(cfg: &SpendLedgerConfig) -> Result<()> {
    if cfg.watch.source_kind.trim().is_empty() || cfg.watch.source_kind.contains(':') {
        return Err(anyhow!(
            "invalid watch source kind: must be non-empty and contain no `:`"
        ));
    }
    if cfg.watch.max_per_run == 0 {
        return Err(anyhow!("invalid watch max per run: must be >= 1"));
    }
    if cfg.watch.tail_scan_bytes == 0 {
        return Err(anyhow!("invalid watch tail scan bytes: must be >= 1"));
    }
    if cfg.watch.intent_keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(anyhow!("invalid watch intent keywords: need at least one"));
    }
    if cfg.ledger.table.trim().is_empty() {
        return Err(anyhow!("invalid ledger table: cannot be empty"));
    }
    if cfg.ledger.request_timeout_secs == 0 {
        return Err(anyhow!("invalid ledger request timeout: must be >= 1 second"));
    }
    if cfg.extractor.dollar_currency.trim().is_empty() {
        return Err(anyhow!("invalid extractor dollar currency: cannot be empty"));
    }
    Ok(())
}

fn merge_file_config(base: &mut SpendLedgerConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: PartialSpendLedgerConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse spend ledger config {}: {err}", path.display()))?;
    if let Some(watch) = parsed.watch {
        base.watch = watch;
    }
    if let Some(ledger) = parsed.ledger {
        base.ledger = ledger;
    }
    if let Some(extractor) = parsed.extractor {
        base.extractor = extractor;
    }
    Ok(())
}

pub fn load_config(config_file: &Path) -> Result<SpendLedgerConfig> {
    let mut cfg = SpendLedgerConfig::default();
    merge_file_config(&mut cfg, config_file)?;

    cfg.watch.source_kind = env_or_string("SPEND_LEDGER_SOURCE_KIND", &cfg.watch.source_kind);
    cfg.watch.max_per_run = env_or_u64("SPEND_LEDGER_MAX_PER_RUN", cfg.watch.max_per_run);
    cfg.watch.intent_keywords =
        env_or_csv("SPEND_LEDGER_INTENT_KEYWORDS", &cfg.watch.intent_keywords);
    cfg.watch.tail_scan_bytes =
        env_or_u64("SPEND_LEDGER_TAIL_SCAN_BYTES", cfg.watch.tail_scan_bytes);

    if let Ok(raw) = env::var("SPEND_LEDGER_SINK") {
        cfg.ledger.sink = SinkKind::parse(&raw)
            .ok_or_else(|| anyhow!("invalid SPEND_LEDGER_SINK `{raw}`: use `graph` or `local`"))?;
    }
    if let Ok(raw) = env::var("SPEND_LEDGER_FILL_MODE") {
        cfg.ledger.fill_mode = FillMode::parse(&raw).ok_or_else(|| {
            anyhow!("invalid SPEND_LEDGER_FILL_MODE `{raw}`: use `append` or `fill-first-empty`")
        })?;
    }
    cfg.ledger.table = env_or_string("SPEND_LEDGER_TABLE", &cfg.ledger.table);
    cfg.ledger.share_url =
        env_or_optional_string("SPEND_LEDGER_SHARE_URL", cfg.ledger.share_url.take());
    cfg.ledger.drive_id =
        env_or_optional_string("SPEND_LEDGER_DRIVE_ID", cfg.ledger.drive_id.take());
    cfg.ledger.item_id = env_or_optional_string("SPEND_LEDGER_ITEM_ID", cfg.ledger.item_id.take());
    cfg.ledger.request_timeout_secs = env_or_u64(
        "SPEND_LEDGER_REQUEST_TIMEOUT_SECS",
        cfg.ledger.request_timeout_secs,
    );
    cfg.extractor.project_codes =
        env_or_csv("SPEND_LEDGER_PROJECT_CODES", &cfg.extractor.project_codes);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_sections_replace_defaults() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("spend_ledger.toml");
        fs::write(
            &path,
            "[ledger]\nsink = \"local\"\nfill_mode = \"fill-first-empty\"\ntable = \"Spend\"\n",
        )
        .expect("write config");

        let mut cfg = SpendLedgerConfig::default();
        merge_file_config(&mut cfg, &path).expect("merge");
        assert_eq!(cfg.ledger.sink, SinkKind::Local);
        assert_eq!(cfg.ledger.fill_mode, FillMode::FillFirstEmpty);
        assert_eq!(cfg.ledger.table, "Spend");
        assert_eq!(cfg.ledger.request_timeout_secs, 30);
        assert_eq!(cfg.watch.max_per_run, 50);
    }

    #[test]
    fn validate_rejects_zero_run_cap() {
        let mut cfg = SpendLedgerConfig::default();
        cfg.watch.max_per_run = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_rejects_source_kind_with_separator() {
        let mut cfg = SpendLedgerConfig::default();
        cfg.watch.source_kind = "tele:gram".to_string();
        assert!(validate(&cfg).is_err());
    }
}
