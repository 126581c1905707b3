use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::commands::CommandReport;
use crate::ledger::dedupe::{DedupEntry, DedupStore};
use crate::ledger::paths::resolve_paths;

#[derive(Debug, Clone, Serialize)]
pub struct DedupeCheck {
    pub key: String,
    pub seen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<DedupEntry>,
}

pub fn check(key: &str) -> Result<DedupeCheck> {
    let paths = resolve_paths()?;
    let store = DedupStore::open(&paths.dedupe_file)?;
    let key = key.trim();
    Ok(DedupeCheck {
        key: key.to_string(),
        seen: store.seen(key),
        entry: store.get(key).cloned(),
    })
}

fn parse_meta(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw).context("--meta is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("--meta must be a JSON object, got {other}"),
    }
}

pub fn mark(key: &str, meta: Option<&str>) -> Result<CommandReport> {
    let mut report = CommandReport::new("dedupe-mark");
    let key = key.trim();
    if key.is_empty() {
        report.issue("--key must not be empty");
        return Ok(report);
    }

    let meta = parse_meta(meta)?;
    let paths = resolve_paths()?;
    let mut store = DedupStore::open(&paths.dedupe_file)?;
    let existed = store.seen(key);
    store.mark(key, meta)?;

    report.detail(format!("key={key}"));
    report.detail(format!("remarked={existed}"));
    report.detail(format!("dedupe_file={}", store.path().display()));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::parse_meta;

    #[test]
    fn meta_must_be_an_object() {
        assert!(parse_meta(None).expect("none").is_empty());
        assert!(parse_meta(Some("  ")).expect("blank").is_empty());
        let meta = parse_meta(Some(r#"{"committed_index": 4}"#)).expect("object");
        assert_eq!(meta.get("committed_index").and_then(|v| v.as_u64()), Some(4));
        assert!(parse_meta(Some("[1,2]")).is_err());
        assert!(parse_meta(Some("{oops")).is_err());
    }
}
