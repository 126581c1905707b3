//! Local idempotency map: one entry per message that reached the ledger.
//!
//! Keys look like `telegram:-1003711269809:message:12345`. An entry is
//! written only after the remote commit succeeded and is never removed by
//! the pipeline itself.

use crate::error::StorageError;
use crate::ledger::util::{now_utc_iso, read_json_state, write_json_atomic};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const EXIT_ALREADY_SEEN: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub marked_at: String,
    #[serde(flatten)]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DedupFile {
    #[serde(default = "default_version")]
    version: u32,
    seen: BTreeMap<String, DedupEntry>,
}

fn default_version() -> u32 {
    1
}

impl Default for DedupFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            seen: BTreeMap::new(),
        }
    }
}

pub fn dedupe_key(source_kind: &str, conversation_id: &str, message_id: u64) -> String {
    format!("{source_kind}:{conversation_id}:message:{message_id}")
}

#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    data: DedupFile,
}

impl DedupStore {
    /// Load the whole map. Missing file means empty; a corrupt file is fatal.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let data = read_json_state::<DedupFile>(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.data.seen.len()
    }

    pub fn seen(&self, key: &str) -> bool {
        self.data.seen.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&DedupEntry> {
        self.data.seen.get(key)
    }

    /// Record `key` and persist immediately. Re-marking overwrites the metadata.
    /// A `marked_at` field in `meta` is kept; otherwise the current time is used.
    pub fn mark(&mut self, key: &str, mut meta: Map<String, Value>) -> Result<(), StorageError> {
        let marked_at = match meta.remove("marked_at") {
            Some(Value::String(at)) if !at.trim().is_empty() => at,
            _ => now_utc_iso(),
        };
        self.data
            .seen
            .insert(key.to_string(), DedupEntry { marked_at, meta });
        write_json_atomic(&self.path, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn key_layout_matches_receipt_scheme() {
        assert_eq!(
            dedupe_key("telegram", "-1003711269809", 42),
            "telegram:-1003711269809:message:42"
        );
    }

    #[test]
    fn mark_persists_and_reloads() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("dedupe.json");

        let mut store = DedupStore::open(&path).expect("open");
        assert!(!store.seen("telegram:-1:message:7"));
        store
            .mark("telegram:-1:message:7", meta(json!({"committed_index": 3})))
            .expect("mark");

        let reopened = DedupStore::open(&path).expect("reopen");
        assert!(reopened.seen("telegram:-1:message:7"));
        let entry = reopened.get("telegram:-1:message:7").expect("entry");
        assert_eq!(entry.meta.get("committed_index"), Some(&json!(3)));
        assert!(entry.marked_at.ends_with('Z'));
    }

    #[test]
    fn remark_overwrites_metadata_without_error() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("dedupe.json");
        let mut store = DedupStore::open(&path).expect("open");

        store.mark("k", meta(json!({"committed_index": 1}))).expect("first");
        store
            .mark("k", meta(json!({"committed_index": 9, "marked_at": "2026-01-01T00:00:00Z"})))
            .expect("second");

        let entry = store.get("k").expect("entry");
        assert_eq!(entry.meta.get("committed_index"), Some(&json!(9)));
        assert_eq!(entry.marked_at, "2026-01-01T00:00:00Z");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reads_legacy_file_layout() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("dedupe.json");
        fs::write(
            &path,
            r#"{"version":1,"seen":{"telegram:-5:message:1":{"receipt":"telegram:-5:1","excel_index":12,"marked_at":"2026-01-30T06:59:00Z"}}}"#,
        )
        .expect("write");

        let store = DedupStore::open(&path).expect("open");
        let entry = store.get("telegram:-5:message:1").expect("entry");
        assert_eq!(entry.marked_at, "2026-01-30T06:59:00Z");
        assert_eq!(entry.meta.get("excel_index"), Some(&json!(12)));
    }

    #[test]
    fn corrupt_file_is_fatal_not_empty() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("dedupe.json");
        fs::write(&path, "{\"seen\": [").expect("write");

        let err = DedupStore::open(&path).expect_err("corrupt");
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn misspelled_seen_map_is_corrupt_not_empty() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("dedupe.json");
        fs::write(
            &path,
            r#"{"version":1,"Seen":{"telegram:-5:message:1":{"marked_at":"2026-01-30T06:59:00Z"}}}"#,
        )
        .expect("write");

        let err = DedupStore::open(&path).expect_err("wrong shape");
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
