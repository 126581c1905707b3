use crate::error::StorageError;
use crate::ledger::util::{now_utc_iso, read_json_state, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkState {
    pub last_message_id: u64,
    #[serde(default)]
    pub updated_at: String,
}

/// `conversations` is required so a file of another shape, such as a bare
/// `{"last_message_id": N}`, is rejected as corrupt instead of reading as empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WatermarkFile {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    conversations: BTreeMap<String, WatermarkState>,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for WatermarkFile {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            conversations: BTreeMap::new(),
        }
    }
}

/// Highest fully evaluated message id per conversation.
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    data: WatermarkFile,
}

impl WatermarkStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let data = read_json_state::<WatermarkFile>(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// `None` until the conversation has been initialized.
    pub fn get(&self, conversation_id: &str) -> Option<u64> {
        self.data
            .conversations
            .get(conversation_id)
            .map(|s| s.last_message_id)
    }

    pub fn conversations(&self) -> impl Iterator<Item = (&String, &WatermarkState)> {
        self.data.conversations.iter()
    }

    /// Move the watermark to `message_id` and persist. Never lowers an
    /// existing watermark; returns whether the stored value changed.
    pub fn advance(
        &mut self,
        conversation_id: &str,
        message_id: u64,
    ) -> Result<bool, StorageError> {
        if let Some(current) = self.get(conversation_id)
            && current >= message_id
        {
            return Ok(false);
        }

        self.data.conversations.insert(
            conversation_id.to_string(),
            WatermarkState {
                last_message_id: message_id,
                updated_at: now_utc_iso(),
            },
        );
        write_json_atomic(&self.path, &self.data)?;
        Ok(true)
    }
}
