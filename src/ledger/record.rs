use crate::ledger::draft::CompleteDraft;
use crate::ledger::transcript::MessageEnvelope;
use crate::ledger::util::utc_iso_from_millis;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Column order of the remote ledger table.
pub const LEDGER_COLUMNS: [&str; 12] = [
    "ts_iso",
    "chat_id",
    "message_id",
    "author_id",
    "author_name",
    "item",
    "price",
    "currency",
    "category",
    "project_code",
    "notes",
    "raw_text",
];

pub const ITEM_COLUMN: usize = 5;
pub const PRICE_COLUMN: usize = 6;
pub const PROJECT_COLUMN: usize = 9;
pub const NOTES_COLUMN: usize = 10;
pub const RAW_TEXT_COLUMN: usize = 11;

const RECEIPT_PREFIX: &str = "receipt=";

/// Stable back-reference from a committed row to its origin message.
pub fn receipt_id(source_kind: &str, conversation_id: &str, message_id: &str) -> String {
    format!("{source_kind}:{conversation_id}:{message_id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
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

impl LedgerRecord {
    pub fn from_envelope(envelope: &MessageEnvelope, draft: &CompleteDraft) -> Self {
        Self {
            ts_iso: utc_iso_from_millis(envelope.timestamp_millis),
            chat_id: envelope.conversation_id.clone(),
            message_id: envelope.message_id.to_string(),
            author_id: envelope.author_id.clone(),
            author_name: envelope.author_name.clone(),
            item: draft.item.clone(),
            price: draft.amount,
            currency: draft.currency.clone(),
            category: draft.category.clone(),
            project_code: draft.project_code.clone(),
            notes: String::new(),
            raw_text: envelope.raw_text.clone(),
        }
    }

    pub fn receipt(&self, source_kind: &str) -> String {
        receipt_id(source_kind, &self.chat_id, &self.message_id)
    }

    /// Embed `receipt=<id>` in the notes unless it is already there.
    pub fn tag_receipt(&mut self, receipt: &str) {
        let tag = format!("{RECEIPT_PREFIX}{receipt}");
        if self.notes.split('|').any(|part| part.trim() == tag) {
            return;
        }
        let existing = self.notes.trim();
        self.notes = if existing.is_empty() {
            tag
        } else {
            format!("{existing} | {tag}")
        };
    }

    /// Cell values in `LEDGER_COLUMNS` order.
    pub fn to_values(&self) -> Vec<Value> {
        vec![
            json!(self.ts_iso),
            json!(self.chat_id),
            json!(self.message_id),
            json!(self.author_id),
            json!(self.author_name),
            json!(self.item),
            json!(self.price),
            json!(self.currency),
            json!(self.category),
            json!(self.project_code),
            json!(self.notes),
            json!(self.raw_text),
        ]
    }
}

/// Pull the receipt id back out of a notes cell.
pub fn receipt_from_notes(notes: &str) -> Option<&str> {
    notes
        .split('|')
        .map(str::trim)
        .find_map(|part| part.strip_prefix(RECEIPT_PREFIX))
        .filter(|r| !r.is_empty())
}

/// Render a cell for text matching; numbers keep their JSON form.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
