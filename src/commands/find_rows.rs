use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::commands::open_ledger_table;
use crate::ledger::config::load_config;
use crate::ledger::paths::resolve_paths;
use crate::ledger::record::{
    ITEM_COLUMN, NOTES_COLUMN, PRICE_COLUMN, PROJECT_COLUMN, RAW_TEXT_COLUMN, cell_text,
    receipt_from_notes,
};
use crate::ledger::sink::TableRow;

#[derive(Debug, Clone, Default)]
pub struct FindRowsOptions {
    pub query: Option<String>,
    pub price: Option<f64>,
    pub top: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowMatch {
    pub index: u64,
    pub item: String,
    pub price: Value,
    pub project: String,
    pub raw_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindRowsResult {
    pub ok: bool,
    pub scanned: usize,
    pub matches: Vec<RowMatch>,
}

fn cell(values: &[Value], column: usize) -> Value {
    values.get(column).cloned().unwrap_or(Value::Null)
}

fn price_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Rows among the last `top` whose item or raw text contains the query
/// (case-insensitive) or whose price equals `price`.
pub fn match_rows(rows: &[TableRow], opts: &FindRowsOptions) -> (usize, Vec<RowMatch>) {
    let query = opts
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    let recent = &rows[rows.len().saturating_sub(opts.top)..];

    let matches = recent
        .iter()
        .filter_map(|row| {
            let item = cell_text(&cell(&row.values, ITEM_COLUMN));
            let raw_text = cell_text(&cell(&row.values, RAW_TEXT_COLUMN));
            let price = cell(&row.values, PRICE_COLUMN);

            let text_hit = query.as_ref().is_some_and(|q| {
                item.to_lowercase().contains(q) || raw_text.to_lowercase().contains(q)
            });
            let price_hit = opts
                .price
                .is_some_and(|want| price_of(&price).is_some_and(|got| (got - want).abs() < 1e-9));
            if !(text_hit || price_hit) {
                return None;
            }

            let notes = cell_text(&cell(&row.values, NOTES_COLUMN));
            Some(RowMatch {
                index: row.index,
                item,
                price,
                project: cell_text(&cell(&row.values, PROJECT_COLUMN)),
                raw_text,
                receipt: receipt_from_notes(&notes).map(str::to_string),
            })
        })
        .collect();
    (recent.len(), matches)
}

pub fn run(opts: &FindRowsOptions) -> Result<FindRowsResult> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.config_file)?;
    let mut table = open_ledger_table(&paths, &cfg)?;
    let rows = table.read_rows()?;
    let (scanned, matches) = match_rows(&rows, opts);
    Ok(FindRowsResult {
        ok: true,
        scanned,
        matches,
    })
}
