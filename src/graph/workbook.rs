//! Excel table on OneDrive/SharePoint, reached through Microsoft Graph.
//!
//! The workbook is addressed either by explicit drive/item ids or by a
//! sharing link, which is resolved once per process and cached.

use crate::error::{CommitError, LedgerErrorCode};
use crate::ledger::config::LedgerSinkConfig;
use crate::ledger::sink::{LedgerTable, TableRow};
use anyhow::{Result, anyhow};
use base64::{Engine as _, engine::general_purpose};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{Value, json};
use std::env;
use std::time::Duration;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_TOKEN_ENV: &str = "SPEND_LEDGER_GRAPH_TOKEN";
pub const GRAPH_BASE_URL_ENV: &str = "SPEND_LEDGER_GRAPH_BASE_URL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkbookTable {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DriveItemRef {
    drive_id: String,
    item_id: String,
}

pub struct GraphWorkbook {
    client: Client,
    base_url: String,
    token: String,
    table: String,
    share_url: Option<String>,
    item: Option<DriveItemRef>,
}

/// Graph share id: `u!` followed by the unpadded URL-safe base64 of the link.
pub fn encode_share_url(share_url: &str) -> String {
    let encoded = general_purpose::URL_SAFE_NO_PAD.encode(share_url.trim().as_bytes());
    format!("u!{encoded}")
}

fn classify_status(status: u16, body: String, table: &str) -> CommitError {
    match status {
        401 | 403 => CommitError::Auth { status, body },
        404 => CommitError::MissingTable(format!("{table}: {body}")),
        _ => CommitError::Status { status, body },
    }
}

fn parse_rows(payload: &Value) -> Result<Vec<TableRow>, CommitError> {
    let entries = payload
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| CommitError::InvalidResponse("rows response missing `value`".into()))?;

    let mut rows = Vec::with_capacity(entries.len());
    for (position, entry) in entries.iter().enumerate() {
        let index = entry
            .get("index")
            .and_then(Value::as_u64)
            .unwrap_or(position as u64);
        // Graph wraps each row's cells in a one-row 2-D array.
        let values = entry
            .get("values")
            .and_then(Value::as_array)
            .and_then(|outer| outer.first())
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        rows.push(TableRow { index, values });
    }
    Ok(rows)
}

fn parse_tables(payload: &Value) -> Result<Vec<WorkbookTable>, CommitError> {
    let entries = payload
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| CommitError::InvalidResponse("tables response missing `value`".into()))?;
    Ok(entries
        .iter()
        .map(|entry| WorkbookTable {
            id: entry
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
        .collect())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl GraphWorkbook {
    pub fn from_config(cfg: &LedgerSinkConfig) -> Result<Self> {
        let token = env::var(GRAPH_TOKEN_ENV).unwrap_or_default();
        if token.trim().is_empty() {
            return Err(anyhow!(
                "{}: {GRAPH_TOKEN_ENV} is not set",
                LedgerErrorCode::E005ConfigMissing.as_str()
            ));
        }

        let item = match (non_empty(&cfg.drive_id), non_empty(&cfg.item_id)) {
            (Some(drive_id), Some(item_id)) => Some(DriveItemRef { drive_id, item_id }),
            _ => None,
        };
        let share_url = non_empty(&cfg.share_url);
        if item.is_none() && share_url.is_none() {
            return Err(anyhow!(
                "{}: set ledger.share_url or both ledger.drive_id and ledger.item_id",
                LedgerErrorCode::E005ConfigMissing.as_str()
            ));
        }

        let base_url = env::var(GRAPH_BASE_URL_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_GRAPH_BASE_URL.to_string());

        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            token: token.trim().to_string(),
            table: cfg.table.clone(),
            share_url,
            item,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CommitError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| CommitError::Transport(format!("invalid graph base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|_| CommitError::Transport("graph base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Value, CommitError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .map_err(|err| CommitError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| CommitError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), body, &self.table));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| CommitError::InvalidResponse(err.to_string()))
    }

    fn resolve_item(&mut self) -> Result<DriveItemRef, CommitError> {
        if let Some(item) = &self.item {
            return Ok(item.clone());
        }
        let Some(share_url) = self.share_url.clone() else {
            return Err(CommitError::InvalidResponse(
                "no share url or drive item configured".into(),
            ));
        };

        let share_id = encode_share_url(&share_url);
        let url = self.endpoint(&["shares", share_id.as_str(), "driveItem"])?;
        let payload = self.send(self.client.get(url))?;

        let item_id = payload.get("id").and_then(Value::as_str);
        let drive_id = payload
            .get("parentReference")
            .and_then(|p| p.get("driveId"))
            .and_then(Value::as_str);
        let (Some(drive_id), Some(item_id)) = (drive_id, item_id) else {
            return Err(CommitError::InvalidResponse(
                "driveItem response missing parentReference.driveId or id".into(),
            ));
        };

        let item = DriveItemRef {
            drive_id: drive_id.to_string(),
            item_id: item_id.to_string(),
        };
        tracing::debug!(drive_id = %item.drive_id, item_id = %item.item_id, "resolved share link");
        self.item = Some(item.clone());
        Ok(item)
    }

    fn table_url(&mut self, tail: &[&str]) -> Result<Url, CommitError> {
        let item = self.resolve_item()?;
        let mut segments = vec![
            "drives",
            item.drive_id.as_str(),
            "items",
            item.item_id.as_str(),
            "workbook",
            "tables",
            self.table.as_str(),
        ];
        segments.extend_from_slice(tail);
        self.endpoint(&segments)
    }

    pub fn list_tables(&mut self) -> Result<Vec<WorkbookTable>, CommitError> {
        let item = self.resolve_item()?;
        let url = self.endpoint(&[
            "drives",
            item.drive_id.as_str(),
            "items",
            item.item_id.as_str(),
            "workbook",
            "tables",
        ])?;
        let payload = self.send(self.client.get(url))?;
        parse_tables(&payload)
    }
}

impl LedgerTable for GraphWorkbook {
    fn describe(&self) -> String {
        match &self.item {
            Some(item) => format!("graph:{}/{}#{}", item.drive_id, item.item_id, self.table),
            None => format!("graph:share#{}", self.table),
        }
    }

    fn append_row(&mut self, values: &[Value]) -> Result<u64, CommitError> {
        let url = self.table_url(&["rows", "add"])?;
        let body = json!({ "values": [values] });
        let payload = self.send(self.client.post(url).json(&body))?;
        payload
            .get("index")
            .and_then(Value::as_u64)
            .ok_or_else(|| CommitError::InvalidResponse("rows/add response missing `index`".into()))
    }

    fn read_rows(&mut self) -> Result<Vec<TableRow>, CommitError> {
        let url = self.table_url(&["rows"])?;
        let payload = self.send(self.client.get(url))?;
        parse_rows(&payload)
    }

    fn write_row(&mut self, index: u64, values: &[Value]) -> Result<(), CommitError> {
        let segment = format!("itemAt(index={index})");
        let url = self.table_url(&["rows", &segment])?;
        let body = json!({ "values": [values] });
        self.send(self.client.patch(url).json(&body))?;
        Ok(())
    }
}
