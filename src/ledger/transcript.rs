//! Session transcript scanning.
//!
//! Session logs are JSONL files; group chat messages injected by the bot carry
//! a header like `[Telegram Lab id:-1003711269809 ...] Alice (42): ...` and a
//! trailing `[message_id: N]` marker. Only messages carrying both markers for
//! the target conversation and a purchase-intent keyword become envelopes.
//!
//! Known limitation: candidate files are picked by probing only the last
//! `tail_scan_bytes` of each file for the conversation id. A file whose
//! matching messages all sit before that tail is skipped unless no file
//! matches at all, in which case every file is scanned.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

static MESSAGE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[message_id:\s*(\d+)\]").expect("hard-coded regular expression to be valid")
});
static AUTHOR_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\]\s*([^\[]+?)\s*\((\d+)\):\s*").expect("hard-coded regular expression to be valid")
});
static LEADING_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@\w+\s+").expect("hard-coded regular expression to be valid"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEnvelope {
    pub conversation_id: String,
    pub message_id: u64,
    pub author_id: String,
    pub author_name: String,
    pub raw_text: String,
    pub timestamp_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    message_id: u64,
    author_id: String,
    author_name: String,
    raw_text: String,
}

/// `id:<conversation>` not followed by another id character, so `-100` does
/// not match inside `id:-1001`.
fn has_conversation_marker(text: &str, conversation_id: &str) -> bool {
    let marker = format!("id:{conversation_id}");
    text.match_indices(&marker).any(|(at, _)| {
        text[at + marker.len()..]
            .chars()
            .next()
            .is_none_or(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    })
}

fn parse_candidate(text: &str, conversation_id: &str, keywords: &[String]) -> Option<Candidate> {
    if !has_conversation_marker(text, conversation_id) {
        return None;
    }

    let message_id = MESSAGE_ID.captures(text)?.get(1)?.as_str().parse::<u64>().ok()?;

    // Nearest header to the content wins.
    let (author_name, author_id) = AUTHOR_HEADER
        .captures_iter(text)
        .last()
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
        .unwrap_or_default();

    let before_marker = text.split("[message_id:").next().unwrap_or_default();
    let content = match before_marker.rsplit_once(':') {
        Some((_, tail)) => tail,
        None => before_marker,
    };
    let raw_text = LEADING_MENTION.replace(content.trim(), "").into_owned();

    let lower = raw_text.to_lowercase();
    if !keywords.iter().any(|k| lower.contains(k.as_str())) {
        return None;
    }

    Some(Candidate {
        message_id,
        author_id,
        author_name,
        raw_text,
    })
}

/// User message text and timestamp from one transcript line.
fn user_message(line: &str) -> Option<(String, i64)> {
    let entry: Value = serde_json::from_str(line).ok()?;
    if entry.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    let message = entry.get("message")?;
    if message.get("role").and_then(Value::as_str) != Some("user") {
        return None;
    }

    let text = match message.get("content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .map(|p| p.get("text").and_then(Value::as_str).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };

    let timestamp = match message.get("timestamp") {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    };
    Some((text, timestamp))
}

fn tail_contains(path: &Path, needle: &[u8], tail_bytes: u64) -> Result<bool> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let len = file.metadata()?.len();
    if len > tail_bytes {
        file.seek(SeekFrom::Start(len - tail_bytes))?;
    }
    let mut buf = Vec::with_capacity(len.min(tail_bytes) as usize);
    file.read_to_end(&mut buf)?;
    Ok(!needle.is_empty() && buf.windows(needle.len()).any(|w| w == needle))
}

fn modified_epoch_secs(path: &Path) -> u64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct TranscriptScanner {
    sessions_dir: PathBuf,
    conversation_id: String,
    intent_keywords: Vec<String>,
    tail_scan_bytes: u64,
}

impl TranscriptScanner {
    pub fn new(
        sessions_dir: &Path,
        conversation_id: &str,
        intent_keywords: &[String],
        tail_scan_bytes: u64,
    ) -> Self {
        Self {
            sessions_dir: sessions_dir.to_path_buf(),
            conversation_id: conversation_id.trim().to_string(),
            intent_keywords: intent_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            tail_scan_bytes,
        }
    }

    /// Session files likely to hold the conversation, oldest first.
    /// A missing sessions dir yields no files.
    pub fn session_files(&self) -> Result<Vec<PathBuf>> {
        if !self.sessions_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut all = Vec::new();
        let entries = fs::read_dir(&self.sessions_dir)
            .with_context(|| format!("failed to read {}", self.sessions_dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                all.push(path);
            }
        }

        let needle = self.conversation_id.as_bytes();
        let mut matched = all
            .iter()
            .filter(|p| {
                tail_contains(p, needle, self.tail_scan_bytes).unwrap_or_else(|err| {
                    tracing::debug!(path = %p.display(), error = %err, "tail probe failed");
                    false
                })
            })
            .cloned()
            .collect::<Vec<_>>();

        if matched.is_empty() {
            matched = all;
        }

        matched.sort_by(|a, b| {
            modified_epoch_secs(a)
                .cmp(&modified_epoch_secs(b))
                .then_with(|| a.cmp(b))
        });
        Ok(matched)
    }

    /// Lazy walk over candidate envelopes in file order. Calling it again
    /// starts a fresh pass.
    pub fn scan(&self) -> Result<Envelopes<'_>> {
        Ok(Envelopes {
            scanner: self,
            pending: self.session_files()?.into(),
            current: None,
            line: Vec::new(),
        })
    }

    /// All candidate envelopes, ascending by message id. When the same id
    /// shows up in more than one session file the first occurrence is kept.
    pub fn scan_ordered(&self) -> Result<Vec<MessageEnvelope>> {
        let mut by_id = BTreeMap::new();
        for envelope in self.scan()? {
            by_id.entry(envelope.message_id).or_insert(envelope);
        }
        Ok(by_id.into_values().collect())
    }

    fn envelope_from_line(&self, line: &str) -> Option<MessageEnvelope> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (text, timestamp_millis) = user_message(trimmed)?;
        let candidate = parse_candidate(&text, &self.conversation_id, &self.intent_keywords)?;
        Some(MessageEnvelope {
            conversation_id: self.conversation_id.clone(),
            message_id: candidate.message_id,
            author_id: candidate.author_id,
            author_name: candidate.author_name,
            raw_text: candidate.raw_text,
            timestamp_millis,
        })
    }
}

pub struct Envelopes<'a> {
    scanner: &'a TranscriptScanner,
    pending: VecDeque<PathBuf>,
    current: Option<BufReader<File>>,
    line: Vec<u8>,
}

impl Iterator for Envelopes<'_> {
    type Item = MessageEnvelope;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                let path = self.pending.pop_front()?;
                match File::open(&path) {
                    Ok(file) => self.current = Some(BufReader::new(file)),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping unreadable session file");
                        continue;
                    }
                }
            }

            let reader = self.current.as_mut()?;
            self.line.clear();
            match reader.read_until(b'\n', &mut self.line) {
                Ok(0) => self.current = None,
                Ok(_) => match std::str::from_utf8(&self.line) {
                    Ok(line) => {
                        if let Some(envelope) = self.scanner.envelope_from_line(line) {
                            return Some(envelope);
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping session line that is not utf-8");
                    }
                },
                Err(err) => {
                    tracing::warn!(error = %err, "stopping read of session file after io error");
                    self.current = None;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn user_line(text: &str, timestamp_ms: i64) -> String {
    serde_json::json!({
        "type": "message",
        "message": {
            "role": "user",
            "timestamp": timestamp_ms,
            "content": [{"type": "text", "text": text}],
        }
    })
    .to_string()
}

#[cfg(test)]
pub(crate) fn group_text(
    conversation_id: &str,
    author: &str,
    author_id: u64,
    body: &str,
    message_id: u64,
) -> String {
    format!(
        "[Telegram Lab Purchases id:{conversation_id} +1m 2026-01-30 06:59 UTC] {author} ({author_id}): {body} [message_id: {message_id}]"
    )
}
