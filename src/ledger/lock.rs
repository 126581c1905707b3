use crate::error::LedgerErrorCode;
use crate::ledger::paths::LedgerPaths;
use crate::ledger::util::now_utc_iso;
use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct LockPayload<'a> {
    pid: u32,
    conversation_id: &'a str,
    start_time: String,
}

/// Held for the duration of one watch run; the OS lock drops with the file.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl RunLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sanitize(conversation_id: &str) -> String {
    conversation_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn lock_path(paths: &LedgerPaths, conversation_id: &str) -> PathBuf {
    paths
        .ledger_home
        .join("locks")
        .join(format!("watch-buy-{}.lock", sanitize(conversation_id)))
}

pub fn acquire_run_lock(paths: &LedgerPaths, conversation_id: &str) -> Result<RunLock> {
    let path = lock_path(paths, conversation_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    if file.try_lock_exclusive().is_err() {
        return Err(anyhow!(
            "{}: another watch run holds {}",
            LedgerErrorCode::E001Locked.as_str(),
            path.display()
        ));
    }

    let payload = LockPayload {
        pid: std::process::id(),
        conversation_id,
        start_time: now_utc_iso(),
    };
    file.set_len(0)?;
    file.write_all(serde_json::to_string(&payload)?.as_bytes())?;
    file.sync_all()?;

    Ok(RunLock { path, _file: file })
}
