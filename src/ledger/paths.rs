use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct LedgerPaths {
    pub ledger_home: PathBuf,
    pub dedupe_file: PathBuf,
    pub watermark_file: PathBuf,
    pub logs_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub local_table_file: PathBuf,
    pub config_file: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<LedgerPaths> {
    let home = required_home_dir()?;
    let ledger_home = env_or_default_path("SPEND_LEDGER_HOME", home.join(".clawdbot"));

    let dedupe_file = env_or_default_path(
        "SPEND_LEDGER_DEDUPE_FILE",
        ledger_home.join("lab_spend_ledger_dedupe.json"),
    );
    let watermark_file = env_or_default_path(
        "SPEND_LEDGER_STATE_FILE",
        ledger_home.join("lab_spend_ledger_watch_buy_state.json"),
    );
    let logs_dir = env_or_default_path("SPEND_LEDGER_LOGS_DIR", ledger_home.join("logs/spend-ledger"));
    let sessions_dir = env_or_default_path(
        "CLAWDBOT_SESSIONS_DIR",
        home.join(".clawdbot/agents/main/sessions"),
    );
    let local_table_file = env_or_default_path(
        "SPEND_LEDGER_TABLE_FILE",
        ledger_home.join("lab_spend_ledger_table.json"),
    );
    let config_file = env_or_default_path(
        "SPEND_LEDGER_CONFIG_PATH",
        ledger_home.join("spend_ledger.toml"),
    );

    Ok(LedgerPaths {
        ledger_home,
        dedupe_file,
        watermark_file,
        logs_dir,
        sessions_dir,
        local_table_file,
        config_file,
    })
}

#[cfg(test)]
pub fn test_paths(root: &std::path::Path) -> LedgerPaths {
    LedgerPaths {
        ledger_home: root.join("home"),
        dedupe_file: root.join("home/dedupe.json"),
        watermark_file: root.join("home/watch_state.json"),
        logs_dir: root.join("home/logs"),
        sessions_dir: root.join("sessions"),
        local_table_file: root.join("home/table.json"),
        config_file: root.join("home/spend_ledger.toml"),
    }
}
