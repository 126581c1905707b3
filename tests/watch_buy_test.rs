use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

const CHAT: &str = "-1003711269809";

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("sessions")).expect("mkdir sessions");
        Self { tmp }
    }

    fn home(&self) -> PathBuf {
        self.tmp.path().join("home")
    }

    fn sessions(&self) -> PathBuf {
        self.tmp.path().join("sessions")
    }

    fn write_session(&self, name: &str, messages: &[(u64, &str)]) {
        let lines = messages
            .iter()
            .map(|(id, body)| session_line(CHAT, *id, body))
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(self.sessions().join(name), lines).expect("write session");
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("spend-ledger");
        cmd.current_dir(self.tmp.path())
            .env("SPEND_LEDGER_HOME", self.home())
            .env("CLAWDBOT_SESSIONS_DIR", self.sessions())
            .env("SPEND_LEDGER_SINK", "local")
            .env_remove("SPEND_LEDGER_DEDUPE_FILE")
            .env_remove("SPEND_LEDGER_STATE_FILE")
            .env_remove("SPEND_LEDGER_LOGS_DIR")
            .env_remove("SPEND_LEDGER_TABLE_FILE")
            .env_remove("SPEND_LEDGER_CONFIG_PATH");
        cmd
    }

    fn watch(&self) -> Value {
        let out = self
            .cmd()
            .args(["watch-buy", "--conversation", CHAT])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&out).expect("run summary json")
    }
}

fn session_line(chat: &str, message_id: u64, body: &str) -> String {
    let text = format!(
        "[Telegram Lab Purchases id:{chat} +1m 2026-01-30 06:59 UTC] Haowei Zhang (999): @labbot {body} [message_id: {message_id}]"
    );
    serde_json::json!({
        "type": "message",
        "message": {
            "role": "user",
            "timestamp": 1_769_756_340_000_i64,
            "content": [{"type": "text", "text": text}]
        }
    })
    .to_string()
}

fn read_json(path: &Path) -> Value {
    let raw = fs::read_to_string(path).expect("read json file");
    serde_json::from_str(&raw).expect("parse json file")
}

#[test]
fn watch_buy_discovers_then_commits_new_purchase_once() {
    let ws = Workspace::new();
    ws.write_session("a.jsonl", &[(10, "buy gloves $3 DE"), (12, "buy tips $4 DP")]);

    let first = ws.watch();
    assert_eq!(first["state"], "discover");
    assert_eq!(first["last_message_id"], 12);
    assert_eq!(first["appended"].as_array().map(Vec::len), Some(0));
    assert!(!ws.home().join("lab_spend_ledger_table.json").exists());

    ws.write_session("b.jsonl", &[(13, "buy Bunnings nitrile gloves $28.50 DE")]);
    let second = ws.watch();
    assert_eq!(second["ok"], true);
    assert_eq!(second["state"], "steady");
    assert_eq!(second["appended"][0]["message_id"], 13);
    assert_eq!(
        second["appended"][0]["receipt"],
        format!("telegram:{CHAT}:13")
    );

    let table = read_json(&ws.home().join("lab_spend_ledger_table.json"));
    let row = &table["rows"][0];
    assert_eq!(row[5], "Bunnings nitrile gloves");
    assert_eq!(row[6], 28.5);
    assert_eq!(row[8], "Lab consumables");
    assert_eq!(row[9], "DE");
    assert_eq!(row[10], format!("receipt=telegram:{CHAT}:13"));

    let dedupe = read_json(&ws.home().join("lab_spend_ledger_dedupe.json"));
    assert!(dedupe["seen"][format!("telegram:{CHAT}:message:13")].is_object());

    let third = ws.watch();
    assert_eq!(third["appended"].as_array().map(Vec::len), Some(0));
    assert_eq!(third["last_message_id"], 13);

    let audit = fs::read_to_string(ws.home().join("logs/spend-ledger/audit.log")).expect("audit log");
    assert_eq!(audit.lines().count(), 3);
}

#[test]
fn dedupe_check_reports_committed_message() {
    let ws = Workspace::new();
    ws.write_session("a.jsonl", &[(1, "buy gloves $3 DE")]);
    ws.watch();
    ws.write_session("b.jsonl", &[(2, "buy vials $5 LP")]);
    ws.watch();

    ws.cmd()
        .args(["dedupe", "check", "--key", &format!("telegram:{CHAT}:message:2")])
        .assert()
        .code(10)
        .stdout(predicate::str::contains("\"seen\": true"));

    ws.cmd()
        .args(["dedupe", "check", "--key", &format!("telegram:{CHAT}:message:1")])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"seen\": false"));
}

#[test]
fn corrupt_dedupe_state_fails_the_run() {
    let ws = Workspace::new();
    ws.write_session("a.jsonl", &[(1, "buy gloves $3 DE")]);
    fs::create_dir_all(ws.home()).expect("mkdir home");
    fs::write(ws.home().join("lab_spend_ledger_dedupe.json"), "{ nope").expect("corrupt");

    ws.cmd()
        .args(["watch-buy", "--conversation", CHAT])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("E007_STATE_CORRUPT"));

    ws.cmd()
        .args(["--json", "status"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("E007_STATE_CORRUPT"));
}

#[test]
fn init_only_resets_to_newest_without_committing() {
    let ws = Workspace::new();
    ws.write_session("a.jsonl", &[(1, "buy gloves $3 DE")]);
    ws.watch();
    ws.write_session("b.jsonl", &[(5, "buy vials $5 LP")]);

    let out = ws
        .cmd()
        .args(["watch-buy", "--conversation", CHAT, "--init-only"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let summary: Value = serde_json::from_slice(&out).expect("summary");
    assert_eq!(summary["state"], "discover");
    assert_eq!(summary["last_message_id"], 5);
    assert_eq!(summary["appended"].as_array().map(Vec::len), Some(0));
    assert!(!ws.home().join("lab_spend_ledger_table.json").exists());
}
