use std::path::PathBuf;
use thiserror::Error;

/// Local state (dedup map, watermark map) could not be read or written.
///
/// A file that exists but does not parse is never treated as empty: resetting
/// dedup state silently would re-post rows that were already committed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("state file {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Remote ledger rejected or never acknowledged a commit.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("ledger transport failed: {0}")]
    Transport(String),
    #[error("ledger auth failed ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("ledger table not found: {0}")]
    MissingTable(String),
    #[error("ledger returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("ledger response invalid: {0}")]
    InvalidResponse(String),
    #[error("local ledger table io failed: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DraftError {
    #[error("purchase text is empty")]
    EmptyInput,
    #[error("extractor output invalid: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorCode {
    E001Locked,
    E005ConfigMissing,
    E007StateCorrupt,
    E008CommitFailed,
    E009DraftFailed,
}

impl LedgerErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E005ConfigMissing => "E005_CONFIG_MISSING",
            Self::E007StateCorrupt => "E007_STATE_CORRUPT",
            Self::E008CommitFailed => "E008_COMMIT_FAILED",
            Self::E009DraftFailed => "E009_DRAFT_FAILED",
        }
    }
}
