use anyhow::Result;

use crate::error::DraftError;
use crate::ledger::config::load_config;
use crate::ledger::draft::{Draft, DraftExtractor, HeuristicExtractor};
use crate::ledger::paths::resolve_paths;

pub const EXIT_EMPTY_INPUT: i32 = 2;

/// `None` for blank input.
pub fn run(text: &str) -> Result<Option<Draft>> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths.config_file)?;
    let extractor = HeuristicExtractor::new(&cfg.extractor)?;
    match extractor.extract(text) {
        Ok(draft) => Ok(Some(draft)),
        Err(DraftError::EmptyInput) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
