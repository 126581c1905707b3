pub mod audit;
pub mod config;
pub mod dedupe;
pub mod draft;
pub mod local_table;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod record;
pub mod sink;
pub mod transcript;
pub mod util;
pub mod watermark;
