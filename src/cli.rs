use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Read;

use crate::commands::{self, CommandReport};
use crate::ledger::dedupe::EXIT_ALREADY_SEEN;

#[derive(Parser, Debug)]
#[command(
    name = "spend-ledger",
    version,
    about = "Turn purchase messages in chat transcripts into ledger rows, exactly once"
)]
pub struct Cli {
    /// Render reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Commit new purchase messages for one conversation
    WatchBuy {
        /// Conversation (chat) id, e.g. -1003711269809
        #[arg(long, allow_hyphen_values = true)]
        conversation: String,
        /// Cap on rows committed this run
        #[arg(long)]
        max: Option<u64>,
        /// Reset the watermark to the newest visible message and commit nothing
        #[arg(long)]
        init_only: bool,
    },
    /// Inspect or update the dedup store
    Dedupe {
        #[command(subcommand)]
        action: DedupeAction,
    },
    /// Parse purchase text from stdin into a draft
    Parse,
    /// Commit one hand-entered row
    LogSpend(LogSpendArgs),
    /// Search recent ledger rows for possible duplicates
    FindRows {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        price: Option<f64>,
        #[arg(long, default_value_t = 200)]
        top: usize,
    },
    /// List tables in the configured workbook
    ListTables,
    /// Show resolved paths, config, and state health
    Status,
}

#[derive(Subcommand, Debug)]
enum DedupeAction {
    /// Exit 10 when the key is already recorded
    Check {
        #[arg(long, allow_hyphen_values = true)]
        key: String,
    },
    Mark {
        #[arg(long, allow_hyphen_values = true)]
        key: String,
        /// JSON object stored alongside the key
        #[arg(long)]
        meta: Option<String>,
    },
}

#[derive(Args, Debug)]
struct LogSpendArgs {
    #[arg(long)]
    ts_iso: String,
    #[arg(long, allow_hyphen_values = true)]
    chat_id: String,
    #[arg(long)]
    message_id: String,
    #[arg(long)]
    author_id: String,
    #[arg(long)]
    author_name: String,
    #[arg(long)]
    item: String,
    #[arg(long)]
    price: f64,
    #[arg(long)]
    currency: String,
    #[arg(long)]
    category: String,
    #[arg(long)]
    project_code: String,
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    notes: String,
    #[arg(long, allow_hyphen_values = true)]
    raw_text: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &CommandReport, json: bool) -> Result<i32> {
    if json {
        print_json(report)?;
    } else {
        println!(
            "{}: {}",
            report.command,
            if report.ok { "ok" } else { "failed" }
        );
        for detail in &report.details {
            println!("  {detail}");
        }
        for issue in &report.issues {
            println!("  issue: {issue}");
        }
    }
    Ok(if report.ok { 0 } else { 1 })
}

/// Parse arguments, dispatch, and return the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Command::WatchBuy {
            conversation,
            max,
            init_only,
        } => {
            let summary = commands::watch_buy::run(&commands::watch_buy::WatchBuyOptions {
                conversation_id: conversation,
                max_per_run: max,
                init_only,
            })?;
            print_json(&summary)?;
            Ok(if summary.ok { 0 } else { 1 })
        }
        Command::Dedupe {
            action: DedupeAction::Check { key },
        } => {
            let check = commands::dedupe::check(&key)?;
            print_json(&check)?;
            Ok(if check.seen { EXIT_ALREADY_SEEN } else { 0 })
        }
        Command::Dedupe {
            action: DedupeAction::Mark { key, meta },
        } => print_report(&commands::dedupe::mark(&key, meta.as_deref())?, cli.json),
        Command::Parse => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read purchase text from stdin")?;
            match commands::parse::run(&text)? {
                Some(draft) => {
                    print_json(&draft)?;
                    Ok(0)
                }
                None => {
                    println!("{{}}");
                    Ok(commands::parse::EXIT_EMPTY_INPUT)
                }
            }
        }
        Command::LogSpend(args) => {
            let report = commands::log_spend::run(commands::log_spend::LogSpendOptions {
                ts_iso: args.ts_iso,
                chat_id: args.chat_id,
                message_id: args.message_id,
                author_id: args.author_id,
                author_name: args.author_name,
                item: args.item,
                price: args.price,
                currency: args.currency,
                category: args.category,
                project_code: args.project_code,
                notes: args.notes,
                raw_text: args.raw_text,
            })?;
            print_report(&report, cli.json)
        }
        Command::FindRows { q, price, top } => {
            let result = commands::find_rows::run(&commands::find_rows::FindRowsOptions {
                query: q,
                price,
                top,
            })?;
            print_json(&result)?;
            Ok(0)
        }
        Command::ListTables => print_report(&commands::list_tables::run()?, cli.json),
        Command::Status => print_report(&commands::status::run()?, cli.json),
    }
}
