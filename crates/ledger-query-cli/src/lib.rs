//! Command surface for the ledger query stack.
//!
//! [`run_cli`] opens and migrates the `SQLite` ledger, resolves the reference
//! instant, and prints each command's answer as pretty JSON on stdout. Query
//! warnings are also re-emitted through `tracing` on stderr.

#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ledger_query_core::{
    balance, parse_explicit_instant, recent, run_query, LedgerStore, NewTransaction,
    TemporalResolver, TransactionKind,
};
use ledger_query_store_sqlite::SqliteLedgerStore;
use serde_json::{json, Value};
use time::OffsetDateTime;

#[derive(Debug, Parser)]
#[command(name = "lq")]
#[command(about = "Ledger query CLI")]
pub struct Cli {
    #[arg(long, env = "LEDGER_QUERY_DB", default_value = "./ledger_query.sqlite3")]
    db: PathBuf,

    /// Reference instant for relative periods (defaults to the current UTC time).
    #[arg(long)]
    now: Option<String>,

    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Records one transaction.
    Append(AppendArgs),
    /// Runs a query described by a loose JSON parameter object.
    Query(QueryArgs),
    /// Prints inflows minus outflows for an owner.
    Balance(OwnerArgs),
    /// Lists the newest transactions of one kind.
    Recent(RecentArgs),
    /// Shows how a period phrase resolves against the reference instant.
    Period(PeriodArgs),
}

#[derive(Debug, Args)]
pub struct AppendArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    kind: KindArg,
    #[arg(long)]
    amount: f64,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    description: Option<String>,
    /// Explicit timestamp or period phrase; defaults to the reference instant.
    #[arg(long)]
    at: Option<String>,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[arg(long)]
    owner: String,
    #[arg(long, default_value = "{}")]
    params: String,
}

#[derive(Debug, Args)]
pub struct OwnerArgs {
    #[arg(long)]
    owner: String,
}

#[derive(Debug, Args)]
pub struct RecentArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    kind: KindArg,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct PeriodArgs {
    text: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Inflow,
    Outflow,
}

impl From<KindArg> for TransactionKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Inflow => TransactionKind::Inflow,
            KindArg::Outflow => TransactionKind::Outflow,
        }
    }
}

/// Installs the stderr log subscriber: `debug` when verbose, `info` otherwise.
pub fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Executes the parsed command and prints its JSON answer.
///
/// # Errors
/// Returns an error when the reference instant is malformed, the store cannot
/// be opened or migrated, or the command itself fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    let now = parse_reference_instant(cli.now.as_deref())?;
    let mut store = SqliteLedgerStore::open(&cli.db)?;
    store.migrate()?;

    let output = run_command(cli.command, &mut store, now)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Executes one command against an existing store handle.
///
/// # Errors
/// Returns an error for invalid arguments and for store failures.
pub fn run_command<S: LedgerStore>(
    command: Command,
    store: &mut S,
    now: OffsetDateTime,
) -> Result<Value> {
    let resolver = TemporalResolver::new();

    match command {
        Command::Append(args) => {
            let entry = NewTransaction {
                owner_id: args.owner,
                kind: args.kind.into(),
                amount: args.amount,
                category: args.category,
                description: args.description,
                timestamp: resolver.resolve_instant(args.at.as_deref(), now),
            };
            let record = store.append(&entry)?;
            tracing::info!(id = record.id, owner_id = %record.owner_id, "transaction recorded");
            Ok(serde_json::to_value(record)?)
        }
        Command::Query(args) => {
            let payload = parse_params_json(&args.params)?;
            let outcome = run_query(&*store, &args.owner, payload, &resolver, now)?;
            for warning in &outcome.warnings {
                tracing::warn!(code = ?warning.code, "{}", warning.message);
            }
            Ok(serde_json::to_value(outcome)?)
        }
        Command::Balance(args) => {
            let total = balance(&*store, &args.owner)?;
            Ok(json!({ "owner_id": args.owner, "balance": total }))
        }
        Command::Recent(args) => {
            let rows = recent(&*store, &args.owner, args.kind.into(), args.limit)?;
            Ok(json!({ "rows": rows }))
        }
        Command::Period(args) => {
            let interval = resolver.resolve_period(&args.text, now);
            if interval.is_none() {
                tracing::warn!(text = %args.text, "period phrase not recognised");
            }
            Ok(json!({ "text": args.text, "interval": interval }))
        }
    }
}

fn parse_reference_instant(raw: Option<&str>) -> Result<OffsetDateTime> {
    match raw {
        Some(value) => {
            parse_explicit_instant(value).ok_or_else(|| anyhow!("invalid --now timestamp: {value}"))
        }
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn parse_params_json(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("params must be valid JSON: {raw}"))
}
