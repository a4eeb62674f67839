use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = ledger_query_cli::Cli::parse();
    ledger_query_cli::init_tracing(cli.verbose());
    ledger_query_cli::run_cli(cli)
}
