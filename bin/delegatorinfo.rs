use chrono::Utc;
use clap::Parser;
use jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod cli;

use grtinfo::App;

/// Delegation positions, accumulated profit and thawing tokens of a delegator.
#[derive(Parser, Debug)]
#[command(name = "delegatorinfo", version)]
struct Cli {
    /// Delegator address or ENS name
    delegator: String,

    #[command(flatten)]
    common: cli::CommonArgs,
}

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    cli::init_logging(&args.common)?;

    let settings = cli::load_settings()?;
    let app = App::from_settings(settings).map_err(|e| cli::fail(e, "Client setup"))?;

    let report = app
        .delegator_report(&args.delegator, args.common.hours, Utc::now())
        .await
        .map_err(|e| cli::fail(e, "Delegator report"))?;

    cli::print_report(&report, &args.common)
}
