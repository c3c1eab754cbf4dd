use chrono::Utc;
use clap::Parser;
use jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod cli;

use grtinfo::App;

/// Stake, allocations, rewards and delegation activity of an indexer.
#[derive(Parser, Debug)]
#[command(name = "indexerinfo", version)]
struct Cli {
    /// Indexer address or ENS name (e.g. `ellipfra` or `ellipfra-indexer.eth`)
    indexer: String,

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
        .indexer_report(&args.indexer, args.common.hours, Utc::now())
        .await
        .map_err(|e| cli::fail(e, "Indexer report"))?;

    cli::print_report(&report, &args.common)
}
