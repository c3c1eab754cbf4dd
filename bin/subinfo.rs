use chrono::Utc;
use clap::Parser;
use jemallocator::Jemalloc;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod cli;

use grtinfo::App;

/// Allocations, curation signal and version upgrades of a subgraph deployment.
#[derive(Parser, Debug)]
#[command(name = "subinfo", version)]
struct Cli {
    /// Deployment IPFS hash (Qm...)
    ipfs_hash: String,

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
        .subgraph_report(&args.ipfs_hash, args.common.hours, Utc::now())
        .await
        .map_err(|e| cli::fail(e, "Subgraph report"))?;

    cli::print_report(&report, &args.common)
}
