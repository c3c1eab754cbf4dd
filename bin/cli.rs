//! Shared command-line plumbing for the grtinfo binaries.

use anyhow::Context;
use clap::Args;
use log::{error, LevelFilter};
use simple_logger::SimpleLogger;

use grtinfo::app::error_hint;
use grtinfo::render::render;
use grtinfo::{ReportError, ReportModel, Settings};

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Report window in hours
    #[arg(long, default_value_t = 48, allow_negative_numbers = true)]
    pub hours: i64,

    /// Print the report model as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn init_logging(args: &CommonArgs) -> anyhow::Result<()> {
    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .with_module_level("grtinfo", level)
        .init()
        .context("Failed to initialize logger")
}

pub fn load_settings() -> anyhow::Result<Settings> {
    Settings::new().context("Failed to load configuration (environment or ~/.grtinfo/config.json)")
}

pub fn print_report(report: &ReportModel, args: &CommonArgs) -> anyhow::Result<()> {
    if args.json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{}", json);
    } else {
        print!("{}", render(report));
    }
    Ok(())
}

/// Log a pipeline failure with a hint and turn it into the process error.
pub fn fail(err: ReportError, what: &str) -> anyhow::Error {
    error!("{} failed: {}", what, err);
    if let Some(hint) = error_hint(&err) {
        error!("hint: {}", hint);
    }
    anyhow::Error::new(err).context(format!("{} failed", what))
}
