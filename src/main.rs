use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use lumi_web::{LumiWeb, Options};

/// Luminosity bookkeeping and web report for the run registry.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Run-registry configuration file
    #[arg(short, long, value_name = "CFG")]
    cfg: PathBuf,

    /// Read per-lumisection luminosity from a CSV file instead of the database
    #[arg(short, long, value_name = "CSV", conflicts_with = "resetlumi")]
    lumicsv: Option<PathBuf>,

    /// Ignore the luminosity cache and query every run again
    #[arg(short, long)]
    resetlumi: bool,

    /// Use the [Global] dataset and group
    #[arg(short, long)]
    global: bool,

    /// Only report runs inside Runmin..Runmax
    #[arg(short, long)]
    keeprange: bool,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();
    env::set_var("POLARS_FMT_TABLE_ROUNDED_CORNERS", "1");
    env::set_var("POLARS_FMT_MAX_ROWS", "20");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let options = Options {
        cfg: cli.cfg,
        lumi_csv: cli.lumicsv,
        reset_lumi: cli.resetlumi,
        global: cli.global,
        keep_range: cli.keeprange,
    };
    let web = LumiWeb::new(options.clone())
        .with_context(|| format!("cannot load {}", options.cfg.display()))?;
    let summary = web.run()?;
    tracing::info!(
        runs = summary.per_run.len(),
        out_dir = %web.config().out_dir.display(),
        "done"
    );
    Ok(())
}
