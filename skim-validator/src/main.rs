//! Cross-checks a skim file against the built data it was derived from:
//! every skim record is replayed against the source event it points at and
//! the shared fields are compared.
#![recursion_limit = "256"]

mod file_name;
mod replay;

use crate::{file_name::SkimFileName, replay::validate};
use anyhow::{anyhow, Result};
use clap::Parser;
use mjd_run_data::DataDirectory;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// The skim file to check
    skim_file: PathBuf,

    /// Root of the built-data directory the skim was produced from
    #[clap(long, env = "MJD_DATA_DIR")]
    data_dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let name = cli
        .skim_file
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(SkimFileName::parse)
        .ok_or_else(|| anyhow!("not a skim file name: {}", cli.skim_file.display()))?;
    info!("validating {name}");

    let dir = DataDirectory::new(&cli.data_dir);
    let report = validate(&dir, &cli.skim_file)?;
    info!(
        "checked {} records over {} run(s): {} field mismatches",
        report.records, report.runs, report.mismatches
    );
    if report.mismatches > 0 {
        error!("skim file does not match the built data");
        std::process::exit(1);
    }
    Ok(())
}
