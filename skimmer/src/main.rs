//! Skims built detector data into a compact JSON-lines analysis file,
//! applying energy thresholds, detector selection, muon-veto tagging and
//! pulse-shape corrections along the way.
#![recursion_limit = "256"]

mod assembler;
mod detectors;
mod error;
mod hits;
mod muon;
mod output;
mod parameters;
mod pipeline;
mod psa;
mod run_context;
#[cfg(test)]
mod testutil;

use crate::{
    detectors::DetectorMeta,
    error::SkimError,
    muon::MuonTimeline,
    output::{output_file_name, SkimWriter},
    parameters::{RunSelection, SkimConfig, DEFAULT_ENERGY_THRESHOLD_KEV},
    pipeline::{run_skim, EventSource},
    psa::CalibrationStore,
};
use anyhow::{anyhow, Result};
use clap::Parser;
use mjd_run_data::{DataDirectory, DatasetInfo, RunDataError};
use mjd_skim_common::{DataSetId, RunNumber};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Skim a single run
    #[clap(long, conflicts_with_all = ["dataset", "sub_range"])]
    run: Option<RunNumber>,

    /// Explicit input file for --run, instead of the data directory's one
    #[clap(long, requires = "run")]
    file: Option<PathBuf>,

    /// Skim one sub-range of a dataset (with --sub-range)
    #[clap(long, requires = "sub_range")]
    dataset: Option<DataSetId>,

    /// Sub-range number within the dataset
    #[clap(long)]
    sub_range: Option<u32>,

    /// Root of the built-data directory
    #[clap(long, env = "MJD_DATA_DIR")]
    data_dir: PathBuf,

    /// Directory the skim file is written into
    #[clap(long, default_value = ".")]
    output_dir: PathBuf,

    /// Minimal skim: 200 keV threshold and a reduced field set
    #[clap(long)]
    minimal: bool,

    /// Augmented low-energy skim with waveform and pulser-timing fields
    #[clap(long)]
    low_energy: bool,

    /// Swap in the low-gain hit where the high-gain one is saturated
    #[clap(long)]
    lg_skip: bool,

    /// High-gain energy threshold in keV (normal mode only)
    #[clap(long, default_value_t = DEFAULT_ENERGY_THRESHOLD_KEV)]
    energy_threshold: f64,
}

impl Cli {
    fn selection(&self) -> Result<RunSelection> {
        match (self.run, &self.file, self.dataset, self.sub_range) {
            (Some(run), Some(path), None, None) => Ok(RunSelection::File {
                path: path.clone(),
                run,
            }),
            (Some(run), None, None, None) => Ok(RunSelection::SingleRun { run }),
            (None, None, Some(dataset), Some(sub_range)) => Ok(RunSelection::SubRange {
                dataset,
                sub_range,
            }),
            _ => Err(anyhow!(
                "select the input with --run [--file] or with --dataset and --sub-range"
            )),
        }
    }

    fn config(&self) -> SkimConfig {
        SkimConfig {
            minimal: self.minimal,
            low_energy: self.low_energy,
            lg_skip: self.lg_skip,
            energy_threshold_kev: self.energy_threshold,
        }
    }
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
    debug!("Args: {cli:?}");
    let selection = cli.selection()?;
    let config = cli.config();

    if !cli.output_dir.is_dir() {
        return Err(SkimError::NotADirectory(cli.output_dir.clone()).into());
    }

    let dir = DataDirectory::new(&cli.data_dir);
    let table = dir.dataset_table()?;

    let (dataset, runs) = match &selection {
        RunSelection::SingleRun { run } | RunSelection::File { run, .. } => {
            let dataset = table
                .dataset_of_run(*run)
                .ok_or(RunDataError::UnknownRun(*run))?;
            (dataset, vec![*run])
        }
        RunSelection::SubRange { dataset, sub_range } => {
            let runs = table
                .runs(*dataset, Some(*sub_range))
                .ok_or(RunDataError::UnknownSubRange {
                    dataset: *dataset,
                    sub_range: *sub_range,
                })?;
            (*dataset, runs)
        }
    };
    info!(
        "skimming DS-{dataset}: {} run(s), thresholds {}",
        runs.len(),
        if config.minimal {
            "minimal".to_string()
        } else {
            format!("{} keV", config.energy_threshold_kev)
        }
    );

    let sources = event_sources(&dir, &selection, &runs);
    if sources.is_empty() {
        return Err(anyhow!("no input event files found for the selection"));
    }

    // Simulated data carries no veto/timing information; the first record of
    // the job decides.
    let simulated = peek_simulated(&dir, &sources)?;
    if simulated {
        info!("input is simulated: skipping veto, detector-status and timing cuts");
    }

    let info = dir.dataset_info(dataset)?;
    let mut meta = DetectorMeta::new(&info);
    meta.load_overrides(&dir, &runs)?;

    let mut timeline = build_timeline(&dir, &info, &runs, simulated)?;
    if !simulated && timeline.is_empty() {
        return Err(SkimError::EmptyMuonTimeline.into());
    }
    if !simulated {
        info!("muon timeline has {} entries", timeline.len());
    }

    let psa = CalibrationStore::new(dataset, dir.psa_calibration()?);

    let out_path = cli.output_dir.join(output_file_name(dataset, &selection, &config));
    let mut writer = SkimWriter::create(&out_path)?;
    run_skim(
        &dir,
        &sources,
        &meta,
        &info,
        &mut timeline,
        &psa,
        &config,
        simulated,
        &mut writer,
    )?;
    writer.finish()?;
    Ok(())
}

/// Input files of the job, one per run; a file override replaces the data
/// directory's file for its run. Runs with no event file are skipped.
fn event_sources(
    dir: &DataDirectory,
    selection: &RunSelection,
    runs: &[RunNumber],
) -> Vec<EventSource> {
    if let RunSelection::File { path, run } = selection {
        return vec![EventSource {
            run: *run,
            path: path.clone(),
        }];
    }
    runs.iter()
        .filter_map(|&run| {
            let path = dir.event_path(run);
            if path.exists() {
                Some(EventSource { run, path })
            } else {
                warn!("no event file for run {run}, skipping");
                None
            }
        })
        .collect()
}

fn peek_simulated(dir: &DataDirectory, sources: &[EventSource]) -> Result<bool> {
    for source in sources {
        if let Some(record) = dir.event_records_from(&source.path)?.next() {
            return Ok(record?.is_simulated());
        }
    }
    Ok(false)
}

/// The muon timeline for the job: side-loaded for datasets without a usable
/// veto stream, otherwise built from the runs' veto files in run order.
fn build_timeline(
    dir: &DataDirectory,
    info: &DatasetInfo,
    runs: &[RunNumber],
    simulated: bool,
) -> Result<MuonTimeline> {
    if simulated {
        return Ok(MuonTimeline::from_muon_list(&[]));
    }
    if let Some(list) = &info.muon_list {
        info!("using the side-loaded muon list ({} entries)", list.len());
        return Ok(MuonTimeline::from_muon_list(list));
    }
    let mut readers = Vec::new();
    for &run in runs {
        if dir.has_veto_file(run) {
            readers.push(dir.veto_events(run)?);
        } else {
            warn!("no veto file for run {run}");
        }
    }
    Ok(MuonTimeline::from_veto_events(
        readers.into_iter().flatten(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_requires_exactly_one_input_mode() {
        let cli = Cli::parse_from(["mjd-skimmer", "--data-dir", "/data", "--run", "9422"]);
        assert!(matches!(
            cli.selection(),
            Ok(RunSelection::SingleRun { run: 9422 })
        ));

        let cli = Cli::parse_from([
            "mjd-skimmer",
            "--data-dir",
            "/data",
            "--dataset",
            "1",
            "--sub-range",
            "33",
        ]);
        assert!(matches!(
            cli.selection(),
            Ok(RunSelection::SubRange {
                dataset: 1,
                sub_range: 33
            })
        ));

        let cli = Cli::parse_from(["mjd-skimmer", "--data-dir", "/data"]);
        assert!(cli.selection().is_err());
    }

    #[test]
    fn file_override_is_tied_to_its_run() {
        let cli = Cli::parse_from([
            "mjd-skimmer",
            "--data-dir",
            "/data",
            "--run",
            "9422",
            "--file",
            "/tmp/events.jsonl",
        ]);
        assert!(matches!(
            cli.selection(),
            Ok(RunSelection::File { run: 9422, .. })
        ));
        // --file without --run is rejected by the parser itself.
        assert!(Cli::try_parse_from([
            "mjd-skimmer",
            "--data-dir",
            "/data",
            "--file",
            "/tmp/events.jsonl",
        ])
        .is_err());
    }

    #[test]
    fn mode_flags_map_onto_the_config() {
        let cli = Cli::parse_from([
            "mjd-skimmer",
            "--data-dir",
            "/data",
            "--run",
            "9422",
            "--minimal",
            "--energy-threshold",
            "2.0",
        ]);
        let config = cli.config();
        assert!(config.minimal);
        assert!(!config.low_energy);
        assert_eq!(config.energy_threshold_kev, 2.0);
    }
}
