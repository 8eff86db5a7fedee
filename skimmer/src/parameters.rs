use mjd_skim_common::{DataSetId, RunNumber};
use std::path::PathBuf;

pub(crate) const DEFAULT_ENERGY_THRESHOLD_KEV: f64 = 5.0;
pub(crate) const LOW_GAIN_THRESHOLD_KEV: f64 = 10.0;
pub(crate) const MINIMAL_THRESHOLD_KEV: f64 = 200.0;

/// Mode flags and thresholds of one skim job.
#[derive(Debug, Clone)]
pub(crate) struct SkimConfig {
    /// Minimal skim: 200 keV threshold, wide energy/PSA fields dropped.
    pub minimal: bool,
    /// Augmented low-energy skim: extra waveform and pulser-timing fields.
    pub low_energy: bool,
    /// Enable low-gain swapping (gain reconciliation). Off by default until
    /// the saturated-waveform tag is trusted.
    pub lg_skip: bool,
    /// High-gain energy threshold in normal mode.
    pub energy_threshold_kev: f64,
}

impl Default for SkimConfig {
    fn default() -> Self {
        Self {
            minimal: false,
            low_energy: false,
            lg_skip: false,
            energy_threshold_kev: DEFAULT_ENERGY_THRESHOLD_KEV,
        }
    }
}

/// How the input runs were selected on the command line.
#[derive(Debug, Clone)]
pub(crate) enum RunSelection {
    SingleRun { run: RunNumber },
    File { path: PathBuf, run: RunNumber },
    SubRange { dataset: DataSetId, sub_range: u32 },
}
