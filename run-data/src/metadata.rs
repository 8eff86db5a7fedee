use mjd_skim_common::{Channel, DataSetId, DetectorId, Module, RunNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a run was started or stopped by the DAQ.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    Normal,
    /// Continuous running: timestamps are not reset at the run boundary.
    ContinuousNoTsReset,
    #[default]
    Unknown,
}

/// One row of the per-run channel map: the two gain channels reading a
/// detector and the card they are digitised on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMapEntry {
    pub high_channel: Channel,
    pub low_channel: Channel,
    pub crate_number: i32,
    pub slot: i32,
}

/// Per-run metadata blob from the built data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run: RunNumber,
    #[serde(default)]
    pub start_boundary: BoundaryType,
    #[serde(default)]
    pub stop_boundary: BoundaryType,
    pub channel_map: Vec<ChannelMapEntry>,
    pub pulser_channels: Vec<Channel>,
}

impl RunMetadata {
    /// Continuous-run mode holds if either boundary is a continuous one.
    pub fn is_continuous_running(&self) -> bool {
        self.start_boundary == BoundaryType::ContinuousNoTsReset
            || self.stop_boundary == BoundaryType::ContinuousNoTsReset
    }

    pub fn boundary_info_missing(&self) -> bool {
        self.start_boundary == BoundaryType::Unknown
            && self.stop_boundary == BoundaryType::Unknown
    }
}

/// Static per-detector classification and mass, dataset-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub det_id: DetectorId,
    pub name: String,
    pub module: Module,
    pub active_mass_g: f64,
    pub enriched: bool,
    pub natural: bool,
    pub is_bad: bool,
    pub is_veto_only: bool,
}

/// Entry of a pre-built muon timeline, for the dataset with no usable veto
/// stream (DS-4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuonListEntry {
    pub run: RunNumber,
    pub run_start_s: f64,
    pub time_s: f64,
    pub muon_type: u8,
    pub uncertainty_s: f64,
}

/// Dataset-level static data: detector table, cryogen fill times, timing
/// constants, and (for DS-4) the side-loaded muon list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub dataset: DataSetId,
    pub run_time_s: f64,
    pub start_time0_s: f64,
    pub detectors: Vec<DetectorInfo>,
    /// Time-ordered LN fill start times per module. Fills do not overlap
    /// between modules.
    pub ln_fill_times_m1: Vec<f64>,
    pub ln_fill_times_m2: Vec<f64>,
    #[serde(default)]
    pub muon_list: Option<Vec<MuonListEntry>>,
}

/// Per-run channel-selection override (DS-1 and DS-5 only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSelectionEntry {
    pub det_id: DetectorId,
    pub module: Module,
    pub enriched: bool,
    pub natural: bool,
    pub is_bad: bool,
    pub is_veto_only: bool,
}

/// The run-range tables mapping datasets and sub-ranges to run numbers.
/// Maintained externally; the skim only resolves against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetTable {
    pub datasets: Vec<DatasetRuns>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetRuns {
    pub dataset: DataSetId,
    /// Sub-range number to inclusive `[lo, hi]` run ranges.
    pub sub_ranges: BTreeMap<u32, Vec<(RunNumber, RunNumber)>>,
}

impl DatasetTable {
    pub fn dataset_of_run(&self, run: RunNumber) -> Option<DataSetId> {
        self.datasets.iter().find_map(|ds| {
            ds.sub_ranges
                .values()
                .flatten()
                .any(|&(lo, hi)| (lo..=hi).contains(&run))
                .then_some(ds.dataset)
        })
    }

    /// All runs of a sub-range (or of the whole dataset) in ascending order.
    pub fn runs(&self, dataset: DataSetId, sub_range: Option<u32>) -> Option<Vec<RunNumber>> {
        let ds = self.datasets.iter().find(|ds| ds.dataset == dataset)?;
        let mut runs = Vec::new();
        match sub_range {
            Some(sub) => {
                for &(lo, hi) in ds.sub_ranges.get(&sub)? {
                    runs.extend(lo..=hi);
                }
            }
            None => {
                for ranges in ds.sub_ranges.values() {
                    for &(lo, hi) in ranges {
                        runs.extend(lo..=hi);
                    }
                }
            }
        }
        Some(runs)
    }
}

/// Linear correction `value - (m * energy + b)` used by the DCR tiers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinearParams {
    pub m: f64,
    pub b: f64,
}

/// A/E quadratic baseline `a + b*E + c*E^2` subtracted from the current
/// amplitude.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AvseParams {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Which current-amplitude estimator the A/E calibration was derived with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentEstimator {
    Max50ns,
    #[default]
    Max100ns,
    Max200ns,
}

/// One calibration record of the external PSA parameter store, keyed by
/// (dataset, run range, channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsaCalibrationEntry {
    pub dataset: DataSetId,
    pub run_lo: RunNumber,
    pub run_hi: RunNumber,
    pub channel: Channel,
    #[serde(default)]
    pub current_estimator: CurrentEstimator,
    pub avse: AvseParams,
    pub dcr85: LinearParams,
    pub dcr90: LinearParams,
    pub dcr95: LinearParams,
    pub dcr98: LinearParams,
    pub dcr99: LinearParams,
    pub dcr995: LinearParams,
    pub dcr999: LinearParams,
    /// Charge-trapping-corrected 90th percentile; `c` scales the fast
    /// calibrated energy term.
    pub dcr_ctc90_m: f64,
    pub dcr_ctc90_b: f64,
    pub dcr_ctc90_c: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsaCalibrationTable {
    pub entries: Vec<PsaCalibrationEntry>,
}

impl PsaCalibrationTable {
    pub fn lookup(
        &self,
        dataset: DataSetId,
        run: RunNumber,
        channel: Channel,
    ) -> Option<&PsaCalibrationEntry> {
        self.entries.iter().find(|e| {
            e.dataset == dataset && e.channel == channel && (e.run_lo..=e.run_hi).contains(&run)
        })
    }
}
