//! The persisted skim record and its buffered JSON-lines writer. Output is
//! flushed at every run boundary as a progress checkpoint.

use crate::{
    error::{SkimError, SkimResult},
    muon::MuonType,
    parameters::{RunSelection, SkimConfig},
};
use mjd_skim_common::{Channel, DataSetId, DetectorId, RunNumber, WfCleaningBits};
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

/// Per-hit fields present only outside minimal mode.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct WideFields {
    pub trap_e_cal: Vec<f64>,
    pub onboard_energy: Vec<f64>,
    pub kvorr_t: Vec<f64>,
    pub trap_e_tail_min: Vec<f64>,
    pub dcr85: Vec<f64>,
    pub dcr98: Vec<f64>,
    pub dcr995: Vec<f64>,
    pub dcr999: Vec<f64>,
}

/// Augmented fields of the low-energy skim.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct LowEnergyFields {
    pub trap_enf: Vec<f64>,
    pub trap_enm: Vec<f64>,
    pub trap_enm_sample: Vec<i32>,
    pub blrwf_fmr50: Vec<f64>,
    pub raw_wf_bl_slope: Vec<f64>,
    pub raw_wf_bl_chi2: Vec<f64>,
    pub d2wf_5to30_mhz_power: Vec<f64>,
    pub d2wf_30to35_mhz_power: Vec<f64>,
    pub d2wf_0to50_mhz_power: Vec<f64>,
    pub thresh_kev: Vec<f64>,
    pub thresh_sigma: Vec<f64>,
    pub dt_pulser_global: f64,
    pub dt_pulser_card: Vec<f64>,
}

/// Muon-veto variables, absent for simulated input.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MuonFields {
    pub dtmu_s: Vec<f64>,
    pub mu_type: MuonType,
    pub mu_t_unc: f64,
    pub mu_veto: bool,
    pub is_ln_fill1: bool,
    pub is_ln_fill2: bool,
}

/// One skim output record; all per-hit `Vec` fields are co-indexed with
/// `i_hit`.
#[derive(Debug, Clone, Default, Serialize)]
pub(crate) struct SkimRecord {
    pub skim_revision: String,
    pub gat_revision: u32,
    pub run: RunNumber,
    pub i_event: i64,
    pub i_hit: Vec<usize>,

    // Identity
    pub channel: Vec<Channel>,
    pub position: Vec<i32>,
    pub detector: Vec<i32>,
    pub cryostat: Vec<i32>,
    pub gain: Vec<u8>,
    pub mage_id: Vec<i32>,
    pub det_id: Vec<DetectorId>,
    pub det_name: Vec<String>,
    pub is_enr: Vec<bool>,
    pub is_nat: Vec<bool>,
    pub is_good: Vec<bool>,
    pub c0_channels: Vec<Channel>,

    // Time
    pub start_time_s: f64,
    pub start_time0_s: f64,
    pub run_time_s: f64,
    pub stop_time_s: f64,
    pub start_clock_time_s: f64,
    pub clock_time_s: f64,
    pub local_time_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_time_s: Option<f64>,
    pub t_offset_ns: Vec<f64>,
    pub trigger_trap_t0: Vec<f64>,

    // Energy
    pub trap_enf_cal: Vec<f64>,
    pub trap_enm_cal: Vec<f64>,
    pub sum_e_hl: f64,
    pub sum_e_h: f64,
    pub sum_e_l: f64,
    pub sum_e_h_clean: f64,
    pub sum_e_l_clean: f64,

    // Granularity
    pub m_hl: i32,
    pub m_h: i32,
    pub m_l: i32,
    pub m_h_clean: i32,
    pub m_l_clean: i32,

    // Pulse shape
    pub avse: Vec<f64>,
    pub dcr_slope: Vec<f64>,
    pub dcr90: Vec<f64>,
    pub dcr95: Vec<f64>,
    pub dcr99: Vec<f64>,
    pub dcr_ctc90: Vec<f64>,

    // Data cleaning
    pub event_cleaning_bits: u32,
    pub wf_cleaning_bits: Vec<WfCleaningBits>,
    pub d2wf_noise_tag_norm: Vec<f64>,
    pub n_rising_x: Vec<f64>,
    pub n_flipped_bits: Vec<i32>,

    // Detector masses
    pub m_act_g: Vec<f64>,
    pub m_act_m1_total_kg: f64,
    pub m_act_m1_enr_kg: f64,
    pub m_act_m1_nat_kg: f64,
    pub m_act_m2_total_kg: f64,
    pub m_act_m2_enr_kg: f64,
    pub m_act_m2_nat_kg: f64,
    pub m_veto_m1_total_kg: f64,
    pub m_veto_m2_total_kg: f64,

    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub muon: Option<MuonFields>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub wide: Option<WideFields>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub low_energy: Option<LowEnergyFields>,
}

impl SkimRecord {
    pub(crate) fn accepted_hits(&self) -> usize {
        self.i_hit.len()
    }
}

/// Derived output file name encoding dataset, run selection and mode flags.
pub(crate) fn output_file_name(
    dataset: DataSetId,
    selection: &RunSelection,
    config: &SkimConfig,
) -> String {
    let mut name = format!("skimDS{dataset}");
    match selection {
        RunSelection::SingleRun { run } | RunSelection::File { run, .. } => {
            name.push_str(&format!("_run{run}"));
        }
        RunSelection::SubRange { sub_range, .. } => {
            name.push_str(&format!("_{sub_range}"));
        }
    }
    if config.minimal {
        name.push_str("_small");
    }
    if config.low_energy {
        name.push_str("_low");
    }
    name.push_str(".jsonl");
    name
}

pub(crate) struct SkimWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl SkimWriter {
    pub(crate) fn create(path: &Path) -> SkimResult<Self> {
        let file = File::create(path).map_err(|e| SkimError::OutputIo {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    pub(crate) fn write(&mut self, record: &SkimRecord) -> SkimResult<()> {
        let line = serde_json::to_string(record)?;
        self.writer
            .write_all(line.as_bytes())
            .and_then(|_| self.writer.write_all(b"\n"))
            .map_err(|e| SkimError::OutputIo {
                path: self.path.clone(),
                source: e,
            })?;
        self.records += 1;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> SkimResult<()> {
        self.writer.flush().map_err(|e| SkimError::OutputIo {
            path: self.path.clone(),
            source: e,
        })
    }

    pub(crate) fn finish(mut self) -> SkimResult<u64> {
        self.flush()?;
        info!("{} entries saved to {}", self.records, self.path.display());
        Ok(self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_encodes_selection_and_modes() {
        let config = SkimConfig {
            minimal: true,
            low_energy: true,
            ..SkimConfig::default()
        };
        assert_eq!(
            output_file_name(5, &RunSelection::SingleRun { run: 18623 }, &config),
            "skimDS5_run18623_small_low.jsonl"
        );
        assert_eq!(
            output_file_name(
                1,
                &RunSelection::SubRange {
                    dataset: 1,
                    sub_range: 33
                },
                &SkimConfig::default()
            ),
            "skimDS1_33.jsonl"
        );
    }

    #[test]
    fn optional_groups_are_omitted_entirely() {
        let record = SkimRecord::default();
        let json = serde_json::to_value(&record).expect("record should serialise");
        let object = json.as_object().expect("json object");
        assert!(!object.contains_key("mu_veto"));
        assert!(!object.contains_key("trap_e_cal"));
        assert!(!object.contains_key("dt_pulser_global"));

        let mut record = SkimRecord::default();
        record.wide = Some(WideFields::default());
        let json = serde_json::to_value(&record).expect("record should serialise");
        assert!(json.as_object().expect("json object").contains_key("trap_e_cal"));
    }
}
