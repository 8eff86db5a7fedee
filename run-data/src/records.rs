use crate::error::{RunDataError, RunDataResult};
use mjd_skim_common::{Channel, DetectorId, EventCleaningBits, RunNumber, WfCleaningBits, NS_PER_S};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufRead, BufReader, Lines},
    path::{Path, PathBuf},
};

/// One detector-trigger event as written by the upstream processing chain.
///
/// All `Vec` fields are co-indexed per hit. Simulated input carries no
/// timing/veto information, signalled by `global_time_s` being absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEventRecord {
    pub run: RunNumber,
    pub gat_revision: u32,
    pub start_time_s: f64,
    pub stop_time_s: f64,
    pub start_clock_time_ns: f64,
    pub clock_time_ns: f64,
    pub local_time_ns: f64,
    #[serde(default)]
    pub global_time_s: Option<f64>,
    pub event_cleaning_bits: EventCleaningBits,

    // Identity
    pub channel: Vec<Channel>,
    pub det_id: Vec<DetectorId>,
    pub position: Vec<i32>,
    pub detector: Vec<i32>,
    pub cryostat: Vec<i32>,
    pub mage_id: Vec<i32>,
    pub det_name: Vec<String>,

    // Timing
    pub t_offset_ns: Vec<f64>,
    pub trigger_trap_t0: Vec<f64>,
    pub blrwf_fmr50: Vec<f64>,
    pub trap_enm_sample: Vec<i32>,

    // Energy
    pub trap_enf: Vec<f64>,
    pub trap_enm: Vec<f64>,
    pub trap_enf_cal: Vec<f64>,
    pub trap_enm_cal: Vec<f64>,
    pub trap_e_cal: Vec<f64>,
    pub onboard_energy: Vec<f64>,

    // Pulse shape
    pub ts_current_50ns_max: Vec<f64>,
    pub ts_current_100ns_max: Vec<f64>,
    pub ts_current_200ns_max: Vec<f64>,
    pub tri_trap_max: Vec<f64>,
    pub dcr_slope: Vec<f64>,
    pub raw_wf_bl_slope: Vec<f64>,
    pub raw_wf_bl_chi2: Vec<f64>,

    // Data cleaning
    pub wf_cleaning_bits: Vec<WfCleaningBits>,
    pub trap_e_tail_min: Vec<f64>,
    pub n_rising_x: Vec<f64>,
    pub n_flipped_bits: Vec<i32>,
    pub thresh_kev: Vec<f64>,
    pub thresh_sigma: Vec<f64>,
    pub d2wf_5to30_mhz_power: Vec<f64>,
    pub d2wf_30to35_mhz_power: Vec<f64>,
    pub d2wf_0to50_mhz_power: Vec<f64>,
    pub d2wf_noise_tag_norm: Vec<f64>,

    // Kept until all files are reprocessed with fixed negative-saturation
    // tagging; the skim re-derives bit 7 from this.
    pub raw_wf_min: Vec<f64>,
}

impl SourceEventRecord {
    pub fn hit_count(&self) -> usize {
        self.channel.len()
    }

    pub fn clock_time_s(&self) -> f64 {
        self.clock_time_ns / NS_PER_S
    }

    pub fn start_clock_time_s(&self) -> f64 {
        self.start_clock_time_ns / NS_PER_S
    }

    pub fn local_time_s(&self) -> f64 {
        self.local_time_ns / NS_PER_S
    }

    /// Timestamp of a single hit in seconds: event clock plus hit offset.
    pub fn hit_time_s(&self, index: usize) -> f64 {
        self.clock_time_s() + self.t_offset_ns.get(index).copied().unwrap_or_default() / NS_PER_S
    }

    pub fn is_simulated(&self) -> bool {
        self.global_time_s.is_none()
    }
}

/// One muon-veto-system trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoEvent {
    pub run: RunNumber,
    pub start_s: i64,
    pub stop_s: i64,
    pub abs_time_s: f64,
    pub time_uncertainty_s: f64,
    /// Bit 0: muon candidate type 1, bit 1: type 2.
    pub coincidence_mask: u32,
    pub bad_scaler: bool,
}

/// Streaming reader over a JSON-lines file of records of type `T`.
pub struct JsonLines<T> {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: DeserializeOwned> JsonLines<T> {
    pub fn open(path: &Path) -> RunDataResult<Self> {
        let file = File::open(path).map_err(|e| RunDataError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            _marker: std::marker::PhantomData,
        })
    }
}

impl<T: DeserializeOwned> Iterator for JsonLines<T> {
    type Item = RunDataResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next()? {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => {
                    return Some(
                        serde_json::from_str(&line).map_err(|e| RunDataError::malformed(&self.path, e)),
                    )
                }
                Err(e) => return Some(Err(RunDataError::io(&self.path, e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_event_json() -> serde_json::Value {
        serde_json::json!({
            "run": 5,
            "gat_revision": 42,
            "start_time_s": 1000.0,
            "stop_time_s": 2000.0,
            "start_clock_time_ns": 0.0,
            "clock_time_ns": 1.5e9,
            "local_time_ns": 1.5e9,
            "global_time_s": 1500.0,
            "event_cleaning_bits": 0,
            "channel": [692], "det_id": [11], "position": [1], "detector": [2],
            "cryostat": [1], "mage_id": [101], "det_name": ["P42574A"],
            "t_offset_ns": [0.0], "trigger_trap_t0": [0.0], "blrwf_fmr50": [0.0],
            "trap_enm_sample": [0], "trap_enf": [6.0], "trap_enm": [6.0],
            "trap_enf_cal": [6.0], "trap_enm_cal": [6.0], "trap_e_cal": [6.0],
            "onboard_energy": [100.0],
            "ts_current_50ns_max": [0.1], "ts_current_100ns_max": [0.1],
            "ts_current_200ns_max": [0.1], "tri_trap_max": [0.1],
            "dcr_slope": [0.0], "raw_wf_bl_slope": [0.0], "raw_wf_bl_chi2": [1.0],
            "wf_cleaning_bits": [0], "trap_e_tail_min": [0.0], "n_rising_x": [0.0],
            "n_flipped_bits": [0], "thresh_kev": [1.0], "thresh_sigma": [0.1],
            "d2wf_5to30_mhz_power": [0.0], "d2wf_30to35_mhz_power": [0.0],
            "d2wf_0to50_mhz_power": [0.0], "d2wf_noise_tag_norm": [0.0],
            "raw_wf_min": [-100.0]
        })
    }

    #[test]
    fn event_record_round_trips() {
        let record: SourceEventRecord =
            serde_json::from_value(minimal_event_json()).expect("record should parse");
        assert_eq!(record.hit_count(), 1);
        assert_eq!(record.clock_time_s(), 1.5);
        assert!(!record.is_simulated());
    }

    #[test]
    fn missing_global_time_marks_simulated_input() {
        let mut json = minimal_event_json();
        json.as_object_mut()
            .expect("json object")
            .remove("global_time_s");
        let record: SourceEventRecord =
            serde_json::from_value(json).expect("record should parse");
        assert!(record.is_simulated());
    }

    #[test]
    fn hit_time_folds_in_the_offset() {
        let mut record: SourceEventRecord =
            serde_json::from_value(minimal_event_json()).expect("record should parse");
        record.t_offset_ns = vec![2.0e9];
        assert_eq!(record.hit_time_s(0), 3.5);
    }

    #[test]
    fn veto_event_parses() {
        let veto: VetoEvent = serde_json::from_str(
            r#"{"run":5,"start_s":100,"stop_s":200,"abs_time_s":150.0,
                "time_uncertainty_s":0.001,"coincidence_mask":1,"bad_scaler":false}"#,
        )
        .expect("veto event should parse");
        assert_eq!(veto.coincidence_mask & 1, 1);
    }
}
