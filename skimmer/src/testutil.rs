//! Shared fixtures for the selection and assembly tests.

use crate::{
    detectors::{DetectorMeta, MassSummary, VetoMass},
    run_context::RunContext,
};
use mjd_run_data::{DatasetInfo, DetectorInfo, SourceEventRecord};
use mjd_skim_common::{Channel, DataSetId, DetectorId, EventCleaningBits, Module, RunNumber, WfCleaningBits};
use std::collections::{HashMap, HashSet};

/// One hit of a synthetic event. `energy` lands in all three calibrated
/// energy fields; the remaining fields start from quiet defaults.
#[derive(Debug, Clone)]
pub(crate) struct TestHit {
    pub channel: Channel,
    pub det_id: DetectorId,
    pub energy: f64,
    pub trap_enf: f64,
    pub cryostat: i32,
    pub bits: u32,
    pub t_offset_ns: f64,
}

impl TestHit {
    pub(crate) fn new(channel: Channel, det_id: DetectorId, energy: f64) -> Self {
        Self {
            channel,
            det_id,
            energy,
            trap_enf: energy,
            cryostat: 1,
            bits: 0,
            t_offset_ns: 0.0,
        }
    }

    pub(crate) fn with_bits(mut self, bits: u32) -> Self {
        self.bits = bits;
        self
    }
}

pub(crate) fn record_with_hits(hits: Vec<TestHit>) -> SourceEventRecord {
    let n = hits.len();
    SourceEventRecord {
        run: 9422,
        gat_revision: 1,
        start_time_s: 0.0,
        stop_time_s: 3600.0,
        start_clock_time_ns: 0.0,
        clock_time_ns: 0.0,
        local_time_ns: 0.0,
        global_time_s: Some(1000.0),
        event_cleaning_bits: EventCleaningBits(0),
        channel: hits.iter().map(|h| h.channel).collect(),
        det_id: hits.iter().map(|h| h.det_id).collect(),
        position: vec![0; n],
        detector: vec![0; n],
        cryostat: hits.iter().map(|h| h.cryostat).collect(),
        mage_id: vec![0; n],
        det_name: hits.iter().map(|h| format!("P{}", h.det_id)).collect(),
        t_offset_ns: hits.iter().map(|h| h.t_offset_ns).collect(),
        trigger_trap_t0: vec![0.0; n],
        blrwf_fmr50: vec![0.0; n],
        trap_enm_sample: vec![0; n],
        trap_enf: hits.iter().map(|h| h.trap_enf).collect(),
        trap_enm: hits.iter().map(|h| h.energy).collect(),
        trap_enf_cal: hits.iter().map(|h| h.energy).collect(),
        trap_enm_cal: hits.iter().map(|h| h.energy).collect(),
        trap_e_cal: hits.iter().map(|h| h.energy).collect(),
        onboard_energy: vec![0.0; n],
        ts_current_50ns_max: vec![0.0; n],
        ts_current_100ns_max: vec![0.0; n],
        ts_current_200ns_max: vec![0.0; n],
        tri_trap_max: vec![0.0; n],
        dcr_slope: vec![0.0; n],
        raw_wf_bl_slope: vec![0.0; n],
        raw_wf_bl_chi2: vec![0.0; n],
        wf_cleaning_bits: hits.iter().map(|h| WfCleaningBits(h.bits)).collect(),
        trap_e_tail_min: vec![0.0; n],
        n_rising_x: vec![0.0; n],
        n_flipped_bits: vec![0; n],
        thresh_kev: vec![0.0; n],
        thresh_sigma: vec![0.0; n],
        d2wf_5to30_mhz_power: vec![0.0; n],
        d2wf_30to35_mhz_power: vec![0.0; n],
        d2wf_0to50_mhz_power: vec![0.0; n],
        d2wf_noise_tag_norm: vec![0.0; n],
        raw_wf_min: vec![0.0; n],
    }
}

/// Detector metadata for a dataset built from `(det_id, is_bad, is_veto_only)`
/// triples; every detector sits in module 1 with a 600 g enriched crystal.
pub(crate) fn meta_with(dataset: DataSetId, detectors: &[(DetectorId, bool, bool)]) -> DetectorMeta {
    let detectors = detectors
        .iter()
        .map(|&(det_id, is_bad, is_veto_only)| DetectorInfo {
            det_id,
            name: format!("P{det_id}"),
            module: Module::M1,
            active_mass_g: 600.0,
            enriched: true,
            natural: false,
            is_bad,
            is_veto_only,
        })
        .collect();
    DetectorMeta::new(&DatasetInfo {
        dataset,
        run_time_s: 1.0e6,
        start_time0_s: 1.4e9,
        detectors,
        ln_fill_times_m1: vec![],
        ln_fill_times_m2: vec![],
        muon_list: None,
    })
}

pub(crate) fn dataset_info(dataset: DataSetId) -> DatasetInfo {
    DatasetInfo {
        dataset,
        run_time_s: 1.0e6,
        start_time0_s: 1.4e9,
        detectors: vec![],
        ln_fill_times_m1: vec![],
        ln_fill_times_m2: vec![],
        muon_list: None,
    }
}

pub(crate) fn run_context(run: RunNumber) -> RunContext {
    RunContext {
        run,
        continuous_running: false,
        pulser_channels: HashSet::new(),
        channel_cards: HashMap::new(),
        masses: MassSummary::default(),
        veto_mass: VetoMass::default(),
    }
}
