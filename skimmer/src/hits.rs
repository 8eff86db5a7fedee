//! Hit selection: gain reconciliation (Stage A) followed by the per-hit
//! quality, energy and detector cuts (Stage B), plus the two data-cleaning
//! bit repairs applied to the surviving hits.

use crate::{
    detectors::DetectorMeta,
    parameters::{SkimConfig, LOW_GAIN_THRESHOLD_KEV, MINIMAL_THRESHOLD_KEV},
    run_context::RunContext,
};
use mjd_run_data::SourceEventRecord;
use mjd_skim_common::{partner_channel, Channel, DataSetId, DetectorId, Gain, WfCleaningBits};
use std::collections::{HashMap, HashSet};

/// One accepted hit, materialized from the source record's co-indexed arrays.
/// `cleaning_bits` is the repaired copy; the source record stays untouched.
#[derive(Debug, Clone)]
pub(crate) struct Hit {
    pub index: usize,
    pub channel: Channel,
    pub det_id: DetectorId,
    pub cryostat: i32,
    pub trap_enf_cal: f64,
    pub trap_enm_cal: f64,
    pub trap_e_cal: f64,
    pub veto_only: bool,
    pub cleaning_bits: WfCleaningBits,
}

impl Hit {
    pub(crate) fn gain(&self) -> Gain {
        Gain::of_channel(self.channel)
    }
}

/// Datasets still carrying the broken negative-saturation tag, repaired at
/// skim level until the files are reprocessed.
fn needs_negative_saturation_repair(dataset: DataSetId) -> bool {
    dataset != 2 && dataset < 6
}

/// Band of `raw_wf_min` values that genuinely mark a negative-saturated
/// waveform.
const NEGATIVE_SATURATION_BAND: (f64, f64) = (-8192.5, -8191.5);

pub(crate) fn repair_cleaning_bits(
    mut bits: WfCleaningBits,
    dataset: DataSetId,
    raw_wf_min: f64,
) -> WfCleaningBits {
    bits.clear_pileup();
    if needs_negative_saturation_repair(dataset) {
        let (lo, hi) = NEGATIVE_SATURATION_BAND;
        bits.set_negative_saturated(lo < raw_wf_min && raw_wf_min < hi);
    }
    bits
}

/// Stage A: reconcile high/low-gain channel pairs into one index per
/// physical channel. Swapping in the low-gain hit when the high-gain one is
/// saturated or late-triggered reduces the true dead time.
pub(crate) fn reconcile_gain_indices(
    record: &SourceEventRecord,
    pulser_channels: &HashSet<Channel>,
) -> Vec<usize> {
    // Channel number to array index, without stray pulser-monitor hits.
    let mut channel_index: HashMap<Channel, usize> = HashMap::new();
    for (index, &channel) in record.channel.iter().enumerate() {
        if pulser_channels.contains(&channel) {
            continue;
        }
        channel_index.insert(channel, index);
    }

    let mut indices = Vec::new();
    for (index, &channel) in record.channel.iter().enumerate() {
        match Gain::of_channel(channel) {
            // Take LG only when no HG partner exists.
            Gain::Low => {
                if !channel_index.contains_key(&partner_channel(channel)) {
                    indices.push(index);
                }
            }
            Gain::High => match channel_index.get(&partner_channel(channel)) {
                Some(&low_index) => {
                    let bits = record
                        .wf_cleaning_bits
                        .get(index)
                        .copied()
                        .unwrap_or_default();
                    let saturated = bits.is_saturated();
                    let late = bits.is_late_trigger();
                    if !saturated && !late {
                        indices.push(index);
                    }
                    if saturated || late {
                        indices.push(low_index);
                    }
                }
                None => indices.push(index),
            },
        }
    }
    indices
}

/// Full per-event selection. Channels seen with the cryostat-0 sentinel are
/// recorded in `c0_channels`, which accumulates across events.
pub(crate) fn select_hits(
    record: &SourceEventRecord,
    ctx: &RunContext,
    meta: &DetectorMeta,
    config: &SkimConfig,
    simulated: bool,
    c0_channels: &mut Vec<Channel>,
) -> Vec<Hit> {
    let indices = if config.lg_skip {
        reconcile_gain_indices(record, &ctx.pulser_channels)
    } else {
        (0..record.hit_count()).collect()
    };

    let dataset = meta.dataset();
    let mut hits = Vec::with_capacity(indices.len());
    for index in indices {
        let Some(&channel) = record.channel.get(index) else {
            continue;
        };
        let trap_enf_cal = record.trap_enf_cal.get(index).copied().unwrap_or(0.0);
        let trap_e_cal = record.trap_e_cal.get(index).copied().unwrap_or(0.0);
        let trap_enf = record.trap_enf.get(index).copied().unwrap_or(0.0);

        let threshold = match (config.minimal, Gain::of_channel(channel)) {
            (true, _) => MINIMAL_THRESHOLD_KEV,
            (false, Gain::High) => config.energy_threshold_kev,
            (false, Gain::Low) => LOW_GAIN_THRESHOLD_KEV,
        };
        if trap_enf_cal < threshold || trap_e_cal < threshold {
            continue;
        }

        let det_id = record.det_id.get(index).copied().unwrap_or(0);
        if !simulated && meta.is_bad(ctx.run, det_id) {
            continue;
        }
        let veto_only = meta.is_veto_only(ctx.run, det_id);
        if !simulated
            && veto_only
            && trap_enf.abs() < LOW_GAIN_THRESHOLD_KEV
            && trap_enf_cal < LOW_GAIN_THRESHOLD_KEV
        {
            continue;
        }

        let cryostat = record.cryostat.get(index).copied().unwrap_or(0);
        if cryostat == 0 {
            if !c0_channels.contains(&channel) {
                c0_channels.push(channel);
            }
            continue;
        }

        let cleaning_bits = repair_cleaning_bits(
            record.wf_cleaning_bits.get(index).copied().unwrap_or_default(),
            dataset,
            record.raw_wf_min.get(index).copied().unwrap_or(0.0),
        );

        hits.push(Hit {
            index,
            channel,
            det_id,
            cryostat,
            trap_enf_cal,
            trap_enm_cal: record.trap_enm_cal.get(index).copied().unwrap_or(0.0),
            trap_e_cal,
            veto_only,
            cleaning_bits,
        });
    }
    hits
}
