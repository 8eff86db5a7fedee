//! Run-scoped state, rebuilt from the per-run metadata blob at every run
//! boundary instead of mutated in place.

use crate::{
    detectors::{DetectorMeta, MassSummary, VetoMass},
    error::SkimResult,
};
use mjd_run_data::{DataDirectory, SourceEventRecord};
use mjd_skim_common::{card_id, CardId, Channel, RunNumber, NS_PER_S};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

pub(crate) struct RunContext {
    pub run: RunNumber,
    pub continuous_running: bool,
    pub pulser_channels: HashSet<Channel>,
    pub channel_cards: HashMap<Channel, CardId>,
    pub masses: MassSummary,
    pub veto_mass: VetoMass,
}

/// Pure rebuild of all run-scoped state for `run`.
pub(crate) fn load_run_context(
    dir: &DataDirectory,
    meta: &DetectorMeta,
    run: RunNumber,
) -> SkimResult<RunContext> {
    let run_meta = dir.run_metadata(run)?;

    if run_meta.boundary_info_missing() {
        warn!("run {run}: boundary types missing, assuming no continuous running");
    }
    let continuous_running = run_meta.is_continuous_running();
    if !continuous_running {
        info!(
            "continuous running mode NOT enabled for DS-{}, run {run}",
            meta.dataset()
        );
    }

    let mut channel_cards = HashMap::new();
    for entry in &run_meta.channel_map {
        let card = card_id(entry.crate_number, entry.slot);
        channel_cards.insert(entry.high_channel, card);
        channel_cards.insert(entry.low_channel, card);
    }

    let (masses, veto_mass) = meta.masses_for_run(run);

    Ok(RunContext {
        run,
        continuous_running,
        pulser_channels: run_meta.pulser_channels.iter().copied().collect(),
        channel_cards,
        masses,
        veto_mass,
    })
}

/// Last-seen pulser times, kept for the low-energy dt-pulser variables.
/// Survives run boundaries; new cards start out unseen.
pub(crate) struct PulserTracker {
    last_global_s: f64,
    last_card_s: HashMap<CardId, f64>,
}

const UNSEEN: f64 = -1.0;

impl PulserTracker {
    pub(crate) fn new() -> Self {
        Self {
            last_global_s: UNSEEN,
            last_card_s: HashMap::new(),
        }
    }

    /// Make sure every card of the new run's channel map has a slot.
    pub(crate) fn refresh_cards(&mut self, ctx: &RunContext) {
        for &card in ctx.channel_cards.values() {
            self.last_card_s.entry(card).or_insert(UNSEEN);
        }
    }

    /// Record a pulser-tagged event: update the global stamp and, for each
    /// hit outside the pulser-monitor channels, the per-card stamp.
    pub(crate) fn observe(&mut self, record: &SourceEventRecord, ctx: &RunContext) {
        let Some(global_time_s) = record.global_time_s else {
            return;
        };
        self.last_global_s = global_time_s;
        for (index, &channel) in record.channel.iter().enumerate() {
            if ctx.pulser_channels.contains(&channel) {
                continue;
            }
            let Some(&card) = ctx.channel_cards.get(&channel) else {
                continue;
            };
            let t_offset_s = record.t_offset_ns.get(index).copied().unwrap_or(0.0) / NS_PER_S;
            self.last_card_s.insert(card, global_time_s + t_offset_s);
        }
    }

    pub(crate) fn dt_global(&self, global_time_s: f64) -> f64 {
        global_time_s - self.last_global_s
    }

    pub(crate) fn dt_card(
        &self,
        ctx: &RunContext,
        channel: Channel,
        global_time_s: f64,
        t_offset_ns: f64,
    ) -> f64 {
        let last = ctx
            .channel_cards
            .get(&channel)
            .and_then(|card| self.last_card_s.get(card))
            .copied()
            .unwrap_or(UNSEEN);
        global_time_s + t_offset_ns / NS_PER_S - last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn context() -> RunContext {
        RunContext {
            run: 9422,
            continuous_running: false,
            pulser_channels: HashSet::from([640]),
            channel_cards: HashMap::from([(692, 1110), (693, 1110), (640, 1104)]),
            masses: MassSummary::default(),
            veto_mass: VetoMass::default(),
        }
    }

    fn pulser_record(channels: Vec<Channel>, global_time_s: f64) -> SourceEventRecord {
        let n = channels.len();
        serde_json::from_value(serde_json::json!({
            "run": 9422,
            "gat_revision": 1,
            "start_time_s": 0.0,
            "stop_time_s": 1.0,
            "start_clock_time_ns": 0.0,
            "clock_time_ns": 0.0,
            "local_time_ns": 0.0,
            "global_time_s": global_time_s,
            "event_cleaning_bits": 2,
            "channel": channels,
            "det_id": vec![0; n], "position": vec![0; n], "detector": vec![0; n],
            "cryostat": vec![1; n], "mage_id": vec![0; n],
            "det_name": vec!["P1"; n],
            "t_offset_ns": vec![0.0; n], "trigger_trap_t0": vec![0.0; n],
            "blrwf_fmr50": vec![0.0; n], "trap_enm_sample": vec![0; n],
            "trap_enf": vec![0.0; n], "trap_enm": vec![0.0; n],
            "trap_enf_cal": vec![0.0; n], "trap_enm_cal": vec![0.0; n],
            "trap_e_cal": vec![0.0; n], "onboard_energy": vec![0.0; n],
            "ts_current_50ns_max": vec![0.0; n], "ts_current_100ns_max": vec![0.0; n],
            "ts_current_200ns_max": vec![0.0; n], "tri_trap_max": vec![0.0; n],
            "dcr_slope": vec![0.0; n], "raw_wf_bl_slope": vec![0.0; n],
            "raw_wf_bl_chi2": vec![0.0; n], "wf_cleaning_bits": vec![0; n],
            "trap_e_tail_min": vec![0.0; n], "n_rising_x": vec![0.0; n],
            "n_flipped_bits": vec![0; n], "thresh_kev": vec![0.0; n],
            "thresh_sigma": vec![0.0; n],
            "d2wf_5to30_mhz_power": vec![0.0; n], "d2wf_30to35_mhz_power": vec![0.0; n],
            "d2wf_0to50_mhz_power": vec![0.0; n], "d2wf_noise_tag_norm": vec![0.0; n],
            "raw_wf_min": vec![0.0; n]
        }))
        .expect("record should build")
    }

    #[test]
    fn pulser_updates_skip_monitor_channels() {
        let ctx = context();
        let mut tracker = PulserTracker::new();
        tracker.refresh_cards(&ctx);

        tracker.observe(&pulser_record(vec![692, 640], 500.0), &ctx);
        assert_approx_eq!(tracker.dt_global(510.0), 10.0);
        assert_approx_eq!(tracker.dt_card(&ctx, 693, 510.0, 0.0), 10.0);
        // The monitor channel's card was never stamped.
        assert_approx_eq!(tracker.dt_card(&ctx, 640, 510.0, 0.0), 511.0);
    }

    #[test]
    fn unmapped_channel_counts_from_unseen() {
        let ctx = context();
        let tracker = PulserTracker::new();
        assert_approx_eq!(tracker.dt_card(&ctx, 9999, 10.0, 0.0), 11.0);
    }
}
