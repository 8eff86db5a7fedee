//! Event assembly: fold the accepted hits of one source event into the skim
//! output record, with multiplicities, summed energies, muon-veto and
//! cryogen-fill tags.

use crate::{
    detectors::DetectorMeta,
    hits::Hit,
    muon::{is_muon_coincident, time_since_muon, MuonTimelineEntry},
    output::{LowEnergyFields, MuonFields, SkimRecord, WideFields},
    parameters::SkimConfig,
    psa::{CurrentAmplitudes, DcrTier, PsaCalibration},
    run_context::{PulserTracker, RunContext},
};
use mjd_run_data::{DatasetInfo, SourceEventRecord};
use mjd_skim_common::{Channel, Gain};

pub(crate) struct AssemblyInput<'a> {
    pub record: &'a SourceEventRecord,
    pub i_event: i64,
    pub hits: &'a [Hit],
    /// Nearest muon, absent for simulated input.
    pub muon: Option<&'a MuonTimelineEntry>,
    pub c0_channels: &'a [Channel],
}

/// A hit is tagged "in fill" when the event time falls inside
/// `(fill - 900, fill + 300]`. The lists are time-ordered, so the scan may
/// stop at the first fill opening after the event.
fn is_ln_fill(fill_times: &[f64], global_time_s: f64) -> bool {
    for &fill in fill_times {
        if fill + 300.0 < global_time_s {
            continue;
        }
        if fill - 900.0 >= global_time_s {
            break;
        }
        return true;
    }
    false
}

/// Build the output record for one event, or `None` when no hits survived.
pub(crate) fn assemble_event(
    input: AssemblyInput,
    ctx: &RunContext,
    meta: &DetectorMeta,
    info: &DatasetInfo,
    psa: &dyn PsaCalibration,
    pulser: &PulserTracker,
    config: &SkimConfig,
) -> Option<SkimRecord> {
    if input.hits.is_empty() {
        return None;
    }
    let record = input.record;
    let run = ctx.run;
    let dataset = meta.dataset();

    let mut out = SkimRecord {
        skim_revision: env!("CARGO_PKG_VERSION").to_string(),
        gat_revision: record.gat_revision,
        run,
        i_event: input.i_event,
        c0_channels: input.c0_channels.to_vec(),
        start_time_s: record.start_time_s,
        start_time0_s: info.start_time0_s,
        run_time_s: info.run_time_s,
        stop_time_s: record.stop_time_s,
        start_clock_time_s: record.start_clock_time_s(),
        clock_time_s: record.clock_time_s(),
        local_time_s: record.local_time_s(),
        global_time_s: record.global_time_s,
        event_cleaning_bits: record.event_cleaning_bits.0,
        m_act_m1_total_kg: ctx.masses.m1_total_kg,
        m_act_m1_enr_kg: ctx.masses.m1_enriched_kg,
        m_act_m1_nat_kg: ctx.masses.m1_natural_kg,
        m_act_m2_total_kg: ctx.masses.m2_total_kg,
        m_act_m2_enr_kg: ctx.masses.m2_enriched_kg,
        m_act_m2_nat_kg: ctx.masses.m2_natural_kg,
        m_veto_m1_total_kg: ctx.veto_mass.m1_kg,
        m_veto_m2_total_kg: ctx.veto_mass.m2_kg,
        ..SkimRecord::default()
    };

    let mut muon_fields = input.muon.map(|muon| MuonFields {
        dtmu_s: Vec::with_capacity(input.hits.len()),
        mu_type: muon.muon_type,
        mu_t_unc: muon.uncertainty_s,
        mu_veto: {
            let dtmu = time_since_muon(
                ctx.continuous_running,
                record.start_time_s,
                record.clock_time_s(),
                muon,
            );
            is_muon_coincident(dataset, dtmu, muon.uncertainty_s)
        },
        is_ln_fill1: record
            .global_time_s
            .is_some_and(|t| is_ln_fill(&info.ln_fill_times_m1, t)),
        is_ln_fill2: record
            .global_time_s
            .is_some_and(|t| is_ln_fill(&info.ln_fill_times_m2, t)),
    });

    let mut wide = (!config.minimal).then(WideFields::default);
    let mut low_energy = config.low_energy.then(LowEnergyFields::default);

    for hit in input.hits {
        let i = hit.index;
        out.i_hit.push(i);
        out.channel.push(hit.channel);
        out.position.push(record.position.get(i).copied().unwrap_or(0));
        out.detector.push(record.detector.get(i).copied().unwrap_or(0));
        out.cryostat.push(hit.cryostat);
        out.gain.push((hit.channel % 2) as u8);
        out.mage_id.push(record.mage_id.get(i).copied().unwrap_or(0));
        out.det_id.push(hit.det_id);
        let det_name = record.det_name.get(i).cloned().unwrap_or_default();
        out.is_enr.push(det_name.starts_with('P'));
        out.is_nat.push(det_name.starts_with('B'));
        out.det_name.push(det_name);
        out.is_good.push(!hit.veto_only);
        out.m_act_g.push(meta.active_mass_g(hit.det_id));

        let t_offset_ns = record.t_offset_ns.get(i).copied().unwrap_or(0.0);
        out.t_offset_ns.push(t_offset_ns);
        out.trigger_trap_t0
            .push(record.trigger_trap_t0.get(i).copied().unwrap_or(0.0));

        out.trap_enf_cal.push(hit.trap_enf_cal);
        out.trap_enm_cal.push(hit.trap_enm_cal);

        out.wf_cleaning_bits.push(hit.cleaning_bits);
        out.d2wf_noise_tag_norm
            .push(record.d2wf_noise_tag_norm.get(i).copied().unwrap_or(0.0));
        out.n_rising_x.push(record.n_rising_x.get(i).copied().unwrap_or(0.0));
        out.n_flipped_bits
            .push(record.n_flipped_bits.get(i).copied().unwrap_or(0));

        let currents = CurrentAmplitudes {
            max_50ns: record.ts_current_50ns_max.get(i).copied().unwrap_or(0.0),
            max_100ns: record.ts_current_100ns_max.get(i).copied().unwrap_or(0.0),
            max_200ns: record.ts_current_200ns_max.get(i).copied().unwrap_or(0.0),
        };
        let dcr_slope = record.dcr_slope.get(i).copied().unwrap_or(0.0);
        out.avse
            .push(psa.avse(run, hit.channel, currents, hit.trap_enf_cal));
        out.dcr_slope.push(dcr_slope);
        out.dcr90
            .push(psa.dcr(DcrTier::P90, run, hit.channel, dcr_slope, hit.trap_enm_cal));
        out.dcr95
            .push(psa.dcr(DcrTier::P95, run, hit.channel, dcr_slope, hit.trap_enm_cal));
        out.dcr99
            .push(psa.dcr(DcrTier::P99, run, hit.channel, dcr_slope, hit.trap_enm_cal));
        out.dcr_ctc90.push(psa.dcr_ctc90(
            run,
            hit.channel,
            dcr_slope,
            hit.trap_enf_cal,
            hit.trap_enm_cal,
        ));

        if let Some(wide) = wide.as_mut() {
            wide.trap_e_cal.push(hit.trap_e_cal);
            wide.onboard_energy
                .push(record.onboard_energy.get(i).copied().unwrap_or(0.0));
            wide.kvorr_t.push(record.tri_trap_max.get(i).copied().unwrap_or(0.0));
            wide.trap_e_tail_min
                .push(record.trap_e_tail_min.get(i).copied().unwrap_or(0.0));
            wide.dcr85
                .push(psa.dcr(DcrTier::P85, run, hit.channel, dcr_slope, hit.trap_enm_cal));
            wide.dcr98
                .push(psa.dcr(DcrTier::P98, run, hit.channel, dcr_slope, hit.trap_enm_cal));
            wide.dcr995
                .push(psa.dcr(DcrTier::P995, run, hit.channel, dcr_slope, hit.trap_enm_cal));
            wide.dcr999
                .push(psa.dcr(DcrTier::P999, run, hit.channel, dcr_slope, hit.trap_enm_cal));
        }

        if let Some(low) = low_energy.as_mut() {
            low.trap_enf.push(record.trap_enf.get(i).copied().unwrap_or(0.0));
            low.trap_enm.push(record.trap_enm.get(i).copied().unwrap_or(0.0));
            low.trap_enm_sample
                .push(record.trap_enm_sample.get(i).copied().unwrap_or(0));
            low.blrwf_fmr50
                .push(record.blrwf_fmr50.get(i).copied().unwrap_or(0.0));
            low.raw_wf_bl_slope
                .push(record.raw_wf_bl_slope.get(i).copied().unwrap_or(0.0));
            low.raw_wf_bl_chi2
                .push(record.raw_wf_bl_chi2.get(i).copied().unwrap_or(0.0));
            low.d2wf_5to30_mhz_power
                .push(record.d2wf_5to30_mhz_power.get(i).copied().unwrap_or(0.0));
            low.d2wf_30to35_mhz_power
                .push(record.d2wf_30to35_mhz_power.get(i).copied().unwrap_or(0.0));
            low.d2wf_0to50_mhz_power
                .push(record.d2wf_0to50_mhz_power.get(i).copied().unwrap_or(0.0));
            low.thresh_kev.push(record.thresh_kev.get(i).copied().unwrap_or(0.0));
            low.thresh_sigma
                .push(record.thresh_sigma.get(i).copied().unwrap_or(0.0));
            let global_time_s = record.global_time_s.unwrap_or(0.0);
            low.dt_pulser_global = pulser.dt_global(global_time_s);
            low.dt_pulser_card
                .push(pulser.dt_card(ctx, hit.channel, global_time_s, t_offset_ns));
        }

        // Per-hit time since muon, from the hit's own timestamp.
        if let (Some(fields), Some(muon)) = (muon_fields.as_mut(), input.muon) {
            fields.dtmu_s.push(time_since_muon(
                ctx.continuous_running,
                record.start_time_s,
                record.hit_time_s(i),
                muon,
            ));
        }

        // Granularity and summed energies; veto-only detectors are counted
        // but never summed.
        match hit.gain() {
            Gain::High => {
                out.m_h += 1;
                if !hit.veto_only {
                    out.sum_e_h += hit.trap_enf_cal;
                }
                if hit.cleaning_bits.is_clean() {
                    out.m_h_clean += 1;
                    if !hit.veto_only {
                        out.sum_e_h_clean += hit.trap_enf_cal;
                    }
                }
            }
            Gain::Low => {
                out.m_l += 1;
                if !hit.veto_only {
                    out.sum_e_l += hit.trap_enf_cal;
                }
                if hit.cleaning_bits.is_clean() {
                    out.m_l_clean += 1;
                    if !hit.veto_only {
                        out.sum_e_l_clean += hit.trap_enf_cal;
                    }
                }
            }
        }
        out.m_hl += 1;
        out.sum_e_hl += hit.trap_enf_cal;
    }

    out.muon = muon_fields;
    out.wide = wide;
    out.low_energy = low_energy;
    Some(out)
}
