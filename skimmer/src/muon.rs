//! Muon/veto timeline: a time-ordered muon-candidate list built once from the
//! veto stream, queried through a forward-only cursor as events are processed
//! in run order.

use mjd_run_data::{MuonListEntry, RunDataResult, VetoEvent};
use mjd_skim_common::{DataSetId, RunNumber};
use serde::Serialize;

/// Gap between runs (in seconds) above which a run boundary gets its own
/// pseudo-muon entry.
const RUN_BOUNDARY_GAP_S: i64 = 10;
/// Conservative time uncertainty assigned when the veto scaler was corrupted.
const BAD_SCALER_UNCERTAINTY_S: f64 = 8.0;
/// Instrument floor on the time uncertainty, applied at lookup time only.
const MIN_UNCERTAINTY_S: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(into = "u8")]
pub(crate) enum MuonType {
    /// Veto-system coincidence (bit 0).
    #[strum(to_string = "coincidence")]
    Coincidence,
    /// Two-layer coincidence (bit 1); overrides type 1 when both are set.
    #[strum(to_string = "two-layer")]
    TwoLayer,
    /// Pseudo-muon marking a run boundary with a timing gap.
    #[strum(to_string = "run-boundary")]
    RunBoundary,
}

impl From<MuonType> for u8 {
    fn from(muon_type: MuonType) -> u8 {
        match muon_type {
            MuonType::Coincidence => 1,
            MuonType::TwoLayer => 2,
            MuonType::RunBoundary => 3,
        }
    }
}

impl MuonType {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(MuonType::Coincidence),
            2 => Some(MuonType::TwoLayer),
            3 => Some(MuonType::RunBoundary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MuonTimelineEntry {
    pub run: RunNumber,
    pub run_start_s: f64,
    pub time_s: f64,
    pub muon_type: MuonType,
    pub uncertainty_s: f64,
}

/// Entries ordered by (run, time); the cursor only moves forward, which is
/// sound because events are processed in run order. An out-of-order query is
/// a defined no-op: the cursor stays put and the current entry is returned.
pub(crate) struct MuonTimeline {
    entries: Vec<MuonTimelineEntry>,
    cursor: usize,
}

impl MuonTimeline {
    pub(crate) fn from_veto_events(
        events: impl Iterator<Item = RunDataResult<VetoEvent>>,
    ) -> RunDataResult<Self> {
        let mut entries = Vec::new();
        let mut prev_run = 0;
        let mut prev_stop = 0i64;
        for event in events {
            let event = event?;
            let new_run = event.run != prev_run;

            let mut muon_type = None;
            if event.coincidence_mask & 0b01 != 0 {
                muon_type = Some(MuonType::Coincidence);
            }
            if event.coincidence_mask & 0b10 != 0 {
                muon_type = Some(MuonType::TwoLayer);
            }
            if new_run && event.start_s - prev_stop > RUN_BOUNDARY_GAP_S {
                muon_type = Some(MuonType::RunBoundary);
            }

            if let Some(muon_type) = muon_type {
                entries.push(MuonTimelineEntry {
                    run: event.run,
                    run_start_s: event.start_s as f64,
                    time_s: event.abs_time_s,
                    muon_type,
                    uncertainty_s: if event.bad_scaler {
                        BAD_SCALER_UNCERTAINTY_S
                    } else {
                        event.time_uncertainty_s
                    },
                });
            }

            prev_stop = event.stop_s;
            prev_run = event.run;
        }
        Ok(Self { entries, cursor: 0 })
    }

    /// Side-loaded timeline for datasets with no usable veto stream.
    pub(crate) fn from_muon_list(list: &[MuonListEntry]) -> Self {
        let entries = list
            .iter()
            .filter_map(|entry| {
                Some(MuonTimelineEntry {
                    run: entry.run,
                    run_start_s: entry.run_start_s,
                    time_s: entry.time_s,
                    muon_type: MuonType::from_raw(entry.muon_type)?,
                    uncertainty_s: entry.uncertainty_s,
                })
            })
            .collect();
        Self { entries, cursor: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Advance the cursor to the nearest muon at or before the event and
    /// return it, along with whether it is the final timeline entry.
    pub(crate) fn advance_nearest(
        &mut self,
        run: RunNumber,
        clock_time_s: f64,
    ) -> Option<(&MuonTimelineEntry, bool)> {
        if self.entries.is_empty() {
            return None;
        }
        while let Some(next) = self.entries.get(self.cursor + 1) {
            if next.run > run {
                break;
            }
            let uncertainty = next.uncertainty_s.max(MIN_UNCERTAINTY_S);
            if next.run == run && next.time_s - uncertainty > clock_time_s {
                break;
            }
            self.cursor += 1;
        }
        let is_last = self.cursor + 1 == self.entries.len();
        self.entries.get(self.cursor).map(|entry| (entry, is_last))
    }
}

/// Time since the nearest muon, continuous-run-mode aware. Without CR mode
/// the event's own run start is offset against the muon's run start; a clock
/// reset since the muon makes this delta incorrect, which is accepted.
pub(crate) fn time_since_muon(
    continuous_running: bool,
    event_start_s: f64,
    time_s: f64,
    muon: &MuonTimelineEntry,
) -> f64 {
    if continuous_running {
        time_s - muon.time_s
    } else {
        (event_start_s - muon.run_start_s) + (time_s - muon.time_s)
    }
}

/// Asymmetric coincidence window. DS-4 is wider due to known
/// timing-synchronisation slop between the veto and detector clocks.
pub(crate) fn is_muon_coincident(dataset: DataSetId, dtmu_s: f64, uncertainty_s: f64) -> bool {
    if dataset == 4 {
        dtmu_s > -3.0 * uncertainty_s && dtmu_s < 4.0 + uncertainty_s
    } else {
        dtmu_s > -uncertainty_s && dtmu_s < 1.0 + uncertainty_s
    }
}
