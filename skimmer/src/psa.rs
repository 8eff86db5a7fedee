//! Pulse-shape metric engine: A/E and DCR discrimination variables computed
//! per accepted hit from run/channel-dependent calibration lookups. The
//! parameter store is an external collaborator, injected behind a trait.

use mjd_run_data::{CurrentEstimator, PsaCalibrationTable};
use mjd_skim_common::{Channel, DataSetId, RunNumber};
use std::{cell::RefCell, collections::HashSet};
use tracing::debug;

/// The three windowed current-amplitude estimators shipped with each hit.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CurrentAmplitudes {
    pub max_50ns: f64,
    pub max_100ns: f64,
    pub max_200ns: f64,
}

impl CurrentAmplitudes {
    fn select(&self, estimator: CurrentEstimator) -> f64 {
        match estimator {
            CurrentEstimator::Max50ns => self.max_50ns,
            CurrentEstimator::Max100ns => self.max_100ns,
            CurrentEstimator::Max200ns => self.max_200ns,
        }
    }
}

/// Delayed-charge-recovery percentile tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub(crate) enum DcrTier {
    #[strum(to_string = "dcr85")]
    P85,
    #[strum(to_string = "dcr90")]
    P90,
    #[strum(to_string = "dcr95")]
    P95,
    #[strum(to_string = "dcr98")]
    P98,
    #[strum(to_string = "dcr99")]
    P99,
    #[strum(to_string = "dcr995")]
    P995,
    #[strum(to_string = "dcr999")]
    P999,
}

pub(crate) trait PsaCalibration {
    /// Current amplitude minus the calibrated quadratic energy baseline.
    fn avse(
        &self,
        run: RunNumber,
        channel: Channel,
        currents: CurrentAmplitudes,
        trap_enf_cal: f64,
    ) -> f64;

    /// Raw DCR slope corrected by the tier's linear energy term.
    fn dcr(
        &self,
        tier: DcrTier,
        run: RunNumber,
        channel: Channel,
        dcr_slope: f64,
        trap_enm_cal: f64,
    ) -> f64;

    /// Charge-trapping-corrected 90th percentile DCR.
    fn dcr_ctc90(
        &self,
        run: RunNumber,
        channel: Channel,
        dcr_slope: f64,
        trap_enf_cal: f64,
        trap_enm_cal: f64,
    ) -> f64;
}

/// Table-driven calibration keyed by (dataset, run range, channel). A
/// missing entry falls back to the raw, uncorrected value; each such channel
/// is reported once.
pub(crate) struct CalibrationStore {
    dataset: DataSetId,
    table: PsaCalibrationTable,
    uncalibrated: RefCell<HashSet<Channel>>,
}

impl CalibrationStore {
    pub(crate) fn new(dataset: DataSetId, table: PsaCalibrationTable) -> Self {
        Self {
            dataset,
            table,
            uncalibrated: RefCell::new(HashSet::new()),
        }
    }

    fn lookup(
        &self,
        run: RunNumber,
        channel: Channel,
    ) -> Option<&mjd_run_data::PsaCalibrationEntry> {
        let entry = self.table.lookup(self.dataset, run, channel);
        if entry.is_none() && self.uncalibrated.borrow_mut().insert(channel) {
            debug!(
                "no PSA calibration for DS-{} run {run} channel {channel}; using raw values",
                self.dataset
            );
        }
        entry
    }
}

impl PsaCalibration for CalibrationStore {
    fn avse(
        &self,
        run: RunNumber,
        channel: Channel,
        currents: CurrentAmplitudes,
        trap_enf_cal: f64,
    ) -> f64 {
        match self.lookup(run, channel) {
            Some(entry) => {
                let amplitude = currents.select(entry.current_estimator);
                let baseline = entry.avse.a
                    + entry.avse.b * trap_enf_cal
                    + entry.avse.c * trap_enf_cal * trap_enf_cal;
                amplitude - baseline
            }
            None => currents.select(CurrentEstimator::default()),
        }
    }

    fn dcr(
        &self,
        tier: DcrTier,
        run: RunNumber,
        channel: Channel,
        dcr_slope: f64,
        trap_enm_cal: f64,
    ) -> f64 {
        match self.lookup(run, channel) {
            Some(entry) => {
                let params = match tier {
                    DcrTier::P85 => entry.dcr85,
                    DcrTier::P90 => entry.dcr90,
                    DcrTier::P95 => entry.dcr95,
                    DcrTier::P98 => entry.dcr98,
                    DcrTier::P99 => entry.dcr99,
                    DcrTier::P995 => entry.dcr995,
                    DcrTier::P999 => entry.dcr999,
                };
                dcr_slope - (params.m * trap_enm_cal + params.b)
            }
            None => dcr_slope,
        }
    }

    fn dcr_ctc90(
        &self,
        run: RunNumber,
        channel: Channel,
        dcr_slope: f64,
        trap_enf_cal: f64,
        trap_enm_cal: f64,
    ) -> f64 {
        match self.lookup(run, channel) {
            Some(entry) => {
                dcr_slope
                    - (entry.dcr_ctc90_m * trap_enm_cal + entry.dcr_ctc90_b)
                    - entry.dcr_ctc90_c * trap_enf_cal
            }
            None => dcr_slope,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use mjd_run_data::{AvseParams, LinearParams, PsaCalibrationEntry};
    use strum::IntoEnumIterator;

    fn entry() -> PsaCalibrationEntry {
        PsaCalibrationEntry {
            dataset: 1,
            run_lo: 9000,
            run_hi: 10000,
            channel: 692,
            current_estimator: CurrentEstimator::Max100ns,
            avse: AvseParams {
                a: 1.0,
                b: 0.5,
                c: 0.0,
            },
            dcr85: LinearParams { m: 0.1, b: 0.0 },
            dcr90: LinearParams { m: 0.2, b: 1.0 },
            dcr95: LinearParams { m: 0.0, b: 0.0 },
            dcr98: LinearParams { m: 0.0, b: 0.0 },
            dcr99: LinearParams { m: 0.0, b: 0.0 },
            dcr995: LinearParams { m: 0.0, b: 0.0 },
            dcr999: LinearParams { m: 0.0, b: 0.0 },
            dcr_ctc90_m: 0.1,
            dcr_ctc90_b: 0.0,
            dcr_ctc90_c: 0.01,
        }
    }

    fn store() -> CalibrationStore {
        CalibrationStore::new(1, PsaCalibrationTable {
            entries: vec![entry()],
        })
    }

    fn currents() -> CurrentAmplitudes {
        CurrentAmplitudes {
            max_50ns: 10.0,
            max_100ns: 20.0,
            max_200ns: 30.0,
        }
    }

    #[test]
    fn avse_uses_the_configured_estimator() {
        let avse = store().avse(9422, 692, currents(), 10.0);
        // 20.0 (100 ns window) minus 1.0 + 0.5 * 10.
        assert_approx_eq!(avse, 14.0);
    }

    #[test]
    fn dcr_tiers_have_independent_parameters() {
        let store = store();
        assert_approx_eq!(store.dcr(DcrTier::P85, 9422, 692, 5.0, 10.0), 4.0);
        assert_approx_eq!(store.dcr(DcrTier::P90, 9422, 692, 5.0, 10.0), 2.0);
        assert_approx_eq!(store.dcr(DcrTier::P95, 9422, 692, 5.0, 10.0), 5.0);
    }

    #[test]
    fn ctc_correction_includes_the_fast_energy_term() {
        assert_approx_eq!(store().dcr_ctc90(9422, 692, 5.0, 100.0, 10.0), 3.0);
    }

    #[test]
    fn missing_entry_falls_back_to_raw_values() {
        let store = store();
        // Channel outside the table.
        assert_approx_eq!(store.avse(9422, 700, currents(), 10.0), 20.0);
        for tier in DcrTier::iter() {
            assert_approx_eq!(store.dcr(tier, 9422, 700, 5.0, 10.0), 5.0);
        }
        // Run outside the calibrated range.
        assert_approx_eq!(store.dcr(DcrTier::P90, 12000, 692, 5.0, 10.0), 5.0);
    }
}
