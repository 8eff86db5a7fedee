//! Detector metadata service: per-run bad/veto-only classification and
//! active-mass bookkeeping. Dataset-wide defaults come from the static
//! detector table; DS-1 and DS-5 overlay a per-run channel-selection source.

use crate::error::SkimResult;
use mjd_run_data::{ChannelSelectionEntry, DataDirectory, DatasetInfo};
use mjd_skim_common::{DataSetId, DetectorId, Module, RunNumber};
use std::collections::HashMap;
use tracing::info;

const G_PER_KG: f64 = 1000.0;

/// Datasets whose bad/veto-only status and module masses vary per run.
pub(crate) fn has_run_overrides(dataset: DataSetId) -> bool {
    dataset == 1 || dataset == 5
}

#[derive(Debug, Clone, Default)]
pub(crate) struct StatusMaps {
    is_bad: HashMap<DetectorId, bool>,
    is_veto_only: HashMap<DetectorId, bool>,
}

impl StatusMaps {
    pub(crate) fn is_bad(&self, det_id: DetectorId) -> bool {
        self.is_bad.get(&det_id).copied().unwrap_or(false)
    }

    pub(crate) fn is_veto_only(&self, det_id: DetectorId) -> bool {
        self.is_veto_only.get(&det_id).copied().unwrap_or(false)
    }
}

/// Active masses per module in kg, split by enrichment.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MassSummary {
    pub m1_total_kg: f64,
    pub m1_enriched_kg: f64,
    pub m1_natural_kg: f64,
    pub m2_total_kg: f64,
    pub m2_enriched_kg: f64,
    pub m2_natural_kg: f64,
}

/// Total active mass of veto-only detectors per module, kg.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct VetoMass {
    pub m1_kg: f64,
    pub m2_kg: f64,
}

#[derive(Debug, Clone)]
struct RunOverride {
    status: StatusMaps,
    masses: MassSummary,
    veto_mass: VetoMass,
}

pub(crate) struct DetectorMeta {
    dataset: DataSetId,
    base_status: StatusMaps,
    base_masses: MassSummary,
    base_veto_mass: VetoMass,
    active_mass_g: HashMap<DetectorId, f64>,
    overrides: HashMap<RunNumber, RunOverride>,
}

impl DetectorMeta {
    pub(crate) fn new(info: &DatasetInfo) -> Self {
        let mut base_status = StatusMaps::default();
        let mut active_mass_g = HashMap::new();
        for det in &info.detectors {
            base_status.is_bad.insert(det.det_id, det.is_bad);
            base_status.is_veto_only.insert(det.det_id, det.is_veto_only);
            active_mass_g.insert(det.det_id, det.active_mass_g);
        }

        let mut base_masses = MassSummary::default();
        let mut base_veto_mass = VetoMass::default();
        for det in &info.detectors {
            if det.is_bad {
                continue;
            }
            if det.is_veto_only {
                match det.module {
                    Module::M1 => base_veto_mass.m1_kg += det.active_mass_g / G_PER_KG,
                    Module::M2 => base_veto_mass.m2_kg += det.active_mass_g / G_PER_KG,
                }
                continue;
            }
            accumulate_mass(&mut base_masses, det.module, det.active_mass_g, det.enriched, det.natural);
        }

        Self {
            dataset: info.dataset,
            base_status,
            base_masses,
            base_veto_mass,
            active_mass_g,
            overrides: HashMap::new(),
        }
    }

    /// Build the sparse run-indexed override table covering every run of the
    /// selection. One channel-selection read per run, at startup only.
    pub(crate) fn load_overrides(
        &mut self,
        dir: &DataDirectory,
        runs: &[RunNumber],
    ) -> SkimResult<()> {
        if !has_run_overrides(self.dataset) {
            return Ok(());
        }
        info!(
            "reading channel selection for {} runs of DS-{}",
            runs.len(),
            self.dataset
        );
        for &run in runs {
            let selection = dir.channel_selection(run)?;
            self.overrides.insert(run, self.build_override(&selection));
        }
        Ok(())
    }

    fn build_override(&self, selection: &[ChannelSelectionEntry]) -> RunOverride {
        let mut status = StatusMaps::default();
        let mut masses = MassSummary::default();
        let mut veto_mass = VetoMass::default();
        for entry in selection {
            // The override can only worsen the dataset-wide classification.
            let bad = entry.is_bad || self.base_status.is_bad(entry.det_id);
            let veto_only = entry.is_veto_only || self.base_status.is_veto_only(entry.det_id);
            status.is_bad.insert(entry.det_id, bad);
            status.is_veto_only.insert(entry.det_id, veto_only);

            let mass_g = self.active_mass_g(entry.det_id);
            if !bad && !veto_only {
                accumulate_mass(&mut masses, entry.module, mass_g, entry.enriched, entry.natural);
            } else if veto_only {
                match entry.module {
                    Module::M1 => veto_mass.m1_kg += mass_g / G_PER_KG,
                    Module::M2 => veto_mass.m2_kg += mass_g / G_PER_KG,
                }
            }
        }
        RunOverride {
            status,
            masses,
            veto_mass,
        }
    }

    pub(crate) fn dataset(&self) -> DataSetId {
        self.dataset
    }

    pub(crate) fn active_mass_g(&self, det_id: DetectorId) -> f64 {
        self.active_mass_g.get(&det_id).copied().unwrap_or(0.0)
    }

    pub(crate) fn status_for_run(&self, run: RunNumber) -> &StatusMaps {
        self.overrides
            .get(&run)
            .map(|o| &o.status)
            .unwrap_or(&self.base_status)
    }

    pub(crate) fn masses_for_run(&self, run: RunNumber) -> (MassSummary, VetoMass) {
        match self.overrides.get(&run) {
            Some(o) => (o.masses, o.veto_mass),
            None => (self.base_masses, self.base_veto_mass),
        }
    }

    pub(crate) fn is_bad(&self, run: RunNumber, det_id: DetectorId) -> bool {
        self.status_for_run(run).is_bad(det_id)
    }

    pub(crate) fn is_veto_only(&self, run: RunNumber, det_id: DetectorId) -> bool {
        self.status_for_run(run).is_veto_only(det_id)
    }
}

fn accumulate_mass(
    masses: &mut MassSummary,
    module: Module,
    mass_g: f64,
    enriched: bool,
    natural: bool,
) {
    let mass_kg = mass_g / G_PER_KG;
    match module {
        Module::M1 => {
            masses.m1_total_kg += mass_kg;
            if enriched {
                masses.m1_enriched_kg += mass_kg;
            } else if natural {
                masses.m1_natural_kg += mass_kg;
            }
        }
        Module::M2 => {
            masses.m2_total_kg += mass_kg;
            if enriched {
                masses.m2_enriched_kg += mass_kg;
            } else if natural {
                masses.m2_natural_kg += mass_kg;
            }
        }
    }
}
