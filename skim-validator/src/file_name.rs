//! Parsing of the skim file-name convention
//! `skimDS<ds>[_run<run>|_<sub>][_small][_low].jsonl`.

use mjd_skim_common::{DataSetId, RunNumber};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Coverage {
    Run(RunNumber),
    SubRange(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SkimFileName {
    pub dataset: DataSetId,
    pub coverage: Coverage,
    pub minimal: bool,
    pub low_energy: bool,
}

impl SkimFileName {
    pub(crate) fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix("skimDS")?.strip_suffix(".jsonl")?;
        let mut parts = rest.split('_');
        let dataset = parts.next()?.parse().ok()?;

        let coverage = match parts.next()? {
            run if run.starts_with("run") => Coverage::Run(run.strip_prefix("run")?.parse().ok()?),
            sub => Coverage::SubRange(sub.parse().ok()?),
        };

        let mut minimal = false;
        let mut low_energy = false;
        for flag in parts {
            match flag {
                "small" => minimal = true,
                "low" => low_energy = true,
                _ => return None,
            }
        }
        Some(Self {
            dataset,
            coverage,
            minimal,
            low_energy,
        })
    }
}

impl fmt::Display for SkimFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DS-{} ", self.dataset)?;
        match self.coverage {
            Coverage::Run(run) => write!(f, "run {run}")?,
            Coverage::SubRange(sub) => write!(f, "sub-range {sub}")?,
        }
        if self.minimal {
            write!(f, " (minimal)")?;
        }
        if self.low_energy {
            write!(f, " (low-energy)")?;
        }
        Ok(())
    }
}
