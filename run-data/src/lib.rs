//! External data contract of the skim: the fixed record schema written by the
//! upstream processing chain, and the dataset-directory service that resolves
//! per-run and per-dataset files under a data root.
#![recursion_limit = "256"]

mod directory;
mod error;
mod metadata;
mod records;

pub use directory::DataDirectory;
pub use error::{RunDataError, RunDataResult};
pub use metadata::{
    AvseParams, BoundaryType, ChannelMapEntry, ChannelSelectionEntry, CurrentEstimator,
    DatasetInfo, DatasetRuns, DatasetTable, DetectorInfo, LinearParams, MuonListEntry,
    PsaCalibrationEntry, PsaCalibrationTable, RunMetadata,
};
pub use records::{JsonLines, SourceEventRecord, VetoEvent};
