use mjd_skim_common::{DataSetId, RunNumber};
use std::path::PathBuf;
use thiserror::Error;

pub type RunDataResult<T> = Result<T, RunDataError>;

#[derive(Debug, Error)]
pub enum RunDataError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("run {0} does not belong to any known dataset")]
    UnknownRun(RunNumber),
    #[error("unknown dataset: DS-{0}")]
    UnknownDataset(DataSetId),
    #[error("dataset DS-{dataset} has no sub-range {sub_range}")]
    UnknownSubRange { dataset: DataSetId, sub_range: u32 },
    #[error("expected file is missing: {0}")]
    MissingFile(PathBuf),
}

impl RunDataError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        RunDataError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn malformed(path: &std::path::Path, source: serde_json::Error) -> Self {
        RunDataError::Malformed {
            path: path.to_path_buf(),
            source,
        }
    }
}
