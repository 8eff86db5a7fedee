use mjd_run_data::RunDataError;
use std::path::PathBuf;
use thiserror::Error;

pub(crate) type SkimResult<T> = Result<T, SkimError>;

#[derive(Debug, Error)]
pub(crate) enum SkimError {
    #[error(transparent)]
    Data(#[from] RunDataError),
    #[error("muon timeline is empty but the input is not simulated")]
    EmptyMuonTimeline,
    #[error("output path is not an existing directory: {0}")]
    NotADirectory(PathBuf),
    #[error("IO error writing {path}: {source}")]
    OutputIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise output record: {0}")]
    Serialize(#[from] serde_json::Error),
}
