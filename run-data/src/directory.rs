use crate::{
    error::{RunDataError, RunDataResult},
    metadata::{ChannelSelectionEntry, DatasetInfo, DatasetTable, PsaCalibrationTable, RunMetadata},
    records::{JsonLines, SourceEventRecord, VetoEvent},
};
use mjd_skim_common::{DataSetId, RunNumber};
use serde::de::DeserializeOwned;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Resolves the per-run and per-dataset files of a data directory.
///
/// Layout under the root:
/// `datasets.json`, `ds<N>.json`, `psa_calibration.json`,
/// `events_run<RUN>.jsonl`, `veto_run<RUN>.jsonl`, `run<RUN>_meta.json`,
/// `channel_selection/run<RUN>.json`.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    root: PathBuf,
}

impl DataDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn event_path(&self, run: RunNumber) -> PathBuf {
        self.root.join(format!("events_run{run}.jsonl"))
    }

    pub fn veto_path(&self, run: RunNumber) -> PathBuf {
        self.root.join(format!("veto_run{run}.jsonl"))
    }

    pub fn run_metadata_path(&self, run: RunNumber) -> PathBuf {
        self.root.join(format!("run{run}_meta.json"))
    }

    pub fn channel_selection_path(&self, run: RunNumber) -> PathBuf {
        self.root
            .join("channel_selection")
            .join(format!("run{run}.json"))
    }

    pub fn dataset_table(&self) -> RunDataResult<DatasetTable> {
        self.load_json(&self.root.join("datasets.json"))
    }

    pub fn dataset_info(&self, dataset: DataSetId) -> RunDataResult<DatasetInfo> {
        self.load_json(&self.root.join(format!("ds{dataset}.json")))
    }

    pub fn run_metadata(&self, run: RunNumber) -> RunDataResult<RunMetadata> {
        self.load_json(&self.run_metadata_path(run))
    }

    pub fn channel_selection(&self, run: RunNumber) -> RunDataResult<Vec<ChannelSelectionEntry>> {
        self.load_json(&self.channel_selection_path(run))
    }

    /// The PSA parameter store; an absent file is a valid (empty) store.
    pub fn psa_calibration(&self) -> RunDataResult<PsaCalibrationTable> {
        let path = self.root.join("psa_calibration.json");
        if !path.exists() {
            debug!("no PSA calibration table at {}", path.display());
            return Ok(PsaCalibrationTable { entries: vec![] });
        }
        self.load_json(&path)
    }

    pub fn event_records(&self, run: RunNumber) -> RunDataResult<JsonLines<SourceEventRecord>> {
        JsonLines::open(&self.event_path(run))
    }

    pub fn event_records_from(
        &self,
        path: &Path,
    ) -> RunDataResult<JsonLines<SourceEventRecord>> {
        JsonLines::open(path)
    }

    pub fn veto_events(&self, run: RunNumber) -> RunDataResult<JsonLines<VetoEvent>> {
        JsonLines::open(&self.veto_path(run))
    }

    pub fn has_veto_file(&self, run: RunNumber) -> bool {
        self.veto_path(run).exists()
    }

    /// Runs with an event file present, in ascending order.
    pub fn available_runs(&self) -> RunDataResult<Vec<RunNumber>> {
        let pattern = self.root.join("events_run*.jsonl");
        let pattern = pattern.to_string_lossy();
        let mut runs: Vec<RunNumber> = glob::glob(&pattern)
            .map_err(|e| RunDataError::Io {
                path: self.root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .and_then(|n| n.strip_prefix("events_run"))
                    .and_then(|n| n.strip_suffix(".jsonl"))
                    .and_then(|n| n.parse().ok())
            })
            .collect();
        runs.sort_unstable();
        Ok(runs)
    }

    fn load_json<T: DeserializeOwned>(&self, path: &Path) -> RunDataResult<T> {
        if !path.exists() {
            return Err(RunDataError::MissingFile(path.to_path_buf()));
        }
        let file = File::open(path).map_err(|e| RunDataError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| RunDataError::malformed(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_directory_convention() {
        let dir = DataDirectory::new("/data/mjd");
        assert_eq!(
            dir.event_path(9422),
            PathBuf::from("/data/mjd/events_run9422.jsonl")
        );
        assert_eq!(
            dir.veto_path(9422),
            PathBuf::from("/data/mjd/veto_run9422.jsonl")
        );
        assert_eq!(
            dir.run_metadata_path(9422),
            PathBuf::from("/data/mjd/run9422_meta.json")
        );
        assert_eq!(
            dir.channel_selection_path(9422),
            PathBuf::from("/data/mjd/channel_selection/run9422.json")
        );
    }
}
