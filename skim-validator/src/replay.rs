//! Lockstep replay: each skim record points back at its source event by run
//! and per-run event index; the shared fields must agree.

use mjd_run_data::{DataDirectory, JsonLines, RunDataError, SourceEventRecord};
use mjd_skim_common::{Channel, RunNumber};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

pub(crate) type ValidateResult<T> = Result<T, ValidateError>;

/// Structural problems are fatal; mere field disagreements are counted and
/// reported instead.
#[derive(Debug, Error)]
pub(crate) enum ValidateError {
    #[error(transparent)]
    Data(#[from] RunDataError),
    #[error("skim record {index}: event {i_event} out of range for run {run} ({events} source events)")]
    EventOutOfRange {
        index: u64,
        run: RunNumber,
        i_event: i64,
        events: usize,
    },
    #[error("skim record {index}: hit index {i_hit} out of range for its source event")]
    HitOutOfRange { index: u64, i_hit: usize },
    #[error("skim record {index}: {hits} hit indices but {channels} channels")]
    RaggedHits {
        index: u64,
        hits: usize,
        channels: usize,
    },
}

/// The subset of the skim record the replay checks. Everything else in the
/// line is ignored on purpose.
#[derive(Debug, Deserialize)]
struct SkimRecordLite {
    run: RunNumber,
    i_event: i64,
    i_hit: Vec<usize>,
    channel: Vec<Channel>,
    clock_time_s: f64,
    t_offset_ns: Vec<f64>,
}

#[derive(Debug, Default)]
pub(crate) struct Report {
    pub records: u64,
    pub runs: u64,
    pub mismatches: u64,
}

const CLOCK_TOLERANCE_S: f64 = 1e-9;

pub(crate) fn validate(dir: &DataDirectory, skim_path: &Path) -> ValidateResult<Report> {
    let mut report = Report::default();
    let mut current: Option<(RunNumber, Vec<SourceEventRecord>)> = None;

    for (index, record) in JsonLines::<SkimRecordLite>::open(skim_path)?.enumerate() {
        let record = record?;
        let index = index as u64;
        report.records += 1;

        if !matches!(&current, Some((run, _)) if *run == record.run) {
            info!("loading source events for run {}", record.run);
            let events = dir
                .event_records(record.run)?
                .collect::<Result<Vec<_>, _>>()?;
            current = Some((record.run, events));
            report.runs += 1;
        }
        let Some((_, events)) = current.as_ref() else {
            continue;
        };

        let source = usize::try_from(record.i_event)
            .ok()
            .and_then(|i| events.get(i))
            .ok_or(ValidateError::EventOutOfRange {
                index,
                run: record.run,
                i_event: record.i_event,
                events: events.len(),
            })?;

        if record.i_hit.len() != record.channel.len()
            || record.i_hit.len() != record.t_offset_ns.len()
        {
            return Err(ValidateError::RaggedHits {
                index,
                hits: record.i_hit.len(),
                channels: record.channel.len(),
            });
        }

        report.mismatches += check_event(index, &record, source)?;
    }
    Ok(report)
}

fn check_event(
    index: u64,
    record: &SkimRecordLite,
    source: &SourceEventRecord,
) -> ValidateResult<u64> {
    let mut mismatches = 0;

    if record.run != source.run {
        warn!(
            "record {index}: run {} but source says {}",
            record.run, source.run
        );
        mismatches += 1;
    }
    if (record.clock_time_s - source.clock_time_s()).abs() > CLOCK_TOLERANCE_S {
        warn!(
            "record {index}: clock time {} but source says {}",
            record.clock_time_s,
            source.clock_time_s()
        );
        mismatches += 1;
    }

    for (position, &i_hit) in record.i_hit.iter().enumerate() {
        if i_hit >= source.hit_count() {
            return Err(ValidateError::HitOutOfRange { index, i_hit });
        }
        if record.channel[position] != source.channel[i_hit] {
            warn!(
                "record {index} hit {position}: channel {} but source says {}",
                record.channel[position], source.channel[i_hit]
            );
            mismatches += 1;
        }
        if record.t_offset_ns[position] != source.t_offset_ns[i_hit] {
            warn!(
                "record {index} hit {position}: t_offset {} but source says {}",
                record.t_offset_ns[position], source.t_offset_ns[i_hit]
            );
            mismatches += 1;
        }
    }
    Ok(mismatches)
}
