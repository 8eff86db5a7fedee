//! The skim loop: stream source events in run order, rebuild run-scoped
//! state at every run boundary, and hand each surviving event to the
//! assembler and writer.

use crate::{
    assembler::{assemble_event, AssemblyInput},
    detectors::DetectorMeta,
    error::SkimResult,
    hits::select_hits,
    muon::MuonTimeline,
    output::SkimWriter,
    parameters::SkimConfig,
    psa::PsaCalibration,
    run_context::{load_run_context, PulserTracker, RunContext},
};
use mjd_run_data::{DataDirectory, DatasetInfo};
use mjd_skim_common::{Channel, RunNumber};
use std::path::PathBuf;
use tracing::{info, warn};

/// One input file of the job, tagged with the run it is expected to open
/// with. A file override may still span several runs; the loop follows the
/// run number on each record, not this tag.
pub(crate) struct EventSource {
    pub run: RunNumber,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
pub(crate) struct SkimStats {
    pub events_read: u64,
    pub pulser_events: u64,
    pub events_written: u64,
    pub hits_written: u64,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn run_skim(
    dir: &DataDirectory,
    sources: &[EventSource],
    meta: &DetectorMeta,
    info: &DatasetInfo,
    timeline: &mut MuonTimeline,
    psa: &dyn PsaCalibration,
    config: &SkimConfig,
    simulated: bool,
    writer: &mut SkimWriter,
) -> SkimResult<SkimStats> {
    let mut stats = SkimStats::default();
    let mut pulser = PulserTracker::new();
    let mut c0_channels: Vec<Channel> = Vec::new();
    let mut current: Option<RunContext> = None;
    let mut i_event: i64 = 0;

    for source in sources {
        info!("skimming run {} from {}", source.run, source.path.display());
        for record in dir.event_records_from(&source.path)? {
            let record = record?;
            stats.events_read += 1;

            if !matches!(&current, Some(c) if c.run == record.run) {
                // Run boundary: checkpoint the output and rebuild the
                // run-scoped state.
                writer.flush()?;
                let ctx = load_run_context(dir, meta, record.run)?;
                pulser.refresh_cards(&ctx);
                current = Some(ctx);
                i_event = 0;
            }
            let Some(ctx) = current.as_ref() else {
                continue;
            };
            let event_index = i_event;
            i_event += 1;

            if !simulated && record.event_cleaning_bits.is_pulser() {
                stats.pulser_events += 1;
                pulser.observe(&record, ctx);
                continue;
            }

            let muon = if simulated {
                None
            } else {
                timeline
                    .advance_nearest(record.run, record.clock_time_s())
                    .map(|(entry, _)| entry.clone())
            };

            let hits = select_hits(&record, ctx, meta, config, simulated, &mut c0_channels);
            let Some(out) = assemble_event(
                AssemblyInput {
                    record: &record,
                    i_event: event_index,
                    hits: &hits,
                    muon: muon.as_ref(),
                    c0_channels: &c0_channels,
                },
                ctx,
                meta,
                info,
                psa,
                &pulser,
                config,
            ) else {
                continue;
            };
            writer.write(&out)?;
            stats.events_written += 1;
            stats.hits_written += out.accepted_hits() as u64;
        }
    }

    writer.flush()?;
    if !c0_channels.is_empty() {
        warn!("channels seen with cryostat 0: {c0_channels:?}");
    }
    info!(
        "read {} events ({} pulser), wrote {} with {} hits",
        stats.events_read, stats.pulser_events, stats.events_written, stats.hits_written
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        psa::tests_support::RawPassthrough,
        testutil::{dataset_info, meta_with, record_with_hits, TestHit},
    };
    use mjd_run_data::{BoundaryType, ChannelMapEntry, RunMetadata};
    use mjd_skim_common::EventCleaningBits;
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    struct Fixture {
        root: PathBuf,
    }

    impl Fixture {
        fn new(tag: &str) -> Self {
            let root = std::env::temp_dir()
                .join(format!("mjd-skim-pipeline-{tag}-{}", std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).expect("fixture dir should create");
            Self { root }
        }

        fn write_run_meta(&self, run: RunNumber) {
            let meta = RunMetadata {
                run,
                start_boundary: BoundaryType::Normal,
                stop_boundary: BoundaryType::Normal,
                channel_map: vec![ChannelMapEntry {
                    high_channel: 692,
                    low_channel: 693,
                    crate_number: 1,
                    slot: 10,
                }],
                pulser_channels: vec![640],
            };
            let path = self.root.join(format!("run{run}_meta.json"));
            fs::write(&path, serde_json::to_string(&meta).expect("meta should encode"))
                .expect("meta should write");
        }

        fn write_events(&self, run: RunNumber, lines: &[String]) -> PathBuf {
            let path = self.root.join(format!("events_run{run}.jsonl"));
            fs::write(&path, lines.join("\n")).expect("events should write");
            path
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    fn event_line(run: RunNumber, hits: Vec<TestHit>, pulser: bool) -> String {
        let mut record = record_with_hits(hits);
        record.run = run;
        record.event_cleaning_bits = EventCleaningBits(if pulser { 0b10 } else { 0 });
        serde_json::to_string(&record).expect("record should encode")
    }

    fn skim_fixture(fixture: &Fixture, sources: &[EventSource], out: &Path) -> SkimStats {
        let dir = DataDirectory::new(&fixture.root);
        let meta = meta_with(1, &[(11, false, false)]);
        let mut timeline = MuonTimeline::from_muon_list(&[]);
        let mut writer = SkimWriter::create(out).expect("writer should create");
        let stats = run_skim(
            &dir,
            sources,
            &meta,
            &dataset_info(1),
            &mut timeline,
            &RawPassthrough,
            &SkimConfig::default(),
            true,
            &mut writer,
        )
        .expect("skim should succeed");
        writer.finish().expect("writer should finish");
        stats
    }

    #[test]
    fn events_stream_through_to_the_output_file() {
        let fixture = Fixture::new("stream");
        fixture.write_run_meta(9422);
        let path = fixture.write_events(
            9422,
            &[
                event_line(9422, vec![TestHit::new(692, 11, 50.0)], false),
                // Below every threshold: read but not written.
                event_line(9422, vec![TestHit::new(692, 11, 1.0)], false),
            ],
        );
        let out = fixture.root.join("skim.jsonl");
        let stats = skim_fixture(
            &fixture,
            &[EventSource { run: 9422, path }],
            &out,
        );
        assert_eq!(stats.events_read, 2);
        assert_eq!(stats.events_written, 1);
        assert_eq!(stats.hits_written, 1);
        let written = fs::read_to_string(&out).expect("output should read back");
        assert_eq!(written.lines().count(), 1);
    }

    #[test]
    fn rerun_is_byte_identical() {
        let fixture = Fixture::new("rerun");
        fixture.write_run_meta(9422);
        let path = fixture.write_events(
            9422,
            &[event_line(9422, vec![TestHit::new(692, 11, 50.0)], false)],
        );
        let first = fixture.root.join("skim-a.jsonl");
        let second = fixture.root.join("skim-b.jsonl");
        for out in [&first, &second] {
            skim_fixture(
                &fixture,
                &[EventSource {
                    run: 9422,
                    path: path.clone(),
                }],
                out,
            );
        }
        assert_eq!(
            fs::read(&first).expect("first output should read back"),
            fs::read(&second).expect("second output should read back")
        );
    }

    #[test]
    fn run_boundary_inside_one_file_reloads_context() {
        let fixture = Fixture::new("boundary");
        fixture.write_run_meta(9422);
        fixture.write_run_meta(9423);
        let path = fixture.write_events(
            9422,
            &[
                event_line(9422, vec![TestHit::new(692, 11, 50.0)], false),
                event_line(9423, vec![TestHit::new(692, 11, 50.0)], false),
            ],
        );
        let out = fixture.root.join("skim.jsonl");
        let stats = skim_fixture(
            &fixture,
            &[EventSource { run: 9422, path }],
            &out,
        );
        assert_eq!(stats.events_written, 2);
        // Per-run event indices restart at the boundary.
        let written = fs::read_to_string(&out).expect("output should read back");
        for line in written.lines() {
            let value: serde_json::Value =
                serde_json::from_str(line).expect("output line should parse");
            assert_eq!(value["i_event"], 0);
        }
    }
}
