//! Integration tests for batch processing.
//!
//! These tests verify end-to-end behavior including:
//! - Idempotent reruns
//! - Cache invalidation on resolution change
//! - Failure containment per image
//! - Grouping of module tiles

use assert_fs::prelude::*;
use lambda_batch::core::batch::{BatchConfig, BatchEngine, CancellationToken, ExportFlags};
use lambda_batch::core::cache::{ArtifactProbe, FsProbe};
use lambda_batch::core::engine::{PatternFormat, SyntheticEngine};
use lambda_batch::error::ConfigError;
use lambda_batch::events::{null_sender, BatchEvent, Event, EventChannel};
use predicates::prelude::*;

struct Beamtime {
    temp: assert_fs::TempDir,
}

impl Beamtime {
    fn new() -> Self {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("ceo2.poni")
            .write_str("Detector: Pilatus2M\nDistance: 0.2\n")
            .unwrap();
        Self { temp }
    }

    fn file(&self, name: &str) -> std::path::PathBuf {
        let child = self.temp.child("raw").child(name);
        child.write_binary(b"container").unwrap();
        child.path().to_path_buf()
    }

    fn batch(&self, points: usize, engine: SyntheticEngine) -> BatchEngine<SyntheticEngine> {
        BatchEngine::new(self.config(points), engine).unwrap()
    }

    fn config(&self, points: usize) -> BatchConfig {
        BatchConfig::builder(
            self.temp.child("ceo2.poni").path(),
            self.temp.child("processed").path(),
        )
        .points(points)
        .azimuth_bins(24)
        .build()
    }
}

#[test]
fn rerun_performs_no_integration_work() {
    let beamtime = Beamtime::new();
    let paths = vec![beamtime.file("scan_00001.nxs"), beamtime.file("scan_00002.nxs")];
    let cancel = CancellationToken::new();

    let mut first = beamtime.batch(32, SyntheticEngine::new(3, (12, 12)));
    let summary = first.process_selection(paths.clone(), &null_sender(), &cancel);
    assert_eq!(summary.total_processed(), 6);
    assert_eq!(summary.total_skipped(), 0);

    let mut second = beamtime.batch(32, SyntheticEngine::new(3, (12, 12)));
    let summary = second.process_selection(paths, &null_sender(), &cancel);

    assert_eq!(second.engine().calls().work(), 0);
    assert_eq!(summary.total_skipped(), summary.total_images());
    assert_eq!(summary.total_processed(), summary.total_images());
}

#[test]
fn tile_group_produces_one_output_set() {
    let beamtime = Beamtime::new();
    let paths = vec![
        beamtime.file("lab6_m3.nxs"),
        beamtime.file("lab6_m1.nxs"),
        beamtime.file("lab6_m2.nxs"),
    ];
    let mut batch = beamtime.batch(32, SyntheticEngine::new(1, (12, 12)));

    let summary = batch.process_selection(paths, &null_sender(), &CancellationToken::new());

    assert_eq!(summary.sets.len(), 1);
    assert_eq!(summary.sets[0].name, "lab6");
    beamtime
        .temp
        .child("processed/lab6.chi")
        .assert(predicate::path::is_file());
    beamtime
        .temp
        .child("processed/lab6-param/lab6.int.cake.npy")
        .assert(predicate::path::is_file());
    beamtime
        .temp
        .child("processed/lab6-param/ceo2.poni")
        .assert(predicate::str::contains("Pilatus2M"));
}

#[test]
fn cake_shape_follows_resolution() {
    let beamtime = Beamtime::new();
    let paths = vec![beamtime.file("sample.h5")];
    let cancel = CancellationToken::new();

    let mut low = beamtime.batch(16, SyntheticEngine::new(1, (12, 12)));
    low.process_selection(paths.clone(), &null_sender(), &cancel);

    let mut high = beamtime.batch(40, SyntheticEngine::new(1, (12, 12)));
    let summary = high.process_selection(paths, &null_sender(), &cancel);

    assert_eq!(summary.total_skipped(), 0);
    let probe = FsProbe::new();
    let cake_dir = beamtime.temp.child("processed/sample-param");
    assert_eq!(
        probe.shape(cake_dir.child("sample.int.cake.npy").path()).unwrap(),
        vec![24, 80]
    );
    assert_eq!(
        probe.shape(cake_dir.child("sample.tth.cake.npy").path()).unwrap(),
        vec![80]
    );
    assert_eq!(
        probe.shape(cake_dir.child("sample.azi.cake.npy").path()).unwrap(),
        vec![24]
    );
}

#[test]
fn deleted_companion_regenerates_the_cake_group() {
    let beamtime = Beamtime::new();
    let paths = vec![beamtime.file("sample.nxs")];
    let cancel = CancellationToken::new();

    let mut first = beamtime.batch(16, SyntheticEngine::new(1, (12, 12)));
    first.process_selection(paths.clone(), &null_sender(), &cancel);

    let azimuth = beamtime.temp.child("processed/sample-param/sample.azi.cake.npy");
    std::fs::remove_file(azimuth.path()).unwrap();

    let mut second = beamtime.batch(16, SyntheticEngine::new(1, (12, 12)));
    second.process_selection(paths, &null_sender(), &cancel);

    let calls = second.engine().calls();
    assert_eq!(calls.integrate_2d, 1);
    assert_eq!(calls.integrate_1d, 0);
    azimuth.assert(predicate::path::is_file());
}

#[test]
fn failing_image_is_reported_and_the_rest_complete() {
    let beamtime = Beamtime::new();
    let paths = vec![beamtime.file("scan.nxs")];
    let engine = SyntheticEngine::new(5, (12, 12)).fail_integration_at(2);
    let mut batch = beamtime.batch(16, engine);
    let (sender, receiver) = EventChannel::new();

    let summary = batch.process_selection(paths, &sender, &CancellationToken::new());
    drop(sender);

    let stats = &summary.sets[0];
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 1);
    beamtime
        .temp
        .child("processed/scan_0002.chi")
        .assert(predicate::path::missing());
    beamtime
        .temp
        .child("processed/scan_0003.chi")
        .assert(predicate::path::is_file());

    let events: Vec<Event> = receiver.iter().collect();
    assert!(matches!(
        events.first(),
        Some(Event::Batch(BatchEvent::RunStarted { file_sets: 1, .. }))
    ));
    assert!(matches!(
        events.last(),
        Some(Event::Batch(BatchEvent::RunCompleted(_)))
    ));
}

#[test]
fn patterns_in_every_requested_format() {
    let beamtime = Beamtime::new();
    let paths = vec![beamtime.file("scan.nxs")];
    let exports = ExportFlags::none()
        .with_pattern(PatternFormat::Chi)
        .with_pattern(PatternFormat::Xy)
        .with_pattern(PatternFormat::Dat);
    let config = BatchConfig::builder(
        beamtime.temp.child("ceo2.poni").path(),
        beamtime.temp.child("processed").path(),
    )
    .points(16)
    .exports(exports)
    .build();
    let mut batch = BatchEngine::new(config, SyntheticEngine::new(1, (12, 12))).unwrap();

    batch.process_selection(paths, &null_sender(), &CancellationToken::new());

    let out = beamtime.temp.child("processed");
    out.child("scan.chi")
        .assert(predicate::str::contains("2-Theta Angle (Degrees)"));
    out.child("scan.xy").assert(predicate::str::starts_with("#"));
    out.child("scan.dat").assert(predicate::path::is_file());
    out.child("scan-param").assert(predicate::path::missing());
}

#[test]
fn directory_run_finds_containers_only() {
    let beamtime = Beamtime::new();
    beamtime.file("a.nxs");
    beamtime.file("b.h5");
    beamtime.file("c_m1.nxs");
    beamtime.file("notes.txt");
    let mut batch = beamtime.batch(16, SyntheticEngine::new(1, (12, 12)));

    let summary = batch
        .process_directory(
            beamtime.temp.child("raw").path(),
            &null_sender(),
            &CancellationToken::new(),
        )
        .unwrap();

    let names: Vec<&str> = summary.sets.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(summary.dropped_groups.len(), 1);
}

#[test]
fn unusable_calibration_stops_the_run() {
    let beamtime = Beamtime::new();
    let config = BatchConfig::builder(
        beamtime.temp.child("missing.poni").path(),
        beamtime.temp.child("processed").path(),
    )
    .build();

    let result = BatchEngine::new(config, SyntheticEngine::new(1, (12, 12)));

    assert!(matches!(result, Err(ConfigError::CalibrationNotFound { .. })));
    beamtime
        .temp
        .child("processed")
        .assert(predicate::path::missing());
}
