//! Watch mode: detect complete files and process them as they arrive.

use super::{CompletionDetector, DirectoryWatcher, FsChange, WatcherConfig};
use crate::core::batch::{BatchEngine, CancellationToken, SetStatistics};
use crate::core::cache::ArtifactKind;
use crate::core::engine::IntegrationEngine;
use crate::core::fileset::{group, is_container_file, RawFile};
use crate::error::WatcherError;
use crate::events::{EventSender, WatchEvent};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Sleep granularity while waiting for the next poll
const CANCEL_CHECK: Duration = Duration::from_millis(50);

/// Watches one directory and feeds complete file sets to a batch engine
pub struct WatchSession<E: IntegrationEngine> {
    batch: BatchEngine<E>,
    root: PathBuf,
    config: WatcherConfig,
    detector: CompletionDetector,
    /// Complete files not yet part of a processed set
    ready: Vec<PathBuf>,
    ready_changed: bool,
    changes_tx: Sender<FsChange>,
    changes_rx: Receiver<FsChange>,
    watcher: Option<DirectoryWatcher>,
    events: EventSender,
}

impl<E: IntegrationEngine> WatchSession<E> {
    pub fn new(
        batch: BatchEngine<E>,
        root: impl Into<PathBuf>,
        config: WatcherConfig,
        events: EventSender,
    ) -> Result<Self, WatcherError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(WatcherError::PathNotFound(root));
        }

        let (changes_tx, changes_rx) = unbounded();
        Ok(Self {
            batch,
            detector: CompletionDetector::new(config.stability_window),
            root,
            config,
            ready: Vec::new(),
            ready_changed: false,
            changes_tx,
            changes_rx,
            watcher: None,
            events,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn batch(&self) -> &BatchEngine<E> {
        &self.batch
    }

    pub fn batch_mut(&mut self) -> &mut BatchEngine<E> {
        &mut self.batch
    }

    /// Files still being written
    pub fn pending_count(&self) -> usize {
        self.detector.pending_count()
    }

    /// Complete files waiting for sibling tiles
    pub fn waiting(&self) -> &[PathBuf] {
        &self.ready
    }

    /// Channel end that filesystem changes are read from
    pub fn change_sender(&self) -> Sender<FsChange> {
        self.changes_tx.clone()
    }

    /// Register the notify watch and queue files that were never processed
    pub fn start(&mut self) -> Result<(), WatcherError> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let tx = self.changes_tx.clone();
        let mut watcher = DirectoryWatcher::new(self.config.recursive, move |change| {
            let _ = tx.send(change);
        })?;
        watcher.watch(&self.root)?;
        self.watcher = Some(watcher);

        info!("Watching {}", self.root.display());
        self.events.watch(WatchEvent::Started {
            path: self.root.clone(),
        });

        self.seed();
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), WatcherError> {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.unwatch(&self.root)?;
            info!("Stopped watching {}", self.root.display());
            self.events.watch(WatchEvent::Stopped {
                path: self.root.clone(),
            });
        }
        Ok(())
    }

    /// Existing container files without outputs are queued as complete
    pub fn seed(&mut self) -> usize {
        let existing: Vec<PathBuf> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_container_file(path))
            .collect();

        let mut seeded = 0;
        for path in existing {
            if self.detector.is_processed(&path) || self.has_output(&path) {
                continue;
            }
            self.detector.mark_processed(&path);
            self.ready.push(path);
            seeded += 1;
        }

        if seeded > 0 {
            info!("Found {} unprocessed file(s) in {}", seeded, self.root.display());
            self.ready_changed = true;
        }
        seeded
    }

    /// Whether the first enabled artifact of this file's set already exists
    fn has_output(&self, path: &Path) -> bool {
        let raw = RawFile::parse(path);
        let Some(name) = raw.base.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let layout = self.batch.layout();
        let exports = &self.batch.config().exports;
        let marker = |name: &str| match exports.patterns.iter().next() {
            Some(format) => Some(layout.pattern_path(name, *format)),
            None if exports.cake => Some(layout.cake_path(name, ArtifactKind::CakeIntensity)),
            None => None,
        };

        [name.to_string(), format!("{}_{:04}", name, 0)]
            .iter()
            .filter_map(|name| marker(name.as_str()))
            .any(|path| path.exists())
    }

    /// Feed one filesystem change into the detector at `at`
    pub fn ingest_at(&mut self, change: FsChange, at: Instant) {
        match change {
            FsChange::Written(path) => {
                if self.detector.record_event_at(&path, at) {
                    debug!("New file detected: {}", path.display());
                    self.events.watch(WatchEvent::FileDetected { path });
                }
            }
            FsChange::Removed(path) => {
                self.detector.forget(&path);
                let before = self.ready.len();
                self.ready.retain(|ready| ready != &path);
                if self.ready.len() != before {
                    debug!("Waiting tile removed: {}", path.display());
                    self.detector.release(&path);
                    self.ready_changed = true;
                }
            }
            FsChange::Error(message) => {
                warn!("Watch error: {}", message);
                self.events.watch(WatchEvent::Error { message });
            }
        }
    }

    pub fn run_cycle(&mut self, cancel: &CancellationToken) -> Vec<SetStatistics> {
        self.run_cycle_at(Instant::now(), cancel)
    }

    /// One poll: drain changes, promote complete files, process complete sets
    pub fn run_cycle_at(
        &mut self,
        now: Instant,
        cancel: &CancellationToken,
    ) -> Vec<SetStatistics> {
        let changes: Vec<FsChange> = self.changes_rx.try_iter().collect();
        for change in changes {
            self.ingest_at(change, now);
        }

        for path in self.detector.poll_at(now) {
            self.events.watch(WatchEvent::FileReady { path: path.clone() });
            self.ready.push(path);
            self.ready_changed = true;
        }

        if !self.ready_changed {
            return Vec::new();
        }
        self.ready_changed = false;
        self.process_ready(cancel)
    }

    fn process_ready(&mut self, cancel: &CancellationToken) -> Vec<SetStatistics> {
        let grouping = group(self.ready.clone());

        for incomplete in &grouping.incomplete {
            self.events.watch(WatchEvent::WaitingForTiles {
                base: incomplete.base.clone(),
                missing: incomplete.missing.iter().map(|t| t.to_string()).collect(),
            });
        }

        let mut completed = Vec::new();
        for set in &grouping.sets {
            if cancel.is_cancelled() {
                self.ready_changed = true;
                break;
            }

            info!("Processing new file set: {}", set.output_name());
            let stats = self.batch.process_set(set, &self.events, cancel);
            if stats.cancelled {
                self.ready_changed = true;
                completed.push(stats);
                break;
            }

            self.ready.retain(|path| !set.contains(path));
            completed.push(stats);
        }

        completed
    }

    /// Block until cancelled, polling on the configured cadence
    pub fn run(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Vec<SetStatistics>, WatcherError> {
        self.start()?;

        let mut completed = Vec::new();
        while !cancel.is_cancelled() {
            completed.extend(self.run_cycle(cancel));
            self.sleep_until_next_poll(cancel);
        }

        self.stop()?;
        Ok(completed)
    }

    fn sleep_until_next_poll(&self, cancel: &CancellationToken) {
        let deadline = Instant::now() + self.config.poll_interval;
        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_CHECK.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::batch::{BatchConfig, ExportFlags};
    use crate::core::engine::{PatternFormat, SyntheticEngine};
    use crate::events::{null_sender, BatchEvent, Event, EventChannel};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        output: PathBuf,
        calibration: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("incoming");
            let output = dir.path().join("processed");
            fs::create_dir_all(&root).unwrap();
            let calibration = dir.path().join("cal.poni");
            fs::write(&calibration, "Distance: 0.3\n").unwrap();
            Self {
                _dir: dir,
                root,
                output,
                calibration,
            }
        }

        fn session(&self, events: EventSender) -> WatchSession<SyntheticEngine> {
            self.session_with(events, ExportFlags::default())
        }

        fn session_with(
            &self,
            events: EventSender,
            exports: ExportFlags,
        ) -> WatchSession<SyntheticEngine> {
            let config = BatchConfig::builder(&self.calibration, &self.output)
                .points(16)
                .azimuth_bins(8)
                .exports(exports)
                .build();
            let batch = BatchEngine::new(config, SyntheticEngine::new(1, (8, 8))).unwrap();
            let watch = WatcherConfig {
                stability_window: Duration::from_secs(2),
                poll_interval: Duration::from_millis(10),
                recursive: true,
            };
            WatchSession::new(batch, &self.root, watch, events).unwrap()
        }

        fn write(&self, name: &str) -> PathBuf {
            let path = self.root.join(name);
            fs::write(&path, b"frames").unwrap();
            path
        }
    }

    #[test]
    fn missing_root_is_rejected() {
        let fx = Fixture::new();
        let config = BatchConfig::builder(&fx.calibration, &fx.output).build();
        let batch = BatchEngine::new(config, SyntheticEngine::new(1, (4, 4))).unwrap();

        let result = WatchSession::new(
            batch,
            fx.root.join("absent"),
            WatcherConfig::default(),
            null_sender(),
        );
        assert!(matches!(result, Err(WatcherError::PathNotFound(_))));
    }

    #[test]
    fn written_file_is_processed_after_window() {
        let fx = Fixture::new();
        let mut session = fx.session(null_sender());
        let cancel = CancellationToken::new();
        let path = fx.write("scan.nxs");

        let t0 = Instant::now();
        session.ingest_at(FsChange::Written(path), t0);
        assert_eq!(session.pending_count(), 1);

        assert!(session.run_cycle_at(t0 + Duration::from_secs(1), &cancel).is_empty());
        let done = session.run_cycle_at(t0 + Duration::from_secs(3), &cancel);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name, "scan");
        assert!(fx.output.join("scan.chi").is_file());
        assert_eq!(session.pending_count(), 0);
    }

    #[test]
    fn tiles_wait_for_their_siblings() {
        let fx = Fixture::new();
        let (sender, receiver) = EventChannel::new();
        let mut session = fx.session(sender);
        let cancel = CancellationToken::new();
        let t0 = Instant::now();

        session.ingest_at(FsChange::Written(fx.write("run_m1.nxs")), t0);
        session.ingest_at(FsChange::Written(fx.write("run_m2.nxs")), t0);
        assert!(session.run_cycle_at(t0 + Duration::from_secs(3), &cancel).is_empty());
        assert_eq!(session.waiting().len(), 2);
        assert!(receiver
            .drain()
            .iter()
            .any(|e| matches!(e, Event::Watch(WatchEvent::WaitingForTiles { .. }))));

        let later = t0 + Duration::from_secs(3);
        session.ingest_at(FsChange::Written(fx.write("run_m3.nxs")), later);
        let done = session.run_cycle_at(t0 + Duration::from_secs(6), &cancel);

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name, "run");
        assert!(session.waiting().is_empty());
    }

    #[test]
    fn seeding_skips_files_with_existing_patterns() {
        let fx = Fixture::new();
        fx.write("old.nxs");
        fx.write("new.nxs");
        fs::create_dir_all(&fx.output).unwrap();
        fs::write(fx.output.join("old.chi"), "done").unwrap();
        let mut session = fx.session(null_sender());

        assert_eq!(session.seed(), 1);
        let done = session.run_cycle(&CancellationToken::new());

        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name, "new");
    }

    #[test]
    fn seeding_looks_for_the_first_enabled_format() {
        let fx = Fixture::new();
        fx.write("old.nxs");
        fx.write("new.nxs");
        fs::create_dir_all(&fx.output).unwrap();
        fs::write(fx.output.join("old.xy"), "done").unwrap();
        let exports = ExportFlags {
            patterns: [PatternFormat::Xy].into_iter().collect(),
            cake: false,
        };
        let mut session = fx.session_with(null_sender(), exports);

        assert_eq!(session.seed(), 1);
        let done = session.run_cycle(&CancellationToken::new());
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name, "new");
    }

    #[test]
    fn removed_waiting_tile_is_not_grouped() {
        let fx = Fixture::new();
        let mut session = fx.session(null_sender());
        let cancel = CancellationToken::new();
        let t0 = Instant::now();

        let first = fx.write("run_m1.nxs");
        session.ingest_at(FsChange::Written(first.clone()), t0);
        session.ingest_at(FsChange::Written(fx.write("run_m2.nxs")), t0);
        session.run_cycle_at(t0 + Duration::from_secs(3), &cancel);
        assert_eq!(session.waiting().len(), 2);

        fs::remove_file(&first).unwrap();
        session.ingest_at(FsChange::Removed(first.clone()), t0 + Duration::from_secs(4));
        session.ingest_at(
            FsChange::Written(fx.write("run_m3.nxs")),
            t0 + Duration::from_secs(4),
        );
        let done = session.run_cycle_at(t0 + Duration::from_secs(7), &cancel);
        assert!(done.is_empty());
        assert!(!session.waiting().contains(&first));

        let rewritten = fx.write("run_m1.nxs");
        session.ingest_at(FsChange::Written(rewritten), t0 + Duration::from_secs(8));
        let done = session.run_cycle_at(t0 + Duration::from_secs(11), &cancel);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].name, "run");
    }

    #[test]
    fn events_after_completion_are_ignored() {
        let fx = Fixture::new();
        let mut session = fx.session(null_sender());
        let cancel = CancellationToken::new();
        let path = fx.write("scan.nxs");
        let t0 = Instant::now();

        session.ingest_at(FsChange::Written(path.clone()), t0);
        assert_eq!(session.run_cycle_at(t0 + Duration::from_secs(3), &cancel).len(), 1);

        session.ingest_at(FsChange::Written(path), t0 + Duration::from_secs(4));
        assert_eq!(session.pending_count(), 0);
        assert!(session.run_cycle_at(t0 + Duration::from_secs(8), &cancel).is_empty());
    }

    #[test]
    fn removed_pending_file_is_dropped() {
        let fx = Fixture::new();
        let mut session = fx.session(null_sender());
        let path = fx.write("scan.nxs");

        session.ingest_at(FsChange::Written(path.clone()), Instant::now());
        session.ingest_at(FsChange::Removed(path), Instant::now());

        assert_eq!(session.pending_count(), 0);
    }

    #[test]
    fn changes_arrive_through_the_channel() {
        let fx = Fixture::new();
        let (sender, receiver) = EventChannel::new();
        let mut session = fx.session(sender);
        let path = fx.write("scan.nxs");

        session
            .change_sender()
            .send(FsChange::Written(path.clone()))
            .unwrap();
        session.run_cycle(&CancellationToken::new());

        assert_eq!(session.pending_count(), 1);
        assert!(receiver
            .drain()
            .iter()
            .any(|e| matches!(e, Event::Watch(WatchEvent::FileDetected { .. }))));
    }

    #[test]
    fn cancelled_session_processes_nothing() {
        let fx = Fixture::new();
        fx.write("scan.nxs");
        let (sender, receiver) = EventChannel::new();
        let mut session = fx.session(sender);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let done = session.run(&cancel).unwrap();

        assert!(done.is_empty());
        let events = receiver.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::Watch(WatchEvent::Stopped { .. }))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, Event::Batch(BatchEvent::SetCompleted(_)))));
    }
}
