//! Background execution of a batch run.

use super::executor::{BatchEngine, CancellationToken};
use super::types::RunSummary;
use crate::core::engine::IntegrationEngine;
use crate::events::EventSender;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// A run on its own thread, so callers can keep draining events
pub struct BatchWorker<E: IntegrationEngine + 'static> {
    handle: JoinHandle<(BatchEngine<E>, RunSummary)>,
    cancel: CancellationToken,
}

impl<E: IntegrationEngine + 'static> BatchWorker<E> {
    /// Move the engine onto a worker thread and process `paths` there
    pub fn spawn(
        mut engine: BatchEngine<E>,
        paths: Vec<PathBuf>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            debug!("Batch worker started with {} path(s)", paths.len());
            let summary = engine.process_selection(paths, &events, &token);
            (engine, summary)
        });

        Self { handle, cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run; the engine is handed back for the next run
    pub fn join(self) -> thread::Result<(BatchEngine<E>, RunSummary)> {
        self.handle.join()
    }
}
