//! Event channel built on crossbeam-channel.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use super::{BatchEvent, Event, ImageProgress, WatchEvent};
use crate::core::batch::SetStatistics;

/// Sending half, cloned into worker threads
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    pub fn new(sender: Sender<Event>) -> Self {
        Self { inner: sender }
    }

    /// Send an event; dropped silently once the receiver is gone so a run
    /// never fails because nobody is listening.
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }

    pub fn batch(&self, event: BatchEvent) {
        self.send(Event::Batch(event));
    }

    pub fn watch(&self, event: WatchEvent) {
        self.send(Event::Watch(event));
    }

    pub fn progress(&self, current: usize, total: usize, message: impl Into<String>) {
        self.batch(BatchEvent::Progress(ImageProgress {
            current,
            total,
            message: message.into(),
        }));
    }

    pub fn set_complete(&self, statistics: SetStatistics) {
        self.batch(BatchEvent::SetCompleted(statistics));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.batch(BatchEvent::Error {
            message: message.into(),
        });
    }
}

/// Receiving half, owned by the presentation layer
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event, `None` once every sender is dropped
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        match self.inner.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Everything queued right now, without blocking
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

/// Constructor for sender/receiver pairs
pub struct EventChannel;

impl EventChannel {
    /// Unbounded channel; events are small and a slow UI must not stall a run
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }

    /// Bounded channel for consumers that want backpressure
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        EventChannel
    }
}

/// A sender whose receiver is already gone
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}
