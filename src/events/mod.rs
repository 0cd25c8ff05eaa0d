//! # Events Module
//!
//! Event-driven progress reporting for any presentation layer.
//!
//! ## Design
//! The batch engine never calls back into UI code. It emits events through
//! a channel; a CLI, GUI or log sink drains them on its own thread.
//!
//! | Callback        | Event                          |
//! |-----------------|--------------------------------|
//! | `onProgress`    | `BatchEvent::Progress`         |
//! | `onSetComplete` | `BatchEvent::SetCompleted`     |
//! | `onError`       | `BatchEvent::Error`            |
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         if let Event::Batch(BatchEvent::Progress(p)) = event {
//!             println!("{}/{} {}", p.current, p.total, p.message);
//!         }
//!     }
//! });
//!
//! engine.process_set(&file_set, &sender, &CancellationToken::new());
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
