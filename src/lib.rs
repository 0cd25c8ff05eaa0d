//! # Lambda Batch
//!
//! Batch azimuthal integration of X-ray detector files.
//!
//! ## Core Philosophy
//! - **Idempotent reruns** - Valid outputs are reused, images are not reopened
//! - **Resolution-aware caching** - Cakes are reused only at the requested shape
//! - **Never abort a set** - A failed image is recorded and the set continues
//!
//! ## Architecture
//! The library is split into a core engine (UI-agnostic) and presentation layers:
//! - `core` - Grouping, output cache, batch engine and watch mode
//! - `events` - Event-driven progress reporting
//! - `error` - Error types
//! - `cli` - Command-line interface (binary only)

pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use error::{BatchError, Result};

/// Initialize tracing for the library
///
/// `RUST_LOG` takes precedence over `default_level`. Calling this twice is a no-op.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
