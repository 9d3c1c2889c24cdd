//! Points Ledger
//!
//! Reconciles a point-accounting ledger: badge events are booked on the day
//! they were earned, and points left in the remaining-points snapshot are
//! spread over the years each category was active.
//!
//! # Architecture
//!
//! - **Source / Sink**: The document is read once and written once through traits
//! - **Single Pass**: The engine owns every map it mutates for the duration of one call
//! - **Verify Before Write**: Invariants are checked before the sink sees the result
//!
//! # Invariants
//!
//! - Remaining points never go negative
//! - Redistributed points sum exactly to what was remaining
//! - Emitted history is sorted by date with one entry per date

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod reconcile;
pub mod storage;
pub mod summary;
pub mod tracker;
pub mod types;

// Re-exports
pub use config::{AllocationConfig, Config, TrackingConfig};
pub use error::{Error, Result};
pub use reconcile::{Allocation, ReconcileReport, Reconciler};
pub use storage::{JsonFileStore, LedgerSink, LedgerSource, MemoryStore};
pub use summary::{summarize, TimelineSummary};
pub use tracker::{track_snapshot, TrackSummary};
pub use types::{Badge, HistoryEntry, LastRecorded, LedgerDocument, PointsSnapshot};
