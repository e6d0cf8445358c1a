//! # Trace Document Store
//!
//! Persists trace events (instant markers and the two halves of intervals)
//! into a single append-only file, and rebuilds them into traces on demand.
//!
//! ## Core idea
//! Events never change once written, so the file is a log: attribute column
//! definitions, event rows and document bounds are appended as CRC-framed
//! records. Reading a document replays the log. A crash can only tear the
//! last write, and that torn tail is dropped on the next open.
//!
//! Attribute names are open-ended. Each new name is given the next column
//! (`attribute_0`, `attribute_1`, …) and rows store values by column.

pub mod document;
pub mod error;
pub mod import;
pub mod metadata;
pub mod schema;
pub mod storage;
pub mod trace;
pub mod types;
mod writer;

// Public re-exports for the top-level API
pub use document::{Options, Stats, TraceDocument};
pub use error::{Error, Result};
pub use import::{CancellationToken, EventSource, ImportSummary, Importer, VecEventSource};
pub use metadata::TimeBounds;
pub use schema::ColumnId;
pub use storage::SyncPolicy;
pub use trace::{InstantTrace, IntervalSides, IntervalTrace, Trace, TraceFilter};
pub use types::{
    Attributes, Event, EventKind, NAME_ATTRIBUTE, UNDEFINED_END_TIME_NS, UNDEFINED_START_TIME_NS,
};
