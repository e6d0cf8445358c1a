//! Document-wide time bounds.

use crate::storage::Record;
use crate::types::{UNDEFINED_END_TIME_NS, UNDEFINED_START_TIME_NS};

/// Earliest event start and latest event end seen by a document.
///
/// Both start out undefined, and the first value offered to a bound is taken
/// as is. Afterwards a bound only ever widens, so the result does not depend
/// on the order events were appended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub earliest_start_ns: i64,
    pub latest_end_ns: i64,
}

impl Default for TimeBounds {
    fn default() -> Self {
        TimeBounds::UNDEFINED
    }
}

impl TimeBounds {
    pub const UNDEFINED: TimeBounds = TimeBounds {
        earliest_start_ns: UNDEFINED_START_TIME_NS,
        latest_end_ns: UNDEFINED_END_TIME_NS,
    };

    pub fn has_start(&self) -> bool {
        self.earliest_start_ns != UNDEFINED_START_TIME_NS
    }

    pub fn has_end(&self) -> bool {
        self.latest_end_ns != UNDEFINED_END_TIME_NS
    }

    /// Fold a new start and/or end into the bounds. Returns true if either
    /// bound moved.
    pub fn update(&mut self, start_ns: Option<i64>, end_ns: Option<i64>) -> bool {
        let mut changed = false;

        if let Some(start) = start_ns {
            if !self.has_start() || start < self.earliest_start_ns {
                self.earliest_start_ns = start;
                changed = true;
            }
        }

        if let Some(end) = end_ns {
            if !self.has_end() || end > self.latest_end_ns {
                self.latest_end_ns = end;
                changed = true;
            }
        }

        changed
    }

    pub(crate) fn to_record(self) -> Record {
        Record::Metadata {
            earliest_ns: self.earliest_start_ns,
            latest_ns: self.latest_end_ns,
        }
    }
}

/// Cached copy of the persisted bounds.
///
/// Changes are proposed against a copy and only applied once the write that
/// carries them has succeeded.
#[derive(Debug, Default, Clone)]
pub struct MetadataTracker {
    bounds: TimeBounds,
    has_record: bool,
}

impl MetadataTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker for a document whose last metadata record held `bounds`.
    pub fn from_record(bounds: TimeBounds) -> Self {
        MetadataTracker {
            bounds,
            has_record: true,
        }
    }

    pub fn bounds(&self) -> TimeBounds {
        self.bounds
    }

    pub fn earliest_start_ns(&self) -> i64 {
        self.bounds.earliest_start_ns
    }

    pub fn latest_end_ns(&self) -> i64 {
        self.bounds.latest_end_ns
    }

    /// Whether a metadata record has been written yet.
    pub fn has_record(&self) -> bool {
        self.has_record
    }

    /// The bounds after folding in `start_ns`/`end_ns`, or None when
    /// nothing would change and no record needs writing.
    pub fn propose(&self, start_ns: Option<i64>, end_ns: Option<i64>) -> Option<TimeBounds> {
        let mut next = self.bounds;
        next.update(start_ns, end_ns).then_some(next)
    }

    /// Adopt bounds that have been persisted.
    pub fn apply(&mut self, bounds: TimeBounds) {
        self.bounds = bounds;
        self.has_record = true;
    }
}
