//! Traces: the values handed back to readers of a document.

pub(crate) mod reader;

use crate::types::{
    Attributes, NAME_ATTRIBUTE, UNDEFINED_END_TIME_NS, UNDEFINED_START_TIME_NS,
};

/// A single point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstantTrace {
    pub attributes: Attributes,
    pub time_ns: i64,
}

/// A span between a start and an end event. Either bound may be missing,
/// in which case it holds the matching undefined sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTrace {
    pub attributes: Attributes,
    pub start_time_ns: i64,
    pub end_time_ns: i64,
}

/// The sides of an interval that were found. There is no variant for
/// neither side, so such a trace cannot be built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalSides {
    Both { start_ns: i64, end_ns: i64 },
    StartOnly { start_ns: i64 },
    EndOnly { end_ns: i64 },
}

impl IntervalTrace {
    pub fn from_pair(attributes: Attributes, sides: IntervalSides) -> Self {
        let (start_time_ns, end_time_ns) = match sides {
            IntervalSides::Both { start_ns, end_ns } => (start_ns, end_ns),
            IntervalSides::StartOnly { start_ns } => (start_ns, UNDEFINED_END_TIME_NS),
            IntervalSides::EndOnly { end_ns } => (UNDEFINED_START_TIME_NS, end_ns),
        };
        IntervalTrace {
            attributes,
            start_time_ns,
            end_time_ns,
        }
    }

    pub fn has_start(&self) -> bool {
        self.start_time_ns != UNDEFINED_START_TIME_NS
    }

    pub fn has_end(&self) -> bool {
        self.end_time_ns != UNDEFINED_END_TIME_NS
    }

    /// Length of the interval, when both ends are known.
    pub fn duration_ns(&self) -> Option<i64> {
        if self.has_start() && self.has_end() {
            self.end_time_ns.checked_sub(self.start_time_ns)
        } else {
            None
        }
    }
}

/// A reconstructed trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trace {
    Instant(InstantTrace),
    Interval(IntervalTrace),
}

impl Trace {
    pub fn attributes(&self) -> &Attributes {
        match self {
            Trace::Instant(t) => &t.attributes,
            Trace::Interval(t) => &t.attributes,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes().get(name).map(String::as_str)
    }

    /// The `$event_name` attribute.
    pub fn name(&self) -> Option<&str> {
        self.attribute(NAME_ATTRIBUTE)
    }

    pub fn as_instant(&self) -> Option<&InstantTrace> {
        match self {
            Trace::Instant(t) => Some(t),
            Trace::Interval(_) => None,
        }
    }

    pub fn as_interval(&self) -> Option<&IntervalTrace> {
        match self {
            Trace::Interval(t) => Some(t),
            Trace::Instant(_) => None,
        }
    }

    /// `[start, end]` with unknown bounds widened to the ends of the timeline.
    pub fn span(&self) -> (i64, i64) {
        match self {
            Trace::Instant(t) => (t.time_ns, t.time_ns),
            Trace::Interval(t) => (
                if t.has_start() { t.start_time_ns } else { i64::MIN },
                if t.has_end() { t.end_time_ns } else { i64::MAX },
            ),
        }
    }
}

/// Time window a stream is restricted to. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFilter {
    pub earliest_time_ns: i64,
    pub latest_time_ns: i64,
}

impl Default for TraceFilter {
    fn default() -> Self {
        TraceFilter::unbounded()
    }
}

impl TraceFilter {
    /// Admits every trace.
    pub fn unbounded() -> Self {
        TraceFilter {
            earliest_time_ns: i64::MIN,
            latest_time_ns: i64::MAX,
        }
    }

    pub fn between(earliest_time_ns: i64, latest_time_ns: i64) -> Self {
        TraceFilter {
            earliest_time_ns,
            latest_time_ns,
        }
    }

    /// True when the trace's span overlaps the window.
    pub fn admits(&self, trace: &Trace) -> bool {
        let (start, end) = trace.span();
        start <= self.latest_time_ns && end >= self.earliest_time_ns
    }
}
