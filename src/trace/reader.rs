use std::collections::{HashMap, HashSet};
use std::io::Read;

use tracing::warn;

use crate::error::{Error, Result};
use crate::schema::AttributeSchema;
use crate::storage::{EventRow, LogReader, Record};
use crate::trace::{InstantTrace, IntervalSides, IntervalTrace, Trace, TraceFilter};
use crate::types::{Attributes, EventKind};

/// Rebuilds traces from the rows of one document.
///
/// Instants are delivered as soon as they are read. Interval halves are held
/// back until the scan ends and then paired by correlation id, so a trace
/// can be built even when its end was written before its start.
pub(crate) struct TraceReader<'a> {
    schema: &'a AttributeSchema,
}

impl<'a> TraceReader<'a> {
    pub(crate) fn new(schema: &'a AttributeSchema) -> Self {
        TraceReader { schema }
    }

    /// Scan `frames` to exhaustion and hand each admitted trace to
    /// `consumer`. Returns the number of traces delivered.
    pub(crate) fn stream<R: Read>(
        &self,
        mut frames: LogReader<R>,
        filter: &TraceFilter,
        consumer: &mut dyn FnMut(Trace),
    ) -> Result<usize> {
        let mut delivered = 0;
        let mut deliver = |trace: Trace| {
            if filter.admits(&trace) {
                consumer(trace);
                delivered += 1;
            }
        };

        let mut starts = Vec::new();
        let mut ends = Vec::new();

        for frame in frames.by_ref() {
            let Record::EventRow(row) = frame?.record else {
                continue;
            };
            match EventKind::from_code(&row.event_type) {
                Ok(EventKind::Instant) => deliver(Trace::Instant(InstantTrace {
                    attributes: self.rehydrate(&row),
                    time_ns: row.time_ns,
                })),
                Ok(EventKind::IntervalStart) => starts.push(row),
                Ok(EventKind::IntervalEnd) => ends.push(row),
                Err(e) => warn!(row_id = row.row_id, error = %e, "skipping row"),
            }
        }

        // The range was committed when the stream began, so a tear inside
        // it means the file changed underneath us.
        if frames.is_torn() {
            return Err(Error::Corruption(format!(
                "torn frame at offset {} inside committed range",
                frames.committed_end()
            )));
        }

        let mut ends_by_start: HashMap<&str, Vec<&EventRow>> = HashMap::new();
        for end in &ends {
            if let Some(correlation_id) = end.correlation_id.as_deref() {
                ends_by_start.entry(correlation_id).or_default().push(end);
            }
        }

        for start in &starts {
            match ends_by_start.get(start.event_id.as_str()) {
                Some(matches) => {
                    for end in matches {
                        deliver(Trace::Interval(IntervalTrace::from_pair(
                            self.rehydrate(end),
                            IntervalSides::Both {
                                start_ns: start.time_ns,
                                end_ns: end.time_ns,
                            },
                        )));
                    }
                }
                None => deliver(Trace::Interval(IntervalTrace::from_pair(
                    self.rehydrate(start),
                    IntervalSides::StartOnly {
                        start_ns: start.time_ns,
                    },
                ))),
            }
        }

        let start_ids: HashSet<&str> = starts.iter().map(|s| s.event_id.as_str()).collect();
        for end in &ends {
            let matched = end
                .correlation_id
                .as_deref()
                .is_some_and(|id| start_ids.contains(id));
            if !matched {
                deliver(Trace::Interval(IntervalTrace::from_pair(
                    self.rehydrate(end),
                    IntervalSides::EndOnly {
                        end_ns: end.time_ns,
                    },
                )));
            }
        }

        Ok(delivered)
    }

    /// Map a row's populated slots back to attribute names.
    fn rehydrate(&self, row: &EventRow) -> Attributes {
        let mut attributes = Attributes::new();
        for (slot, value) in row.slots.iter().enumerate() {
            let Some(value) = value else { continue };
            match self.schema.slot_attribute(slot) {
                Ok(name) => {
                    attributes.insert(name.to_string(), value.clone());
                }
                Err(e) => warn!(row_id = row.row_id, error = %e, "skipping attribute"),
            }
        }
        attributes
    }
}
