use std::fs::File;

use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::MetadataTracker;
use crate::schema::AttributeSchema;
use crate::storage::{EventRow, LogFile, LogWriter, Record};
use crate::types::{validate_attribute_name, Event, EventKind};

/// Turns events into persisted rows.
///
/// Append protocol:
///   1. Validate the event. Nothing is touched on failure.
///   2. Persist any new attribute columns (one write, flushed).
///   3. Write the row and, when the bounds moved, the metadata record as a
///      single buffer. The row is flagged so a reader only accepts it
///      together with its metadata.
///   4. On a failed write the log cuts back to where the row began, or
///      poisons itself if it cannot.
///   5. Only then update the cached row counter and bounds.
pub(crate) struct EventWriter<F: LogFile = File> {
    log: LogWriter<F>,
    next_row_id: u64,
}

impl<F: LogFile> EventWriter<F> {
    pub(crate) fn new(log: LogWriter<F>, next_row_id: u64) -> Self {
        EventWriter { log, next_row_id }
    }

    pub(crate) fn log(&self) -> &LogWriter<F> {
        &self.log
    }

    pub(crate) fn sync(&mut self) -> Result<()> {
        self.log.sync()
    }

    pub(crate) fn append(
        &mut self,
        event: &Event,
        schema: &mut AttributeSchema,
        metadata: &mut MetadataTracker,
    ) -> Result<()> {
        let kind = event.kind()?;
        for name in event.attribute_names() {
            validate_attribute_name(name)?;
        }

        let names: Vec<&str> = event.attribute_names().collect();
        if !schema.missing(names.iter().copied()).is_empty() {
            schema.ensure_columns(&names, &mut self.log)?;
        }

        let mut slots = vec![None; schema.len()];
        for (name, value) in event.attributes() {
            let column = schema.resolve_column(name).ok_or_else(|| {
                Error::InternalInconsistency(format!("attribute {name:?} has no column"))
            })?;
            slots[column.index()] = Some(value.clone());
        }

        let time = event.time_ns();
        let proposed = match kind {
            EventKind::Instant => metadata.propose(Some(time), Some(time)),
            EventKind::IntervalStart => metadata.propose(Some(time), None),
            EventKind::IntervalEnd => metadata.propose(None, Some(time)),
        };

        let row = EventRow {
            row_id: self.next_row_id,
            bounds_follow: proposed.is_some(),
            event_id: event.id().to_string(),
            correlation_id: event.correlation_id().map(str::to_string),
            event_type: kind.code().to_string(),
            time_ns: time,
            slots,
        };

        let mut buf = Record::EventRow(row).encode();
        if let Some(bounds) = proposed {
            buf.extend(bounds.to_record().encode());
        }

        self.log.append(&buf)?;

        self.next_row_id += 1;
        if let Some(bounds) = proposed {
            metadata.apply(bounds);
            debug!(
                earliest = bounds.earliest_start_ns,
                latest = bounds.latest_end_ns,
                "document bounds changed"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::writer::FaultyFile;
    use crate::storage::{FileHeader, LogReader, SyncPolicy};
    use tempfile::tempdir;

    fn records(path: &std::path::Path) -> Vec<Record> {
        let file = File::open(path).unwrap();
        let end = file.metadata().unwrap().len();
        LogReader::open(&file, FileHeader::SIZE as u64, end)
            .unwrap()
            .map(|f| f.unwrap().record)
            .collect()
    }

    #[test]
    fn append_writes_columns_row_and_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");
        let log = LogWriter::create(&path, SyncPolicy::EveryWrite).unwrap();

        let mut writer = EventWriter::new(log, 0);
        let mut schema = AttributeSchema::new();
        let mut metadata = MetadataTracker::new();

        let event = Event::instant("e1", 10).with_name("tick").with_attribute("cpu", "0");
        writer.append(&event, &mut schema, &mut metadata).unwrap();

        let recs = records(&path);
        assert_eq!(recs.len(), 4);
        assert!(matches!(
            &recs[0],
            Record::AttributeColumn { column: 0, attribute_name } if attribute_name == "$event_name"
        ));
        assert!(matches!(
            &recs[1],
            Record::AttributeColumn { column: 1, attribute_name } if attribute_name == "cpu"
        ));
        match &recs[2] {
            Record::EventRow(row) => {
                assert!(row.bounds_follow);
                assert_eq!(row.slot(0), Some("tick"));
                assert_eq!(row.slot(1), Some("0"));
            }
            other => panic!("expected EventRow, got {other:?}"),
        }
        assert_eq!(
            recs[3],
            Record::Metadata {
                earliest_ns: 10,
                latest_ns: 10
            }
        );
        assert_eq!(metadata.earliest_start_ns(), 10);
    }

    #[test]
    fn unchanged_bounds_write_no_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");
        let log = LogWriter::create(&path, SyncPolicy::EveryWrite).unwrap();

        let mut writer = EventWriter::new(log, 0);
        let mut schema = AttributeSchema::new();
        let mut metadata = MetadataTracker::new();

        writer
            .append(&Event::instant("e1", 10), &mut schema, &mut metadata)
            .unwrap();
        writer
            .append(&Event::instant("e2", 10), &mut schema, &mut metadata)
            .unwrap();

        let recs = records(&path);
        assert_eq!(recs.len(), 3);
        assert!(matches!(&recs[2], Record::EventRow(row) if !row.bounds_follow && row.row_id == 1));
    }

    #[test]
    fn invalid_event_touches_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");
        let log = LogWriter::create(&path, SyncPolicy::EveryWrite).unwrap();
        let header_len = log.len();

        let mut writer = EventWriter::new(log, 0);
        let mut schema = AttributeSchema::new();
        let mut metadata = MetadataTracker::new();

        let bad_kind = Event::with_type_code("e1", None, "t", 5).with_attribute("a", "1");
        assert!(matches!(
            writer.append(&bad_kind, &mut schema, &mut metadata),
            Err(Error::UnsupportedEventKind(_))
        ));

        let bad_name = Event::instant("e2", 5)
            .with_attribute("ok", "1")
            .with_attribute(" bad", "2");
        assert!(matches!(
            writer.append(&bad_name, &mut schema, &mut metadata),
            Err(Error::InvalidAttributeName { .. })
        ));

        assert_eq!(writer.log().len(), header_len);
        assert!(schema.is_empty());
        assert!(!metadata.has_record());
    }

    #[test]
    fn failed_row_write_leaves_caches_untouched() {
        let log = LogWriter::with_file(FaultyFile::default(), 0, SyncPolicy::EveryWrite);
        let mut writer = EventWriter::new(log, 0);
        let mut schema = AttributeSchema::new();
        let mut metadata = MetadataTracker::new();

        writer
            .append(&Event::instant("e1", 10).with_name("a"), &mut schema, &mut metadata)
            .unwrap();
        let committed = writer.log().len();

        // Columns already exist, so only the row write reaches the disk.
        writer.log().file().fail_sync.set(true);
        let later = Event::instant("e2", 5).with_name("b");
        assert!(writer.append(&later, &mut schema, &mut metadata).is_err());

        assert_eq!(writer.log().len(), committed);
        assert_eq!(writer.log().file().data.borrow().len() as u64, committed);
        assert_eq!(writer.next_row_id, 1);
        assert_eq!(metadata.earliest_start_ns(), 10);
        assert!(!writer.log().is_poisoned());
    }

    #[test]
    fn failed_rollback_refuses_later_appends() {
        let log = LogWriter::with_file(FaultyFile::default(), 0, SyncPolicy::EveryWrite);
        let mut writer = EventWriter::new(log, 0);
        let mut schema = AttributeSchema::new();
        let mut metadata = MetadataTracker::new();

        writer
            .append(&Event::instant("e1", 10), &mut schema, &mut metadata)
            .unwrap();
        let committed = writer.log().len();

        writer.log().file().write_budget.set(Some(3));
        writer.log().file().fail_set_len.set(true);
        assert!(writer
            .append(&Event::instant("e2", 1), &mut schema, &mut metadata)
            .is_err());
        assert!(writer.log().is_poisoned());

        writer.log().file().write_budget.set(None);
        writer.log().file().fail_set_len.set(false);
        let with_new_column = Event::instant("e3", 2).with_attribute("new", "x");
        assert!(matches!(
            writer.append(&with_new_column, &mut schema, &mut metadata),
            Err(Error::Poisoned)
        ));

        assert_eq!(writer.log().len(), committed);
        assert_eq!(writer.next_row_id, 1);
        assert_eq!(metadata.earliest_start_ns(), 10);
        assert!(schema.is_empty());
    }
}
