use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::error::{Error, Result};
use crate::storage::record::{split_frame_header, Record, CRC_SIZE, FRAME_HEADER_SIZE};

/// A decoded frame and the byte offset it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub offset: u64,
    pub record: Record,
}

/// Streams committed frames out of a trace document.
///
/// Frames are read one at a time, so the document never has to fit in memory.
/// Reading stops at the torn tail: the first frame that is truncated or fails
/// its CRC. That is where a crash interrupted a write, and nothing valid can
/// follow it because the file is append-only.
///
/// An `EventRow` with `bounds_follow` set is only committed once its
/// `Metadata` frame has been read. If the tail tears between the two, the row
/// is withheld and counted as part of the torn tail.
pub struct LogReader<R> {
    reader: R,
    /// Start of the next unread frame.
    offset: u64,
    /// Bytes past this offset are never read.
    end: u64,
    /// End of the last committed unit.
    committed_end: u64,
    /// Metadata frame already read as part of a row's commit unit.
    pending: Option<Frame>,
    torn: bool,
    failed: bool,
}

impl<'a> LogReader<BufReader<&'a File>> {
    /// Read frames of `file` in `[start, end)`.
    pub fn open(file: &'a File, start: u64, end: u64) -> Result<Self> {
        let mut handle = file;
        handle.seek(SeekFrom::Start(start))?;
        Ok(LogReader::new(BufReader::new(handle), start, end))
    }
}

impl<R: Read> LogReader<R> {
    /// `reader` must already be positioned at `start`.
    pub fn new(reader: R, start: u64, end: u64) -> Self {
        LogReader {
            reader,
            offset: start,
            end,
            committed_end: start,
            pending: None,
            torn: false,
            failed: false,
        }
    }

    /// End of the last committed unit returned so far. After the reader is
    /// exhausted this is where a writer may safely resume appending.
    pub fn committed_end(&self) -> u64 {
        self.committed_end
    }

    /// Whether reading stopped on a torn frame rather than at `end`.
    pub fn is_torn(&self) -> bool {
        self.torn
    }

    /// Read the next raw frame. Returns None at `end` or at a torn frame.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.torn || self.offset >= self.end {
            return Ok(None);
        }

        let remaining = self.end - self.offset;
        if remaining < FRAME_HEADER_SIZE as u64 {
            self.torn = true;
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let (stored_crc, payload_len) = split_frame_header(&header);

        let total_len = FRAME_HEADER_SIZE as u64 + payload_len as u64;
        if payload_len == 0 || total_len > remaining {
            self.torn = true;
            return Ok(None);
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.reader.read_exact(&mut payload)?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header[CRC_SIZE..]);
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            self.torn = true;
            return Ok(None);
        }

        let record = Record::decode_payload(&payload)?;
        let frame = Frame {
            offset: self.offset,
            record,
        };
        self.offset += total_len;
        Ok(Some(frame))
    }

    /// Read the next committed frame.
    pub fn next_committed(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }

        let Some(frame) = self.next_frame()? else {
            return Ok(None);
        };

        let bounds_follow = matches!(&frame.record, Record::EventRow(row) if row.bounds_follow);
        if !bounds_follow {
            self.committed_end = self.offset;
            return Ok(Some(frame));
        }

        match self.next_frame()? {
            Some(next) if matches!(next.record, Record::Metadata { .. }) => {
                self.committed_end = self.offset;
                self.pending = Some(next);
                Ok(Some(frame))
            }
            Some(next) => Err(Error::Corruption(format!(
                "event row at offset {} is followed by {:?} instead of its metadata",
                frame.offset,
                next.record.record_type()
            ))),
            None => {
                // Row without its metadata: roll the tail back to the row.
                self.torn = true;
                Ok(None)
            }
        }
    }
}

impl<R: Read> Iterator for LogReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_committed().transpose();
        if matches!(item, Some(Err(_))) {
            self.failed = true;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::EventRow;
    use std::io::Cursor;

    fn row(row_id: u64, bounds_follow: bool) -> Record {
        Record::EventRow(EventRow {
            row_id,
            bounds_follow,
            event_id: format!("e{row_id}"),
            correlation_id: None,
            event_type: "i".into(),
            time_ns: row_id as i64,
            slots: vec![],
        })
    }

    fn metadata(ns: i64) -> Record {
        Record::Metadata {
            earliest_ns: ns,
            latest_ns: ns,
        }
    }

    fn read_all(bytes: Vec<u8>) -> (Vec<Record>, u64, bool) {
        let end = bytes.len() as u64;
        let mut reader = LogReader::new(Cursor::new(bytes), 0, end);
        let records = reader
            .by_ref()
            .map(|f| f.unwrap().record)
            .collect::<Vec<_>>();
        (records, reader.committed_end(), reader.is_torn())
    }

    #[test]
    fn row_and_metadata_form_one_unit() {
        let mut bytes = row(0, true).encode();
        bytes.extend(metadata(5).encode());
        let len = bytes.len() as u64;

        let (records, committed_end, torn) = read_all(bytes);
        assert_eq!(records, vec![row(0, true), metadata(5)]);
        assert_eq!(committed_end, len);
        assert!(!torn);
    }

    #[test]
    fn row_missing_its_metadata_is_withheld() {
        let mut bytes = row(0, false).encode();
        let first_len = bytes.len() as u64;
        bytes.extend(row(1, true).encode());
        let mut meta = metadata(5).encode();
        meta.truncate(meta.len() - 2);
        bytes.extend(meta);

        let (records, committed_end, torn) = read_all(bytes);
        assert_eq!(records, vec![row(0, false)]);
        assert_eq!(committed_end, first_len);
        assert!(torn);
    }

    #[test]
    fn garbage_length_is_torn_tail() {
        let mut bytes = row(0, false).encode();
        let first_len = bytes.len() as u64;
        bytes.extend_from_slice(&[0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0x7F, 1]);

        let (records, committed_end, torn) = read_all(bytes);
        assert_eq!(records.len(), 1);
        assert_eq!(committed_end, first_len);
        assert!(torn);
    }

    #[test]
    fn row_followed_by_wrong_frame_is_corruption() {
        let mut bytes = row(0, true).encode();
        bytes.extend(row(1, false).encode());
        let end = bytes.len() as u64;

        let mut reader = LogReader::new(Cursor::new(bytes), 0, end);
        assert!(matches!(reader.next(), Some(Err(Error::Corruption(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn end_bound_is_respected() {
        let first = row(0, false).encode();
        let first_len = first.len() as u64;
        let mut bytes = first;
        bytes.extend(row(1, false).encode());

        let mut reader = LogReader::new(Cursor::new(bytes), 0, first_len);
        let records: Vec<_> = reader.by_ref().map(|f| f.unwrap()).collect();
        assert_eq!(records.len(), 1);
        assert!(!reader.is_torn());
    }
}
