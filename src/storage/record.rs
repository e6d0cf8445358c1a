use crate::error::{Error, Result};

/// Frame kinds stored in a trace document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    AttributeColumn = 0x01,
    EventRow = 0x02,
    Metadata = 0x03,
}

impl RecordType {
    fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(RecordType::AttributeColumn),
            0x02 => Ok(RecordType::EventRow),
            0x03 => Ok(RecordType::Metadata),
            _ => Err(Error::Corruption(format!("invalid record type: {}", byte))),
        }
    }
}

/// One persisted event row.
///
/// `slots[i]` holds the value for column `attribute_i`. Rows written before a
/// column existed are shorter, and their missing trailing slots read as null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRow {
    pub row_id: u64,
    /// A `Metadata` frame belongs to this row and must follow it.
    pub bounds_follow: bool,
    pub event_id: String,
    pub correlation_id: Option<String>,
    pub event_type: String,
    pub time_ns: i64,
    pub slots: Vec<Option<String>>,
}

impl EventRow {
    /// Value stored for `column`, or None when null or beyond this row's width.
    pub fn slot(&self, column: usize) -> Option<&str> {
        self.slots.get(column).and_then(|v| v.as_deref())
    }
}

/// A single frame in a trace document.
///
/// On-disk format:
/// ```text
/// ┌──────────┬─────────┬──────────┬──────────────┐
/// │ CRC (4B) │ Len (4B)│ Type(1B) │ Body (var)   │
/// └──────────┴─────────┴──────────┴──────────────┘
/// ```
///
/// Len counts Type + Body. CRC covers everything after the CRC field.
/// A frame whose CRC doesn't match, or that runs past the end of the file, is
/// a partial write: it and everything after it is the torn tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// One entry of the attribute header: `attribute_<column>` ↔ name.
    AttributeColumn { column: u32, attribute_name: String },
    EventRow(EventRow),
    /// Latest document bounds. The last one in the file wins.
    Metadata { earliest_ns: i64, latest_ns: i64 },
}

// Header sizes
pub(crate) const CRC_SIZE: usize = 4;
pub(crate) const LEN_SIZE: usize = 4;
const TYPE_SIZE: usize = 1;
pub(crate) const FRAME_HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE;

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self {
            Record::AttributeColumn { .. } => RecordType::AttributeColumn,
            Record::EventRow(_) => RecordType::EventRow,
            Record::Metadata { .. } => RecordType::Metadata,
        }
    }

    /// Serialize this record to a complete frame (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);

        // CRC and length are filled in once the body is known
        buf.extend_from_slice(&[0u8; FRAME_HEADER_SIZE]);
        buf.push(self.record_type() as u8);

        match self {
            Record::AttributeColumn {
                column,
                attribute_name,
            } => {
                buf.extend_from_slice(&column.to_le_bytes());
                put_str(&mut buf, attribute_name);
            }
            Record::EventRow(row) => {
                buf.extend_from_slice(&row.row_id.to_le_bytes());
                buf.push(row.bounds_follow as u8);
                put_str(&mut buf, &row.event_id);
                put_opt_str(&mut buf, row.correlation_id.as_deref());
                put_str(&mut buf, &row.event_type);
                buf.extend_from_slice(&row.time_ns.to_le_bytes());
                buf.extend_from_slice(&(row.slots.len() as u32).to_le_bytes());
                for slot in &row.slots {
                    put_opt_str(&mut buf, slot.as_deref());
                }
            }
            Record::Metadata {
                earliest_ns,
                latest_ns,
            } => {
                buf.extend_from_slice(&earliest_ns.to_le_bytes());
                buf.extend_from_slice(&latest_ns.to_le_bytes());
            }
        }

        let payload_len = (buf.len() - FRAME_HEADER_SIZE) as u32;
        buf[CRC_SIZE..FRAME_HEADER_SIZE].copy_from_slice(&payload_len.to_le_bytes());

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[0..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Deserialize one frame from the start of `data`.
    /// Returns the record and the number of bytes it occupied.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FRAME_HEADER_SIZE + TYPE_SIZE {
            return Err(Error::Corruption("record too short".into()));
        }

        let (stored_crc, payload_len) = split_frame_header(&data[..FRAME_HEADER_SIZE]);
        let total_len = FRAME_HEADER_SIZE + payload_len as usize;
        if data.len() < total_len {
            return Err(Error::Corruption("record truncated".into()));
        }

        if !crc_matches(stored_crc, &data[CRC_SIZE..total_len]) {
            return Err(Error::Corruption("CRC mismatch".into()));
        }

        let record = Self::decode_payload(&data[FRAME_HEADER_SIZE..total_len])?;
        Ok((record, total_len))
    }

    /// Parse Type + Body of a frame whose CRC has already been verified.
    pub(crate) fn decode_payload(payload: &[u8]) -> Result<Self> {
        let mut body = BodyReader::new(payload);
        let record_type = RecordType::from_u8(body.u8()?)?;

        let record = match record_type {
            RecordType::AttributeColumn => Record::AttributeColumn {
                column: body.u32()?,
                attribute_name: body.str()?,
            },
            RecordType::EventRow => {
                let row_id = body.u64()?;
                let bounds_follow = match body.u8()? {
                    0 => false,
                    1 => true,
                    other => {
                        return Err(Error::Corruption(format!("invalid bounds flag: {other}")));
                    }
                };
                let event_id = body.str()?;
                let correlation_id = body.opt_str()?;
                let event_type = body.str()?;
                let time_ns = body.i64()?;
                let slot_count = body.u32()? as usize;

                // Each slot needs at least its presence byte.
                if slot_count > body.remaining() {
                    return Err(Error::Corruption("slot count exceeds record".into()));
                }
                let mut slots = Vec::with_capacity(slot_count);
                for _ in 0..slot_count {
                    slots.push(body.opt_str()?);
                }

                Record::EventRow(EventRow {
                    row_id,
                    bounds_follow,
                    event_id,
                    correlation_id,
                    event_type,
                    time_ns,
                    slots,
                })
            }
            RecordType::Metadata => Record::Metadata {
                earliest_ns: body.i64()?,
                latest_ns: body.i64()?,
            },
        };

        if body.remaining() != 0 {
            return Err(Error::Corruption(format!(
                "{} trailing bytes in {:?} record",
                body.remaining(),
                record_type
            )));
        }

        Ok(record)
    }
}

/// Split the 8-byte frame header into (crc, payload length).
pub(crate) fn split_frame_header(header: &[u8]) -> (u32, u32) {
    let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (crc, len)
}

/// `covered` is the length field followed by the payload.
pub(crate) fn crc_matches(stored_crc: u32, covered: &[u8]) -> bool {
    crc32fast::hash(covered) == stored_crc
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_opt_str(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.push(1);
            put_str(buf, s);
        }
        None => buf.push(0),
    }
}

/// Cursor over a verified frame body. Every read is bounds-checked so that a
/// body that passed its CRC but is malformed reports corruption, not a panic.
struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BodyReader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Corruption("field length exceeds record".into()));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn str(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::Corruption("string is not valid UTF-8".into()))
    }

    fn opt_str(&mut self) -> Result<Option<String>> {
        match self.u8()? {
            0 => Ok(None),
            1 => self.str().map(Some),
            other => Err(Error::Corruption(format!("invalid presence byte: {other}"))),
        }
    }
}
