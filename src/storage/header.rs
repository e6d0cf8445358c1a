use crate::error::{Error, Result};

/// Magic number to identify trace document files.
pub const DOCUMENT_MAGIC: u64 = 0x0045434152545343; // "CSTRACE\0"

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// The header sits at the start of every trace document.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Magic number (8B)                    │
/// │ Format version (4B)                  │
/// │ CRC of the 12 bytes above (4B)       │
/// └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u64,
    pub version: u32,
}

impl Default for FileHeader {
    fn default() -> Self {
        FileHeader {
            magic: DOCUMENT_MAGIC,
            version: FORMAT_VERSION,
        }
    }
}

impl FileHeader {
    /// Size of the header in bytes (fixed).
    pub const SIZE: usize = 8 + 4 + 4;

    /// Encode header to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// True if `data` is shorter than a header and could be the start of a
    /// freshly written one. The empty slice counts.
    pub fn is_torn_prefix(data: &[u8]) -> bool {
        data.len() < Self::SIZE && FileHeader::default().encode().starts_with(data)
    }

    /// Decode header from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Corruption("file too short to contain header".into()));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&data[0..8]);
        let magic = u64::from_le_bytes(magic);

        if magic != DOCUMENT_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic: expected {:#x}, got {:#x}",
                DOCUMENT_MAGIC, magic
            )));
        }

        let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let stored_crc = u32::from_le_bytes([data[12], data[13], data[14], data[15]]);
        if crc32fast::hash(&data[0..12]) != stored_crc {
            return Err(Error::Corruption("header CRC mismatch".into()));
        }

        if version != FORMAT_VERSION {
            return Err(Error::Corruption(format!(
                "unsupported format version {version}"
            )));
        }

        Ok(FileHeader { magic, version })
    }
}
