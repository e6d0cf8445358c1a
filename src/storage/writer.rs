use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::storage::header::FileHeader;
use crate::storage::SyncPolicy;

/// The file operations a [`LogWriter`] needs beyond `Write`.
pub trait LogFile: Write {
    fn set_len(&self, len: u64) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl LogFile for File {
    fn set_len(&self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// Appends frames to a trace document.
///
/// The file is opened in append mode, so every write lands at the end even
/// while the same handle is used for scans.
///
/// Two layers of buffering:
///   file.write_all()  → OS page cache (on every append)
///   file.sync_all()   → physical disk (per SyncPolicy)
///
/// `len` only moves once an append has been written and synced as its
/// policy requires. A failed append is cut back to `len`; if that cut fails
/// the writer is poisoned and refuses appends until the document is reopened.
pub struct LogWriter<F: LogFile = File> {
    file: F,
    /// Length of the committed file contents.
    len: u64,
    sync_policy: SyncPolicy,
    writes_since_sync: usize,
    last_sync: Instant,
    poisoned: bool,
}

impl LogWriter<File> {
    /// Create a new document at `path` holding only the file header.
    /// Fails with `AlreadyExists` if the path exists.
    pub fn create(path: &Path, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_path_buf()),
                _ => Error::Io(e),
            })?;
        Self::initialize(file, sync_policy)
    }

    /// Discard whatever `file` holds and start it over as an empty document.
    /// The handle must have read and append access.
    pub fn initialize(mut file: File, sync_policy: SyncPolicy) -> Result<Self> {
        file.set_len(0)?;
        let header = FileHeader::default().encode();
        file.write_all(&header)?;
        file.sync_all()?;
        Ok(Self::with_file(file, header.len() as u64, sync_policy))
    }

    /// Open an existing document for appending. Anything past
    /// `committed_len` is a torn tail and is cut off before the first append.
    pub fn open(path: &Path, committed_len: u64, sync_policy: SyncPolicy) -> Result<Self> {
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        Self::resume(file, committed_len, sync_policy)
    }

    /// Take over a handle already opened with read and append access.
    pub fn resume(file: File, committed_len: u64, sync_policy: SyncPolicy) -> Result<Self> {
        if file.metadata()?.len() > committed_len {
            file.set_len(committed_len)?;
            file.sync_all()?;
        }
        Ok(Self::with_file(file, committed_len, sync_policy))
    }
}

impl<F: LogFile> LogWriter<F> {
    /// Wrap a handle whose first `len` bytes are committed and whose writes
    /// land at `len`.
    pub fn with_file(file: F, len: u64, sync_policy: SyncPolicy) -> Self {
        LogWriter {
            file,
            len,
            sync_policy,
            writes_since_sync: 0,
            last_sync: Instant::now(),
            poisoned: false,
        }
    }

    /// Append already-encoded frames as one write.
    /// Depending on SyncPolicy, may fsync after this write.
    ///
    /// On failure the file is cut back to the committed length and `len` is
    /// unchanged.
    pub fn append(&mut self, frames: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }

        if let Err(e) = self.write_frames(frames) {
            warn!(
                offset = self.len,
                bytes = frames.len(),
                error = %e,
                "append failed, rolling back"
            );
            if let Err(rollback_err) = self.file.set_len(self.len) {
                self.poisoned = true;
                error!(
                    offset = self.len,
                    error = %rollback_err,
                    "rollback failed, refusing appends until reopened"
                );
            }
            return Err(e);
        }

        self.len += frames.len() as u64;
        Ok(())
    }

    fn write_frames(&mut self, frames: &[u8]) -> Result<()> {
        self.file.write_all(frames)?;
        self.file.flush()?;
        self.writes_since_sync += 1;

        // Sync based on policy
        match self.sync_policy {
            SyncPolicy::EveryWrite => self.sync()?,
            SyncPolicy::EveryNWrites(n) => {
                if self.writes_since_sync >= n {
                    self.sync()?;
                }
            }
            SyncPolicy::EveryNMillis(ms) => {
                if self.last_sync.elapsed() >= Duration::from_millis(ms) {
                    self.sync()?;
                }
            }
        }

        Ok(())
    }

    /// Force fsync to disk. Ensures all buffered writes are durable.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Committed length of the document in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= FileHeader::SIZE as u64
    }

    /// True once a failed append could not be rolled back.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Appends since the last fsync.
    pub fn writes_since_sync(&self) -> usize {
        self.writes_since_sync
    }

    /// The underlying handle, for scanning.
    pub fn file(&self) -> &F {
        &self.file
    }
}

/// What the first bytes of a document hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeaderState {
    Valid,
    /// Fewer than `FileHeader::SIZE` bytes, all matching the start of a
    /// fresh header: a create that never finished writing it.
    TornCreate { partial_len: u64 },
}

/// Read and validate the header at the start of `file`.
pub(crate) fn read_header(mut file: &File) -> Result<HeaderState> {
    let mut buf = [0u8; FileHeader::SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    let bytes = &buf[..filled];
    if FileHeader::is_torn_prefix(bytes) {
        return Ok(HeaderState::TornCreate {
            partial_len: filled as u64,
        });
    }
    FileHeader::decode(bytes).map(|_| HeaderState::Valid)
}

/// In-memory file whose writes, syncs and truncations fail on demand.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FaultyFile {
    pub(crate) data: std::cell::RefCell<Vec<u8>>,
    /// Bytes still accepted before writes start failing. `None` is unlimited.
    pub(crate) write_budget: std::cell::Cell<Option<usize>>,
    pub(crate) fail_sync: std::cell::Cell<bool>,
    pub(crate) fail_set_len: std::cell::Cell<bool>,
}

#[cfg(test)]
impl Write for FaultyFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let accepted = match self.write_budget.get() {
            Some(0) => return Err(io::Error::other("injected write failure")),
            Some(budget) => {
                let n = budget.min(buf.len());
                self.write_budget.set(Some(budget - n));
                n
            }
            None => buf.len(),
        };
        self.data.get_mut().extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl LogFile for FaultyFile {
    fn set_len(&self, len: u64) -> io::Result<()> {
        if self.fail_set_len.get() {
            return Err(io::Error::other("injected truncate failure"));
        }
        self.data.borrow_mut().resize(len as usize, 0);
        Ok(())
    }

    fn sync_all(&self) -> io::Result<()> {
        if self.fail_sync.get() {
            return Err(io::Error::other("injected sync failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::record::Record;
    use std::io::{Seek, SeekFrom};
    use tempfile::tempdir;

    fn metadata(ns: i64) -> Vec<u8> {
        Record::Metadata {
            earliest_ns: ns,
            latest_ns: ns,
        }
        .encode()
    }

    #[test]
    fn create_writes_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");

        let writer = LogWriter::create(&path, SyncPolicy::EveryWrite).unwrap();
        assert_eq!(writer.len(), FileHeader::SIZE as u64);
        assert!(writer.is_empty());

        let mut file = writer.file();
        file.seek(SeekFrom::Start(0)).unwrap();
        assert!(matches!(read_header(file), Ok(HeaderState::Valid)));
    }

    #[test]
    fn create_refuses_existing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");
        std::fs::write(&path, b"x").unwrap();

        assert!(matches!(
            LogWriter::create(&path, SyncPolicy::EveryWrite),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn failed_sync_leaves_len_and_file_unchanged() {
        let mut writer = LogWriter::with_file(FaultyFile::default(), 0, SyncPolicy::EveryWrite);
        writer.append(&metadata(1)).unwrap();
        let committed = writer.len();

        writer.file().fail_sync.set(true);
        assert!(matches!(writer.append(&metadata(2)), Err(Error::Io(_))));
        assert_eq!(writer.len(), committed);
        assert_eq!(writer.file().data.borrow().len() as u64, committed);
        assert!(!writer.is_poisoned());

        // Appends continue at the committed end
        writer.file().fail_sync.set(false);
        writer.append(&metadata(3)).unwrap();
        assert_eq!(writer.file().data.borrow().len() as u64, writer.len());
    }

    #[test]
    fn partial_write_is_cut_back() {
        let mut writer = LogWriter::with_file(FaultyFile::default(), 0, SyncPolicy::EveryWrite);
        writer.append(&metadata(1)).unwrap();
        let committed = writer.len();

        writer.file().write_budget.set(Some(5));
        assert!(writer.append(&metadata(2)).is_err());
        assert_eq!(writer.len(), committed);
        assert_eq!(writer.file().data.borrow().len() as u64, committed);

        writer.file().write_budget.set(None);
        writer.append(&metadata(3)).unwrap();
        let data = writer.file().data.borrow().clone();
        assert_eq!(data.len() as u64, writer.len());
        let (second, _) = Record::decode(&data[committed as usize..]).unwrap();
        assert_eq!(
            second,
            Record::Metadata {
                earliest_ns: 3,
                latest_ns: 3
            }
        );
    }

    #[test]
    fn failed_rollback_poisons_writer() {
        let mut writer = LogWriter::with_file(FaultyFile::default(), 0, SyncPolicy::EveryWrite);
        writer.append(&metadata(1)).unwrap();
        let committed = writer.len();

        writer.file().fail_sync.set(true);
        writer.file().fail_set_len.set(true);
        assert!(matches!(writer.append(&metadata(2)), Err(Error::Io(_))));
        assert!(writer.is_poisoned());
        assert_eq!(writer.len(), committed);

        // Even with the disk healthy again nothing more is written.
        writer.file().fail_sync.set(false);
        writer.file().fail_set_len.set(false);
        let on_disk = writer.file().data.borrow().len();
        assert!(matches!(writer.append(&metadata(3)), Err(Error::Poisoned)));
        assert_eq!(writer.file().data.borrow().len(), on_disk);
        assert_eq!(writer.len(), committed);
    }

    #[test]
    fn deferred_sync_commits_on_write() {
        let mut writer =
            LogWriter::with_file(FaultyFile::default(), 0, SyncPolicy::EveryNWrites(10));
        writer.file().fail_sync.set(true);
        writer.append(&metadata(1)).unwrap();
        assert_eq!(writer.len(), writer.file().data.borrow().len() as u64);
        assert!(writer.sync().is_err());
    }

    #[test]
    fn short_header_prefix_is_torn_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");

        std::fs::write(&path, b"").unwrap();
        let file = File::open(&path).unwrap();
        assert_eq!(
            read_header(&file).unwrap(),
            HeaderState::TornCreate { partial_len: 0 }
        );

        std::fs::write(&path, &FileHeader::default().encode()[..7]).unwrap();
        let file = File::open(&path).unwrap();
        assert_eq!(
            read_header(&file).unwrap(),
            HeaderState::TornCreate { partial_len: 7 }
        );

        std::fs::write(&path, b"hello").unwrap();
        let file = File::open(&path).unwrap();
        assert!(matches!(read_header(&file), Err(Error::Corruption(_))));
    }

    #[test]
    fn initialize_restarts_torn_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");
        std::fs::write(&path, &FileHeader::default().encode()[..3]).unwrap();

        let file = OpenOptions::new().read(true).append(true).open(&path).unwrap();
        let mut writer = LogWriter::initialize(file, SyncPolicy::EveryWrite).unwrap();
        assert_eq!(writer.len(), FileHeader::SIZE as u64);
        writer.append(&metadata(1)).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), writer.len());

        let file = File::open(&path).unwrap();
        assert!(matches!(read_header(&file), Ok(HeaderState::Valid)));
    }

    #[test]
    fn open_cuts_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");

        let committed = {
            let mut writer = LogWriter::create(&path, SyncPolicy::EveryWrite).unwrap();
            writer.append(&metadata(1)).unwrap();
            writer.len()
        };
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAB; 5]).unwrap();
        drop(file);

        let writer = LogWriter::open(&path, committed, SyncPolicy::EveryWrite).unwrap();
        assert_eq!(writer.len(), committed);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed);
    }

    #[test]
    fn every_n_millis_defers_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.trace");

        let mut writer = LogWriter::create(&path, SyncPolicy::EveryNMillis(60_000)).unwrap();
        writer.append(&metadata(1)).unwrap();
        writer.append(&metadata(2)).unwrap();
        assert_eq!(writer.writes_since_sync(), 2);

        writer.sync().unwrap();
        assert_eq!(writer.writes_since_sync(), 0);
    }
}
