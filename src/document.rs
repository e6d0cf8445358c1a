use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::metadata::{MetadataTracker, TimeBounds};
use crate::schema::{AttributeSchema, ColumnId};
use crate::storage::writer::{read_header, HeaderState};
use crate::storage::{FileHeader, LogReader, LogWriter, Record, SyncPolicy};
use crate::trace::reader::TraceReader;
use crate::trace::{Trace, TraceFilter};
use crate::types::Event;
use crate::writer::EventWriter;

/// How a document is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    pub sync_policy: SyncPolicy,
    /// Open without write access. Appends fail with `ReadOnly` and a torn
    /// tail is ignored instead of truncated.
    pub read_only: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_policy(mut self, sync_policy: SyncPolicy) -> Self {
        self.sync_policy = sync_policy;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// Snapshot of a loaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub event_count: u64,
    pub attribute_count: usize,
    pub file_size_bytes: u64,
    /// Bytes past the last committed frame found when the document was loaded.
    pub truncated_tail_bytes: u64,
}

enum Handle {
    Writable(EventWriter),
    ReadOnly { file: File, len: u64 },
}

impl Handle {
    fn file(&self) -> &File {
        match self {
            Handle::Writable(writer) => writer.log().file(),
            Handle::ReadOnly { file, .. } => file,
        }
    }

    /// Committed length. Scans never read past it.
    fn len(&self) -> u64 {
        match self {
            Handle::Writable(writer) => writer.log().len(),
            Handle::ReadOnly { len, .. } => *len,
        }
    }
}

struct Loaded {
    handle: Handle,
    schema: AttributeSchema,
    metadata: MetadataTracker,
    event_count: u64,
    truncated_tail_bytes: u64,
}

enum DocumentState {
    Unopened,
    Loaded(Loaded),
    Unloaded,
}

/// A persistent, single-file store of trace events.
///
/// Events go in through [`append`](Self::append); traces come out through
/// [`stream_traces`](Self::stream_traces). All operations on one document
/// are serialized by a single lock, so the consumer passed to
/// `stream_traces` must not call back into the same document.
///
/// # Example
///
/// ```no_run
/// use tracedoc::{Event, Options, TraceDocument, TraceFilter};
///
/// let doc = TraceDocument::create("run.trace", Options::default())?;
/// doc.append(&Event::interval_start("s1", 100).with_name("frame"))?;
/// doc.append(&Event::interval_end("e1", "s1", 250).with_name("frame"))?;
///
/// for trace in doc.collect_traces(&TraceFilter::default())? {
///     println!("{:?}", trace);
/// }
/// doc.unload()?;
/// # Ok::<(), tracedoc::Error>(())
/// ```
pub struct TraceDocument {
    path: PathBuf,
    options: Options,
    state: Mutex<DocumentState>,
}

impl std::fmt::Debug for TraceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceDocument")
            .field("path", &self.path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl TraceDocument {
    /// A handle on `path` with default options. Nothing is opened until
    /// [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, Options::default())
    }

    pub fn with_options(path: impl Into<PathBuf>, options: Options) -> Self {
        TraceDocument {
            path: path.into(),
            options,
            state: Mutex::new(DocumentState::Unopened),
        }
    }

    /// Create a new, empty document and return it loaded.
    pub fn create(path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        if options.read_only {
            return Err(Error::ReadOnly);
        }
        let path = path.into();
        let log = LogWriter::create(&path, options.sync_policy)?;
        info!(path = %path.display(), "created trace document");

        Ok(TraceDocument {
            path,
            options,
            state: Mutex::new(DocumentState::Loaded(Loaded {
                handle: Handle::Writable(EventWriter::new(log, 0)),
                schema: AttributeSchema::new(),
                metadata: MetadataTracker::new(),
                event_count: 0,
                truncated_tail_bytes: 0,
            })),
        })
    }

    /// Load the document at `path` if it exists, otherwise create it.
    pub fn open_or_create(path: impl Into<PathBuf>, options: Options) -> Result<Self> {
        let path = path.into();
        if path.exists() {
            let doc = Self::with_options(path, options);
            doc.load()?;
            Ok(doc)
        } else {
            Self::create(path, options)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), DocumentState::Loaded(_))
    }

    /// Open the file and replay it into the schema and metadata caches.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.lock();
        if matches!(*state, DocumentState::Loaded(_)) {
            return Err(Error::AlreadyLoaded);
        }
        if !self.path.exists() {
            return Err(Error::FileNotFound(self.path.clone()));
        }

        let loaded = self.open_loaded().map_err(|e| Error::access("load", e))?;
        info!(
            path = %self.path.display(),
            events = loaded.event_count,
            columns = loaded.schema.len(),
            read_only = self.options.read_only,
            "loaded trace document"
        );
        *state = DocumentState::Loaded(loaded);
        Ok(())
    }

    fn open_loaded(&self) -> Result<Loaded> {
        let file = OpenOptions::new()
            .read(true)
            .append(!self.options.read_only)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::FileNotFound(self.path.clone()),
                _ => Error::Io(e),
            })?;
        if let HeaderState::TornCreate { partial_len } = read_header(&file)? {
            return self.recover_torn_create(file, partial_len);
        }

        let file_len = file.metadata()?.len();
        let mut schema = AttributeSchema::new();
        let mut metadata = MetadataTracker::new();
        let mut event_count = 0u64;
        let mut next_row_id = 0u64;

        let mut frames = LogReader::open(&file, FileHeader::SIZE as u64, file_len)?;
        for frame in frames.by_ref() {
            match frame?.record {
                Record::AttributeColumn {
                    column,
                    attribute_name,
                } => schema
                    .insert(ColumnId(column), attribute_name)
                    .map_err(|e| match e {
                        Error::InternalInconsistency(msg) => Error::Corruption(msg),
                        other => other,
                    })?,
                Record::EventRow(row) => {
                    event_count += 1;
                    next_row_id = next_row_id.max(row.row_id.saturating_add(1));
                }
                Record::Metadata {
                    earliest_ns,
                    latest_ns,
                } => metadata = MetadataTracker::from_record(TimeBounds {
                    earliest_start_ns: earliest_ns,
                    latest_end_ns: latest_ns,
                }),
            }
        }
        let committed_len = frames.committed_end();
        drop(frames);

        let truncated_tail_bytes = file_len - committed_len;
        if truncated_tail_bytes > 0 {
            warn!(
                path = %self.path.display(),
                committed = committed_len,
                discarded = truncated_tail_bytes,
                truncate = !self.options.read_only,
                "torn tail found"
            );
        }

        let handle = if self.options.read_only {
            Handle::ReadOnly {
                file,
                len: committed_len,
            }
        } else {
            let log = LogWriter::resume(file, committed_len, self.options.sync_policy)?;
            Handle::Writable(EventWriter::new(log, next_row_id))
        };

        Ok(Loaded {
            handle,
            schema,
            metadata,
            event_count,
            truncated_tail_bytes,
        })
    }

    /// A crash during `create` can leave a file holding only the start of a
    /// header. Writable opens start it over as an empty document; read-only
    /// opens see it as empty.
    fn recover_torn_create(&self, file: File, partial_len: u64) -> Result<Loaded> {
        warn!(
            path = %self.path.display(),
            bytes = partial_len,
            reinitialize = !self.options.read_only,
            "document header was never completed"
        );

        let handle = if self.options.read_only {
            Handle::ReadOnly {
                file,
                len: FileHeader::SIZE as u64,
            }
        } else {
            let log = LogWriter::initialize(file, self.options.sync_policy)?;
            Handle::Writable(EventWriter::new(log, 0))
        };

        Ok(Loaded {
            handle,
            schema: AttributeSchema::new(),
            metadata: MetadataTracker::new(),
            event_count: 0,
            truncated_tail_bytes: partial_len,
        })
    }

    /// Sync and release the file, dropping the cached schema and metadata.
    pub fn unload(&self) -> Result<()> {
        let mut state = self.state.lock();
        let DocumentState::Loaded(loaded) = &mut *state else {
            return Err(Error::NotLoaded);
        };
        if let Handle::Writable(writer) = &mut loaded.handle {
            writer.sync().map_err(|e| Error::access("unload", e))?;
        }
        *state = DocumentState::Unloaded;
        info!(path = %self.path.display(), "unloaded trace document");
        Ok(())
    }

    /// Run `f` against the loaded state under the lock.
    fn with_loaded<T>(&self, f: impl FnOnce(&mut Loaded) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        match &mut *state {
            DocumentState::Loaded(loaded) => f(loaded),
            DocumentState::Unopened | DocumentState::Unloaded => Err(Error::NotLoaded),
        }
    }

    /// Persist one event. On error nothing about the event is visible,
    /// though attribute columns created for it may remain.
    pub fn append(&self, event: &Event) -> Result<()> {
        self.with_loaded(|loaded| {
            let Handle::Writable(writer) = &mut loaded.handle else {
                return Err(Error::ReadOnly);
            };
            writer.append(event, &mut loaded.schema, &mut loaded.metadata)?;
            loaded.event_count += 1;
            Ok(())
        })
    }

    /// Deliver every trace admitted by `filter` to `consumer`, returning how
    /// many were delivered.
    ///
    /// Instants come first in storage order, then intervals. A storage failure
    /// ends the stream with `TraceDocumentAccess`; traces delivered before it
    /// stay delivered.
    pub fn stream_traces<F: FnMut(Trace)>(
        &self,
        filter: &TraceFilter,
        mut consumer: F,
    ) -> Result<usize> {
        self.with_loaded(|loaded| {
            let frames = LogReader::open(
                loaded.handle.file(),
                FileHeader::SIZE as u64,
                loaded.handle.len(),
            )
            .map_err(|e| Error::access("stream", e))?;
            TraceReader::new(&loaded.schema)
                .stream(frames, filter, &mut consumer)
                .map_err(|e| Error::access("stream", e))
        })
    }

    pub fn collect_traces(&self, filter: &TraceFilter) -> Result<Vec<Trace>> {
        let mut traces = Vec::new();
        self.stream_traces(filter, |trace| traces.push(trace))?;
        Ok(traces)
    }

    /// Earliest start seen, or `UNDEFINED_START_TIME_NS`.
    pub fn earliest_event_start_time_ns(&self) -> Result<i64> {
        self.with_loaded(|loaded| Ok(loaded.metadata.earliest_start_ns()))
    }

    /// Latest end seen, or `UNDEFINED_END_TIME_NS`.
    pub fn latest_event_end_time_ns(&self) -> Result<i64> {
        self.with_loaded(|loaded| Ok(loaded.metadata.latest_end_ns()))
    }

    pub fn time_bounds(&self) -> Result<TimeBounds> {
        self.with_loaded(|loaded| Ok(loaded.metadata.bounds()))
    }

    /// Every attribute name ever stored, in column order.
    pub fn attribute_names(&self) -> Result<Vec<String>> {
        self.with_loaded(|loaded| {
            Ok(loaded
                .schema
                .attribute_names()
                .map(str::to_string)
                .collect())
        })
    }

    pub fn column_for_attribute(&self, attribute_name: &str) -> Result<Option<ColumnId>> {
        self.with_loaded(|loaded| Ok(loaded.schema.resolve_column(attribute_name)))
    }

    pub fn attribute_for_column(&self, column: ColumnId) -> Result<Option<String>> {
        self.with_loaded(|loaded| {
            Ok(loaded
                .schema
                .resolve_attribute(column)
                .map(str::to_string))
        })
    }

    pub fn stats(&self) -> Result<Stats> {
        self.with_loaded(|loaded| {
            Ok(Stats {
                event_count: loaded.event_count,
                attribute_count: loaded.schema.len(),
                file_size_bytes: loaded.handle.len(),
                truncated_tail_bytes: loaded.truncated_tail_bytes,
            })
        })
    }
}
