//! Bulk loading of events from raw trace sources.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::document::{Options, TraceDocument};
use crate::error::{Error, Result};
use crate::types::Event;

/// Something that can replay a stream of events, such as a raw trace file.
///
/// The importer streams each source twice (a counting pass, then the real
/// one), so a source must yield the same events every time it is streamed.
pub trait EventSource {
    /// Feed every event to `sink` in source order. If `sink` fails the
    /// source must stop and return that error.
    fn stream_events(&mut self, sink: &mut dyn FnMut(Event) -> Result<()>) -> Result<()>;
}

/// An in-memory source.
#[derive(Debug, Clone, Default)]
pub struct VecEventSource {
    events: Vec<Event>,
}

impl VecEventSource {
    pub fn new(events: Vec<Event>) -> Self {
        VecEventSource { events }
    }

    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<Event>> for VecEventSource {
    fn from(events: Vec<Event>) -> Self {
        VecEventSource::new(events)
    }
}

impl EventSource for VecEventSource {
    fn stream_events(&mut self, sink: &mut dyn FnMut(Event) -> Result<()>) -> Result<()> {
        for event in &self.events {
            sink(event.clone())?;
        }
        Ok(())
    }
}

/// Shared flag for stopping an import from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Outcome of a finished import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub sources: usize,
    /// Events counted in the first pass.
    pub expected_events: u64,
    pub imported_events: u64,
}

/// Copies events from sources into a document.
pub struct Importer<'a> {
    document: &'a TraceDocument,
    token: CancellationToken,
}

impl<'a> Importer<'a> {
    pub fn new(document: &'a TraceDocument, token: CancellationToken) -> Self {
        Importer { document, token }
    }

    /// Count the events in every source, then append them all in source
    /// order. Cancellation is checked between events. The first failure of
    /// a source or of the document ends the import; events appended before
    /// it stay in the document.
    pub fn import(&self, sources: &mut [&mut dyn EventSource]) -> Result<ImportSummary> {
        let mut summary = ImportSummary {
            sources: sources.len(),
            ..ImportSummary::default()
        };

        for source in sources.iter_mut() {
            source.stream_events(&mut |_| {
                self.check_cancelled()?;
                summary.expected_events += 1;
                Ok(())
            })?;
        }
        info!(
            sources = summary.sources,
            events = summary.expected_events,
            "importing events"
        );

        for (index, source) in sources.iter_mut().enumerate() {
            let before = summary.imported_events;
            source.stream_events(&mut |event| {
                self.check_cancelled()?;
                self.document.append(&event)?;
                summary.imported_events += 1;
                Ok(())
            })?;
            debug!(
                source = index,
                events = summary.imported_events - before,
                "imported source"
            );
        }

        info!(events = summary.imported_events, "import finished");
        Ok(summary)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Create a new document at `output` and import every source into it.
pub fn assemble(
    output: impl Into<PathBuf>,
    options: Options,
    sources: &mut [&mut dyn EventSource],
    token: CancellationToken,
) -> Result<(TraceDocument, ImportSummary)> {
    let document = TraceDocument::create(output, options)?;
    let summary = Importer::new(&document, token).import(sources)?;
    Ok((document, summary))
}
