use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the trace document store.
#[derive(Debug, Error)]
pub enum Error {
    /// `load` was called on a path that does not exist.
    #[error("trace document not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// `create` was called on a path that already exists.
    #[error("trace document already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// `load` was called on a document that is already loaded.
    #[error("trace document is already loaded")]
    AlreadyLoaded,

    /// The operation requires a loaded document.
    #[error("trace document is not loaded")]
    NotLoaded,

    /// Append on a document opened read-only.
    #[error("trace document is opened read-only")]
    ReadOnly,

    /// The event's type code is not one of the known kinds.
    #[error("unsupported event kind: {0:?}")]
    UnsupportedEventKind(String),

    /// An attribute name failed validation.
    #[error("invalid attribute name {name:?}: {reason}")]
    InvalidAttributeName { name: String, reason: &'static str },

    /// A populated slot has no attribute column. Raised while reading and
    /// handled by skipping the attribute.
    #[error("no attribute column for slot {column}")]
    SchemaInconsistency { column: usize },

    /// The attribute/column bijection would be violated. Should be unreachable.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption detected (CRC mismatch, bad format, etc).
    #[error("corruption: {0}")]
    Corruption(String),

    /// An append failed and could not be cut back. Appends are refused
    /// until the document is reloaded, which discards the leftover bytes.
    #[error("trace document writer poisoned by a failed rollback, reload to recover")]
    Poisoned,

    /// Storage failure surfaced from load, unload or a trace stream.
    #[error("failed to {operation} trace document: {source}")]
    TraceDocumentAccess {
        operation: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// An import was cancelled between events.
    #[error("import cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap a storage-level failure for the caller of `operation`.
    pub(crate) fn access(operation: &'static str, source: Error) -> Self {
        match source {
            // Already wrapped, or not a storage failure at all.
            e @ (Error::TraceDocumentAccess { .. }
            | Error::FileNotFound(_)
            | Error::AlreadyLoaded
            | Error::NotLoaded) => e,
            e => Error::TraceDocumentAccess {
                operation,
                source: Box::new(e),
            },
        }
    }

    /// True for failures of the underlying file, wrapped or not.
    pub fn is_storage_failure(&self) -> bool {
        match self {
            Error::Io(_) | Error::Corruption(_) | Error::Poisoned => true,
            Error::TraceDocumentAccess { source, .. } => source.is_storage_failure(),
            _ => false,
        }
    }

    /// True for document lifecycle misuse.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Error::AlreadyLoaded
                | Error::NotLoaded
                | Error::FileNotFound(_)
                | Error::AlreadyExists(_)
        )
    }
}

/// Result type alias used throughout the store.
pub type Result<T> = std::result::Result<T, Error>;
