pub mod header;
pub mod reader;
pub mod record;
pub mod writer;

pub use header::FileHeader;
pub use reader::{Frame, LogReader};
pub use record::{EventRow, Record, RecordType};
pub use writer::{LogFile, LogWriter};

/// Controls when appended frames are fsync'd to disk.
///
/// Trade-off: durability vs throughput.
///   - EveryWrite: a successful append is on disk, slowest
///   - EveryNWrites: lose up to N appends on power loss
///   - EveryNMillis: bounded loss window, checked on each append
///
/// Every append still reaches the OS before it returns, so a process crash
/// loses nothing under any policy. Only power loss can.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// fsync after every append. Safest, slowest.
    #[default]
    EveryWrite,
    /// fsync every N appends. Batched durability.
    EveryNWrites(usize),
    /// fsync once at least this many milliseconds have passed since the last one.
    EveryNMillis(u64),
}
