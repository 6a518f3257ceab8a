//! Log and replication error types.

use std::io;
use thiserror::Error;

/// Log channel and replication errors
#[derive(Debug, Error)]
pub enum LogError {
    /// I/O error from the underlying wire
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Log has been closed
    #[error("log is closed")]
    Closed,

    /// A pending read was cancelled by the log owner
    #[error("read cancelled")]
    ReadCancelled,

    /// Entry not present and the read asked not to wait
    #[error("entry {0} is not available")]
    NotAvailable(u64),

    /// Entry was evicted after it had been read
    #[error("entry {0} was cleared")]
    Cleared(u64),

    /// Replicated entry too far past the end of the replica
    #[error("entry {position} is outside the replica window (length {len})")]
    OutOfWindow {
        /// Position the remote sent
        position: u64,
        /// Replica length when it arrived
        len: u64,
    },

    /// Append on a log we do not own
    #[error("log is not writable")]
    NotWritable,

    /// Replicated entry offered to a log we own
    #[error("log does not accept replicated entries")]
    NotDownloadable,

    /// Frame exceeds the configured bound
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge {
        /// Announced frame size
        size: usize,
        /// Configured limit
        limit: usize,
    },

    /// Frame encoding or decoding failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Remote peer joined a different rendezvous
    #[error("remote announced a different rendezvous discovery key")]
    DiscoveryMismatch,

    /// Replication stream has ended
    #[error("replication closed")]
    ReplicationClosed,
}

impl LogError {
    /// Returns true if this error only reports that a read was interrupted
    /// by the log being cancelled or closed
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::ReadCancelled | Self::Closed)
    }
}

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;
