//! # murmur Log
//!
//! Append-only log channels and the replication layer that carries them
//! between two peers.
//!
//! This crate provides:
//! - The [`AppendLog`] trait: append, positional (optionally waiting)
//!   reads, eviction, read cancellation and close
//! - The [`Storage`] factory trait and an in-memory implementation
//! - [`Replication`]: a multiplexer that runs over any `AsyncRead +
//!   AsyncWrite` pipe, exchanges rendezvous handshakes, and streams
//!   entries of attached logs to the remote peer on request
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │   Replication (rendezvous handshake, Want / Entry frames)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │   AppendLog channels (identified by key / discovery key)     │
//! ├──────────────────────────────────────────────────────────────┤
//! │   Wire (TCP socket, in-memory duplex, WebSocket adapter ...) │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod log;
pub mod replication;
pub mod storage;
pub mod wire;

pub use error::{LogError, LogResult};
pub use log::{AppendLog, DiscoveryKey, LogKey, MAX_REPLICA_GAP, MemoryLog};
pub use replication::{BoxedWire, ReplicateOptions, Replication, ReplicationConfig, Wire};
pub use storage::{MemoryStorage, OpenOptions, Storage};
pub use wire::{ENTRY_FRAME_OVERHEAD, max_entry_size};

/// Default upper bound on a single replication frame (8 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;
