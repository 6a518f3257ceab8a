//! Append-only log channels.
//!
//! A log is identified by a 32-byte key; its discovery key (a keyed hash of
//! the key) is what travels on the wire, so an observer of the replication
//! stream never learns the log key itself.
//!
//! Only the owner of a log appends to it. A replica receives entries from
//! the remote owner through [`AppendLog::put`] and serves them to local
//! readers through [`AppendLog::get`].

use crate::error::{LogError, LogResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// 32-byte log key
pub type LogKey = [u8; 32];

/// 32-byte discovery key, safe to announce on the wire
pub type DiscoveryKey = [u8; 32];

/// How far past its length a replica accepts a replicated entry
pub const MAX_REPLICA_GAP: u64 = 4096;

/// Append-only log channel.
#[async_trait]
pub trait AppendLog: Send + Sync {
    /// Human-readable name given at open time
    fn name(&self) -> &str;

    /// Log key
    fn key(&self) -> &LogKey;

    /// Discovery key derived from the log key
    fn discovery_key(&self) -> &DiscoveryKey;

    /// Whether the local peer owns (and may append to) this log
    fn writable(&self) -> bool;

    /// Number of positions known to this log, including cleared ones
    fn len(&self) -> u64;

    /// Returns true if no entry was ever appended or received
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once [`AppendLog::close`] has completed
    fn is_closed(&self) -> bool;

    /// Wait until the log is usable.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] if the log was already closed.
    async fn ready(&self) -> LogResult<()>;

    /// Append an entry and return its position.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NotWritable`] on a replica and
    /// [`LogError::Closed`] after close.
    async fn append(&self, data: Vec<u8>) -> LogResult<u64>;

    /// Read the entry at `position`, waiting for it to arrive if `wait`.
    ///
    /// # Errors
    ///
    /// - [`LogError::NotAvailable`] if absent and `wait` is false
    /// - [`LogError::Cleared`] if the entry was evicted
    /// - [`LogError::ReadCancelled`] if [`AppendLog::cancel_pending_reads`]
    ///   ran while waiting
    /// - [`LogError::Closed`] if the log closed while waiting
    async fn get(&self, position: u64, wait: bool) -> LogResult<Vec<u8>>;

    /// Store a replicated entry received from the remote owner.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::NotDownloadable`] on a log we own and
    /// [`LogError::OutOfWindow`] for a position more than
    /// [`MAX_REPLICA_GAP`] past the current length.
    async fn put(&self, position: u64, data: Vec<u8>) -> LogResult<()>;

    /// Evict the entry at `position`. The position stays counted.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Closed`] after close.
    async fn clear(&self, position: u64) -> LogResult<()>;

    /// Fail every read currently waiting on this log with
    /// [`LogError::ReadCancelled`]
    fn cancel_pending_reads(&self);

    /// Close the log, failing pending reads. Idempotent.
    ///
    /// # Errors
    ///
    /// Storage backends may fail to release their resources.
    async fn close(&self) -> LogResult<()>;
}

#[derive(Debug)]
enum Slot {
    Missing,
    Present(Vec<u8>),
    Cleared,
}

#[derive(Debug, Default)]
struct LogState {
    // Position of `slots[0]`; everything below was cleared and dropped
    base: u64,
    slots: VecDeque<Slot>,
    cancel_epoch: u64,
    closed: bool,
}

impl LogState {
    fn len(&self) -> u64 {
        self.base + self.slots.len() as u64
    }

    /// Index into `slots`, `None` below the base or beyond `usize`
    fn index(&self, position: u64) -> Option<usize> {
        position
            .checked_sub(self.base)
            .and_then(|offset| usize::try_from(offset).ok())
    }

    fn compact(&mut self) {
        while matches!(self.slots.front(), Some(Slot::Cleared)) {
            self.slots.pop_front();
            self.base += 1;
        }
    }
}

/// In-memory [`AppendLog`]
pub struct MemoryLog {
    name: String,
    key: LogKey,
    discovery_key: DiscoveryKey,
    writable: bool,
    state: Mutex<LogState>,
    changed: Notify,
}

impl MemoryLog {
    /// Create an empty log
    #[must_use]
    pub fn new(name: impl Into<String>, key: LogKey, writable: bool) -> Self {
        Self {
            name: name.into(),
            key,
            discovery_key: murmur_crypto::hash::discovery_key(&key),
            writable,
            state: Mutex::new(LogState::default()),
            changed: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of slots held in memory
    #[must_use]
    pub fn resident(&self) -> usize {
        self.state().slots.len()
    }
}

impl fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLog")
            .field("name", &self.name)
            .field("discovery_key", &hex::encode(&self.discovery_key[..8]))
            .field("writable", &self.writable)
            .field("len", &self.len())
            .finish()
    }
}

#[async_trait]
impl AppendLog for MemoryLog {
    fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> &LogKey {
        &self.key
    }

    fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn len(&self) -> u64 {
        self.state().len()
    }

    fn is_closed(&self) -> bool {
        self.state().closed
    }

    async fn ready(&self) -> LogResult<()> {
        if self.is_closed() {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    async fn append(&self, data: Vec<u8>) -> LogResult<u64> {
        if !self.writable {
            return Err(LogError::NotWritable);
        }

        let position = {
            let mut state = self.state();
            if state.closed {
                return Err(LogError::Closed);
            }
            let position = state.len();
            state.slots.push_back(Slot::Present(data));
            position
        };

        self.changed.notify_waiters();
        Ok(position)
    }

    async fn get(&self, position: u64, wait: bool) -> LogResult<Vec<u8>> {
        let epoch = self.state().cancel_epoch;

        loop {
            // Register interest before inspecting state so a notification
            // between the check and the await is not lost
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.state();
                if state.closed {
                    return Err(LogError::Closed);
                }
                if state.cancel_epoch != epoch {
                    return Err(LogError::ReadCancelled);
                }
                if position < state.base {
                    return Err(LogError::Cleared(position));
                }
                match state.index(position).and_then(|i| state.slots.get(i)) {
                    Some(Slot::Present(data)) => return Ok(data.clone()),
                    Some(Slot::Cleared) => return Err(LogError::Cleared(position)),
                    _ if !wait => return Err(LogError::NotAvailable(position)),
                    _ => {}
                }
            }

            notified.await;
        }
    }

    async fn put(&self, position: u64, data: Vec<u8>) -> LogResult<()> {
        if self.writable {
            return Err(LogError::NotDownloadable);
        }

        {
            let mut state = self.state();
            if state.closed {
                return Err(LogError::Closed);
            }

            let len = state.len();
            if position > len.saturating_add(MAX_REPLICA_GAP) {
                return Err(LogError::OutOfWindow { position, len });
            }
            // Re-delivery of an entry we already hold or evicted is a no-op
            let Some(index) = state.index(position) else {
                return Ok(());
            };
            if state.slots.len() <= index {
                state.slots.resize_with(index + 1, || Slot::Missing);
            }
            if let Some(slot) = state.slots.get_mut(index) {
                if matches!(slot, Slot::Missing) {
                    *slot = Slot::Present(data);
                }
            }
        }

        self.changed.notify_waiters();
        Ok(())
    }

    async fn clear(&self, position: u64) -> LogResult<()> {
        let mut state = self.state();
        if state.closed {
            return Err(LogError::Closed);
        }
        if let Some(index) = state.index(position) {
            if let Some(slot) = state.slots.get_mut(index) {
                if matches!(slot, Slot::Present(_)) {
                    *slot = Slot::Cleared;
                }
            }
        }
        state.compact();
        Ok(())
    }

    fn cancel_pending_reads(&self) {
        self.state().cancel_epoch += 1;
        self.changed.notify_waiters();
    }

    async fn close(&self) -> LogResult<()> {
        {
            let mut state = self.state();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.slots.clear();
        }

        tracing::trace!(name = %self.name, "log closed");
        self.changed.notify_waiters();
        Ok(())
    }
}
