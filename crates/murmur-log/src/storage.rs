//! Storage factories.
//!
//! A [`Storage`] opens named logs. The connection layer asks for each of
//! its logs through one of these, so a backend only has to decide where
//! entries live.

use crate::error::LogResult;
use crate::log::{AppendLog, LogKey, MemoryLog};
use std::sync::Arc;

/// Options for opening a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Open as the owner (appends allowed) rather than as a replica
    pub writable: bool,
}

impl OpenOptions {
    /// Options for a log we own
    #[must_use]
    pub fn writable() -> Self {
        Self { writable: true }
    }

    /// Options for a replica of a remote log
    #[must_use]
    pub fn replica() -> Self {
        Self { writable: false }
    }
}

/// Factory for named append-only logs
pub trait Storage: Send + Sync {
    /// Open (or create) the log `name` identified by `key`.
    ///
    /// # Errors
    ///
    /// Backends return an error if the log cannot be created.
    fn open(
        &self,
        name: &str,
        key: &LogKey,
        options: OpenOptions,
    ) -> LogResult<Arc<dyn AppendLog>>;
}

/// Storage that keeps every log in memory
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl Storage for MemoryStorage {
    fn open(
        &self,
        name: &str,
        key: &LogKey,
        options: OpenOptions,
    ) -> LogResult<Arc<dyn AppendLog>> {
        tracing::trace!(name, writable = options.writable, "opening memory log");
        Ok(Arc::new(MemoryLog::new(name, *key, options.writable)))
    }
}
