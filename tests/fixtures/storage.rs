//! Storage with injectable faults and a record of every opened log.

use async_trait::async_trait;
use murmur_log::{
    AppendLog, DiscoveryKey, LogError, LogKey, LogResult, MemoryLog, OpenOptions, Storage,
};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Switches a test flips to make logs misbehave
#[derive(Debug, Default)]
pub struct Faults {
    /// Every `close` fails once set
    pub fail_close: AtomicBool,
    /// The next entry stored in a `receiver` log has its last byte flipped
    pub tamper_next_entry: AtomicBool,
}

/// In-memory storage with faults and a record of opened logs
#[derive(Clone, Default)]
pub struct FaultyStorage {
    faults: Arc<Faults>,
    opened: Arc<Mutex<Vec<Arc<dyn AppendLog>>>>,
}

impl FaultyStorage {
    /// Fresh storage with no faults armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault switches
    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    /// Log opened under `key` with the given writability, most recent first
    pub fn find(&self, key: &LogKey, writable: bool) -> Option<Arc<dyn AppendLog>> {
        let opened = self.opened.lock().unwrap();
        opened
            .iter()
            .rev()
            .find(|log| log.key() == key && log.writable() == writable)
            .cloned()
    }

    /// Number of logs opened so far
    pub fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }
}

impl Storage for FaultyStorage {
    fn open(
        &self,
        name: &str,
        key: &LogKey,
        options: OpenOptions,
    ) -> LogResult<Arc<dyn AppendLog>> {
        let log: Arc<dyn AppendLog> = Arc::new(FaultyLog {
            inner: MemoryLog::new(name, *key, options.writable),
            faults: Arc::clone(&self.faults),
        });
        self.opened.lock().unwrap().push(Arc::clone(&log));
        Ok(log)
    }
}

struct FaultyLog {
    inner: MemoryLog,
    faults: Arc<Faults>,
}

#[async_trait]
impl AppendLog for FaultyLog {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn key(&self) -> &LogKey {
        self.inner.key()
    }

    fn discovery_key(&self) -> &DiscoveryKey {
        self.inner.discovery_key()
    }

    fn writable(&self) -> bool {
        self.inner.writable()
    }

    fn len(&self) -> u64 {
        self.inner.len()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    async fn ready(&self) -> LogResult<()> {
        self.inner.ready().await
    }

    async fn append(&self, data: Vec<u8>) -> LogResult<u64> {
        self.inner.append(data).await
    }

    async fn get(&self, position: u64, wait: bool) -> LogResult<Vec<u8>> {
        self.inner.get(position, wait).await
    }

    async fn put(&self, position: u64, mut data: Vec<u8>) -> LogResult<()> {
        if self.inner.name() == "receiver" && self.faults.tamper_next_entry.swap(false, Ordering::SeqCst) {
            if let Some(last) = data.last_mut() {
                *last ^= 0x01;
            }
        }
        self.inner.put(position, data).await
    }

    async fn clear(&self, position: u64) -> LogResult<()> {
        self.inner.clear(position).await
    }

    fn cancel_pending_reads(&self) {
        self.inner.cancel_pending_reads();
    }

    async fn close(&self) -> LogResult<()> {
        self.inner.close().await?;
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(LogError::Io(io::Error::other("storage refused to close")));
        }
        Ok(())
    }
}
