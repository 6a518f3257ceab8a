//! Log replication over a byte pipe.
//!
//! Both peers start a [`Replication`] over the same duplex stream and
//! announce the rendezvous they want to meet at, together with opaque user
//! data. Logs are then attached for upload (we own it and the remote reads
//! it) or download (the remote owns it and we read it).
//!
//! Replication is pull based: attaching a log for download sends a
//! `Want` frame, and the owner answers by streaming entries from the wanted
//! position onward, following the log as it grows. A `Want` that arrives
//! before the owner attached the log is remembered and served on attach.
//!
//! An `Entry` outside the replica window of its log is a protocol
//! violation and ends the stream, as does a frame that fails to decode.
//!
//! ```text
//!   Peer A                                  Peer B
//!   ──────                                  ──────
//!   Handshake{rendezvous, user_data} ──►
//!                                     ◄──   Handshake{rendezvous, user_data}
//!   Want{log_b, 0}                   ──►
//!                                     ◄──   Entry{log_b, 0, ..}
//!                                     ◄──   Entry{log_b, 1, ..}
//! ```

use crate::error::{LogError, LogResult};
use crate::log::{AppendLog, DiscoveryKey};
use crate::wire::{Frame, read_frame, write_frame};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Wants remembered for logs not attached yet
const MAX_PENDING_WANTS: usize = 64;

/// Byte pipe replication can run over
pub trait Wire: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Wire for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased [`Wire`]
pub type BoxedWire = Box<dyn Wire>;

/// How a log takes part in replication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicateOptions {
    /// Serve entries of this log to the remote peer
    pub upload: bool,
    /// Request entries of this log from the remote peer
    pub download: bool,
    /// Evict entries locally once they were sent
    pub evict_uploaded: bool,
}

impl ReplicateOptions {
    /// Upload a log we own
    #[must_use]
    pub fn upload() -> Self {
        Self {
            upload: true,
            ..Self::default()
        }
    }

    /// Download a remote log
    #[must_use]
    pub fn download() -> Self {
        Self {
            download: true,
            ..Self::default()
        }
    }

    /// Evict entries once uploaded
    #[must_use]
    pub fn evicting(mut self, evict: bool) -> Self {
        self.evict_uploaded = evict;
        self
    }
}

/// Replication stream configuration
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Discovery key of the rendezvous both peers join
    pub rendezvous: DiscoveryKey,
    /// Opaque payload sent with the handshake
    pub user_data: Vec<u8>,
    /// Upper bound on a single frame
    pub max_frame_size: usize,
}

enum Outbound {
    Frame(Frame),
    Shutdown,
}

struct UploadTask {
    handle: JoinHandle<()>,
    drain: watch::Sender<bool>,
}

struct Upload {
    log: Arc<dyn AppendLog>,
    evict: bool,
    task: Option<UploadTask>,
}

#[derive(Default)]
struct Routes {
    downloads: HashMap<DiscoveryKey, Arc<dyn AppendLog>>,
    uploads: HashMap<DiscoveryKey, Upload>,
    // Wants received for logs not attached yet
    wants: HashMap<DiscoveryKey, u64>,
}

struct Shared {
    routes: Mutex<Routes>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: Frame) -> LogResult<()> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| LogError::ReplicationClosed)
    }

    fn spawn_upload(&self, log: Arc<dyn AppendLog>, from: u64, evict: bool) -> UploadTask {
        let (drain, drain_rx) = watch::channel(false);
        let handle = tokio::spawn(upload_loop(log, from, evict, self.outbound.clone(), drain_rx));
        UploadTask { handle, drain }
    }

    fn on_want(&self, discovery_key: DiscoveryKey, from: u64) {
        let mut guard = self.routes();
        let routes = &mut *guard;
        match routes.uploads.get_mut(&discovery_key) {
            Some(upload) if upload.task.is_none() => {
                trace!(log = upload.log.name(), from, "serving want");
                upload.task = Some(self.spawn_upload(Arc::clone(&upload.log), from, upload.evict));
            }
            Some(upload) => debug!(log = upload.log.name(), "ignoring repeated want"),
            None if routes.wants.len() >= MAX_PENDING_WANTS
                && !routes.wants.contains_key(&discovery_key) =>
            {
                debug!("too many pending wants, ignoring");
            }
            None => {
                routes.wants.insert(discovery_key, from);
            }
        }
    }

    fn download(&self, discovery_key: &DiscoveryKey) -> Option<Arc<dyn AppendLog>> {
        self.routes().downloads.get(discovery_key).cloned()
    }
}

/// Marks the stream closed when the owning task ends, however it ends
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.closed.send_replace(true);
    }
}

/// Replication session over one wire
pub struct Replication {
    shared: Arc<Shared>,
    rendezvous: DiscoveryKey,
    remote: Option<oneshot::Receiver<LogResult<Vec<u8>>>>,
    remote_user_data: Option<Vec<u8>>,
    closed: watch::Receiver<bool>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
}

impl Replication {
    /// Start replicating over `wire`, announcing `config.rendezvous`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReplicationClosed`] if the handshake frame
    /// cannot be queued.
    pub fn start<W: Wire>(wire: W, config: ReplicationConfig) -> LogResult<Self> {
        let (read_half, write_half) = tokio::io::split(wire);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed) = watch::channel(false);
        let (remote_tx, remote) = oneshot::channel();

        let shared = Arc::new(Shared {
            routes: Mutex::new(Routes::default()),
            outbound,
            closed: closed_tx,
        });

        shared.send(Frame::Handshake {
            discovery_key: config.rendezvous,
            user_data: config.user_data,
        })?;

        let writer = tokio::spawn(write_loop(
            write_half,
            outbound_rx,
            config.max_frame_size,
            Arc::clone(&shared),
        ));
        let reader = tokio::spawn(read_loop(
            read_half,
            Arc::clone(&shared),
            config.rendezvous,
            config.max_frame_size,
            remote_tx,
        ));

        debug!(
            rendezvous = %hex::encode(&config.rendezvous[..8]),
            "replication started"
        );

        Ok(Self {
            shared,
            rendezvous: config.rendezvous,
            remote: Some(remote),
            remote_user_data: None,
            closed,
            reader,
            writer: Some(writer),
        })
    }

    /// Discovery key of the rendezvous this session announced
    #[must_use]
    pub fn rendezvous(&self) -> &DiscoveryKey {
        &self.rendezvous
    }

    /// Wait for the remote handshake and return its user data.
    ///
    /// # Errors
    ///
    /// - [`LogError::DiscoveryMismatch`] if the remote joined another
    ///   rendezvous
    /// - [`LogError::ReplicationClosed`] if the stream ended first
    pub async fn remote_user_data(&mut self) -> LogResult<Vec<u8>> {
        if let Some(data) = &self.remote_user_data {
            return Ok(data.clone());
        }

        let remote = self.remote.take().ok_or(LogError::ReplicationClosed)?;
        let data = remote.await.map_err(|_| LogError::ReplicationClosed)??;
        self.remote_user_data = Some(data.clone());
        Ok(data)
    }

    /// Attach a log.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::ReplicationClosed`] once the stream has ended.
    pub fn replicate(&self, log: Arc<dyn AppendLog>, options: ReplicateOptions) -> LogResult<()> {
        if self.is_closed() {
            return Err(LogError::ReplicationClosed);
        }

        let discovery_key = *log.discovery_key();
        let mut routes = self.shared.routes();

        if options.download {
            routes.downloads.insert(discovery_key, Arc::clone(&log));
            self.shared.send(Frame::Want {
                discovery_key,
                from: log.len(),
            })?;
        }

        if options.upload {
            let task = routes
                .wants
                .remove(&discovery_key)
                .map(|from| self.shared.spawn_upload(Arc::clone(&log), from, options.evict_uploaded));
            routes.uploads.insert(
                discovery_key,
                Upload {
                    log: Arc::clone(&log),
                    evict: options.evict_uploaded,
                    task,
                },
            );
        }

        trace!(
            log = log.name(),
            upload = options.upload,
            download = options.download,
            "log attached"
        );
        Ok(())
    }

    /// Detach a log.
    ///
    /// An upload in progress first sends every entry already appended, so
    /// closing a log right after detaching it does not lose its tail.
    pub async fn unreplicate(&self, log: &dyn AppendLog) {
        let discovery_key = *log.discovery_key();

        let upload = {
            let mut routes = self.shared.routes();
            routes.downloads.remove(&discovery_key);
            routes.wants.remove(&discovery_key);
            routes.uploads.remove(&discovery_key)
        };

        if let Some(UploadTask { handle, drain }) = upload.and_then(|upload| upload.task) {
            drain.send_replace(true);
            if let Err(e) = handle.await {
                warn!(log = log.name(), error = %e, "upload task failed");
            }
        }

        trace!(log = log.name(), "log detached");
    }

    /// Returns true once the stream has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` when the stream ends
    #[must_use]
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.clone()
    }

    /// Wait until the stream ends
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // A dropped sender also means the stream is gone
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Finish replication: drain uploads, flush queued frames and shut the
    /// wire down. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the writer task panicked.
    pub async fn close(&mut self) -> LogResult<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };

        self.reader.abort();

        let uploads: Vec<UploadTask> = {
            let mut routes = self.shared.routes();
            routes.downloads.clear();
            routes.wants.clear();
            routes
                .uploads
                .drain()
                .filter_map(|(_, upload)| upload.task)
                .collect()
        };
        for UploadTask { handle, drain } in uploads {
            drain.send_replace(true);
            let _ = handle.await;
        }

        let _ = self.shared.outbound.send(Outbound::Shutdown);
        let result = writer.await;
        self.shared.closed.send_replace(true);

        debug!("replication closed");
        result.map_err(|e| LogError::Io(std::io::Error::other(e.to_string())))
    }
}

impl Drop for Replication {
    fn drop(&mut self) {
        if self.writer.is_some() {
            self.reader.abort();
            let _ = self.shared.outbound.send(Outbound::Shutdown);
        }
    }
}

impl fmt::Debug for Replication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replication")
            .field("rendezvous", &hex::encode(&self.rendezvous[..8]))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    max_frame_size: usize,
    shared: Arc<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        match message {
            Outbound::Frame(frame) => {
                trace!(kind = frame.kind(), "sending frame");
                if let Err(e) = write_frame(&mut writer, &frame, max_frame_size).await {
                    warn!(error = %e, "replication write failed");
                    break;
                }
            }
            Outbound::Shutdown => break,
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!(error = %e, "wire shutdown failed");
    }
    shared.closed.send_replace(true);
}

async fn read_loop<R>(
    mut reader: R,
    shared: Arc<Shared>,
    rendezvous: DiscoveryKey,
    max_frame_size: usize,
    remote: oneshot::Sender<LogResult<Vec<u8>>>,
) where
    R: AsyncRead + Unpin,
{
    let _closed = CloseOnExit(Arc::clone(&shared));
    let mut remote = Some(remote);

    loop {
        let frame = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("remote ended replication stream");
                break;
            }
            Err(e) => {
                warn!(error = %e, "replication read failed");
                if let Some(remote) = remote.take() {
                    let _ = remote.send(Err(e));
                }
                break;
            }
        };

        match frame {
            Frame::Handshake {
                discovery_key,
                user_data,
            } => {
                let Some(remote) = remote.take() else {
                    debug!("ignoring repeated handshake");
                    continue;
                };
                if discovery_key != rendezvous {
                    warn!("remote joined a different rendezvous");
                    let _ = remote.send(Err(LogError::DiscoveryMismatch));
                    break;
                }
                let _ = remote.send(Ok(user_data));
            }
            Frame::Want {
                discovery_key,
                from,
            } => shared.on_want(discovery_key, from),
            Frame::Entry {
                discovery_key,
                position,
                data,
            } => match shared.download(&discovery_key) {
                Some(log) => match log.put(position, data).await {
                    Ok(()) => {}
                    Err(e @ LogError::OutOfWindow { .. }) => {
                        warn!(log = log.name(), error = %e, "remote sent an entry outside the window");
                        break;
                    }
                    Err(e) => debug!(log = log.name(), position, error = %e, "dropping entry"),
                },
                None => trace!(position, "entry for a detached log"),
            },
        }
    }
}

async fn upload_loop(
    log: Arc<dyn AppendLog>,
    mut position: u64,
    evict: bool,
    outbound: mpsc::UnboundedSender<Outbound>,
    mut drain: watch::Receiver<bool>,
) {
    let discovery_key = *log.discovery_key();

    loop {
        let draining = *drain.borrow();
        let entry = if draining {
            if position >= log.len() {
                break;
            }
            log.get(position, false).await
        } else {
            tokio::select! {
                entry = log.get(position, true) => entry,
                changed = drain.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        };

        match entry {
            Ok(data) => {
                let frame = Frame::Entry {
                    discovery_key,
                    position,
                    data,
                };
                if outbound.send(Outbound::Frame(frame)).is_err() {
                    break;
                }
                if evict {
                    if let Err(e) = log.clear(position).await {
                        debug!(log = log.name(), position, error = %e, "evict failed");
                    }
                }
                position += 1;
            }
            Err(LogError::Cleared(_)) => position += 1,
            Err(e) if e.is_cancellation() => break,
            Err(e) => {
                debug!(log = log.name(), position, error = %e, "upload stopped");
                break;
            }
        }
    }

    trace!(log = log.name(), position, "upload finished");
}
