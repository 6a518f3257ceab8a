//! Connection lifecycle and channel rotation.
//!
//! A [`Connection`] owns four log channels over its lifetime:
//!
//! 1. The rendezvous log, keyed by `H(shared secret)`, never read or
//!    written; its discovery key is what both peers announce to find each
//!    other.
//! 2. The identity sender and receiver, keyed by the long-term public keys,
//!    which carry the raw HELLO / AUTH / OKAY messages.
//! 3. The session sender and receiver, keyed by the session public keys,
//!    which carry sealed data-phase entries.
//!
//! Rotation from (2) to (3) runs one step at a time: close the identity
//! receiver, close the identity sender (after its tail was uploaded), open
//! the session sender, open the session receiver, reset the read cursor.
//! `&mut self` on every operation keeps application writes out while it
//! runs.

use crate::capability::CapabilitySet;
use crate::config::{ConnectionConfig, VerifyFailurePolicy};
use crate::discovery;
use crate::error::{Error, Result};
use crate::event::{ChannelKind, ConnectionEvent};
use crate::handshake::{Handshake, HandshakeState, Session};
use crate::pipeline::{Opener, Sealer, SecureChannel};
use crate::{ENTRY_OVERHEAD, SHARED_KEY_SIZE};
use murmur_crypto::{KeyPair, VerifyingKey};
use murmur_log::{
    AppendLog, BoxedWire, DiscoveryKey, LogError, OpenOptions, ReplicateOptions, Replication,
    ReplicationConfig,
};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

const EVENT_CAPACITY: usize = 64;

type TransportFactory = Box<dyn FnOnce() -> io::Result<BoxedWire> + Send>;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, `connect` not called yet
    Idle,
    /// Waiting for the remote identity on the rendezvous
    Discovering,
    /// Running HELLO / AUTH / OKAY
    Handshaking,
    /// Data phase open
    Connected,
    /// Torn down; the connection is inert
    Closed,
}

/// Secure duplex connection over replicated append-only logs
pub struct Connection {
    shared_key: Zeroizing<[u8; SHARED_KEY_SIZE]>,
    identity: Arc<KeyPair>,
    session: Arc<KeyPair>,
    capabilities: CapabilitySet,
    config: ConnectionConfig,
    transport: Mutex<Option<TransportFactory>>,
    rendezvous: Arc<dyn AppendLog>,
    sender: Option<Arc<dyn AppendLog>>,
    receiver: Option<Arc<dyn AppendLog>>,
    replication: Option<Replication>,
    remote_identity: Option<VerifyingKey>,
    remote_session: Option<VerifyingKey>,
    authorized: Option<CapabilitySet>,
    sealer: Option<Sealer>,
    inbound: Option<mpsc::Receiver<Result<Vec<u8>>>>,
    reader: Option<JoinHandle<()>>,
    counter: Arc<AtomicU64>,
    events: broadcast::Sender<ConnectionEvent>,
    state: ConnectionState,
}

impl Connection {
    /// Create a connection.
    ///
    /// Opens the rendezvous log and the identity sender right away; the
    /// transport factory runs on [`Connection::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the shared key is not 32 bytes
    /// or the configuration is invalid, and [`Error::Log`] if storage
    /// cannot open a log.
    pub fn new<F>(shared_key: &[u8], mut config: ConnectionConfig, transport: F) -> Result<Self>
    where
        F: FnOnce() -> io::Result<BoxedWire> + Send + 'static,
    {
        let shared_key: [u8; SHARED_KEY_SIZE] = shared_key.try_into().map_err(|_| {
            Error::Configuration(
                format!(
                    "shared key must be {SHARED_KEY_SIZE} bytes, got {}",
                    shared_key.len()
                )
                .into(),
            )
        })?;
        let shared_key = Zeroizing::new(shared_key);
        config.validate()?;

        let identity = Arc::new(config.identity.take().unwrap_or_else(KeyPair::random));
        let session = Arc::new(KeyPair::random());
        let capabilities = CapabilitySet::declare(config.capabilities.iter().copied());

        let rendezvous = config.storage.open(
            "feed",
            &discovery::rendezvous_key(&shared_key),
            OpenOptions::replica(),
        )?;
        let sender = config
            .storage
            .open("sender", &identity.public_bytes(), OpenOptions::writable())?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        debug!(
            public_key = ?identity.public_key(),
            capabilities = capabilities.len(),
            "connection created"
        );

        Ok(Self {
            shared_key,
            identity,
            session,
            capabilities,
            config,
            transport: Mutex::new(Some(Box::new(transport))),
            rendezvous,
            sender: Some(sender),
            receiver: None,
            replication: None,
            remote_identity: None,
            remote_session: None,
            authorized: None,
            sealer: None,
            inbound: None,
            reader: None,
            counter: Arc::new(AtomicU64::new(0)),
            events,
            state: ConnectionState::Idle,
        })
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Discover the remote peer, run the handshake and open the data
    /// phase.
    ///
    /// On failure every channel and the transport are torn down; the
    /// connection cannot be reused.
    ///
    /// # Errors
    ///
    /// - [`Error::Handshake`] with the failing stage
    /// - [`Error::SelfConnection`], [`Error::RemoteAlreadyBound`] or
    ///   [`Error::InvalidRemoteIdentity`] from discovery
    /// - [`Error::RemoteClosed`] if the remote went away first
    /// - [`Error::Io`] if the transport factory fails
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Idle => {}
            ConnectionState::Closed => return Err(Error::Closed),
            _ => return Err(Error::InvalidState("connect already called")),
        }
        self.state = ConnectionState::Discovering;

        match self.establish().await {
            Ok(()) => Ok(()),
            Err(error) => {
                warn!(%error, "connect failed");
                if let Err(teardown) = self.teardown().await {
                    debug!(error = %teardown, "teardown after failed connect");
                }
                Err(error)
            }
        }
    }

    /// Seal `data` and append it to the session sender. Returns the
    /// position of the entry.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] before the handshake completed
    /// - [`Error::Closed`] after close, or after the remote closed unless
    ///   half-open is allowed
    /// - [`Error::MessageTooLarge`] if `data` is longer than
    ///   [`Connection::max_message_size`]; nothing is appended
    /// - [`Error::SequenceMismatch`] if the log assigned an unexpected
    ///   position
    pub async fn write(&mut self, data: &[u8]) -> Result<u64> {
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(Error::Closed),
            _ => return Err(Error::NotConnected),
        }

        let limit = self.max_message_size();
        if data.len() > limit {
            return Err(Error::MessageTooLarge {
                size: data.len(),
                limit,
            });
        }

        if !self.config.allow_half_open && self.replication.as_ref().is_some_and(Replication::is_closed) {
            self.close().await?;
            return Err(Error::Closed);
        }

        let sealer = self.sealer.as_ref().ok_or(Error::NotConnected)?;
        let sender = self.sender.as_ref().ok_or(Error::NotConnected)?;

        let expected = sender.len();
        let entry = sealer.seal(expected, data)?;
        let position = sender.append(entry).await?;
        if position != expected {
            return Err(Error::SequenceMismatch {
                expected,
                actual: position,
            });
        }

        trace!(position, bytes = data.len(), "message appended");
        Ok(position)
    }

    /// Next message from the remote, in append order. `Ok(None)` once the
    /// readable side has ended.
    ///
    /// When the remote closes and half-open is not allowed, the
    /// connection closes itself before returning `Ok(None)`.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] before the handshake completed
    /// - [`Error::MessageVerificationFailed`] for a rejected entry
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Ok(None),
            _ => return Err(Error::NotConnected),
        }

        let inbound = self.inbound.as_mut().ok_or(Error::NotConnected)?;
        match inbound.recv().await {
            Some(message) => message.map(Some),
            None => {
                debug!("readable side ended");
                if !self.config.allow_half_open {
                    self.close().await?;
                }
                Ok(None)
            }
        }
    }

    /// Tear down every channel and the transport. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Teardown`] if channels failed to close; the
    /// connection is closed regardless.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.teardown().await
    }

    /// Long-term public key
    #[must_use]
    pub fn public_key(&self) -> VerifyingKey {
        self.identity.public_key()
    }

    /// Session public key for this connection attempt
    #[must_use]
    pub fn session_public_key(&self) -> VerifyingKey {
        self.session.public_key()
    }

    /// Remote long-term public key, once discovered
    #[must_use]
    pub fn remote_public_key(&self) -> Option<VerifyingKey> {
        self.remote_identity
    }

    /// Remote session public key, once handshaken
    #[must_use]
    pub fn remote_session_public_key(&self) -> Option<VerifyingKey> {
        self.remote_session
    }

    /// Declared capabilities
    #[must_use]
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Negotiated authorization, once handshaken
    #[must_use]
    pub fn authorized_capabilities(&self) -> Option<&CapabilitySet> {
        self.authorized.as_ref()
    }

    /// Rendezvous identifier, `H(shared secret)`
    #[must_use]
    pub fn rendezvous_id(&self) -> [u8; 32] {
        *self.rendezvous.key()
    }

    /// Discovery key announced on the wire
    #[must_use]
    pub fn discovery_key(&self) -> DiscoveryKey {
        *self.rendezvous.discovery_key()
    }

    /// Lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true while the data phase is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Largest payload [`Connection::write`] accepts
    #[must_use]
    pub fn max_message_size(&self) -> usize {
        murmur_log::max_entry_size(self.config.max_frame_size).saturating_sub(ENTRY_OVERHEAD)
    }

    /// Read cursor into the current receiver
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_ready(&self, channel: ChannelKind, log: &dyn AppendLog) {
        debug!(
            ?channel,
            discovery_key = %hex::encode(&log.discovery_key()[..8]),
            "channel ready"
        );
        self.emit(ConnectionEvent::ChannelReady {
            channel,
            discovery_key: *log.discovery_key(),
        });
    }

    fn replication(&self) -> Result<&Replication> {
        self.replication.as_ref().ok_or(Error::NotConnected)
    }

    fn upload_options(&self) -> ReplicateOptions {
        ReplicateOptions::upload().evicting(!self.config.preserve_sender)
    }

    async fn establish(&mut self) -> Result<()> {
        let transport = self
            .transport
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::InvalidState("transport already used"))?;
        let wire = transport()?;

        self.rendezvous.ready().await?;
        self.emit_ready(ChannelKind::Rendezvous, self.rendezvous.as_ref());

        let sender = self.sender.clone().ok_or(Error::Closed)?;
        sender.ready().await?;
        self.emit_ready(ChannelKind::Sender, sender.as_ref());

        let replication = Replication::start(
            wire,
            ReplicationConfig {
                rendezvous: *self.rendezvous.discovery_key(),
                user_data: discovery::seal_identity(&self.shared_key, &self.identity.public_key())?,
                max_frame_size: self.config.max_frame_size,
            },
        )?;
        replication.replicate(sender, self.upload_options())?;
        self.replication = Some(replication);

        let announcement = self
            .replication
            .as_mut()
            .ok_or(Error::NotConnected)?
            .remote_user_data()
            .await
            .map_err(remote_error)?;
        let remote = discovery::open_identity(&self.shared_key, &announcement)
            .ok_or(Error::InvalidRemoteIdentity)?;
        self.bind_remote(remote)?;

        let receiver =
            self.config
                .storage
                .open("receiver", remote.as_bytes(), OpenOptions::replica())?;
        receiver.ready().await?;
        self.replication()?
            .replicate(Arc::clone(&receiver), ReplicateOptions::download())?;
        self.emit_ready(ChannelKind::Receiver, receiver.as_ref());
        self.receiver = Some(receiver);

        self.state = ConnectionState::Handshaking;
        let session = self.handshake(remote).await?;
        self.rotate(session, remote).await
    }

    fn bind_remote(&mut self, remote: VerifyingKey) -> Result<()> {
        if self.remote_identity.is_some() {
            return Err(Error::RemoteAlreadyBound);
        }
        if remote == self.identity.public_key() {
            return Err(Error::SelfConnection);
        }

        self.remote_identity = Some(remote);
        debug!(remote = ?remote, "remote identity discovered");
        self.emit(ConnectionEvent::RemoteIdentity {
            remote_public_key: remote,
        });
        Ok(())
    }

    async fn handshake(&mut self, remote: VerifyingKey) -> Result<Session> {
        let mut handshake = Handshake::new(
            &self.shared_key,
            Arc::clone(&self.identity),
            Arc::clone(&self.session),
            remote,
            self.capabilities.clone(),
        );

        self.send_raw(handshake.hello()?).await?;

        loop {
            let message = self.recv_raw().await?;
            if let Some(session) = handshake.receive(&message)? {
                self.emit(ConnectionEvent::Okay);
                return Ok(session);
            }

            match (handshake.state(), handshake.remote_session_key()) {
                (HandshakeState::AuthPending, Some(key)) => self.emit(ConnectionEvent::Hello {
                    remote_session_key: *key,
                }),
                _ => self.emit(ConnectionEvent::Auth {
                    remote_public_key: remote,
                }),
            }
            self.send_raw(handshake.reply()?).await?;
        }
    }

    async fn send_raw(&self, message: Vec<u8>) -> Result<u64> {
        let limit = murmur_log::max_entry_size(self.config.max_frame_size);
        if message.len() > limit {
            return Err(Error::MessageTooLarge {
                size: message.len(),
                limit,
            });
        }
        let sender = self.sender.as_ref().ok_or(Error::NotConnected)?;
        let position = sender.append(message).await?;
        trace!(position, "handshake message appended");
        Ok(position)
    }

    async fn recv_raw(&self) -> Result<Vec<u8>> {
        let receiver = self.receiver.as_ref().ok_or(Error::NotConnected)?;
        let replication = self.replication()?;
        let position = self.counter.load(Ordering::Acquire);

        let entry = tokio::select! {
            biased;
            entry = receiver.get(position, true) => entry?,
            () = replication.closed() => return Err(Error::RemoteClosed),
        };

        if !self.config.preserve_receiver {
            receiver.clear(position).await?;
        }
        self.counter.store(position + 1, Ordering::Release);
        trace!(position, "handshake message read");
        Ok(entry)
    }

    async fn rotate(&mut self, session: Session, remote: VerifyingKey) -> Result<()> {
        if let Some(receiver) = self.receiver.take() {
            receiver.cancel_pending_reads();
            self.replication()?.unreplicate(receiver.as_ref()).await;
            receiver.close().await?;
        }
        if let Some(sender) = self.sender.take() {
            self.replication()?.unreplicate(sender.as_ref()).await;
            sender.close().await?;
        }
        debug!("identity channels closed");

        let sender = self.config.storage.open(
            "sender",
            &self.session.public_bytes(),
            OpenOptions::writable(),
        )?;
        sender.ready().await?;
        self.replication()?
            .replicate(Arc::clone(&sender), self.upload_options())?;
        self.emit_ready(ChannelKind::Sender, sender.as_ref());
        self.sender = Some(sender);

        let receiver = self.config.storage.open(
            "receiver",
            session.remote_session_key().as_bytes(),
            OpenOptions::replica(),
        )?;
        receiver.ready().await?;
        self.replication()?
            .replicate(Arc::clone(&receiver), ReplicateOptions::download())?;
        self.emit_ready(ChannelKind::Receiver, receiver.as_ref());

        self.counter.store(0, Ordering::Release);

        let (sealer, opener) =
            SecureChannel::new(&session, Arc::clone(&self.identity), remote).split();
        let (deliver, inbound) = mpsc::channel(self.config.read_buffer);
        let read_loop = ReadLoop {
            receiver: Arc::clone(&receiver),
            opener,
            cursor: Arc::clone(&self.counter),
            closed: self.replication()?.closed_signal(),
            deliver,
            events: self.events.clone(),
            preserve: self.config.preserve_receiver,
            policy: self.config.on_verify_failure,
        };

        self.sealer = Some(sealer);
        self.inbound = Some(inbound);
        self.reader = Some(tokio::spawn(read_loop.run()));
        self.receiver = Some(receiver);
        self.remote_session = Some(*session.remote_session_key());

        let authorized = session.authorized().clone();
        self.authorized = Some(authorized.clone());
        self.state = ConnectionState::Connected;

        info!(
            remote = ?remote,
            authorized = authorized.len(),
            "handshake complete"
        );
        self.emit(ConnectionEvent::Handshake { authorized });
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.inbound = None;
        self.sealer = None;

        let mut failures = Vec::new();

        if let Some(receiver) = self.receiver.take() {
            receiver.cancel_pending_reads();
            self.detach_and_close(receiver.as_ref(), &mut failures).await;
        }
        // The sender keeps its pending reads so its tail is uploaded first
        if let Some(sender) = self.sender.take() {
            self.detach_and_close(sender.as_ref(), &mut failures).await;
        }
        self.rendezvous.cancel_pending_reads();
        if let Err(e) = self.rendezvous.close().await {
            failures.push(e);
        }

        if let Some(mut replication) = self.replication.take() {
            if let Err(e) = replication.close().await {
                failures.push(e);
            }
        }
        self.transport
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.state = ConnectionState::Closed;
        info!("connection closed");
        self.emit(ConnectionEvent::Closed);

        let count = failures.len();
        match failures.into_iter().next() {
            None => Ok(()),
            Some(first) => {
                warn!(count, error = %first, "channels failed to close");
                Err(Error::Teardown { count, first })
            }
        }
    }

    async fn detach_and_close(&self, log: &dyn AppendLog, failures: &mut Vec<LogError>) {
        if let Some(replication) = &self.replication {
            replication.unreplicate(log).await;
        }
        if let Err(e) = log.close().await {
            failures.push(e);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        for log in self.receiver.iter().chain(self.sender.iter()) {
            log.cancel_pending_reads();
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("public_key", &self.identity.public_key())
            .field("remote_public_key", &self.remote_identity)
            .field("capabilities", &self.capabilities.len())
            .field("counter", &self.counter())
            .finish_non_exhaustive()
    }
}

fn remote_error(error: LogError) -> Error {
    match error {
        LogError::ReplicationClosed => Error::RemoteClosed,
        other => Error::Log(other),
    }
}

async fn wait_closed(signal: &mut watch::Receiver<bool>) {
    // A dropped sender also means the stream is gone
    let _ = signal.wait_for(|closed| *closed).await;
}

/// Data-phase read loop, one per session receiver
struct ReadLoop {
    receiver: Arc<dyn AppendLog>,
    opener: Opener,
    cursor: Arc<AtomicU64>,
    closed: watch::Receiver<bool>,
    deliver: mpsc::Sender<Result<Vec<u8>>>,
    events: broadcast::Sender<ConnectionEvent>,
    preserve: bool,
    policy: VerifyFailurePolicy,
}

impl ReadLoop {
    async fn run(mut self) {
        loop {
            let position = self.cursor.load(Ordering::Acquire);

            let entry = tokio::select! {
                biased;
                entry = self.receiver.get(position, true) => entry,
                () = wait_closed(&mut self.closed) => {
                    debug!(position, "remote closed");
                    let _ = self.events.send(ConnectionEvent::RemoteClosed);
                    break;
                }
            };

            match entry {
                Ok(data) => {
                    if !self.preserve {
                        if let Err(e) = self.receiver.clear(position).await {
                            debug!(position, error = %e, "evict failed");
                        }
                    }
                    self.cursor.store(position + 1, Ordering::Release);

                    let delivery = match self.opener.open(position, &data) {
                        Ok(plaintext) => {
                            trace!(position, bytes = plaintext.len(), "message received");
                            Ok(plaintext)
                        }
                        Err(e) => {
                            warn!(position, error = %e, "message failed verification");
                            let _ = self.events.send(ConnectionEvent::MessageRejected { position });
                            Err(Error::MessageVerificationFailed { position })
                        }
                    };

                    let rejected = delivery.is_err();
                    if self.deliver.send(delivery).await.is_err() {
                        break;
                    }
                    if rejected && self.policy == VerifyFailurePolicy::Halt {
                        break;
                    }
                }
                Err(e) if e.is_cancellation() => {
                    trace!(position, "read loop cancelled");
                    break;
                }
                Err(e) => {
                    warn!(position, error = %e, "receiver read failed");
                    let _ = self.deliver.send(Err(e.into())).await;
                    break;
                }
            }
        }
    }
}
