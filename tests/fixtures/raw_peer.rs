//! Scripted remote peer speaking raw replication frames
//!
//! [`RawPeer`] sits on the far end of a [`Connection`]'s transport and
//! drives the replication protocol frame by frame. It can play an honest
//! peer (rendezvous announcement, HELLO / AUTH / OKAY, sealed entries) and
//! then send whatever frames or bytes a test needs to see handled.

use murmur_core::{
    BoxedWire, CapabilitySet, Connection, ConnectionConfig, Handshake, KeyPair, SecureChannel,
    Session, Step, VerifyingKey, discovery,
};
use murmur_log::wire::{Frame, read_frame, write_frame};
use murmur_log::{DEFAULT_MAX_FRAME_SIZE, DiscoveryKey};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};

const PIPE_CAPACITY: usize = 256 * 1024;

/// Discovery key of the log a peer keys with `public_key`
pub fn log_discovery_key(public_key: &VerifyingKey) -> DiscoveryKey {
    murmur_crypto::hash::discovery_key(public_key.as_bytes())
}

/// Remote end of a single connection
pub struct RawPeer {
    wire: DuplexStream,
    secret: [u8; 32],
    pub identity: Arc<KeyPair>,
    pub session: Arc<KeyPair>,
    remote: Option<VerifyingKey>,
    wanted: HashSet<DiscoveryKey>,
    inbox: VecDeque<(DiscoveryKey, Vec<u8>)>,
    sent: u64,
}

impl RawPeer {
    /// A connection wired to a fresh raw peer sharing `secret`
    pub fn pair(secret: [u8; 32], config: ConnectionConfig) -> (Connection, Self) {
        let (local, wire) = tokio::io::duplex(PIPE_CAPACITY);
        let connection =
            Connection::new(&secret, config, move || Ok(Box::new(local) as BoxedWire)).unwrap();

        let peer = Self {
            wire,
            secret,
            identity: Arc::new(KeyPair::random()),
            session: Arc::new(KeyPair::random()),
            remote: None,
            wanted: HashSet::new(),
            inbox: VecDeque::new(),
            sent: 0,
        };
        (connection, peer)
    }

    /// Send one frame
    pub async fn send(&mut self, frame: &Frame) {
        write_frame(&mut self.wire, frame, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
    }

    /// Write bytes to the wire as they are
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.wire.write_all(bytes).await.unwrap();
    }

    /// Read one frame and file it. Returns `false` once the stream ended.
    async fn pump(&mut self) -> bool {
        match read_frame(&mut self.wire, DEFAULT_MAX_FRAME_SIZE).await {
            Ok(Some(Frame::Want { discovery_key, .. })) => {
                self.wanted.insert(discovery_key);
                true
            }
            Ok(Some(Frame::Entry {
                discovery_key,
                data,
                ..
            })) => {
                self.inbox.push_back((discovery_key, data));
                true
            }
            Ok(Some(Frame::Handshake { .. })) => true,
            Ok(None) | Err(_) => false,
        }
    }

    /// Answer the connection's rendezvous announcement with our own.
    /// Returns the connection's long-term key.
    pub async fn join(&mut self) -> VerifyingKey {
        let (discovery_key, announcement) =
            match read_frame(&mut self.wire, DEFAULT_MAX_FRAME_SIZE).await {
                Ok(Some(Frame::Handshake {
                    discovery_key,
                    user_data,
                })) => (discovery_key, user_data),
                other => panic!("expected a rendezvous handshake, got {other:?}"),
            };
        let remote = discovery::open_identity(&self.secret, &announcement)
            .expect("announcement sealed under another secret");

        let user_data = discovery::seal_identity(&self.secret, &self.identity.public_key()).unwrap();
        self.send(&Frame::Handshake {
            discovery_key,
            user_data,
        })
        .await;

        self.remote = Some(remote);
        remote
    }

    /// Wait until the connection asks for the log keyed by `public_key`
    pub async fn wait_for_want(&mut self, public_key: &VerifyingKey) -> DiscoveryKey {
        let discovery_key = log_discovery_key(public_key);
        while !self.wanted.contains(&discovery_key) {
            assert!(self.pump().await, "stream ended before the want arrived");
        }
        discovery_key
    }

    /// Next entry of the log keyed by `public_key`
    async fn next_entry(&mut self, public_key: &VerifyingKey) -> Vec<u8> {
        let discovery_key = log_discovery_key(public_key);
        loop {
            if let Some(at) = self.inbox.iter().position(|(key, _)| *key == discovery_key) {
                if let Some((_, data)) = self.inbox.remove(at) {
                    return data;
                }
            }
            assert!(self.pump().await, "stream ended before the entry arrived");
        }
    }

    /// Append `data` at our next position in `log`
    async fn push(&mut self, log: DiscoveryKey, data: Vec<u8>) {
        let position = self.sent;
        self.sent += 1;
        self.send(&Frame::Entry {
            discovery_key: log,
            position,
            data,
        })
        .await;
    }

    /// Run HELLO / AUTH / OKAY with the connection as an honest peer.
    /// [`RawPeer::join`] must have run first.
    pub async fn handshake(&mut self, capabilities: CapabilitySet) -> Session {
        let remote = self.remote.expect("join first");
        let identity = self.identity.public_key();
        let own = self.wait_for_want(&identity).await;
        self.send(&Frame::Want {
            discovery_key: log_discovery_key(&remote),
            from: 0,
        })
        .await;

        let mut handshake = Handshake::new(
            &self.secret,
            Arc::clone(&self.identity),
            Arc::clone(&self.session),
            remote,
            capabilities,
        );
        let hello = handshake.hello().unwrap();
        self.push(own, hello).await;

        loop {
            let message = self.next_entry(&remote).await;
            match handshake.read_message(&message).unwrap() {
                Step::Send(reply) => self.push(own, reply).await,
                Step::Complete(session) => {
                    self.sent = 0;
                    return session;
                }
            }
        }
    }

    /// Data-phase channel matching a completed [`RawPeer::handshake`]
    pub fn channel(&self, session: &Session) -> SecureChannel {
        let remote = self.remote.expect("join first");
        SecureChannel::new(session, Arc::clone(&self.identity), remote)
    }

    /// Seal `data` and append it to our session log
    pub async fn write(&mut self, channel: &SecureChannel, data: &[u8]) {
        let session = self.session.public_key();
        let log = self.wait_for_want(&session).await;
        let entry = channel.seal(self.sent, data).unwrap();
        self.push(log, entry).await;
    }
}
