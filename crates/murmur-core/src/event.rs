//! Lifecycle events a caller may observe through
//! [`crate::Connection::subscribe`].
//!
//! Events are notifications only. Handshake failures are reported through
//! the `Result` of [`crate::Connection::connect`] and never as an event.

use crate::capability::CapabilitySet;
use murmur_crypto::VerifyingKey;
use murmur_log::DiscoveryKey;

/// Which log a [`ConnectionEvent::ChannelReady`] refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Discovery-only rendezvous log
    Rendezvous,
    /// Log we append to (identity key before rotation, session key after)
    Sender,
    /// Replica of the remote's sender
    Receiver,
}

/// Connection lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A log channel finished opening
    ChannelReady {
        /// Channel role
        channel: ChannelKind,
        /// Discovery key of the opened log
        discovery_key: DiscoveryKey,
    },

    /// Discovery produced the remote long-term key
    RemoteIdentity {
        /// Remote long-term public key
        remote_public_key: VerifyingKey,
    },

    /// Remote HELLO verified
    Hello {
        /// Remote session public key
        remote_session_key: VerifyingKey,
    },

    /// Remote AUTH verified and capabilities accepted
    Auth {
        /// Remote long-term public key proven by the signature
        remote_public_key: VerifyingKey,
    },

    /// Remote OKAY verified
    Okay,

    /// Channels rotated; the data phase is open
    Handshake {
        /// Negotiated authorization
        authorized: CapabilitySet,
    },

    /// A data-phase entry failed verification
    MessageRejected {
        /// Position of the entry in the session receiver
        position: u64,
    },

    /// The remote closed the transport
    RemoteClosed,

    /// The connection finished tearing down
    Closed,
}
