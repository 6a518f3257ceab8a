//! Error types for the murmur core protocol.

use murmur_crypto::CryptoError;
use murmur_log::LogError;
use std::borrow::Cow;
use thiserror::Error;

/// Core protocol errors
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid constructor input
    #[error("configuration error: {0}")]
    Configuration(Cow<'static, str>),

    /// Handshake attempt failed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Invalid capability input
    #[error("capability error: {0}")]
    Capability(#[from] CapabilityError),

    /// A data-phase entry failed signature or AEAD verification
    #[error("message at position {position} failed verification")]
    MessageVerificationFailed {
        /// Position of the rejected entry in the session receiver
        position: u64,
    },

    /// Discovery returned our own public key as the remote identity
    #[error("remote identity is our own public key")]
    SelfConnection,

    /// A remote identity was already bound to this connection
    #[error("remote identity already bound")]
    RemoteAlreadyBound,

    /// Remote identity announcement could not be opened or parsed
    #[error("invalid remote identity announcement")]
    InvalidRemoteIdentity,

    /// Data-phase operation before the handshake completed
    #[error("connection is not handshaken")]
    NotConnected,

    /// Operation on a closed connection
    #[error("connection closed")]
    Closed,

    /// The remote side closed before the handshake completed
    #[error("remote closed the connection")]
    RemoteClosed,

    /// Operation not valid in the current lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Message does not fit a single replication frame
    #[error("message of {size} bytes exceeds the limit of {limit}")]
    MessageTooLarge {
        /// Size of the rejected message
        size: usize,
        /// Largest message the connection accepts
        limit: usize,
    },

    /// Sender log position diverged from the local counter
    #[error("sequence mismatch: expected position {expected}, got {actual}")]
    SequenceMismatch {
        /// Position the pipeline sealed for
        expected: u64,
        /// Position the log assigned
        actual: u64,
    },

    /// Log channel error
    #[error("log error: {0}")]
    Log(#[from] LogError),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// One or more channels failed to close
    #[error("{count} channel(s) failed to close, first: {first}")]
    Teardown {
        /// Number of failed closes
        count: usize,
        /// First failure observed
        first: LogError,
    },

    /// Transport error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handshake failures, one per verification stage
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// HELLO MAC did not verify
    #[error("hello verification failed")]
    HelloVerificationFailed,

    /// AUTH box could not be opened
    #[error("auth decryption failed")]
    AuthDecryptFailed,

    /// AUTH carried a long-term key other than the discovered one
    #[error("remote identity does not match the discovered key")]
    IdentityMismatch,

    /// AUTH signature did not verify
    #[error("auth verification failed")]
    AuthVerificationFailed,

    /// Declared capability sets do not intersect
    #[error("capability rejected")]
    CapabilityRejected,

    /// OKAY box or signature did not verify
    #[error("okay verification failed")]
    OkayVerificationFailed,

    /// Message arrived in a state that does not expect one
    #[error("unexpected handshake message in state {0}")]
    InvalidState(&'static str),
}

/// Capability token errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityError {
    /// Name was empty after normalization
    #[error("capability name is empty")]
    Empty,

    /// Raw token of the wrong size
    #[error("invalid capability token length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
