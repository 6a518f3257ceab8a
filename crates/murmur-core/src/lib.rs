//! # murmur Core
//!
//! Core protocol implementation for murmur.
//!
//! This crate provides:
//! - Capability tokens and the capability negotiator
//! - The HELLO / AUTH / OKAY secret handshake as a sans-IO state machine
//! - The secure duplex pipeline (per-entry subkey, seal, sign, verify, open)
//! - [`Connection`]: discovery, handshake, channel rotation and the data
//!   phase over replicated append-only logs
//!
//! ## Lifecycle
//!
//! ```text
//!   idle ──connect──► discovering ──remote identity──► handshaking
//!                                                          │
//!              closed ◄──close── connected ◄──rotation─────┘
//! ```
//!
//! ## Channels
//!
//! | Channel | Keyed by | Direction |
//! |---|---|---|
//! | Rendezvous | `H(shared secret)` | discovery only |
//! | Identity sender / receiver | long-term public keys | handshake |
//! | Session sender / receiver | session public keys | data phase |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod event;
pub mod handshake;
pub mod pipeline;

pub use capability::{
    CAPABILITY_SIZE, Capability, CapabilitySet, capability, capability_keyed, capability_with,
    normalize,
};
pub use config::{ConnectionConfig, VerifyFailurePolicy};
pub use connection::{Connection, ConnectionState};
pub use error::{CapabilityError, Error, HandshakeError, Result};
pub use event::{ChannelKind, ConnectionEvent};
pub use handshake::{Handshake, HandshakeState, Session, Step};
pub use pipeline::{Opener, Sealer, SecureChannel};

pub use murmur_crypto::{KeyPair, VerifyingKey};
pub use murmur_log::{BoxedWire, MemoryStorage, Storage};

/// Shared secret size
pub const SHARED_KEY_SIZE: usize = 32;

/// HELLO message size: MAC (32) + session public key (32)
pub const HELLO_SIZE: usize = murmur_crypto::MAC_SIZE + murmur_crypto::PUBLIC_KEY_SIZE;

/// Per-entry overhead in the data phase: signature (64) + AEAD tag (16)
pub const ENTRY_OVERHEAD: usize = murmur_crypto::SIGNATURE_SIZE + murmur_crypto::aead::TAG_SIZE;
