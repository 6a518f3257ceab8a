//! # murmur Crypto
//!
//! Cryptographic primitives consumed by the murmur handshake and secure
//! channel.
//!
//! This crate provides:
//! - BLAKE3 hashing (fixed and variable output, keyed) and keyed MACs
//! - Ed25519 signatures over long-term and session keypairs
//! - X25519 agreement over the Montgomery form of those same keys
//! - `XChaCha20-Poly1305` sealing with counter-advanced nonces
//! - Context KDFs and the position-indexed subkey ratchet
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Agreement | X25519 (from Ed25519 keys) | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash / MAC | BLAKE3 (keyed) | 128-bit collision |
//! | KDF | BLAKE3 derive-key | 128-bit |
//! | Signatures | Ed25519 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod constant_time;
pub mod error;
pub mod hash;
pub mod random;
pub mod ratchet;
pub mod signatures;
pub mod x25519;

pub use error::CryptoError;
pub use signatures::{KeyPair, Signature, VerifyingKey};

/// Public key size (Ed25519, convertible to X25519)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Secret seed size (Ed25519)
pub const SECRET_KEY_SIZE: usize = 32;

/// Ed25519 signature size
pub const SIGNATURE_SIZE: usize = 64;

/// XChaCha20-Poly1305 key size
pub const XCHACHA_KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const XCHACHA_NONCE_SIZE: usize = 24;

/// BLAKE3 output size
pub const BLAKE3_OUTPUT_SIZE: usize = 32;

/// Keyed-BLAKE3 MAC tag size
pub const MAC_SIZE: usize = 32;
