//! Errors raised by the primitives.

use thiserror::Error;

/// Failure of a cryptographic primitive
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Sealing an AEAD box failed
    #[error("sealing failed")]
    EncryptionFailed,

    /// An AEAD box did not open under the given key and nonce
    #[error("box did not open")]
    DecryptionFailed,

    /// Key material of the wrong size
    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required size
        expected: usize,
        /// Size supplied
        actual: usize,
    },

    /// Signature malformed or made by another key
    #[error("signature does not verify")]
    InvalidSignature,

    /// Bytes are not an Ed25519 point
    #[error("not a valid public key")]
    InvalidPublicKey,

    /// Diffie-Hellman produced a non-contributory (low-order) result
    #[error("key agreement produced a low-order point")]
    LowOrderPoint,

    /// Secret key does not belong to the supplied public key
    #[error("secret key does not match public key")]
    KeyMismatch,

    /// The OS random source failed
    #[error("OS randomness unavailable")]
    RandomFailed,
}
