//! Ed25519 keypairs and signatures.
//!
//! Every murmur keypair, long-term identity and per-connection session
//! alike, is an Ed25519 keypair. The same keys take part in X25519
//! agreement through their Montgomery form (see [`crate::x25519`]).
//!
//! ## Usage
//!
//! ```ignore
//! use murmur_crypto::signatures::KeyPair;
//!
//! let keypair = KeyPair::random();
//! let signature = keypair.sign(b"authenticate this message");
//! assert!(keypair.public_key().verify(b"authenticate this message", &signature).is_ok());
//! ```

use crate::CryptoError;
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, OsRng, RngCore};
use std::fmt;
use zeroize::ZeroizeOnDrop;

/// Detached Ed25519 signature
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Wrap 64 raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Signature carried inside a message
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] for anything but 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 64] = slice.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    /// Wire bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    fn to_dalek(self) -> ed25519_dalek::Signature {
        ed25519_dalek::Signature::from_bytes(&self.0)
    }
}

/// Ed25519 keypair.
///
/// Zeroized on drop so secret material does not linger in memory.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyPair {
    inner: ed25519_dalek::SigningKey,
}

impl KeyPair {
    /// Generate a new keypair from the given RNG
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Generate a new keypair from the OS CSPRNG
    #[must_use]
    pub fn random() -> Self {
        Self::generate(&mut OsRng)
    }

    /// Create from a raw 32-byte seed
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Create from a public key and its secret seed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyMismatch`] if `public` is not derived from `secret`.
    pub fn from_parts(public: &[u8; 32], secret: &[u8; 32]) -> Result<Self, CryptoError> {
        let keypair = Self::from_seed(secret);
        if keypair.public_bytes() != *public {
            return Err(CryptoError::KeyMismatch);
        }
        Ok(keypair)
    }

    /// Detached signature over `message`
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }

    /// Public half of this keypair
    #[must_use]
    pub fn public_key(&self) -> VerifyingKey {
        VerifyingKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Raw public key bytes
    #[must_use]
    pub fn public_bytes(&self) -> [u8; 32] {
        self.inner.verifying_key().to_bytes()
    }

    /// Export the secret seed (use with extreme caution)
    #[must_use]
    pub fn to_seed(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Secret scalar bytes for X25519, prior to clamping.
    pub(crate) fn scalar_bytes(&self) -> [u8; 32] {
        self.inner.to_scalar_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public half of a [`KeyPair`]. Identifies a peer and names its logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerifyingKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    /// Parse a 32-byte public key
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] if the bytes are not a
    /// curve point.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        let inner = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self { inner })
    }

    /// Create from a slice that must be exactly 32 bytes
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKey`] on a wrong length or an invalid point.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Public key bytes by value
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// Borrow the raw public key bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.inner.as_bytes()
    }

    /// Check `signature` over `message`
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature does not
    /// authenticate the message under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.inner
            .verify(message, &signature.to_dalek())
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Montgomery-form bytes for X25519.
    pub(crate) fn montgomery_bytes(&self) -> [u8; 32] {
        self.inner.to_montgomery().to_bytes()
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VerifyingKey({})", hex::encode(&self.as_bytes()[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keypair = KeyPair::random();
        let signature = keypair.sign(b"authenticate this message");

        assert!(
            keypair
                .public_key()
                .verify(b"authenticate this message", &signature)
                .is_ok()
        );
    }

    #[test]
    fn test_wrong_message_fails_verification() {
        let keypair = KeyPair::random();
        let signature = keypair.sign(b"original message");

        assert!(
            keypair
                .public_key()
                .verify(b"tampered message", &signature)
                .is_err()
        );
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let signer = KeyPair::random();
        let other = KeyPair::random();
        let signature = signer.sign(b"test");

        assert!(other.public_key().verify(b"test", &signature).is_err());
    }

    #[test]
    fn test_tampered_signature_fails() {
        let keypair = KeyPair::random();
        let signature = keypair.sign(b"test message");

        let mut tampered = *signature.as_bytes();
        tampered[0] ^= 0xFF;

        assert!(
            keypair
                .public_key()
                .verify(b"test message", &Signature::from_bytes(tampered))
                .is_err()
        );
    }

    #[test]
    fn test_signature_from_slice_wrong_size() {
        assert!(Signature::from_slice(&[0u8; 32]).is_err());
        assert!(Signature::from_slice(&[0u8; 128]).is_err());
    }

    #[test]
    fn test_from_parts_checks_public_key() {
        let keypair = KeyPair::random();
        let seed = keypair.to_seed();

        assert!(KeyPair::from_parts(&keypair.public_bytes(), &seed).is_ok());
        assert_eq!(
            KeyPair::from_parts(&KeyPair::random().public_bytes(), &seed).unwrap_err(),
            CryptoError::KeyMismatch
        );
    }

    #[test]
    fn test_verifying_key_from_slice() {
        let keypair = KeyPair::random();
        let bytes = keypair.public_bytes();

        assert_eq!(
            VerifyingKey::from_slice(&bytes).unwrap(),
            keypair.public_key()
        );
        assert!(VerifyingKey::from_slice(&bytes[..31]).is_err());
    }

    #[test]
    fn test_debug_does_not_print_secret() {
        let keypair = KeyPair::random();
        let rendered = format!("{keypair:?}");
        assert!(!rendered.contains(&hex::encode(keypair.to_seed())));
    }
}
