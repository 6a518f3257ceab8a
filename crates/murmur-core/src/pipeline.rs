//! Secure duplex pipeline.
//!
//! Every data-phase entry is
//!
//! ```text
//! signature (64) ‖ XChaCha20-Poly1305(plaintext, subkey(p), nonce + p + 1)
//! ```
//!
//! where `p` is the entry's position in its log, `subkey(p)` comes from the
//! session key ratchet and the signature is made with the writer's
//! long-term key over the ciphertext. Deriving the nonce from the position
//! keeps writer and reader in step even when the reader skips an entry.

use crate::handshake::Session;
use murmur_crypto::aead::{AeadKey, Nonce, TAG_SIZE};
use murmur_crypto::ratchet::ChainKey;
use murmur_crypto::{CryptoError, KeyPair, SIGNATURE_SIZE, Signature, VerifyingKey};
use std::sync::Arc;

fn entry_nonce(base: &Nonce, position: u64) -> Nonce {
    base.advanced_by(position).increment()
}

fn entry_key(key: &ChainKey, position: u64) -> AeadKey {
    AeadKey::new(*key.message_key(position).as_bytes())
}

/// Write half: seals and signs outbound entries
pub struct Sealer {
    key: ChainKey,
    nonce: Nonce,
    identity: Arc<KeyPair>,
}

impl Sealer {
    /// Seal `plaintext` as the entry at `position` of the session sender.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the AEAD fails.
    pub fn seal(&self, position: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = entry_key(&self.key, position).encrypt(
            &entry_nonce(&self.nonce, position),
            plaintext,
            &[],
        )?;
        let signature = self.identity.sign(&ciphertext);

        let mut entry = Vec::with_capacity(SIGNATURE_SIZE + ciphertext.len());
        entry.extend_from_slice(signature.as_bytes());
        entry.extend_from_slice(&ciphertext);
        Ok(entry)
    }
}

/// Read half: verifies and opens inbound entries
pub struct Opener {
    key: ChainKey,
    nonce: Nonce,
    remote_identity: VerifyingKey,
}

impl Opener {
    /// Verify and open the entry at `position` of the session receiver.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::InvalidSignature`] if the entry is too short or the
    ///   signature does not verify
    /// - [`CryptoError::DecryptionFailed`] if the ciphertext does not open
    pub fn open(&self, position: u64, entry: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if entry.len() < SIGNATURE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidSignature);
        }
        let (signature, ciphertext) = entry.split_at(SIGNATURE_SIZE);

        self.remote_identity
            .verify(ciphertext, &Signature::from_slice(signature)?)?;

        entry_key(&self.key, position).decrypt(
            &entry_nonce(&self.nonce, position),
            ciphertext,
            &[],
        )
    }
}

/// Both halves of a session's data phase
pub struct SecureChannel {
    sealer: Sealer,
    opener: Opener,
}

impl SecureChannel {
    /// Build from a completed handshake
    #[must_use]
    pub fn new(session: &Session, identity: Arc<KeyPair>, remote_identity: VerifyingKey) -> Self {
        Self {
            sealer: Sealer {
                key: session.key().clone(),
                nonce: session.nonce(),
                identity,
            },
            opener: Opener {
                key: session.key().clone(),
                nonce: session.remote_nonce(),
                remote_identity,
            },
        }
    }

    /// Seal an outbound entry
    ///
    /// # Errors
    ///
    /// See [`Sealer::seal`].
    pub fn seal(&self, position: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.sealer.seal(position, plaintext)
    }

    /// Open an inbound entry
    ///
    /// # Errors
    ///
    /// See [`Opener::open`].
    pub fn open(&self, position: u64, entry: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.opener.open(position, entry)
    }

    /// Split into independently owned halves
    #[must_use]
    pub fn split(self) -> (Sealer, Opener) {
        (self.sealer, self.opener)
    }
}
