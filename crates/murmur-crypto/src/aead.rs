//! Secret boxes: XChaCha20-Poly1305 with 24-byte nonces.
//!
//! Every box in the protocol (AUTH, OKAY, the identity announcement and
//! each data-phase entry) is sealed here. Nonces behave as 192-bit
//! little-endian counters so a reader can jump straight to the nonce of
//! any log position.
//!
//! ```ignore
//! use murmur_crypto::aead::{AeadKey, Nonce};
//!
//! let key = AeadKey::new([7u8; 32]);
//! let nonce = Nonce::from_bytes([0u8; 24]).advanced_by(1);
//!
//! let sealed = key.encrypt(&nonce, b"secret", b"")?;
//! assert_eq!(key.decrypt(&nonce, &sealed, b"")?, b"secret");
//! ```

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::ZeroizeOnDrop;

/// Poly1305 tag appended to every box
pub const TAG_SIZE: usize = 16;

/// Nonce size
pub const NONCE_SIZE: usize = 24;

/// Key size
pub const KEY_SIZE: usize = 32;

/// 24-byte box nonce.
///
/// Advancing returns a new value; `self` is never modified.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Wrap raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// `None` unless `slice` is exactly [`NONCE_SIZE`] bytes
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        slice.try_into().ok().map(Self)
    }

    /// Next nonce in sequence
    #[must_use]
    pub fn increment(&self) -> Self {
        self.advanced_by(1)
    }

    /// This nonce plus `steps`, carrying through all 24 bytes and wrapping
    /// at 2^192.
    #[must_use]
    pub fn advanced_by(&self, steps: u64) -> Self {
        let mut bytes = self.0;
        let mut carry = u128::from(steps);
        for byte in &mut bytes {
            if carry == 0 {
                break;
            }
            let sum = u128::from(*byte) + (carry & 0xFF);
            *byte = (sum & 0xFF) as u8;
            carry = (carry >> 8) + (sum >> 8);
        }
        Self(bytes)
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// Box key, wiped on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Wrap raw key bytes
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless `slice` is
    /// [`KEY_SIZE`] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        slice
            .try_into()
            .map(Self)
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: slice.len(),
            })
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.0).into())
    }

    /// Seal `plaintext`; the result is [`TAG_SIZE`] bytes longer.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the cipher refuses the
    /// input.
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        self.cipher()
            .encrypt(XNonce::from_slice(nonce.as_bytes()), payload)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Open a sealed box.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] if the box is shorter than
    /// a tag or does not authenticate.
    pub fn decrypt(&self, nonce: &Nonce, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let payload = Payload { msg: sealed, aad };
        self.cipher()
            .decrypt(XNonce::from_slice(nonce.as_bytes()), payload)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
