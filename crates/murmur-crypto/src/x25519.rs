//! X25519 Diffie-Hellman over Ed25519 keypairs (RFC 7748).
//!
//! Keypairs are Ed25519; agreement maps the local secret to its X25519
//! scalar and the peer's public key to its Montgomery form. Because each
//! peer combines its own secret with the other's public key, both sides
//! of any key pair compute the same value.
//!
//! Provides:
//! - Low-order point rejection
//! - Zeroization of shared secrets

use crate::CryptoError;
use crate::signatures::{KeyPair, VerifyingKey};
use zeroize::{Zeroize, Zeroizing};

/// X25519 shared secret (32 bytes), zeroized on drop.
pub struct SharedSecret(Zeroizing<[u8; 32]>);

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// The shared secret should be fed through a KDF before being used
    /// as an encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Agree on a shared secret between the holder of `own` and the holder of
/// the secret behind `peer`.
///
/// # Errors
///
/// Returns [`CryptoError::LowOrderPoint`] if the peer key is a low-order
/// point and the result would not depend on our secret.
pub fn shared(own: &KeyPair, peer: &VerifyingKey) -> Result<SharedSecret, CryptoError> {
    let mut scalar = own.scalar_bytes();
    let secret = x25519_dalek::StaticSecret::from(scalar);
    scalar.zeroize();

    let public = x25519_dalek::PublicKey::from(peer.montgomery_bytes());
    let agreed = secret.diffie_hellman(&public);

    if !agreed.was_contributory() {
        return Err(CryptoError::LowOrderPoint);
    }

    Ok(SharedSecret(Zeroizing::new(agreed.to_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_x25519_key_exchange() {
        let alice = KeyPair::random();
        let bob = KeyPair::random();

        let alice_shared = shared(&alice, &bob.public_key()).unwrap();
        let bob_shared = shared(&bob, &alice.public_key()).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_distinct_pairs_distinct_secrets() {
        let alice = KeyPair::random();
        let bob = KeyPair::random();
        let carol = KeyPair::random();

        let ab = shared(&alice, &bob.public_key()).unwrap();
        let ac = shared(&alice, &carol.public_key()).unwrap();

        assert_ne!(ab.as_bytes(), ac.as_bytes());
    }

    #[test]
    fn test_agreement_is_symmetric_across_many_keys() {
        let keys: Vec<KeyPair> = (0..6).map(|_| KeyPair::random()).collect();

        for a in &keys {
            for b in &keys {
                let ab = shared(a, &b.public_key()).unwrap();
                let ba = shared(b, &a.public_key()).unwrap();
                assert_eq!(ab.as_bytes(), ba.as_bytes());
            }
        }
    }

    #[test]
    fn test_reject_low_order_points() {
        let own = KeyPair::random();

        // Ed25519 identity point maps to a low-order Montgomery point
        let mut identity = [0u8; 32];
        identity[0] = 1;
        let peer = VerifyingKey::from_bytes(&identity).unwrap();

        assert!(matches!(
            shared(&own, &peer),
            Err(CryptoError::LowOrderPoint)
        ));
    }
}
