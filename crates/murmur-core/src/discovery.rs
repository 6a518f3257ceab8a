//! Rendezvous identity announcement.
//!
//! Peers meet on a rendezvous log keyed by `H(shared secret)` and announce
//! their long-term public key as replication user data. The key travels
//! sealed under a key derived from the shared secret, so an observer of the
//! wire learns the rendezvous discovery key and nothing else.

use murmur_crypto::aead::{AeadKey, NONCE_SIZE, Nonce, TAG_SIZE};
use murmur_crypto::hash::{self, Kdf};
use murmur_crypto::{CryptoError, PUBLIC_KEY_SIZE, VerifyingKey, random};

const IDENTITY_BOX_CONTEXT: &str = "murmur 2024-06 rendezvous identity";

/// Size of a sealed announcement
pub const ANNOUNCEMENT_SIZE: usize = NONCE_SIZE + PUBLIC_KEY_SIZE + TAG_SIZE;

/// Rendezvous log key for a shared secret
#[must_use]
pub fn rendezvous_key(shared_key: &[u8; 32]) -> [u8; 32] {
    hash::hash(shared_key)
}

fn announcement_key(shared_key: &[u8; 32]) -> AeadKey {
    AeadKey::new(Kdf::new(IDENTITY_BOX_CONTEXT).derive_key(shared_key))
}

/// Seal our long-term public key for the rendezvous handshake.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if no nonce can be drawn.
pub fn seal_identity(
    shared_key: &[u8; 32],
    public_key: &VerifyingKey,
) -> Result<Vec<u8>, CryptoError> {
    let nonce = Nonce::from_bytes(random::random_24()?);
    let sealed = announcement_key(shared_key).encrypt(&nonce, public_key.as_bytes(), &[])?;

    let mut announcement = Vec::with_capacity(ANNOUNCEMENT_SIZE);
    announcement.extend_from_slice(nonce.as_bytes());
    announcement.extend_from_slice(&sealed);
    Ok(announcement)
}

/// Open a remote announcement. `None` if it was not sealed under the same
/// shared secret or does not hold a valid public key.
#[must_use]
pub fn open_identity(shared_key: &[u8; 32], announcement: &[u8]) -> Option<VerifyingKey> {
    if announcement.len() != ANNOUNCEMENT_SIZE {
        return None;
    }
    let (nonce, sealed) = announcement.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce)?;

    let public_key = announcement_key(shared_key)
        .decrypt(&nonce, sealed, &[])
        .ok()?;
    VerifyingKey::from_slice(&public_key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_crypto::KeyPair;

    #[test]
    fn test_announcement_opens_with_same_secret() {
        let key = [3u8; 32];
        let identity = KeyPair::random().public_key();

        let sealed = seal_identity(&key, &identity).unwrap();
        assert_eq!(sealed.len(), ANNOUNCEMENT_SIZE);
        assert_eq!(open_identity(&key, &sealed), Some(identity));
    }

    #[test]
    fn test_announcement_hides_key() {
        let key = [3u8; 32];
        let identity = KeyPair::random().public_key();

        let sealed = seal_identity(&key, &identity).unwrap();
        assert!(
            !sealed
                .windows(PUBLIC_KEY_SIZE)
                .any(|window| window == identity.as_bytes())
        );
    }

    #[test]
    fn test_announcement_rejected_under_other_secret() {
        let identity = KeyPair::random().public_key();
        let sealed = seal_identity(&[3u8; 32], &identity).unwrap();

        assert_eq!(open_identity(&[4u8; 32], &sealed), None);
        assert_eq!(open_identity(&[3u8; 32], &sealed[1..]), None);
    }

    #[test]
    fn test_rendezvous_key_is_hash_of_secret() {
        let key = [5u8; 32];
        assert_eq!(rendezvous_key(&key), hash::hash(&key));
        assert_ne!(rendezvous_key(&key), key);
    }
}
