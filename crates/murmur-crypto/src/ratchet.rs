//! Position-indexed subkey ratchet.
//!
//! Data-phase entries are never sealed under the session key directly.
//! Each entry gets its own message key derived from the session key and
//! the entry's position in its log, so compromising one message key
//! exposes only that entry.

use zeroize::{Zeroize, Zeroizing};

const SUBKEY_CONTEXT: &str = "murmur 2024-06 session subkey";

/// Session key material from which message keys are derived.
#[derive(Clone)]
pub struct ChainKey(Zeroizing<Vec<u8>>);

impl ChainKey {
    /// Create from raw key material of any length
    pub fn from_material(material: Vec<u8>) -> Self {
        Self(Zeroizing::new(material))
    }

    /// Raw key material
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derive the message key for the entry at `position`
    pub fn message_key(&self, position: u64) -> MessageKey {
        let mut hasher = blake3::Hasher::new_derive_key(SUBKEY_CONTEXT);
        hasher.update(&position.to_le_bytes());
        hasher.update(&self.0);
        MessageKey(*hasher.finalize().as_bytes())
    }
}

/// Message key derived from chain key
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_produce_different_keys() {
        let chain = ChainKey::from_material(vec![0x42u8; 96]);

        let key0 = chain.message_key(0);
        let key1 = chain.message_key(1);

        assert_ne!(key0.as_bytes(), key1.as_bytes());
    }

    #[test]
    fn test_message_key_is_deterministic() {
        let a = ChainKey::from_material(vec![1, 2, 3]);
        let b = ChainKey::from_material(vec![1, 2, 3]);

        assert_eq!(a.message_key(7).as_bytes(), b.message_key(7).as_bytes());
    }

    #[test]
    fn test_material_changes_every_key() {
        let a = ChainKey::from_material(vec![1, 2, 3]);
        let b = ChainKey::from_material(vec![1, 2, 4]);

        assert_ne!(a.message_key(0).as_bytes(), b.message_key(0).as_bytes());
    }
}
