//! BLAKE3 hashing, MACs and key derivation.
//!
//! Provides:
//! - Fixed (32-byte) and variable-length hashing
//! - Keyed hashing, used both as the handshake MAC and as the
//!   `shared(secret, value)` combiner
//! - Context-separated KDF
//! - Discovery keys for append-only logs

use crate::constant_time::ct_eq;

/// Digest produced by [`hash`].
pub type HashOutput = [u8; 32];

/// Context under which log discovery keys are derived.
const DISCOVERY_CONTEXT: &[u8] = b"murmur-log";

/// 32-byte BLAKE3 digest of `data`.
#[must_use]
pub fn hash(data: &[u8]) -> HashOutput {
    *blake3::hash(data).as_bytes()
}

/// Hash `data` into `output`, using the BLAKE3 extendable output for
/// lengths other than 32 bytes.
pub fn hash_into(data: &[u8], output: &mut [u8]) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data);
    hasher.finalize_xof().fill(output);
}

/// Hash `data` to an `N`-byte digest.
#[must_use]
pub fn hash_n<const N: usize>(data: &[u8]) -> [u8; N] {
    let mut output = [0u8; N];
    hash_into(data, &mut output);
    output
}

/// BLAKE3 in keyed mode.
#[must_use]
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> HashOutput {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Compute the MAC tag of `message` under `key`.
#[must_use]
pub fn mac(message: &[u8], key: &[u8; 32]) -> HashOutput {
    keyed_hash(key, message)
}

/// Verify a MAC tag in constant time.
#[must_use]
pub fn mac_verify(tag: &[u8], message: &[u8], key: &[u8; 32]) -> bool {
    ct_eq(tag, &mac(message, key))
}

/// Discovery key of a log identified by `key`.
///
/// The discovery key is safe to announce on the wire; it does not reveal
/// `key` itself.
#[must_use]
pub fn discovery_key(key: &[u8; 32]) -> HashOutput {
    keyed_hash(key, DISCOVERY_CONTEXT)
}

/// Derives subkeys bound to a fixed context string.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Bind a derivation context.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let kdf = Kdf::new("murmur 2024 handshake auth box");
    /// let key = kdf.derive_key(&key_material);
    /// ```
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Fill `output` with key material derived from `ikm`.
    pub fn derive(&self, ikm: &[u8], output: &mut [u8]) {
        let mut hasher = blake3::Hasher::new_derive_key(self.context);
        hasher.update(ikm);
        hasher.finalize_xof().fill(output);
    }

    /// Derive one 32-byte subkey.
    #[must_use]
    pub fn derive_key(&self, ikm: &[u8]) -> [u8; 32] {
        blake3::derive_key(self.context, ikm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake3_basic() {
        let data = b"hello world";
        assert_eq!(hash(data), hash(data));
        assert_ne!(hash(data), [0u8; 32]);
    }

    #[test]
    fn test_hash_n_matches_fixed_prefix() {
        let digest = hash(b"prefix");
        let short: [u8; 24] = hash_n(b"prefix");

        // XOF output starts with the regular digest
        assert_eq!(&digest[..24], &short[..]);
    }

    #[test]
    fn test_keyed_hash_depends_on_key() {
        let a = keyed_hash(&[1u8; 32], b"message");
        let b = keyed_hash(&[2u8; 32], b"message");
        assert_ne!(a, b);
    }

    #[test]
    fn test_mac_roundtrip() {
        let key = [7u8; 32];
        let tag = mac(b"public key", &key);

        assert!(mac_verify(&tag, b"public key", &key));
        assert!(!mac_verify(&tag, b"public kez", &key));
        assert!(!mac_verify(&tag[..31], b"public key", &key));
    }

    #[test]
    fn test_mac_rejects_flipped_bit() {
        let key = [9u8; 32];
        let mut tag = mac(b"m", &key);
        tag[5] ^= 0x10;
        assert!(!mac_verify(&tag, b"m", &key));
    }

    #[test]
    fn test_discovery_key_differs_from_key() {
        let key = [3u8; 32];
        assert_ne!(discovery_key(&key), key);
        assert_eq!(discovery_key(&key), discovery_key(&key));
    }

    #[test]
    fn test_kdf_different_contexts() {
        let key1 = Kdf::new("murmur test context 1").derive_key(b"same input");
        let key2 = Kdf::new("murmur test context 2").derive_key(b"same input");
        assert_ne!(key1, key2);
    }

    #[test]
    fn test_kdf_derive_extends_derive_key() {
        let kdf = Kdf::new("murmur test context");
        let mut long = [0u8; 64];
        kdf.derive(b"ikm", &mut long);
        assert_eq!(&long[..32], &kdf.derive_key(b"ikm")[..]);
    }

    // BLAKE3 known test vector
    #[test]
    fn test_blake3_empty_string() {
        let expected = [
            0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc,
            0xc9, 0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca,
            0xe4, 0x1f, 0x32, 0x62,
        ];

        assert_eq!(hash(b""), expected);
    }
}
