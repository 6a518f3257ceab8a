//! OS randomness for seeds, shared secrets and announcement nonces.

use crate::CryptoError;

/// Fill `buf` from the operating system.
///
/// # Errors
///
/// Returns [`CryptoError::RandomFailed`] if the OS source is unavailable.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    getrandom::getrandom(buf).map_err(|_| CryptoError::RandomFailed)
}

fn random_array<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// Fresh 32 bytes: a shared secret or a keypair seed
///
/// # Errors
///
/// See [`fill_random`].
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    random_array()
}

/// Fresh 24 bytes: one XChaCha20 nonce
///
/// # Errors
///
/// See [`fill_random`].
pub fn random_24() -> Result<[u8; 24], CryptoError> {
    random_array()
}
