//! Capability tokens and negotiation.
//!
//! A capability is a 32-byte BLAKE3 digest of a (normalized) permission
//! name, optionally keyed. Each peer declares a set of tokens; the set is
//! deduplicated and sorted by byte order so it has exactly one encoding on
//! the wire. During AUTH both peers exchange their sets and derive the same
//! authorization:
//!
//! | Local | Remote | Authorization |
//! |---|---|---|
//! | empty | any | remote set |
//! | any | empty | local set |
//! | non-empty | non-empty | intersection, rejected if empty |
//!
//! An empty set means "no restriction requested", so checking is opt-in
//! per peer.

use crate::error::{CapabilityError, HandshakeError};
use murmur_crypto::hash;
use std::borrow::Cow;
use std::fmt;

/// Capability token size
pub const CAPABILITY_SIZE: usize = 32;

/// Capability token
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Capability([u8; CAPABILITY_SIZE]);

impl Capability {
    /// Create from raw token bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; CAPABILITY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidLength`] unless the slice is
    /// exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CapabilityError> {
        slice
            .try_into()
            .map(Self)
            .map_err(|_| CapabilityError::InvalidLength {
                expected: CAPABILITY_SIZE,
                actual: slice.len(),
            })
    }

    /// Token bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CAPABILITY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Capability({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Strip every whitespace character from a capability name.
///
/// `" read : files "` and `"read:files"` name the same capability.
#[must_use]
pub fn normalize(name: &str) -> String {
    name.split_whitespace().collect()
}

fn prepare(name: &str, normalized: bool) -> Result<Cow<'_, str>, CapabilityError> {
    let name = if normalized {
        Cow::Owned(normalize(name))
    } else {
        Cow::Borrowed(name)
    };

    if name.is_empty() {
        return Err(CapabilityError::Empty);
    }
    Ok(name)
}

/// Token for a capability name, normalized first.
///
/// # Errors
///
/// Returns [`CapabilityError::Empty`] if nothing is left after
/// normalization.
pub fn capability(name: &str) -> Result<Capability, CapabilityError> {
    capability_with(name, true)
}

/// Token for a capability name, hashing the raw bytes when `normalized` is
/// false.
///
/// # Errors
///
/// Returns [`CapabilityError::Empty`] for an empty name.
pub fn capability_with(name: &str, normalized: bool) -> Result<Capability, CapabilityError> {
    let name = prepare(name, normalized)?;
    Ok(Capability(hash::hash(name.as_bytes())))
}

/// Token for a capability name under a 32-byte key.
///
/// Keyed tokens only match tokens derived under the same key, which lets an
/// application keep its capability namespace apart from others.
///
/// # Errors
///
/// Returns [`CapabilityError::Empty`] for an empty name.
pub fn capability_keyed(
    name: &str,
    key: &[u8; 32],
    normalized: bool,
) -> Result<Capability, CapabilityError> {
    let name = prepare(name, normalized)?;
    Ok(Capability(hash::keyed_hash(key, name.as_bytes())))
}

/// Canonical (sorted, deduplicated) capability set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(Vec<Capability>);

impl CapabilitySet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a set from tokens
    #[must_use]
    pub fn declare<I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = Capability>,
    {
        let mut tokens: Vec<Capability> = tokens.into_iter().collect();
        tokens.sort_unstable();
        tokens.dedup();
        Self(tokens)
    }

    /// Declare a set from capability names, skipping names that are empty
    /// after normalization
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::declare(names.into_iter().filter_map(|name| capability(name.as_ref()).ok()))
    }

    /// Declare a set from raw tokens, skipping entries of the wrong size
    #[must_use]
    pub fn from_raw<I, B>(tokens: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        Self::declare(
            tokens
                .into_iter()
                .filter_map(|token| Capability::from_slice(token.as_ref()).ok()),
        )
    }

    /// Parse a concatenated token stream as sent in AUTH
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidLength`] if the stream is not a
    /// whole number of tokens.
    pub fn parse(stream: &[u8]) -> Result<Self, CapabilityError> {
        if stream.len() % CAPABILITY_SIZE != 0 {
            return Err(CapabilityError::InvalidLength {
                expected: stream.len().next_multiple_of(CAPABILITY_SIZE),
                actual: stream.len(),
            });
        }

        Ok(Self::declare(
            stream
                .chunks_exact(CAPABILITY_SIZE)
                .filter_map(|chunk| Capability::from_slice(chunk).ok()),
        ))
    }

    /// Concatenated token stream in canonical order
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|c| c.0).collect()
    }

    /// Tokens present both here and in a concatenated remote stream, in
    /// canonical order
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::InvalidLength`] on a malformed stream.
    pub fn intersect(&self, remote: &[u8]) -> Result<Self, CapabilityError> {
        let remote = Self::parse(remote)?;
        Ok(Self(
            self.0
                .iter()
                .filter(|token| remote.contains(token))
                .copied()
                .collect(),
        ))
    }

    /// Authorization both peers agree on given each side's declaration.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::CapabilityRejected`] if both sets are
    /// non-empty and disjoint.
    pub fn negotiate(&self, remote: &Self) -> Result<Self, HandshakeError> {
        if self.is_empty() {
            return Ok(remote.clone());
        }
        if remote.is_empty() {
            return Ok(self.clone());
        }

        let authorized = Self(
            self.0
                .iter()
                .filter(|token| remote.contains(token))
                .copied()
                .collect(),
        );
        if authorized.is_empty() {
            return Err(HandshakeError::CapabilityRejected);
        }
        Ok(authorized)
    }

    /// Check membership
    #[must_use]
    pub fn contains(&self, token: &Capability) -> bool {
        self.0.binary_search(token).is_ok()
    }

    /// Number of tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no capability is declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tokens in canonical order
    #[must_use]
    pub fn as_slice(&self) -> &[Capability] {
        &self.0
    }

    /// Iterate in canonical order
    pub fn iter(&self) -> std::slice::Iter<'_, Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self::declare(iter)
    }
}

impl<'a> IntoIterator for &'a CapabilitySet {
    type Item = &'a Capability;
    type IntoIter = std::slice::Iter<'a, Capability>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cap(name: &str) -> Capability {
        capability(name).unwrap()
    }

    #[test]
    fn test_normalize_strips_whitespace() {
        assert_eq!(normalize("  read : files \n"), "read:files");
        assert_eq!(normalize("a\tb\r\nc"), "abc");
        assert_eq!(normalize("a|b"), "a|b");
    }

    #[test]
    fn test_capability_is_deterministic() {
        assert_eq!(cap("read:files"), cap(" read:files "));
        assert_ne!(cap("read:files"), cap("write:files"));
    }

    #[test]
    fn test_raw_capability_skips_normalization() {
        assert_ne!(
            capability_with("a b", false).unwrap(),
            capability_with("a b", true).unwrap()
        );
        assert_eq!(capability_with("ab", false).unwrap(), cap("a b"));
    }

    #[test]
    fn test_empty_capability_rejected() {
        assert_eq!(capability(""), Err(CapabilityError::Empty));
        assert_eq!(capability(" \t\n"), Err(CapabilityError::Empty));
        assert!(capability_with(" ", false).is_ok());
    }

    #[test]
    fn test_keyed_capability_differs() {
        let key = [7u8; 32];
        let keyed = capability_keyed("read", &key, true).unwrap();
        assert_ne!(keyed, cap("read"));
        assert_eq!(keyed, capability_keyed(" read", &key, true).unwrap());
        assert_ne!(keyed, capability_keyed("read", &[8u8; 32], true).unwrap());
    }

    #[test]
    fn test_declare_sorts_and_dedups() {
        let set = CapabilitySet::declare([cap("b"), cap("a"), cap("b"), cap("c")]);
        assert_eq!(set.len(), 3);

        let slice = set.as_slice();
        assert!(slice.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_declare_drops_invalid_entries() {
        let names = CapabilitySet::from_names(["read", "", "  ", "write"]);
        assert_eq!(names.len(), 2);

        let raw = CapabilitySet::from_raw([vec![1u8; 32], vec![2u8; 31], vec![]]);
        assert_eq!(raw.len(), 1);
    }

    #[test]
    fn test_parse_stream() {
        let set = CapabilitySet::from_names(["a", "b"]);
        assert_eq!(CapabilitySet::parse(&set.to_bytes()).unwrap(), set);
        assert!(CapabilitySet::parse(&[]).unwrap().is_empty());
        assert!(matches!(
            CapabilitySet::parse(&[0u8; 33]),
            Err(CapabilityError::InvalidLength { actual: 33, .. })
        ));
    }

    #[test]
    fn test_intersect_stream() {
        let local = CapabilitySet::from_names(["a", "b", "c"]);
        let remote = CapabilitySet::from_names(["c", "d", "a"]);

        let both = local.intersect(&remote.to_bytes()).unwrap();
        assert_eq!(both, CapabilitySet::from_names(["a", "c"]));
    }

    #[test]
    fn test_negotiate_rules() {
        let empty = CapabilitySet::new();
        let x = CapabilitySet::from_names(["x"]);
        let y = CapabilitySet::from_names(["y"]);
        let xy = CapabilitySet::from_names(["x", "y"]);

        assert_eq!(empty.negotiate(&empty).unwrap(), empty);
        assert_eq!(empty.negotiate(&x).unwrap(), x);
        assert_eq!(x.negotiate(&empty).unwrap(), x);
        assert_eq!(xy.negotiate(&y).unwrap(), y);
        assert_eq!(
            x.negotiate(&y).unwrap_err(),
            HandshakeError::CapabilityRejected
        );
    }

    #[test]
    fn test_negotiate_is_symmetric() {
        let sets = [
            CapabilitySet::new(),
            CapabilitySet::from_names(["a"]),
            CapabilitySet::from_names(["a", "b"]),
            CapabilitySet::from_names(["b", "c"]),
            CapabilitySet::from_names(["d"]),
        ];

        for a in &sets {
            for b in &sets {
                assert_eq!(a.negotiate(b), b.negotiate(a));
            }
        }
    }
}
