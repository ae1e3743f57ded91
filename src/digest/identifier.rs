//! Digest Identifier
//!
//! `DigestId` is the universal key type: a fixed-length digest plus the
//! provider that produced it. It is `Copy`, so it can be stored inline in
//! ring vectors and map keys without allocation.
//!
//! Ordering is unsigned lexicographic over the digest bytes. Identifiers of
//! different providers with a shared prefix are further ordered by length and
//! then by provider tag, which keeps `Ord` consistent with `Eq`.
//!
//! An identifier computed from zero input bytes is invalid. It never compares
//! equal to a valid identifier and caches refuse it as a key. An absent
//! identifier is modelled as `Option<DigestId>`: `None` equals only `None`
//! and orders below every `Some`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::encoding;
use super::provider::{DigestProvider, MAX_DIGEST_LEN};
use crate::error::{Error, Result};

/// Immutable, ordered digest identifier
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "DigestIdRepr", into = "DigestIdRepr")]
pub struct DigestId {
    provider: DigestProvider,
    bytes: [u8; MAX_DIGEST_LEN],
    source_length: Option<u64>,
}

impl DigestId {
    /// Hash `content` with `provider`
    pub fn compute(content: &[u8], provider: DigestProvider) -> Self {
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        provider.digest_into(content, &mut bytes);
        Self {
            provider,
            bytes,
            source_length: Some(content.len() as u64),
        }
    }

    /// Reconstruct from raw digest bytes
    ///
    /// The byte count must equal the provider's digest length exactly.
    pub fn from_binary(
        bytes: &[u8],
        provider: DigestProvider,
        source_length: Option<u64>,
    ) -> Result<Self> {
        let expected = provider.digest_len();
        if bytes.len() != expected {
            return Err(Error::LengthMismatch {
                provider: provider.name().to_string(),
                expected,
                actual: bytes.len(),
            });
        }

        let mut buf = [0u8; MAX_DIGEST_LEN];
        buf[..expected].copy_from_slice(bytes);
        Ok(Self {
            provider,
            bytes: buf,
            source_length,
        })
    }

    /// Reconstruct from base64 text in either the standard or transport alphabet
    pub fn from_base64(
        text: &str,
        provider: DigestProvider,
        source_length: Option<u64>,
    ) -> Result<Self> {
        let bytes = encoding::decode_any(text)?;
        Self::from_binary(&bytes, provider, source_length)
    }

    /// Provider that produced this digest
    #[inline]
    pub fn provider(&self) -> DigestProvider {
        self.provider
    }

    /// Digest bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.provider.digest_len()]
    }

    /// Digest length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.provider.digest_len()
    }

    /// Always false; digests are never empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Length of the hashed input, when known
    #[inline]
    pub fn source_length(&self) -> Option<u64> {
        self.source_length
    }

    /// Whether this identifier may be used as a key
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.source_length != Some(0)
    }

    /// Standard-alphabet base64
    pub fn to_base64(&self) -> String {
        encoding::encode_standard(self.as_bytes())
    }

    /// Transport-alphabet base64
    pub fn to_transport_base64(&self) -> String {
        encoding::encode(self.as_bytes())
    }

    /// Re-derive the identifier from its source
    ///
    /// An identifier is its own source, so this is always equal to `self`.
    pub fn rehash(&self) -> Self {
        *self
    }

    /// Digest of this identifier's own bytes under the same provider
    ///
    /// Derives a chained key that is stable for a given identifier.
    pub fn chain(&self) -> Self {
        Self::compute(self.as_bytes(), self.provider)
    }

    /// Confirm that `content` hashes to this identifier
    pub fn verify(&self, content: &[u8]) -> Result<()> {
        if let Some(expected) = self.source_length {
            let actual = content.len() as u64;
            if expected != actual {
                return Err(Error::SourceLengthMismatch { expected, actual });
            }
        }

        if Self::compute(content, self.provider) != *self {
            return Err(Error::Tamper {
                provider: self.provider.name().to_string(),
            });
        }
        Ok(())
    }
}

impl PartialEq for DigestId {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.is_valid() == other.is_valid()
            && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for DigestId {}

impl Hash for DigestId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.provider.hash(state);
        self.is_valid().hash(state);
        self.as_bytes().hash(state);
    }
}

impl Ord for DigestId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes()
            .cmp(other.as_bytes())
            .then_with(|| self.provider.cmp(&other.provider))
            .then_with(|| self.is_valid().cmp(&other.is_valid()))
    }
}

impl PartialOrd for DigestId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Comparisons against raw digest bytes

impl PartialEq<[u8]> for DigestId {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<Vec<u8>> for DigestId {
    fn eq(&self, other: &Vec<u8>) -> bool {
        self.as_bytes() == other.as_slice()
    }
}

impl PartialOrd<[u8]> for DigestId {
    fn partial_cmp(&self, other: &[u8]) -> Option<Ordering> {
        Some(self.as_bytes().cmp(other))
    }
}

impl PartialOrd<Vec<u8>> for DigestId {
    fn partial_cmp(&self, other: &Vec<u8>) -> Option<Ordering> {
        Some(self.as_bytes().cmp(other.as_slice()))
    }
}

impl AsRef<[u8]> for DigestId {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Display for DigestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for DigestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestId")
            .field("provider", &self.provider)
            .field("digest", &self.to_base64())
            .field("source_length", &self.source_length)
            .finish()
    }
}

/// Serialized shape of an identifier
#[derive(Serialize, Deserialize)]
struct DigestIdRepr {
    provider: DigestProvider,
    digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_length: Option<u64>,
}

impl TryFrom<DigestIdRepr> for DigestId {
    type Error = Error;

    fn try_from(repr: DigestIdRepr) -> Result<Self> {
        DigestId::from_base64(&repr.digest, repr.provider, repr.source_length)
    }
}

impl From<DigestId> for DigestIdRepr {
    fn from(id: DigestId) -> Self {
        Self {
            provider: id.provider,
            digest: id.to_transport_base64(),
            source_length: id.source_length,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_compute_deterministic() {
        for provider in DigestProvider::ALL {
            let h1 = DigestId::compute(b"TEST", provider);
            let h2 = DigestId::compute(b"TEST", provider);
            let h3 = DigestId::compute(b"test", provider);

            assert_eq!(h1.provider(), provider);
            assert_eq!(h1, h2);
            assert_ne!(h1, h3);
            assert_eq!(h1.len(), provider.digest_len());
            assert!(h1.is_valid());
        }
    }

    #[test]
    fn test_empty_input_is_invalid() {
        for provider in DigestProvider::ALL {
            let empty = DigestId::compute(b"", provider);
            assert!(!empty.is_valid());

            // Same bytes reconstructed without a source length are valid and unequal
            let rebuilt = DigestId::from_binary(empty.as_bytes(), provider, None).unwrap();
            assert!(rebuilt.is_valid());
            assert_ne!(empty, rebuilt);
            assert_ne!(empty.cmp(&rebuilt), Ordering::Equal);
        }
    }

    #[test]
    fn test_binary_roundtrip() {
        for provider in DigestProvider::ALL {
            let h1 = DigestId::compute(b"TEST", provider);
            let from_bytes = DigestId::from_binary(h1.as_bytes(), provider, Some(4)).unwrap();
            assert_eq!(h1, from_bytes);
            assert_eq!(from_bytes.source_length(), Some(4));

            let from_b64 = DigestId::from_base64(&h1.to_base64(), provider, Some(4)).unwrap();
            assert_eq!(h1, from_b64);

            let from_transport =
                DigestId::from_base64(&h1.to_transport_base64(), provider, None).unwrap();
            assert_eq!(h1, from_transport);
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        for provider in DigestProvider::ALL {
            let h = DigestId::compute(b"TEST", provider);
            let mut longer = h.as_bytes().to_vec();
            longer.push(0);
            let shorter = &h.as_bytes()[..h.len() - 1];

            assert_matches!(
                DigestId::from_binary(&longer, provider, None),
                Err(Error::LengthMismatch { actual, .. }) if actual == provider.digest_len() + 1
            );
            assert_matches!(
                DigestId::from_binary(shorter, provider, None),
                Err(Error::LengthMismatch { .. })
            );
        }
    }

    #[test]
    fn test_malformed_base64() {
        assert_matches!(
            DigestId::from_base64("%%%", DigestProvider::Md5, None),
            Err(Error::Decode(_))
        );
    }

    #[test]
    fn test_comparison_operators() {
        for provider in DigestProvider::ALL {
            let a = DigestId::compute(b"TEST", provider);
            let b = DigestId::compute(b"TEST", provider);
            let c = DigestId::compute(b"test", provider);

            assert!(a == b);
            assert!(a >= b);
            assert!(a <= b);
            assert!(a != c);

            let expected = a.as_bytes().cmp(c.as_bytes());
            assert_eq!(a.cmp(&c), expected);
            assert_eq!(a < c, expected == Ordering::Less);
            assert_eq!(a > c, expected == Ordering::Greater);
        }
    }

    #[test]
    fn test_comparison_with_bytes() {
        for provider in DigestProvider::ALL {
            let a = DigestId::compute(b"TEST", provider);
            let c = DigestId::compute(b"test", provider);
            let a_bytes = a.as_bytes().to_vec();
            let c_bytes = c.as_bytes().to_vec();

            assert!(a == a_bytes);
            assert!(a != c_bytes);
            assert!(a == *a_bytes.as_slice());

            let expected = a_bytes.cmp(&c_bytes);
            assert_eq!(a.partial_cmp(&c_bytes), Some(expected));
            assert_eq!(a.partial_cmp(c_bytes.as_slice()), Some(expected));
        }
    }

    #[test]
    fn test_absent_identifier_ordering() {
        let valid = Some(DigestId::compute(b"TEST", DigestProvider::Sha256));
        let absent: Option<DigestId> = None;

        assert_eq!(absent, None);
        assert_ne!(absent, valid);
        assert!(absent < valid);
        assert!(valid > absent);
    }

    #[test]
    fn test_sorting_is_total() {
        let mut ids: Vec<DigestId> = (0..64)
            .map(|i| DigestId::compute(format!("{}", i).as_bytes(), DigestProvider::Sha1))
            .collect();
        ids.sort();

        for pair in ids.windows(2) {
            assert!(pair[0] <= pair[1]);
            assert!(pair[0].as_bytes() <= pair[1].as_bytes());
        }
    }

    #[test]
    fn test_rehash_matches_original() {
        for provider in DigestProvider::ALL {
            let id = DigestId::compute(b"Test", provider);
            assert_eq!(id.rehash(), id);
            assert_eq!(id.rehash().to_base64(), id.to_base64());
            assert_eq!(id.rehash().source_length(), Some(4));
        }
    }

    #[test]
    fn test_chain_is_deterministic() {
        let id = DigestId::compute(b"TEST", DigestProvider::Sha384);
        assert_eq!(id.chain(), id.chain());
        assert_ne!(id.chain(), id);
        assert_eq!(id.chain().source_length(), Some(id.len() as u64));
    }

    #[test]
    fn test_verify() {
        let id = DigestId::compute(b"Test", DigestProvider::Md5);
        assert!(id.verify(b"Test").is_ok());
        assert_matches!(id.verify(b"Tes"), Err(Error::SourceLengthMismatch { .. }));
        assert_matches!(id.verify(b"test"), Err(Error::Tamper { .. }));

        let unbounded = DigestId::from_binary(id.as_bytes(), DigestProvider::Md5, None).unwrap();
        assert_matches!(unbounded.verify(b"Tes"), Err(Error::Tamper { .. }));
    }

    #[test]
    fn test_display_uses_standard_alphabet() {
        let id = DigestId::compute(b"Test", DigestProvider::Md5);
        assert_eq!(id.to_string(), "DLxmEfVUC9CAmjiNyVphWw==");
        assert_eq!(id.to_transport_base64(), "DLxmEfVUC9CAmjiNyVphWw..");
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = DigestId::compute(b"Test", DigestProvider::Sha256);
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.contains("\"SHA256\""));
        let back: DigestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert_eq!(back.source_length(), Some(4));
    }
}
