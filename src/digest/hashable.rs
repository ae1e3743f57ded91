//! Hashable capability
//!
//! Anything that can report a canonical [`DigestId`] on demand. The cache and
//! the ring only ever see the identifier, never the item's representation.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identifier::DigestId;
use super::provider::DigestProvider;

/// A value with a canonical digest identifier
pub trait Hashable {
    /// Provider used to compute the identifier
    fn provider(&self) -> DigestProvider;

    /// Canonical bytes the identifier is computed over
    fn hash_input(&self) -> Vec<u8>;

    /// Current identifier
    ///
    /// The default recomputes on every call. Implementations that cache
    /// should override this and [`Hashable::rehash`].
    fn digest(&self) -> DigestId {
        DigestId::compute(&self.hash_input(), self.provider())
    }

    /// Re-derive the identifier from the current inputs
    fn rehash(&mut self) -> DigestId {
        self.digest()
    }
}

impl<T: Hashable + ?Sized> Hashable for &T {
    fn provider(&self) -> DigestProvider {
        (**self).provider()
    }

    fn hash_input(&self) -> Vec<u8> {
        (**self).hash_input()
    }

    fn digest(&self) -> DigestId {
        (**self).digest()
    }
}

impl Hashable for DigestId {
    fn provider(&self) -> DigestProvider {
        DigestId::provider(self)
    }

    fn hash_input(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// An identifier is its own digest
    fn digest(&self) -> DigestId {
        *self
    }
}

/// A string paired with its cached digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashableString {
    value: String,
    provider: DigestProvider,
    #[serde(skip)]
    cached: Option<DigestId>,
}

impl HashableString {
    /// Create and hash a new string
    pub fn new(value: impl Into<String>, provider: DigestProvider) -> Self {
        let value = value.into();
        let cached = Some(DigestId::compute(value.as_bytes(), provider));
        Self {
            value,
            provider,
            cached,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Replace the string; the cached digest is dropped until the next rehash
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.value = value.into();
        self.cached = None;
    }

    /// Cached digest, if still current
    pub fn cached_digest(&self) -> Option<DigestId> {
        self.cached
    }
}

impl Hashable for HashableString {
    fn provider(&self) -> DigestProvider {
        self.provider
    }

    fn hash_input(&self) -> Vec<u8> {
        self.value.as_bytes().to_vec()
    }

    fn digest(&self) -> DigestId {
        self.cached
            .unwrap_or_else(|| DigestId::compute(self.value.as_bytes(), self.provider))
    }

    fn rehash(&mut self) -> DigestId {
        let id = DigestId::compute(self.value.as_bytes(), self.provider);
        self.cached = Some(id);
        id
    }
}

impl PartialEq for HashableString {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider && self.value == other.value
    }
}

impl Eq for HashableString {}

impl fmt::Display for HashableString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// =============================================================================
// Tests
// =============================================================================
