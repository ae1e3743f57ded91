//! Digest Providers
//!
//! The enumerated digest algorithms and their static metadata table.
//!
//! Every provider has a one-byte wire tag, a fixed output length and an
//! ASN.1 object identifier. The table is immutable and built at compile time,
//! so concurrent readers never synchronize.

use serde::{Deserialize, Serialize};
use sha2::Digest;

use crate::error::{Error, Result};

/// Longest digest produced by any provider (SHA-512)
pub const MAX_DIGEST_LEN: usize = 64;

/// Supported digest algorithms
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum DigestProvider {
    /// MD5 - 128-bit
    #[serde(rename = "MD5", alias = "md5")]
    Md5 = 1,
    /// SHA-1 - 160-bit
    #[serde(rename = "SHA1", alias = "sha1")]
    Sha1 = 2,
    /// SHA-256 - 256-bit
    #[default]
    #[serde(rename = "SHA256", alias = "sha256")]
    Sha256 = 3,
    /// SHA-384 - 384-bit
    #[serde(rename = "SHA384", alias = "sha384")]
    Sha384 = 4,
    /// SHA-512 - 512-bit
    #[serde(rename = "SHA512", alias = "sha512")]
    Sha512 = 5,
}

/// Static metadata for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderInfo {
    /// The provider this row describes
    pub provider: DigestProvider,
    /// Display name
    pub name: &'static str,
    /// Digest output length in bytes
    pub digest_len: usize,
    /// ASN.1 object identifier
    pub oid: &'static str,
}

/// Provider metadata, indexed by `tag - 1`
static PROVIDER_TABLE: [ProviderInfo; 5] = [
    ProviderInfo {
        provider: DigestProvider::Md5,
        name: "MD5",
        digest_len: 16,
        oid: "1.2.840.113549.2.5",
    },
    ProviderInfo {
        provider: DigestProvider::Sha1,
        name: "SHA1",
        digest_len: 20,
        oid: "1.3.14.3.2.26",
    },
    ProviderInfo {
        provider: DigestProvider::Sha256,
        name: "SHA256",
        digest_len: 32,
        oid: "2.16.840.1.101.3.4.2.1",
    },
    ProviderInfo {
        provider: DigestProvider::Sha384,
        name: "SHA384",
        digest_len: 48,
        oid: "2.16.840.1.101.3.4.2.2",
    },
    ProviderInfo {
        provider: DigestProvider::Sha512,
        name: "SHA512",
        digest_len: 64,
        oid: "2.16.840.1.101.3.4.2.3",
    },
];

impl DigestProvider {
    /// Every supported provider, in tag order
    pub const ALL: [DigestProvider; 5] = [
        DigestProvider::Md5,
        DigestProvider::Sha1,
        DigestProvider::Sha256,
        DigestProvider::Sha384,
        DigestProvider::Sha512,
    ];

    /// Get the metadata row for this provider
    #[inline]
    pub fn info(self) -> &'static ProviderInfo {
        &PROVIDER_TABLE[self as usize - 1]
    }

    /// Digest length in bytes
    #[inline]
    pub fn digest_len(self) -> usize {
        self.info().digest_len
    }

    /// ASN.1 object identifier
    #[inline]
    pub fn oid(self) -> &'static str {
        self.info().oid
    }

    /// Display name
    #[inline]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// One-byte wire tag
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Resolve a wire tag
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(DigestProvider::Md5),
            2 => Ok(DigestProvider::Sha1),
            3 => Ok(DigestProvider::Sha256),
            4 => Ok(DigestProvider::Sha384),
            5 => Ok(DigestProvider::Sha512),
            other => Err(Error::UnknownProvider(other)),
        }
    }

    /// Resolve a provider from its OID
    pub fn from_oid(oid: &str) -> Option<Self> {
        PROVIDER_TABLE
            .iter()
            .find(|row| row.oid == oid)
            .map(|row| row.provider)
    }

    /// Run the digest primitive, writing `digest_len()` bytes into `out`
    pub fn digest_into(self, data: &[u8], out: &mut [u8; MAX_DIGEST_LEN]) {
        let len = self.digest_len();
        match self {
            DigestProvider::Md5 => out[..len].copy_from_slice(&md5::compute(data).0),
            DigestProvider::Sha1 => out[..len].copy_from_slice(&sha1::Sha1::digest(data)),
            DigestProvider::Sha256 => out[..len].copy_from_slice(&sha2::Sha256::digest(data)),
            DigestProvider::Sha384 => out[..len].copy_from_slice(&sha2::Sha384::digest(data)),
            DigestProvider::Sha512 => out[..len].copy_from_slice(&sha2::Sha512::digest(data)),
        }
    }

    /// Run the digest primitive, returning an owned digest
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        let mut out = [0u8; MAX_DIGEST_LEN];
        self.digest_into(data, &mut out);
        out[..self.digest_len()].to_vec()
    }
}

impl std::fmt::Display for DigestProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DigestProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('-', "").to_ascii_uppercase();
        PROVIDER_TABLE
            .iter()
            .find(|row| row.name == normalized)
            .map(|row| row.provider)
            .ok_or_else(|| Error::Config(format!("unknown digest provider: {}", s)))
    }
}

impl TryFrom<u8> for DigestProvider {
    type Error = Error;

    fn try_from(tag: u8) -> Result<Self> {
        Self::from_tag(tag)
    }
}

// =============================================================================
// Tests
// =============================================================================
