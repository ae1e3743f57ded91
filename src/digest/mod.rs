//! Digest Module
//!
//! Content identifiers for everything Casket stores or moves.
//!
//! # Components
//!
//! - **Providers** (`provider.rs`): the enumerated digest algorithms, each with
//!   a wire tag, a fixed output length and an ASN.1 OID, kept in one static
//!   table.
//!
//! - **Identifier** (`identifier.rs`): `DigestId`, the immutable and totally
//!   ordered key type used by the ring, the caches and the container header.
//!
//! - **Hashable** (`hashable.rs`): the capability of reporting a canonical
//!   identifier, plus `HashableString`.
//!
//! - **Encoding** (`encoding.rs`): standard and transport base64.
//!
//! # Usage
//!
//! ```rust
//! use casket::digest::{DigestId, DigestProvider};
//!
//! let id = DigestId::compute(b"Test", DigestProvider::Md5);
//! assert_eq!(id.to_string(), "DLxmEfVUC9CAmjiNyVphWw==");
//!
//! let back = DigestId::from_base64(&id.to_string(), DigestProvider::Md5, Some(4)).unwrap();
//! assert_eq!(back, id);
//! ```

pub mod encoding;
pub mod hashable;
pub mod identifier;
pub mod provider;

#[cfg(test)]
mod proptest;

pub use hashable::{Hashable, HashableString};
pub use identifier::DigestId;
pub use provider::{DigestProvider, ProviderInfo, MAX_DIGEST_LEN};
