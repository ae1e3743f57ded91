//! Placement Ring
//!
//! Deterministic mapping from identifiers to the node (cache tier or peer)
//! that owns them. See [`ConsistentHashRing`].

pub mod consistent;

pub use consistent::{ConsistentHashRing, DuplicatePolicy};
