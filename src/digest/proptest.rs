//! Property-Based Tests for Digest Identifiers
//!
//! # Test Properties
//!
//! 1. **Determinism**: compute(x, p) == compute(x, p)
//! 2. **Roundtrip**: binary and base64 reconstruction yield the same identifier
//! 3. **Length Checking**: one byte too many or too few is always rejected
//! 4. **Ordering**: exactly one of <, ==, > holds and sorting is non-decreasing

#![cfg(test)]

use proptest::prelude::*;

use super::encoding;
use super::identifier::DigestId;
use super::provider::DigestProvider;
use crate::error::Error;

// =============================================================================
// Property Strategies
// =============================================================================

fn provider_strategy() -> impl Strategy<Value = DigestProvider> {
    prop::sample::select(DigestProvider::ALL.to_vec())
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..2048)
}

// =============================================================================
// Identifier Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: hashing the same content twice yields the same identifier.
    #[test]
    fn prop_compute_deterministic(
        provider in provider_strategy(),
        data in content_strategy(),
    ) {
        let a = DigestId::compute(&data, provider);
        let b = DigestId::compute(&data, provider);
        prop_assert_eq!(a, b);
        prop_assert!(a.is_valid());
        prop_assert_eq!(a.source_length(), Some(data.len() as u64));
    }

    /// Property: distinct content yields distinct identifiers.
    #[test]
    fn prop_distinct_content(
        provider in provider_strategy(),
        x in content_strategy(),
        y in content_strategy(),
    ) {
        prop_assume!(x != y);
        prop_assert_ne!(DigestId::compute(&x, provider), DigestId::compute(&y, provider));
    }

    /// Property: binary and base64 reconstruction are lossless.
    #[test]
    fn prop_reconstruction_roundtrip(
        provider in provider_strategy(),
        data in content_strategy(),
    ) {
        let id = DigestId::compute(&data, provider);
        let len = Some(data.len() as u64);

        let from_bytes = DigestId::from_binary(id.as_bytes(), provider, len)?;
        prop_assert_eq!(from_bytes, id);

        let from_b64 = DigestId::from_base64(&id.to_base64(), provider, len)?;
        prop_assert_eq!(from_b64, id);

        let from_transport = DigestId::from_base64(&id.to_transport_base64(), provider, len)?;
        prop_assert_eq!(from_transport, id);
    }

    /// Property: a byte array of the wrong length is always rejected.
    #[test]
    fn prop_wrong_length_rejected(
        provider in provider_strategy(),
        data in content_strategy(),
        extra in any::<u8>(),
    ) {
        let id = DigestId::compute(&data, provider);

        let mut longer = id.as_bytes().to_vec();
        longer.push(extra);
        let is_length_error = matches!(
            DigestId::from_binary(&longer, provider, None),
            Err(Error::LengthMismatch { .. })
        );
        prop_assert!(is_length_error);

        let shorter = &id.as_bytes()[..id.len() - 1];
        let is_length_error = matches!(
            DigestId::from_binary(shorter, provider, None),
            Err(Error::LengthMismatch { .. })
        );
        prop_assert!(is_length_error);
    }

    /// Property: comparison operators agree with each other and with the bytes.
    #[test]
    fn prop_ordering_consistent(
        provider in provider_strategy(),
        x in content_strategy(),
        y in content_strategy(),
        z in content_strategy(),
    ) {
        let ids = [
            DigestId::compute(&x, provider),
            DigestId::compute(&y, provider),
            DigestId::compute(&z, provider),
        ];

        for a in &ids {
            for b in &ids {
                let holds = [a < b, a == b, a > b].iter().filter(|v| **v).count();
                prop_assert_eq!(holds, 1);
                prop_assert_eq!(a.cmp(b), a.as_bytes().cmp(b.as_bytes()));
            }
        }
    }

    /// Property: sorting yields a non-decreasing sequence.
    #[test]
    fn prop_sorted_non_decreasing(
        provider in provider_strategy(),
        items in prop::collection::vec(content_strategy(), 1..64),
    ) {
        let mut ids: Vec<DigestId> = items.iter().map(|d| DigestId::compute(d, provider)).collect();
        ids.sort();
        for pair in ids.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    /// Property: transport base64 decodes back to the same bytes.
    #[test]
    fn prop_transport_base64_roundtrip(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let encoded = encoding::encode(&data);
        prop_assert!(!encoded.contains('='));
        prop_assert!(!encoded.contains('+'));
        prop_assert!(!encoded.contains('/'));
        prop_assert_eq!(encoding::decode(&encoded)?, data);
    }
}
