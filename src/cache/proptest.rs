//! Property-Based Tests for the read paths
//!
//! # Test Properties
//!
//! 1. **Penetration**: any sequence of lookups over a set of ids reaches the
//!    store at most once per id, whether or not the id exists
//! 2. **Marker TTL**: an absent marker always expires before a value would
//! 3. **Envelope staleness**: an envelope is stale exactly from `expire_at` on

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use super::envelope::{marker_ttl, LogicalEnvelope};
use super::{CacheClient, CacheConfig, RebuildExecutor};
use crate::adapters::InMemoryGateway;

// =============================================================================
// Property Strategies
// =============================================================================

/// Ids looked up, drawn from a small range so repeats are common.
fn lookup_sequence_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..16, 1..64)
}

/// Ids that exist in the store.
fn existing_ids_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..16, 0..8)
}

// =============================================================================
// Penetration Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the store sees each id at most once and answers are stable.
    #[test]
    fn prop_store_hit_at_most_once_per_id(
        lookups in lookup_sequence_strategy(),
        existing in existing_ids_strategy(),
    ) {
        let gateway = Arc::new(InMemoryGateway::new());
        let client = CacheClient::new(gateway, RebuildExecutor::new(1), CacheConfig::default());
        let store_calls: Arc<Mutex<HashMap<u64, usize>>> = Arc::new(Mutex::new(HashMap::new()));

        for id in &lookups {
            let calls = store_calls.clone();
            let existing_ids = existing.clone();
            let found = tokio_test::block_on(client.query_with_pass_through(
                "cache:item:",
                *id,
                move |id| async move {
                    *calls.lock().entry(id).or_insert(0) += 1;
                    Ok(existing_ids.contains(&id).then_some(id * 10))
                },
                Duration::from_secs(600),
            ))?;
            prop_assert_eq!(found, existing.contains(id).then_some(id * 10));
        }

        for (_, calls) in store_calls.lock().iter() {
            prop_assert_eq!(*calls, 1);
        }
    }

    /// Property: an absent marker never outlives a value written for the same key.
    #[test]
    fn prop_marker_ttl_below_value_ttl(
        null_ms in 1u64..1_000_000,
        ttl_ms in 2u64..1_000_000,
    ) {
        let ttl = Duration::from_millis(ttl_ms);
        let marker = marker_ttl(Duration::from_millis(null_ms), ttl);
        prop_assert!(marker < ttl);
        prop_assert!(!marker.is_zero());
    }

    /// Property: staleness flips exactly at `expire_at`.
    #[test]
    fn prop_envelope_stale_from_expire_at(ttl_secs in 1u64..86_400, offset in -5i64..5) {
        let envelope = LogicalEnvelope::new((), Duration::from_secs(ttl_secs))?;
        let instant = envelope.expire_at + chrono::Duration::seconds(offset);
        prop_assert_eq!(envelope.is_expired_at(instant), offset >= 0);
    }
}
