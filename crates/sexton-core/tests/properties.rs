//! Property-based tests for the tombstone ledger.
//!
//! These tests verify the invariants sessions rely on:
//!  - Queries return records in ascending timestamp order
//!  - A recorded deletion stays visible until it is pruned
//!  - Pruning is idempotent and never drops anything at or after its bound

use proptest::prelude::*;
use sexton_core::{EntityId, Timestamp, TombstoneLedger};
use std::collections::BTreeSet;

fn deletions_strategy() -> impl Strategy<Value = Vec<(u128, u64)>> {
    prop::collection::vec((0u128..64, 0u64..200), 0..60)
}

fn build_ledger(deletions: &[(u128, u64)]) -> TombstoneLedger {
    let mut ledger = TombstoneLedger::new();
    for &(id, at) in deletions {
        ledger.record(EntityId::from_u128(id), Timestamp::from_micros(at));
    }
    ledger
}

// ============================================================================
// Query Properties
// ============================================================================

proptest! {
    #[test]
    fn query_is_sorted_by_timestamp(
        deletions in deletions_strategy(),
        since in 0u64..200
    ) {
        let ledger = build_ledger(&deletions);
        let window = ledger.query_window(Timestamp::from_micros(since));

        for pair in window.windows(2) {
            prop_assert!(pair[0].deleted_at <= pair[1].deleted_at);
        }
    }

    #[test]
    fn query_returns_exactly_the_newer_records(
        deletions in deletions_strategy(),
        since in 0u64..200
    ) {
        let ledger = build_ledger(&deletions);
        let got: BTreeSet<_> = ledger
            .query_window(Timestamp::from_micros(since))
            .into_iter()
            .map(|r| (r.deleted_at.as_micros(), r.entity_id.as_u128()))
            .collect();

        let expected: BTreeSet<_> = deletions
            .iter()
            .filter(|(_, at)| *at > since)
            .map(|&(id, at)| (at, id))
            .collect();

        prop_assert_eq!(got, expected);
    }

    #[test]
    fn has_any_since_agrees_with_query(
        deletions in deletions_strategy(),
        since in 0u64..200
    ) {
        let ledger = build_ledger(&deletions);
        let since = Timestamp::from_micros(since);

        prop_assert_eq!(ledger.has_any_since(since), !ledger.query_window(since).is_empty());
    }
}

// ============================================================================
// Prune Properties
// ============================================================================

proptest! {
    #[test]
    fn prune_is_idempotent(
        deletions in deletions_strategy(),
        bound in 0u64..220
    ) {
        let mut once = build_ledger(&deletions);
        once.prune(Timestamp::from_micros(bound));

        let mut twice = build_ledger(&deletions);
        twice.prune(Timestamp::from_micros(bound));
        let removed_again = twice.prune(Timestamp::from_micros(bound));

        prop_assert_eq!(removed_again, 0);
        prop_assert_eq!(
            once.query_window(Timestamp::ZERO),
            twice.query_window(Timestamp::ZERO)
        );
    }

    #[test]
    fn prune_keeps_everything_at_or_after_bound(
        deletions in deletions_strategy(),
        bound in 0u64..220,
        since in 0u64..220
    ) {
        let mut ledger = build_ledger(&deletions);
        let held_before = ledger.len();
        let removed = ledger.prune(Timestamp::from_micros(bound));

        let distinct: BTreeSet<_> = deletions.iter().map(|&(id, at)| (at, id)).collect();
        let survivors = distinct.iter().filter(|(at, _)| *at >= bound).count();

        prop_assert_eq!(ledger.len(), survivors);
        prop_assert_eq!(held_before - removed, survivors);

        // Whatever the window, nothing older than the bound comes back.
        for record in ledger.query_window(Timestamp::from_micros(since)) {
            prop_assert!(record.deleted_at >= Timestamp::from_micros(bound));
        }
    }
}
