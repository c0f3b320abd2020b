//! Property-based tests using proptest
//!
//! These tests verify the rebalancer invariants for both strategies:
//! capacity bounds, exact coverage, determinism and stability under growth.

use cloudshare::rebalance::{placed, Grouping, Strategy as RebalanceStrategy};
use cloudshare::share::{rule_universe, SlotName};
use proptest::prelude::*;
use std::collections::BTreeSet;

/// Generate a set of domain-like items
fn arb_universe() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[a-z]{1,8}\\.corp\\.example\\.", 0..120)
}

/// Generate a previous grouping that may mention unknown items
fn arb_previous() -> impl Strategy<Value = Grouping> {
    prop::collection::btree_map(
        0u64..20,
        prop::collection::vec("[a-z]{1,8}\\.corp\\.example\\.", 0..12),
        0..8,
    )
}

fn arb_strategy() -> impl Strategy<Value = RebalanceStrategy> {
    prop_oneof![Just(RebalanceStrategy::Linear), Just(RebalanceStrategy::BitTree)]
}

fn members(grouping: &Grouping) -> Vec<&String> {
    grouping.values().flatten().collect()
}

proptest! {
    /// No container exceeds capacity and every item is placed exactly once
    #[test]
    fn capacity_and_coverage(
        strategy in arb_strategy(),
        previous in arb_previous(),
        universe in arb_universe(),
        capacity in 1usize..16
    ) {
        let result = strategy.rebalancer().rebalance(&previous, &universe, capacity).unwrap();

        prop_assert!(result.values().all(|m| m.len() <= capacity));
        prop_assert_eq!(placed(&result), universe.len());

        let distinct: BTreeSet<&String> = members(&result).into_iter().collect();
        prop_assert_eq!(distinct.len(), universe.len());
        prop_assert!(distinct.iter().all(|m| universe.contains(*m)));
    }

    /// Same inputs, same output
    #[test]
    fn deterministic(
        strategy in arb_strategy(),
        previous in arb_previous(),
        universe in arb_universe(),
        capacity in 1usize..16
    ) {
        let rebalancer = strategy.rebalancer();
        let a = rebalancer.rebalance(&previous, &universe, capacity).unwrap();
        let b = rebalancer.rebalance(&previous, &universe, capacity).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Never fewer non-empty containers than ceil(M / capacity)
    #[test]
    fn container_count_lower_bound(
        strategy in arb_strategy(),
        universe in arb_universe(),
        capacity in 1usize..16
    ) {
        let result = strategy.rebalancer().rebalance(&Grouping::new(), &universe, capacity).unwrap();
        let used = result.values().filter(|m| !m.is_empty()).count();
        prop_assert!(used >= universe.len().div_ceil(capacity));
    }

    /// Rerunning linear scan on its own output changes nothing
    #[test]
    fn linear_is_a_fixed_point(
        previous in arb_previous(),
        universe in arb_universe(),
        capacity in 1usize..16
    ) {
        let rebalancer = RebalanceStrategy::Linear.rebalancer();
        let first = rebalancer.rebalance(&previous, &universe, capacity).unwrap();
        let second = rebalancer.rebalance(&first, &universe, capacity).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Adding items never moves previously placed items under linear scan
    #[test]
    fn linear_growth_keeps_membership(
        universe in arb_universe(),
        extra in prop::collection::btree_set("[a-z]{1,8}\\.new\\.example\\.", 1..10),
        capacity in 1usize..16
    ) {
        let rebalancer = RebalanceStrategy::Linear.rebalancer();
        let before = rebalancer.rebalance(&Grouping::new(), &universe, capacity).unwrap();

        let mut grown = universe.clone();
        grown.extend(extra);
        let after = rebalancer.rebalance(&before, &grown, capacity).unwrap();

        for (id, members) in &before {
            prop_assert!(members.iter().all(|m| after[id].contains(m)));
        }
        prop_assert!(after.len() >= before.len());
    }

    /// Bit-tree container count never shrinks when items are only added
    #[test]
    fn bit_tree_growth_is_monotonic(
        universe in arb_universe(),
        extra in prop::collection::btree_set("[a-z]{1,8}\\.new\\.example\\.", 1..10),
        capacity in 1usize..16
    ) {
        let rebalancer = RebalanceStrategy::BitTree.rebalancer();
        let before = rebalancer.rebalance(&Grouping::new(), &universe, capacity).unwrap();

        let mut grown = universe.clone();
        grown.extend(extra);
        let after = rebalancer.rebalance(&Grouping::new(), &grown, capacity).unwrap();

        prop_assert!(after.len() >= before.len());
    }

    /// Slot names parse back to the slots they were made from
    #[test]
    fn slot_names_roundtrip(principal in any::<u16>(), zone in any::<u16>(), prefix in "[a-z]{1,6}") {
        let slot = SlotName::new(u64::from(principal), u64::from(zone)).unwrap();
        prop_assert_eq!(SlotName::parse(&prefix, &slot.format(&prefix)), Some(slot));
    }

    /// Normalized names are trimmed and end in a dot
    #[test]
    fn rule_universe_trailing_dot(names in prop::collection::vec("[ a-zA-Z.]{0,12}", 0..20)) {
        for name in rule_universe(&names) {
            prop_assert!(name.ends_with('.'));
            prop_assert_eq!(name.trim(), name.as_str());
        }
    }
}

/// Fixed stability scenarios
mod stability_tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_previous_container_untouched() {
        let previous: Grouping = [
            (0, vec!["a".to_string(), "b".to_string()]),
            (1, vec!["c".to_string()]),
        ]
        .into();
        let result = RebalanceStrategy::Linear
            .rebalancer()
            .rebalance(&previous, &set(&["a", "b", "c", "d"]), 2)
            .unwrap();

        assert_eq!(result[&0], vec!["a", "b"]);
        assert!(result[&1].contains(&"c".to_string()));
        assert!(result.values().any(|m| m.contains(&"d".to_string())));
    }

    #[test]
    fn test_full_containers_grow_by_one() {
        let universe = set(&["a", "b", "c", "d", "e", "f"]);
        let rebalancer = RebalanceStrategy::Linear.rebalancer();
        let before = rebalancer.rebalance(&Grouping::new(), &universe, 3).unwrap();
        assert_eq!(before.len(), 2);

        let grown = set(&["a", "b", "c", "d", "e", "f", "g"]);
        let after = rebalancer.rebalance(&before, &grown, 3).unwrap();

        assert_eq!(after.len(), 3);
        assert_eq!(after[&0], before[&0]);
        assert_eq!(after[&1], before[&1]);
        assert_eq!(after[&2], vec!["g"]);
    }
}
