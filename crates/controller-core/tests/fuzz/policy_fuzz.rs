//! Fuzz tests for policy diff
//!
//! `diff(current, requested)` is one-directional: it is `requested \ current`
//! and nothing more.

use controller_core::policy::{diff, Policy, PolicySet};
use controller_core::Felt;
use proptest::prelude::*;

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// Small target and method spaces so generated sets overlap
fn policy_strategy() -> impl Strategy<Value = Policy> {
    (
        0u64..6,
        prop::option::of(prop::sample::select(vec!["transfer", "approve", "mint"])),
    )
        .prop_map(|(target, method)| Policy::new(Felt::from(target), method))
}

fn policy_set_strategy() -> impl Strategy<Value = PolicySet> {
    prop::collection::btree_set(policy_strategy(), 0..10)
}

proptest! {
    /// A set never needs anything from itself
    #[test]
    fn diff_self_is_empty(a in policy_set_strategy()) {
        prop_assert!(diff(&a, &a).is_empty());
    }

    /// With nothing granted, everything requested is missing
    #[test]
    fn diff_from_empty_is_requested(a in policy_set_strategy()) {
        prop_assert_eq!(diff(&PolicySet::new(), &a), a);
    }

    /// Exactly the requested policies absent from the current set
    #[test]
    fn diff_is_requested_minus_current(a in policy_set_strategy(), b in policy_set_strategy()) {
        let d = diff(&a, &b);
        for policy in &d {
            prop_assert!(b.contains(policy));
            prop_assert!(!a.contains(policy));
        }
        for policy in &b {
            prop_assert_eq!(d.contains(policy), !a.contains(policy));
        }
    }

    /// Granting the diff covers the request
    #[test]
    fn union_with_diff_covers(a in policy_set_strategy(), b in policy_set_strategy()) {
        let mut granted = a.clone();
        granted.extend(diff(&a, &b));
        prop_assert!(diff(&granted, &b).is_empty());
    }

    /// Iteration order does not depend on insertion order
    #[test]
    fn diff_deterministic(a in prop::collection::vec(policy_strategy(), 0..10), b in prop::collection::vec(policy_strategy(), 0..10)) {
        let forward: PolicySet = a.iter().cloned().collect();
        let reversed: PolicySet = a.iter().rev().cloned().collect();
        let requested: PolicySet = b.iter().cloned().collect();
        let one: Vec<_> = diff(&forward, &requested).into_iter().collect();
        let two: Vec<_> = diff(&reversed, &requested).into_iter().collect();
        prop_assert_eq!(one, two);
    }
}
