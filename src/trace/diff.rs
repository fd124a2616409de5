//! Trace differencing.
//!
//! Compares a baseline trace against a mutant trace and reports which units
//! behaved differently. Everything here is a pure function over borrowed,
//! immutable traces.

use crate::trace::{TestTrace, Trace, TraceKind, UnitTrace};
use std::collections::{BTreeMap, BTreeSet, HashSet};

impl TraceKind {
    /// Whether two observations of the same unit disagree.
    ///
    /// Line mode requires every locus to be present on both sides with the
    /// same count. Value mode only compares the sets of fingerprints.
    pub fn unit_differs(self, a: &UnitTrace, b: &UnitTrace) -> bool {
        match self {
            TraceKind::Line => lines_differ(a, b),
            TraceKind::Value => returns_differ(a, b),
        }
    }
}

fn lines_differ(a: &UnitTrace, b: &UnitTrace) -> bool {
    a.keys()
        .chain(b.keys())
        .any(|locus| match (a.get(locus), b.get(locus)) {
            (Some(x), Some(y)) => x != y,
            _ => true,
        })
}

fn returns_differ(a: &UnitTrace, b: &UnitTrace) -> bool {
    a.len() != b.len() || a.keys().any(|fingerprint| !b.contains_key(fingerprint))
}

/// Units that differ between two observations of the same test.
///
/// A unit present on only one side always differs. If only one side is
/// present at all, every unit it contains differs; if neither is, nothing
/// does.
pub fn different_units(
    kind: TraceKind,
    a: Option<&TestTrace>,
    b: Option<&TestTrace>,
) -> BTreeSet<String> {
    let mut differences = BTreeSet::new();
    match (a, b) {
        (None, None) => {}
        (Some(only), None) | (None, Some(only)) => {
            differences.extend(only.unit_ids().map(str::to_string));
        }
        (Some(a), Some(b)) => collect_different_units(kind, a, b, &mut differences),
    }
    differences
}

fn collect_different_units(
    kind: TraceKind,
    a: &TestTrace,
    b: &TestTrace,
    out: &mut BTreeSet<String>,
) {
    let all_units: HashSet<&str> = a.unit_ids().chain(b.unit_ids()).collect();
    for unit in all_units {
        let differs = match (a.unit(unit), b.unit(unit)) {
            (Some(x), Some(y)) => kind.unit_differs(x, y),
            _ => true,
        };
        if differs {
            out.insert(unit.to_string());
        }
    }
}

/// Tests present in both traces, paired with their observations.
///
/// Tests that ran in only one of the two runs are skipped.
fn shared_tests<'a>(
    a: &'a Trace,
    b: &'a Trace,
) -> impl Iterator<Item = (&'a str, &'a TestTrace, &'a TestTrace)> {
    a.tests()
        .filter_map(move |(test, ta)| b.test(test).map(|tb| (test, ta, tb)))
}

/// Every unit that differs in any test shared by both traces.
///
/// The result does not say which test produced which difference. An absent
/// trace yields an empty set.
pub fn different_units_for_tests(
    kind: TraceKind,
    a: Option<&Trace>,
    b: Option<&Trace>,
) -> BTreeSet<String> {
    let mut differences = BTreeSet::new();
    let (Some(a), Some(b)) = (a, b) else {
        return differences;
    };
    for (test, ta, tb) in shared_tests(a, b) {
        tracing::debug!("Checking test {} ({} mode)", test, kind);
        collect_different_units(kind, ta, tb, &mut differences);
    }
    differences
}

/// Line-granularity multi-test comparison.
pub fn different_methods_for_tests(a: Option<&Trace>, b: Option<&Trace>) -> BTreeSet<String> {
    different_units_for_tests(TraceKind::Line, a, b)
}

/// Value-granularity multi-test comparison.
pub fn different_return_methods_for_tests(
    a: Option<&Trace>,
    b: Option<&Trace>,
) -> BTreeSet<String> {
    different_units_for_tests(TraceKind::Value, a, b)
}

/// Differing units grouped by the shared test that observed them.
///
/// Only tests with at least one difference appear.
pub fn differences_by_test(
    kind: TraceKind,
    a: Option<&Trace>,
    b: Option<&Trace>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut by_test = BTreeMap::new();
    let (Some(a), Some(b)) = (a, b) else {
        return by_test;
    };
    for (test, ta, tb) in shared_tests(a, b) {
        let mut units = BTreeSet::new();
        collect_different_units(kind, ta, tb, &mut units);
        if !units.is_empty() {
            by_test.insert(test.to_string(), units);
        }
    }
    by_test
}

/// Shared tests that observed at least one behavioral difference.
pub fn affected_tests(kind: TraceKind, a: Option<&Trace>, b: Option<&Trace>) -> BTreeSet<String> {
    differences_by_test(kind, a, b).into_keys().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit(entries: &[(i32, i64)]) -> UnitTrace {
        entries.iter().copied().collect()
    }

    fn test_trace(units: &[(&str, &[(i32, i64)])]) -> TestTrace {
        units.iter().map(|(u, l)| (*u, unit(l))).collect()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // =========================================================================
    // Unit predicate tests
    // =========================================================================

    #[test]
    fn test_line_identical_units_do_not_differ() {
        let a = unit(&[(1, 1), (2, 3)]);
        assert!(!TraceKind::Line.unit_differs(&a, &a.clone()));
    }

    #[test]
    fn test_line_single_count_change_differs() {
        let a = unit(&[(1, 1), (2, 1)]);
        let b = unit(&[(1, 1), (2, 2)]);
        assert!(TraceKind::Line.unit_differs(&a, &b));
        assert!(TraceKind::Line.unit_differs(&b, &a));
    }

    #[test]
    fn test_line_extra_locus_differs() {
        let a = unit(&[(1, 1)]);
        let b = unit(&[(1, 1), (2, 1)]);
        assert!(TraceKind::Line.unit_differs(&a, &b));
        assert!(TraceKind::Line.unit_differs(&b, &a));
    }

    #[test]
    fn test_value_ignores_counts() {
        let a = unit(&[(42, 1), (-7, 1)]);
        let b = unit(&[(42, 9), (-7, 3)]);
        assert!(!TraceKind::Value.unit_differs(&a, &b));
    }

    #[test]
    fn test_value_new_fingerprint_differs() {
        let a = unit(&[(42, 1)]);
        let b = unit(&[(42, 1), (43, 1)]);
        assert!(TraceKind::Value.unit_differs(&a, &b));
        assert!(TraceKind::Value.unit_differs(&b, &a));
    }

    #[test]
    fn test_value_same_size_different_fingerprints() {
        let a = unit(&[(1, 1), (2, 1)]);
        let b = unit(&[(1, 1), (3, 1)]);
        assert!(TraceKind::Value.unit_differs(&a, &b));
    }

    #[test]
    fn test_empty_units_do_not_differ() {
        let empty = UnitTrace::new();
        assert!(!TraceKind::Line.unit_differs(&empty, &empty));
        assert!(!TraceKind::Value.unit_differs(&empty, &empty));
    }

    // =========================================================================
    // Per-test comparison tests
    // =========================================================================

    #[test]
    fn test_different_units_count_change() {
        let a = test_trace(&[("m1", &[(1, 1), (2, 1)])]);
        let b = test_trace(&[("m1", &[(1, 1), (2, 2)])]);
        assert_eq!(
            different_units(TraceKind::Line, Some(&a), Some(&b)),
            set(&["m1"])
        );
    }

    #[test]
    fn test_different_units_disjoint_units() {
        let a = test_trace(&[("m1", &[(1, 1), (2, 1)])]);
        let b = test_trace(&[("m2", &[(5, 1)])]);
        assert_eq!(
            different_units(TraceKind::Line, Some(&a), Some(&b)),
            set(&["m1", "m2"])
        );
    }

    #[test]
    fn test_different_units_only_changed_unit_reported() {
        let a = test_trace(&[("m1", &[(1, 1)]), ("m2", &[(3, 2)])]);
        let b = test_trace(&[("m1", &[(1, 1)]), ("m2", &[(3, 4)])]);
        assert_eq!(
            different_units(TraceKind::Line, Some(&a), Some(&b)),
            set(&["m2"])
        );
    }

    #[test]
    fn test_different_units_both_absent() {
        assert!(different_units(TraceKind::Line, None, None).is_empty());
    }

    #[test]
    fn test_different_units_one_absent_reports_everything() {
        let a = test_trace(&[("m1", &[(1, 1)]), ("m2", &[(3, 2)])]);
        assert_eq!(
            different_units(TraceKind::Line, Some(&a), None),
            set(&["m1", "m2"])
        );
        assert_eq!(
            different_units(TraceKind::Value, None, Some(&a)),
            set(&["m1", "m2"])
        );
    }

    // =========================================================================
    // Multi-test comparison tests
    // =========================================================================

    fn trace(tests: &[(&str, TestTrace)]) -> Trace {
        tests.iter().map(|(t, tr)| (*t, tr.clone())).collect()
    }

    #[test]
    fn test_for_tests_accumulates_across_tests() {
        let a = trace(&[
            ("t1", test_trace(&[("m1", &[(1, 1)])])),
            ("t2", test_trace(&[("m2", &[(1, 1)]), ("m3", &[(4, 1)])])),
        ]);
        let b = trace(&[
            ("t1", test_trace(&[("m1", &[(1, 2)])])),
            ("t2", test_trace(&[("m2", &[(1, 1)])])),
        ]);
        assert_eq!(
            different_methods_for_tests(Some(&a), Some(&b)),
            set(&["m1", "m3"])
        );
    }

    #[test]
    fn test_for_tests_absent_trace_is_empty() {
        let a = trace(&[("t1", test_trace(&[("m1", &[(1, 1)])]))]);
        assert!(different_methods_for_tests(Some(&a), None).is_empty());
        assert!(different_methods_for_tests(None, Some(&a)).is_empty());
        assert!(different_return_methods_for_tests(None, None).is_empty());
    }

    #[test]
    fn test_for_tests_disjoint_tests_is_empty() {
        let a = trace(&[("t1", test_trace(&[("m1", &[(1, 1)])]))]);
        let b = trace(&[("t2", test_trace(&[("m9", &[(7, 7)])]))]);
        assert!(different_methods_for_tests(Some(&a), Some(&b)).is_empty());
    }

    #[test]
    fn test_for_tests_one_shared_identical_test_is_empty() {
        let shared = test_trace(&[("m1", &[(1, 1), (2, 5)])]);
        let a = trace(&[
            ("shared", shared.clone()),
            ("only_a", test_trace(&[("m2", &[(1, 1)])])),
        ]);
        let b = trace(&[
            ("shared", shared),
            ("only_b", test_trace(&[("m3", &[(1, 1)])])),
        ]);
        assert!(different_methods_for_tests(Some(&a), Some(&b)).is_empty());
        assert!(different_return_methods_for_tests(Some(&a), Some(&b)).is_empty());
    }

    #[test]
    fn test_return_mode_ignores_count_changes() {
        let a = trace(&[("t1", test_trace(&[("m1", &[(100, 1)])]))]);
        let b = trace(&[("t1", test_trace(&[("m1", &[(100, 4)])]))]);
        assert!(different_return_methods_for_tests(Some(&a), Some(&b)).is_empty());
        assert_eq!(
            different_methods_for_tests(Some(&a), Some(&b)),
            set(&["m1"])
        );
    }

    #[test]
    fn test_differences_by_test_and_affected_tests() {
        let a = trace(&[
            ("t1", test_trace(&[("m1", &[(1, 1)])])),
            ("t2", test_trace(&[("m1", &[(1, 1)])])),
            ("t3", test_trace(&[("m5", &[(1, 1)])])),
        ]);
        let b = trace(&[
            ("t1", test_trace(&[("m1", &[(1, 1)])])),
            ("t2", test_trace(&[("m1", &[(1, 3)]), ("m2", &[(8, 1)])])),
        ]);

        let by_test = differences_by_test(TraceKind::Line, Some(&a), Some(&b));
        assert_eq!(by_test.len(), 1);
        assert_eq!(by_test["t2"], set(&["m1", "m2"]));

        assert_eq!(
            affected_tests(TraceKind::Line, Some(&a), Some(&b)),
            set(&["t2"])
        );
        assert!(affected_tests(TraceKind::Line, Some(&a), None).is_empty());
    }

    // =========================================================================
    // Properties
    // =========================================================================

    fn arb_unit() -> impl Strategy<Value = UnitTrace> {
        proptest::collection::hash_map(0i32..8, 0i64..3, 0..5)
    }

    fn arb_test_trace() -> impl Strategy<Value = TestTrace> {
        proptest::collection::hash_map("m[0-4]", arb_unit(), 0..4)
            .prop_map(|units| units.into_iter().collect::<TestTrace>())
    }

    fn arb_trace() -> impl Strategy<Value = Trace> {
        proptest::collection::hash_map("t[0-3]", arb_test_trace(), 0..4)
            .prop_map(|tests| tests.into_iter().collect::<Trace>())
    }

    fn arb_kind() -> impl Strategy<Value = TraceKind> {
        prop_oneof![Just(TraceKind::Line), Just(TraceKind::Value)]
    }

    proptest! {
        #[test]
        fn prop_trace_equals_itself(kind in arb_kind(), t in arb_trace()) {
            let copy = t.clone();
            prop_assert!(different_units_for_tests(kind, Some(&t), Some(&copy)).is_empty());
        }

        #[test]
        fn prop_difference_is_symmetric(kind in arb_kind(), a in arb_trace(), b in arb_trace()) {
            prop_assert_eq!(
                different_units_for_tests(kind, Some(&a), Some(&b)),
                different_units_for_tests(kind, Some(&b), Some(&a))
            );
        }

        #[test]
        fn prop_unit_missing_on_one_side_differs(kind in arb_kind(), a in arb_test_trace()) {
            let b = TestTrace::new();
            let expected: BTreeSet<String> = a.unit_ids().map(str::to_string).collect();
            prop_assert_eq!(different_units(kind, Some(&a), Some(&b)), expected);
        }
    }
}
