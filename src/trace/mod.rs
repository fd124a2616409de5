//! Recorded execution traces.
//!
//! A trace is captured by running an instrumented test suite once. It maps
//! every test to the units (methods) it executed, and every unit to the loci
//! observed inside it:
//!
//! - line mode: locus = line number, value = hit count
//! - value mode: locus = return-value fingerprint, value is ignored
//!
//! Traces are immutable snapshots once loaded.

pub mod cache;
pub mod diff;
pub mod store;

pub use cache::{TraceCache, TraceCaches};
pub use store::{JsonTraceStore, TraceStore, TraceStoreError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Run identifier of the unmutated baseline run.
pub const BASELINE_RUN_ID: &str = "0";

/// Observations for a single unit: locus -> observed value.
pub type UnitTrace = HashMap<i32, i64>;

/// Which kind of observation a trace carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    /// Statement coverage with hit counts
    Line,
    /// Observed return-value fingerprints
    Value,
}

impl TraceKind {
    /// Name used for store directories and CLI arguments.
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Line => "line",
            TraceKind::Value => "value",
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TraceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "line" => Ok(TraceKind::Line),
            "value" | "return" => Ok(TraceKind::Value),
            other => Err(format!(
                "unknown trace kind '{}' (expected 'line' or 'value')",
                other
            )),
        }
    }
}

/// Everything one test executed: unit -> loci.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestTrace {
    units: HashMap<String, UnitTrace>,
}

impl TestTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation, replacing any previous value at the same locus.
    pub fn record(&mut self, unit: impl Into<String>, locus: i32, value: i64) {
        self.units.entry(unit.into()).or_default().insert(locus, value);
    }

    /// Insert a whole unit, replacing one with the same identifier.
    pub fn insert_unit(&mut self, unit: impl Into<String>, loci: UnitTrace) {
        self.units.insert(unit.into(), loci);
    }

    pub fn unit(&self, unit: &str) -> Option<&UnitTrace> {
        self.units.get(unit)
    }

    pub fn contains_unit(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.units.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl<U: Into<String>> FromIterator<(U, UnitTrace)> for TestTrace {
    fn from_iter<I: IntoIterator<Item = (U, UnitTrace)>>(iter: I) -> Self {
        Self {
            units: iter.into_iter().map(|(u, l)| (u.into(), l)).collect(),
        }
    }
}

/// A full run: test -> unit -> locus -> value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace {
    tests: HashMap<String, TestTrace>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation for `test`, creating the test and unit as needed.
    pub fn record(
        &mut self,
        test: impl Into<String>,
        unit: impl Into<String>,
        locus: i32,
        value: i64,
    ) {
        self.tests
            .entry(test.into())
            .or_default()
            .record(unit, locus, value);
    }

    pub fn insert_test(&mut self, test: impl Into<String>, trace: TestTrace) {
        self.tests.insert(test.into(), trace);
    }

    pub fn test(&self, test: &str) -> Option<&TestTrace> {
        self.tests.get(test)
    }

    pub fn test_ids(&self) -> impl Iterator<Item = &str> {
        self.tests.keys().map(String::as_str)
    }

    pub fn tests(&self) -> impl Iterator<Item = (&str, &TestTrace)> {
        self.tests.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

impl<T: Into<String>> FromIterator<(T, TestTrace)> for Trace {
    fn from_iter<I: IntoIterator<Item = (T, TestTrace)>>(iter: I) -> Self {
        Self {
            tests: iter.into_iter().map(|(t, tr)| (t.into(), tr)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_kind_display() {
        assert_eq!(TraceKind::Line.to_string(), "line");
        assert_eq!(TraceKind::Value.to_string(), "value");
    }

    #[test]
    fn test_trace_kind_from_str() {
        assert_eq!("line".parse::<TraceKind>(), Ok(TraceKind::Line));
        assert_eq!("value".parse::<TraceKind>(), Ok(TraceKind::Value));
        assert_eq!("return".parse::<TraceKind>(), Ok(TraceKind::Value));
        assert!("branch".parse::<TraceKind>().is_err());
    }

    #[test]
    fn test_record_builds_all_levels() {
        let mut trace = Trace::new();
        trace.record("t1", "m1", 10, 1);
        trace.record("t1", "m1", 11, 3);
        trace.record("t1", "m2", 20, 1);
        trace.record("t2", "m1", 10, 1);

        assert_eq!(trace.len(), 2);
        let t1 = trace.test("t1").unwrap();
        assert_eq!(t1.len(), 2);
        assert_eq!(t1.unit("m1").unwrap().get(&11), Some(&3));
        assert!(trace.test("t3").is_none());
    }

    #[test]
    fn test_record_overwrites_same_locus() {
        let mut trace = Trace::new();
        trace.record("t1", "m1", 1, 1);
        trace.record("t1", "m1", 1, 5);

        let unit = trace.test("t1").unwrap().unit("m1").unwrap();
        assert_eq!(unit.len(), 1);
        assert_eq!(unit.get(&1), Some(&5));
    }

    #[test]
    fn test_insert_whole_levels() {
        let mut test = TestTrace::new();
        test.insert_unit("m1", [(1, 1), (2, 1)].into_iter().collect());
        assert!(test.contains_unit("m1"));
        assert!(!test.contains_unit("m2"));

        let mut trace = Trace::new();
        trace.insert_test("t1", test.clone());
        trace.insert_test("t1", test);
        assert_eq!(trace.test_ids().collect::<Vec<_>>(), vec!["t1"]);
        assert!(!trace.is_empty());
        assert!(Trace::new().is_empty());
    }

    #[test]
    fn test_json_shape_is_nested_maps() {
        let json = r#"{"t1": {"m1": {"1": 1, "2": 2}}}"#;
        let trace: Trace = serde_json::from_str(json).unwrap();

        let unit = trace.test("t1").unwrap().unit("m1").unwrap();
        assert_eq!(unit.get(&2), Some(&2));

        let back = serde_json::to_string(&trace).unwrap();
        let again: Trace = serde_json::from_str(&back).unwrap();
        assert_eq!(trace, again);
    }

    #[test]
    fn test_json_rejects_null_unit_map() {
        let json = r#"{"t1": null}"#;
        assert!(serde_json::from_str::<Trace>(json).is_err());

        let json = r#"{"t1": {"m1": null}}"#;
        assert!(serde_json::from_str::<Trace>(json).is_err());
    }
}
