//! Test-order stability analysis.
//!
//! This module provides functionality for:
//! - Flattening a nested test collection into individually runnable tests
//! - Running every test repeatedly in randomized order
//! - Classifying tests as failing/passing and outcome-stable/unstable

pub mod analyzer;
pub mod command;
pub mod report;

pub use analyzer::{StabilityAnalyzer, StabilityRun, TestExecutor};
pub use report::{
    report, summary, ArtifactKind, Classification, JsonFileSink, MemorySink, ResultSink,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of randomized rounds.
pub const DEFAULT_ROUNDS: usize = 6;

/// What happened to one test in one round.
///
/// The executor records into a fresh `Outcome` per test per round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub failures: u32,
    pub errors: u32,
    pub runs: u32,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run(&mut self) {
        self.runs += 1;
    }

    /// An assertion failed.
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// The test could not complete normally.
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// True when at least one failure or error was recorded.
    pub fn is_failing(&self) -> bool {
        self.failures >= 1 || self.errors >= 1
    }

    /// Shorthand for a passing single run.
    pub fn passed() -> Self {
        Self {
            failures: 0,
            errors: 0,
            runs: 1,
        }
    }

    /// Shorthand for a single run with one failure.
    pub fn failed() -> Self {
        Self {
            failures: 1,
            errors: 0,
            runs: 1,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "runs={} failures={} errors={}",
            self.runs, self.failures, self.errors
        )
    }
}

/// A possibly nested collection of tests.
#[derive(Debug, Clone, PartialEq)]
pub enum TestNode<T> {
    Test { id: String, unit: T },
    Suite { name: String, children: Vec<TestNode<T>> },
}

impl<T> TestNode<T> {
    pub fn test(id: impl Into<String>, unit: T) -> Self {
        TestNode::Test {
            id: id.into(),
            unit,
        }
    }

    pub fn suite(name: impl Into<String>, children: Vec<TestNode<T>>) -> Self {
        TestNode::Suite {
            name: name.into(),
            children,
        }
    }

    /// Flatten into `id -> unit`.
    ///
    /// Duplicate ids collapse; the last one visited wins.
    pub fn flatten(self) -> BTreeMap<String, T> {
        let mut flat = BTreeMap::new();
        self.flatten_into(&mut flat);
        flat
    }

    fn flatten_into(self, flat: &mut BTreeMap<String, T>) {
        match self {
            TestNode::Test { id, unit } => {
                if flat.insert(id.clone(), unit).is_some() {
                    tracing::warn!("Duplicate test id {}, keeping the last definition", id);
                }
            }
            TestNode::Suite { children, .. } => {
                for child in children {
                    child.flatten_into(flat);
                }
            }
        }
    }

    /// Number of tests below this node, duplicates included.
    pub fn count_tests(&self) -> usize {
        match self {
            TestNode::Test { .. } => 1,
            TestNode::Suite { children, .. } => children.iter().map(TestNode::count_tests).sum(),
        }
    }
}
