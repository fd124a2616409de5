//! Randomized repeated-run stability analyzer.
//!
//! Runs every test of a collection once per round, in a freshly shuffled
//! order each round, and keeps one outcome per test per round. Tests whose
//! outcome changes between rounds depend on execution order or are flaky.
//!
//! Tests within a round run strictly one after another; the order is the
//! variable under test.

use crate::config::StabilityConfig;
use crate::stability::{Classification, Outcome, TestNode};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Runs a single test.
pub trait TestExecutor {
    type Unit;

    /// Run `unit` and record what happened into `outcome`.
    ///
    /// A panic escaping this call is treated as an abnormal termination of
    /// that one test; it never aborts the round.
    fn execute(&self, id: &str, unit: &Self::Unit, outcome: &mut Outcome);
}

/// Histories collected by one analysis.
#[derive(Debug, Clone)]
pub struct StabilityRun {
    /// Every test that was part of the collection
    pub universe: BTreeSet<String>,
    /// Outcomes per test, one entry per round in round order
    pub histories: BTreeMap<String, Vec<Outcome>>,
    pub rounds: usize,
    pub tests_run: usize,
    pub elapsed: Duration,
}

impl StabilityRun {
    /// Classify every test of the universe.
    ///
    /// A test is outcome-unstable when any round disagrees with its first
    /// round, and failing when any round recorded a failure or error.
    pub fn classify(&self) -> Classification {
        let mut different_outcome = BTreeSet::new();
        let mut failing = BTreeSet::new();

        for (test, history) in &self.histories {
            if let Some((first, rest)) = history.split_first() {
                if rest.iter().any(|outcome| outcome != first) {
                    tracing::warn!("Different outcomes across rounds for test {}", test);
                    different_outcome.insert(test.clone());
                }
            }
            if history.iter().any(Outcome::is_failing) {
                failing.insert(test.clone());
            }
        }

        Classification::from_universe(&self.universe, failing, different_outcome)
    }
}

/// Drives a test collection through repeated shuffled rounds.
pub struct StabilityAnalyzer<R = StdRng> {
    rounds: usize,
    rng: R,
}

impl StabilityAnalyzer<StdRng> {
    /// Analyzer with an OS-seeded random order.
    pub fn new(rounds: usize) -> Self {
        Self::with_rng(rounds, StdRng::from_os_rng())
    }

    /// Analyzer whose orderings are reproducible for a given seed.
    pub fn seeded(rounds: usize, seed: u64) -> Self {
        Self::with_rng(rounds, StdRng::seed_from_u64(seed))
    }

    pub fn from_config(config: &StabilityConfig) -> Self {
        match config.seed {
            Some(seed) => Self::seeded(config.rounds, seed),
            None => Self::new(config.rounds),
        }
    }
}

impl Default for StabilityAnalyzer<StdRng> {
    fn default() -> Self {
        Self::new(crate::stability::DEFAULT_ROUNDS)
    }
}

impl<R: Rng> StabilityAnalyzer<R> {
    pub fn with_rng(rounds: usize, rng: R) -> Self {
        Self { rounds, rng }
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Flatten `collection`, run all rounds and classify the results.
    pub fn analyze<E: TestExecutor>(
        &mut self,
        collection: TestNode<E::Unit>,
        executor: &E,
    ) -> (StabilityRun, Classification) {
        let tests = collection.flatten();
        let run = self.run(&tests, executor);
        let classification = run.classify();
        (run, classification)
    }

    /// Run every test of `tests` once per round in shuffled order.
    ///
    /// Zero rounds produce empty histories.
    pub fn run<E: TestExecutor>(
        &mut self,
        tests: &BTreeMap<String, E::Unit>,
        executor: &E,
    ) -> StabilityRun {
        let start = Instant::now();
        let mut histories: BTreeMap<String, Vec<Outcome>> = BTreeMap::new();
        let mut tests_run = 0;

        for round in 0..self.rounds {
            tracing::info!("Round {} of {}", round + 1, self.rounds);
            let order = self.shuffled(tests);
            for (id, unit) in order {
                let outcome = run_isolated(executor, id, unit);
                tracing::debug!("Test {} finished: {}", id, outcome);
                histories.entry(id.clone()).or_default().push(outcome);
                tests_run += 1;
            }
        }

        let elapsed = start.elapsed();
        tracing::info!("Ran {} tests in {} ms", tests_run, elapsed.as_millis());

        StabilityRun {
            universe: tests.keys().cloned().collect(),
            histories,
            rounds: self.rounds,
            tests_run,
            elapsed,
        }
    }

    fn shuffled<'a, U>(&mut self, tests: &'a BTreeMap<String, U>) -> Vec<(&'a String, &'a U)> {
        let mut order: Vec<_> = tests.iter().collect();
        order.shuffle(&mut self.rng);
        order
    }
}

/// Run one test with its own fresh outcome, containing any panic.
fn run_isolated<E: TestExecutor>(executor: &E, id: &str, unit: &E::Unit) -> Outcome {
    let mut outcome = Outcome::new();
    tracing::debug!("Running test {}", id);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        executor.execute(id, unit, &mut outcome);
    }));

    if let Err(payload) = result {
        tracing::warn!(
            "Test {} terminated abnormally: {}",
            id,
            panic_message(payload.as_ref())
        );
        if !outcome.is_failing() {
            outcome.record_error();
        }
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s;
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.as_str();
    }
    "non-string panic payload"
}
