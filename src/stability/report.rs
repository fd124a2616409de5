//! Classification sets and where they go.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

/// The four sets produced by a stability analysis.
///
/// Failing/passing and common/different outcome are independent axes; each
/// pair partitions the full test universe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub failing: BTreeSet<String>,
    pub passing: BTreeSet<String>,
    pub common_outcome: BTreeSet<String>,
    pub different_outcome: BTreeSet<String>,
}

impl Classification {
    /// Build the complements of `failing` and `different_outcome` within `universe`.
    pub fn from_universe(
        universe: &BTreeSet<String>,
        failing: BTreeSet<String>,
        different_outcome: BTreeSet<String>,
    ) -> Self {
        let passing = universe.difference(&failing).cloned().collect();
        let common_outcome = universe.difference(&different_outcome).cloned().collect();
        Self {
            failing,
            passing,
            common_outcome,
            different_outcome,
        }
    }

    pub fn set(&self, kind: ArtifactKind) -> &BTreeSet<String> {
        match kind {
            ArtifactKind::Failing => &self.failing,
            ArtifactKind::Passing => &self.passing,
            ArtifactKind::CommonOutcome => &self.common_outcome,
            ArtifactKind::DifferentOutcome => &self.different_outcome,
        }
    }
}

/// Names of the persisted classification sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Failing,
    Passing,
    CommonOutcome,
    DifferentOutcome,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::DifferentOutcome,
        ArtifactKind::CommonOutcome,
        ArtifactKind::Failing,
        ArtifactKind::Passing,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Failing => "tests-failing.json",
            ArtifactKind::Passing => "tests-passing.json",
            ArtifactKind::CommonOutcome => "tests-common-outcome.json",
            ArtifactKind::DifferentOutcome => "tests-different-outcome.json",
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactKind::Failing => write!(f, "failing"),
            ArtifactKind::Passing => write!(f, "passing"),
            ArtifactKind::CommonOutcome => write!(f, "common_outcome"),
            ArtifactKind::DifferentOutcome => write!(f, "different_outcome"),
        }
    }
}

/// Receives each classification set.
pub trait ResultSink {
    fn write_set(&mut self, kind: ArtifactKind, tests: &BTreeSet<String>) -> Result<()>;
}

/// Hand all four sets to `sink`.
pub fn report(classification: &Classification, sink: &mut dyn ResultSink) -> Result<()> {
    for kind in ArtifactKind::ALL {
        sink.write_set(kind, classification.set(kind))?;
    }
    Ok(())
}

/// JSON document written for one set.
#[derive(Debug, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub kind: ArtifactKind,
    pub generated_at: String,
    pub tests: Vec<String>,
}

/// Writes one JSON file per set into a directory.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, kind: ArtifactKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }
}

impl ResultSink for JsonFileSink {
    fn write_set(&mut self, kind: ArtifactKind, tests: &BTreeSet<String>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create report directory: {:?}", self.dir))?;

        let artifact = ArtifactFile {
            kind,
            generated_at: chrono::Utc::now().to_rfc3339(),
            tests: tests.iter().cloned().collect(),
        };
        let path = self.path_for(kind);
        let contents =
            serde_json::to_string_pretty(&artifact).context("Failed to serialize report")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write report to {:?}", path))?;

        tracing::debug!("Wrote {} {} tests to {}", tests.len(), kind, path.display());
        Ok(())
    }
}

/// Keeps the sets in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub sets: BTreeMap<ArtifactKind, BTreeSet<String>>,
}

impl ResultSink for MemorySink {
    fn write_set(&mut self, kind: ArtifactKind, tests: &BTreeSet<String>) -> Result<()> {
        self.sets.insert(kind, tests.clone());
        Ok(())
    }
}

/// Human-readable summary naming failing and order-dependent tests.
pub fn summary(classification: &Classification) -> String {
    let mut out = String::new();

    if classification.failing.is_empty() {
        out.push_str("All tests passed\n");
    } else {
        let _ = writeln!(
            out,
            "There were failing tests ({} of {})",
            classification.failing.len(),
            classification.failing.len() + classification.passing.len()
        );
        for test in &classification.failing {
            let _ = writeln!(out, "\t{}", test);
        }
    }

    if classification.different_outcome.is_empty() {
        out.push_str("All tests had the same outcome in all runs\n");
    } else {
        let _ = writeln!(
            out,
            "There were tests with a different outcome for different runs ({})",
            classification.different_outcome.len()
        );
        for test in &classification.different_outcome {
            let _ = writeln!(out, "\t{}", test);
        }
    }

    out
}
