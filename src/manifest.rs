//! Test manifests.
//!
//! A manifest is a TOML file describing a (possibly nested) collection of
//! shell-command tests:
//!
//! ```toml
//! working_dir = "."
//!
//! [[test]]
//! id = "smoke"
//! command = "./smoke.sh"
//!
//! [[suite]]
//! name = "core"
//! [[suite.test]]
//! id = "core::parses"
//! command = "cargo test -q parses"
//! ```

use crate::stability::command::ShellTest;
use crate::stability::TestNode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read test manifest {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse test manifest {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top level of a manifest file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestManifest {
    /// Directory tests run in, relative to the manifest file.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default, rename = "test")]
    pub tests: Vec<TestEntry>,

    #[serde(default, rename = "suite")]
    pub suites: Vec<SuiteEntry>,
}

/// A named group of tests and further suites.
#[derive(Debug, Clone, Deserialize)]
pub struct SuiteEntry {
    pub name: String,

    /// Default working directory for everything in this suite.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default, rename = "test")]
    pub tests: Vec<TestEntry>,

    #[serde(default, rename = "suite")]
    pub suites: Vec<SuiteEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestEntry {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Selects tests by glob patterns over their ids.
///
/// An empty filter selects everything.
#[derive(Debug, Clone, Default)]
pub struct TestFilter {
    patterns: Vec<String>,
}

impl TestFilter {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn matches(&self, id: &str) -> bool {
        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|pattern| glob_match::glob_match(pattern, id))
    }
}

impl TestManifest {
    /// Parse a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Build the test collection.
    ///
    /// Relative working directories resolve against `base_dir` (normally the
    /// manifest's directory); tests inherit the nearest enclosing suite's
    /// directory. Tests rejected by `filter` are left out.
    pub fn into_collection(self, base_dir: &Path, filter: &TestFilter) -> TestNode<ShellTest> {
        let root_dir = resolve(base_dir, self.working_dir.as_deref());
        let mut children = convert_tests(self.tests, &root_dir, filter);
        children.extend(
            self.suites
                .into_iter()
                .map(|suite| convert_suite(suite, &root_dir, filter)),
        );
        TestNode::suite("manifest", children)
    }
}

fn resolve(base: &Path, dir: Option<&Path>) -> PathBuf {
    match dir {
        Some(dir) => base.join(dir),
        None => base.to_path_buf(),
    }
}

fn convert_tests(
    tests: Vec<TestEntry>,
    dir: &Path,
    filter: &TestFilter,
) -> Vec<TestNode<ShellTest>> {
    tests
        .into_iter()
        .filter(|entry| filter.matches(&entry.id))
        .map(|entry| {
            let test = ShellTest {
                command: entry.command,
                working_dir: Some(resolve(dir, entry.working_dir.as_deref())),
            };
            TestNode::test(entry.id, test)
        })
        .collect()
}

fn convert_suite(suite: SuiteEntry, parent_dir: &Path, filter: &TestFilter) -> TestNode<ShellTest> {
    let dir = resolve(parent_dir, suite.working_dir.as_deref());
    let mut children = convert_tests(suite.tests, &dir, filter);
    children.extend(
        suite
            .suites
            .into_iter()
            .map(|child| convert_suite(child, &dir, filter)),
    );
    TestNode::suite(suite.name, children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const NESTED: &str = r#"
working_dir = "work"

[[test]]
id = "smoke"
command = "true"

[[suite]]
name = "core"
working_dir = "core"

[[suite.test]]
id = "core::parses"
command = "cargo test parses"

[[suite.test]]
id = "core::renders"
command = "cargo test renders"
working_dir = "/abs"

[[suite.suite]]
name = "deep"

[[suite.suite.test]]
id = "core::deep::one"
command = "false"
"#;

    #[test]
    fn test_parse_empty_manifest() {
        let manifest = TestManifest::parse("").unwrap();
        assert!(manifest.tests.is_empty());
        assert!(manifest.suites.is_empty());
        let collection = manifest.into_collection(Path::new("/repo"), &TestFilter::default());
        assert_eq!(collection.count_tests(), 0);
    }

    #[test]
    fn test_parse_nested_manifest() {
        let manifest = TestManifest::parse(NESTED).unwrap();
        assert_eq!(manifest.tests.len(), 1);
        assert_eq!(manifest.suites.len(), 1);
        assert_eq!(manifest.suites[0].suites[0].name, "deep");
    }

    #[test]
    fn test_collection_resolves_directories() {
        let manifest = TestManifest::parse(NESTED).unwrap();
        let flat = manifest
            .into_collection(Path::new("/repo"), &TestFilter::default())
            .flatten();

        assert_eq!(flat.len(), 4);
        assert_eq!(
            flat["smoke"].working_dir.as_deref(),
            Some(Path::new("/repo/work"))
        );
        assert_eq!(
            flat["core::parses"].working_dir.as_deref(),
            Some(Path::new("/repo/work/core"))
        );
        assert_eq!(
            flat["core::renders"].working_dir.as_deref(),
            Some(Path::new("/abs"))
        );
        assert_eq!(
            flat["core::deep::one"].working_dir.as_deref(),
            Some(Path::new("/repo/work/core"))
        );
        assert_eq!(flat["core::deep::one"].command, "false");
    }

    #[test]
    fn test_filter_selects_by_glob() {
        let manifest = TestManifest::parse(NESTED).unwrap();
        let filter = TestFilter::new(vec!["core::*".to_string()]);
        let flat = manifest
            .into_collection(Path::new("/repo"), &filter)
            .flatten();

        let ids: Vec<_> = flat.keys().map(String::as_str).collect();
        assert_eq!(ids, vec!["core::deep::one", "core::parses", "core::renders"]);
    }

    #[test]
    fn test_filter_matching() {
        assert!(TestFilter::default().matches("anything"));

        let filter = TestFilter::new(vec!["smoke".to_string(), "*::parses".to_string()]);
        assert!(filter.matches("smoke"));
        assert!(filter.matches("core::parses"));
        assert!(!filter.matches("core::renders"));
    }

    #[test]
    fn test_missing_command_is_error() {
        let toml = r#"
[[test]]
id = "no-command"
"#;
        assert!(TestManifest::parse(toml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tests.toml");
        std::fs::write(&path, NESTED).unwrap();

        let manifest = TestManifest::load(&path).unwrap();
        assert_eq!(manifest.working_dir, Some(PathBuf::from("work")));
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = TestManifest::load(&temp_dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ManifestError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tests.toml");
        std::fs::write(&path, "invalid {{{{ toml").unwrap();

        let err = TestManifest::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }
}
