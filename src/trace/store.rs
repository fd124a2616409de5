//! Trace storage adapter.
//!
//! The store is the only place traces enter the process. It guarantees that
//! anything it hands out is structurally complete; a trace that cannot be
//! read or parsed is an error, never a partial result.

use crate::trace::{Trace, TraceKind};
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure to produce a trace.
#[derive(Debug, Error)]
pub enum TraceStoreError {
    #[error("no {kind} trace recorded for run '{run_id}' (looked at {path:?})")]
    NotFound {
        run_id: String,
        kind: TraceKind,
        path: PathBuf,
    },

    #[error("failed to read {kind} trace for run '{run_id}' from {path:?}")]
    Io {
        run_id: String,
        kind: TraceKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed {kind} trace for run '{run_id}' in {path:?}")]
    Malformed {
        run_id: String,
        kind: TraceKind,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid run identifier '{0}'")]
    InvalidRunId(String),
}

/// Source of recorded traces.
pub trait TraceStore: Send + Sync {
    /// Load the trace of `kind` recorded for `run_id`.
    fn load_trace(
        &self,
        run_id: &str,
        kind: TraceKind,
    ) -> impl Future<Output = Result<Trace, TraceStoreError>> + Send;
}

/// Traces stored as JSON files: `<root>/<kind>/<run_id>.json`.
#[derive(Debug, Clone)]
pub struct JsonTraceStore {
    root: PathBuf,
}

impl JsonTraceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding a run's trace.
    pub fn trace_path(&self, run_id: &str, kind: TraceKind) -> Result<PathBuf, TraceStoreError> {
        validate_run_id(run_id)?;
        Ok(self
            .root
            .join(kind.as_str())
            .join(format!("{}.json", run_id)))
    }

    /// Write a trace, creating the kind directory if needed.
    pub async fn save_trace(
        &self,
        run_id: &str,
        kind: TraceKind,
        trace: &Trace,
    ) -> Result<(), TraceStoreError> {
        let path = self.trace_path(run_id, kind)?;
        let io_err = |source| TraceStoreError::Io {
            run_id: run_id.to_string(),
            kind,
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let contents = serde_json::to_vec(trace).map_err(|source| TraceStoreError::Malformed {
            run_id: run_id.to_string(),
            kind,
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, contents).await.map_err(io_err)?;
        Ok(())
    }

    /// Run identifiers with a stored trace of `kind`, sorted.
    pub async fn list_runs(&self, kind: TraceKind) -> Result<Vec<String>, TraceStoreError> {
        let dir = self.root.join(kind.as_str());
        let mut runs = Vec::new();

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(source) => {
                return Err(TraceStoreError::Io {
                    run_id: "*".to_string(),
                    kind,
                    path: dir,
                    source,
                })
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(TraceStoreError::Io {
                        run_id: "*".to_string(),
                        kind,
                        path: dir,
                        source,
                    })
                }
            };
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push(stem.to_string());
                }
            }
        }

        runs.sort();
        Ok(runs)
    }
}

impl TraceStore for JsonTraceStore {
    async fn load_trace(&self, run_id: &str, kind: TraceKind) -> Result<Trace, TraceStoreError> {
        let path = self.trace_path(run_id, kind)?;
        tracing::debug!("Loading {} trace for run {} from {}", kind, run_id, path.display());

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TraceStoreError::NotFound {
                    run_id: run_id.to_string(),
                    kind,
                    path,
                })
            }
            Err(source) => {
                return Err(TraceStoreError::Io {
                    run_id: run_id.to_string(),
                    kind,
                    path,
                    source,
                })
            }
        };

        let trace: Trace =
            serde_json::from_slice(&bytes).map_err(|source| TraceStoreError::Malformed {
                run_id: run_id.to_string(),
                kind,
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Loaded {} trace for run {}: {} tests", kind, run_id, trace.len());
        Ok(trace)
    }
}

/// Run ids become file names, so they must not escape the kind directory.
fn validate_run_id(run_id: &str) -> Result<(), TraceStoreError> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !run_id.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(TraceStoreError::InvalidRunId(run_id.to_string()))
    }
}
