//! Baseline trace cache.
//!
//! The baseline trace is compared against every mutant, so it is loaded once
//! and kept. Mutant traces are used exactly once and are always loaded fresh;
//! caching them would grow without bound over a long mutation run.

use crate::trace::{Trace, TraceKind, TraceStore, TraceStoreError, BASELINE_RUN_ID};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Caches the baseline trace of a single kind.
pub struct TraceCache<S> {
    store: Arc<S>,
    kind: TraceKind,
    baseline_id: String,
    baseline: OnceCell<Arc<Trace>>,
}

impl<S: TraceStore> TraceCache<S> {
    /// Cache keyed by the conventional baseline id `"0"`.
    pub fn new(store: Arc<S>, kind: TraceKind) -> Self {
        Self::with_baseline_id(store, kind, BASELINE_RUN_ID)
    }

    pub fn with_baseline_id(
        store: Arc<S>,
        kind: TraceKind,
        baseline_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            kind,
            baseline_id: baseline_id.into(),
            baseline: OnceCell::new(),
        }
    }

    pub fn kind(&self) -> TraceKind {
        self.kind
    }

    pub fn baseline_id(&self) -> &str {
        &self.baseline_id
    }

    /// Whether the baseline has been loaded.
    pub fn is_baseline_cached(&self) -> bool {
        self.baseline.initialized()
    }

    /// Get the trace for `run_id`.
    ///
    /// The baseline is loaded on first access and shared afterwards;
    /// concurrent first accesses wait for a single load. A failed load is not
    /// stored. Every other run id goes to the store on every call.
    pub async fn get(&self, run_id: &str) -> Result<Arc<Trace>, TraceStoreError> {
        if run_id != self.baseline_id {
            tracing::debug!("Loading mutant {} trace for run {}", self.kind, run_id);
            return self.store.load_trace(run_id, self.kind).await.map(Arc::new);
        }

        let trace = self
            .baseline
            .get_or_try_init(|| async {
                tracing::info!("Loading baseline {} trace (run {})", self.kind, run_id);
                self.store.load_trace(run_id, self.kind).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(trace))
    }

    /// Get the baseline trace.
    pub async fn baseline(&self) -> Result<Arc<Trace>, TraceStoreError> {
        self.get(&self.baseline_id).await
    }
}

/// One independent cache per trace kind over a shared store.
pub struct TraceCaches<S> {
    line: TraceCache<S>,
    value: TraceCache<S>,
}

impl<S: TraceStore> TraceCaches<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_baseline_id(store, BASELINE_RUN_ID)
    }

    pub fn with_baseline_id(store: Arc<S>, baseline_id: &str) -> Self {
        Self {
            line: TraceCache::with_baseline_id(Arc::clone(&store), TraceKind::Line, baseline_id),
            value: TraceCache::with_baseline_id(store, TraceKind::Value, baseline_id),
        }
    }

    pub fn line(&self) -> &TraceCache<S> {
        &self.line
    }

    pub fn value(&self) -> &TraceCache<S> {
        &self.value
    }

    pub fn for_kind(&self, kind: TraceKind) -> &TraceCache<S> {
        match kind {
            TraceKind::Line => &self.line,
            TraceKind::Value => &self.value,
        }
    }
}
