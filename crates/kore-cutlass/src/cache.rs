//! In-memory memo of profiling decisions, keyed by GEMM shape.
//!
//! A cache belongs to one profiler family (architecture + output type); the
//! key deliberately carries only the shape. It is handed to the profiler at
//! construction so callers can share, inspect, or reset it.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::engine::BenchmarkResult;
use crate::shape::GemmShape;

/// Shape → winning kernel map with hit/miss accounting.
pub struct SelectionCache {
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for SelectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SelectionCache")
            .field("entries", &inner.entries.len())
            .field("hits", &inner.hits)
            .field("misses", &inner.misses)
            .finish()
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<GemmShape, BenchmarkResult>,
    hits: u64,
    misses: u64,
}

impl Default for SelectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up the decision for `shape`, counting a hit or a miss.
    pub fn get(&self, shape: &GemmShape) -> Option<BenchmarkResult> {
        let mut inner = self.inner.lock();
        match inner.entries.get(shape).cloned() {
            Some(result) => {
                inner.hits += 1;
                Some(result)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Whether a decision exists, without touching the counters.
    pub fn contains(&self, shape: &GemmShape) -> bool {
        self.inner.lock().entries.contains_key(shape)
    }

    /// Record the decision for `shape`. A later insert for the same shape
    /// replaces the earlier one.
    pub fn insert(&self, shape: GemmShape, result: BenchmarkResult) {
        self.inner.lock().entries.insert(shape, result);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every decision. Counters are kept.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total > 0 { inner.hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SelectionCache: {} shapes, hit rate {:.1}% ({} hits, {} misses)",
            self.entries,
            self.hit_rate * 100.0,
            self.hits,
            self.misses,
        )
    }
}
