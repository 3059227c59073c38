//! Compile-and-benchmark capability used by the profiler.
//!
//! The profiler only talks to a [`ProfilerEngine`]; the real toolchain
//! implementation lives in [`crate::nvcc`], tests plug in canned runtimes.

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::KernelCandidate;
use crate::shape::GemmShape;

/// Measured kernel time in milliseconds, or infinite when the kernel could
/// not be built or run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Runtime(f64);

impl Runtime {
    /// Sentinel for a kernel that failed to compile, crashed or timed out.
    pub const INFINITE: Runtime = Runtime(f64::INFINITY);

    /// Wrap a measurement. Negative or NaN readings count as failures.
    pub fn from_millis(ms: f64) -> Self {
        if ms.is_nan() || ms < 0.0 {
            Runtime::INFINITE
        } else {
            Runtime(ms)
        }
    }

    pub fn millis(&self) -> f64 {
        self.0
    }

    /// Whether the kernel actually ran.
    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }

    pub fn total_cmp(&self, other: &Runtime) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_finite() {
            write!(f, "{:.4} ms", self.0)
        } else {
            write!(f, "inf")
        }
    }
}

/// A candidate together with its measurement for one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub candidate: Arc<KernelCandidate>,
    pub runtime: Runtime,
}

/// Result of compiling one candidate in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutcome {
    pub name: String,
    /// Path of the profiler executable, or the reason it is unavailable.
    pub artifact: Result<PathBuf, String>,
}

impl CompileOutcome {
    pub fn is_ok(&self) -> bool {
        self.artifact.is_ok()
    }
}

/// Turns candidate source into runnable profilers and times them.
///
/// Failures are per candidate: `compile_all` reports them in its outcomes and
/// `evaluate` returns [`Runtime::INFINITE`]. Neither call may fail the batch.
pub trait ProfilerEngine: Send + Sync {
    /// Build every candidate. Candidates are independent, so `parallel`
    /// lets the engine run compilations concurrently.
    fn compile_all(&self, candidates: &[Arc<KernelCandidate>], parallel: bool) -> Vec<CompileOutcome>;

    /// Run one candidate on `shape`, compiling it first if needed.
    fn evaluate(&self, candidate: &KernelCandidate, shape: GemmShape) -> Runtime;
}

impl<E: ProfilerEngine + ?Sized> ProfilerEngine for Arc<E> {
    fn compile_all(&self, candidates: &[Arc<KernelCandidate>], parallel: bool) -> Vec<CompileOutcome> {
        (**self).compile_all(candidates, parallel)
    }

    fn evaluate(&self, candidate: &KernelCandidate, shape: GemmShape) -> Runtime {
        (**self).evaluate(candidate, shape)
    }
}
