use std::fmt;

use crate::error::CutlassError;
use crate::Result;

/// Problem size of a single GEMM: `C[M, N] = A[M, K] · B[K, N]`.
///
/// Used as the selection cache key, so equality and hashing are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GemmShape {
    m: usize,
    n: usize,
    k: usize,
}

impl GemmShape {
    /// Build a shape, rejecting zero-sized dimensions.
    pub fn new(m: usize, n: usize, k: usize) -> Result<Self> {
        if m == 0 || n == 0 || k == 0 {
            return Err(CutlassError::InvalidShape { m, n, k });
        }
        Ok(Self { m, n, k })
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Dimensions in `[M, N, K]` order, as passed to a profiler binary.
    pub fn dims(&self) -> [usize; 3] {
        [self.m, self.n, self.k]
    }

    /// Floating point operations of one multiply-accumulate pass.
    pub fn flops(&self) -> f64 {
        2.0 * self.m as f64 * self.n as f64 * self.k as f64
    }
}

impl fmt::Display for GemmShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}
