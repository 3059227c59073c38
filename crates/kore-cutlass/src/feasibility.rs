//! Alignment feasibility of a kernel for a concrete problem shape.
//!
//! A kernel built for vector alignment `a` issues `a`-wide loads along every
//! GEMM dimension, so M, N and K must all be multiples of `a`.

use crate::catalog::KernelCandidate;
use crate::error::CutlassError;
use crate::Result;
use crate::shape::GemmShape;

/// Whether every GEMM dimension is a multiple of `alignment`.
pub fn dims_aligned(alignment: u32, shape: GemmShape) -> bool {
    let a = alignment as usize;
    a != 0 && shape.dims().iter().all(|dim| dim % a == 0)
}

/// Typed check used by the selector.
pub fn is_feasible(candidate: &KernelCandidate, shape: GemmShape) -> bool {
    dims_aligned(candidate.alignment, shape)
}

/// Candidates runnable on `shape`, enumeration order kept.
pub fn feasible_candidates(candidates: Vec<KernelCandidate>, shape: GemmShape) -> Vec<KernelCandidate> {
    candidates.into_iter().filter(|c| is_feasible(c, shape)).collect()
}

/// Extract the single `alignN` token from a canonical kernel name.
pub fn alignment_from_name(name: &str) -> Result<u32> {
    let aligns: Vec<u32> = name
        .split('_')
        .filter_map(|tok| tok.strip_prefix("align"))
        .filter_map(|digits| match digits {
            "1" | "2" | "4" | "8" => digits.parse().ok(),
            _ => None,
        })
        .collect();

    match aligns.as_slice() {
        [a] => Ok(*a),
        _ => Err(CutlassError::MalformedKernelName {
            name: name.to_string(),
            found: aligns.len(),
        }),
    }
}

/// Name-based check for callers that only hold a kernel name.
///
/// A name without exactly one alignment token is a naming bug in the
/// catalog and is reported as an error rather than treated as infeasible.
pub fn check_align(name: &str, m: usize, n: usize, k: usize) -> Result<bool> {
    let align = alignment_from_name(name)?;
    // TODO: drop the M constraint once CUTLASS relaxes its alignment check on
    // the row dimension of row-major A (NVIDIA/cutlass#362).
    Ok(GemmShape::new(m, n, k).map(|s| dims_aligned(align, s)).unwrap_or(false))
}
