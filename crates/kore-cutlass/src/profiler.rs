//! Kernel selection: enumerate, filter, compile, measure, memoize.
//!
//! ```text
//! select_op(M, N, K)
//!   cache hit ───────────────────────────────────────────────► result
//!   miss: generate(arch, dtype) → alignment filter
//!         profile_all:  compile_all → evaluate each → min runtime
//!         early exit:   evaluate in order → first finite runtime
//!         → cache.insert → result
//! ```

use std::cmp::Ordering;
use std::sync::Arc;

use crate::cache::SelectionCache;
use crate::catalog::{find_unique, Arch, CutlassCatalog, KernelCandidate, KernelCatalog};
use crate::engine::{BenchmarkResult, ProfilerEngine, Runtime};
use crate::error::{CutlassError, ExhaustedReason};
use crate::Result;
use crate::feasibility::feasible_candidates;
use crate::instantiate::{instantiate_candidate, KernelInstance};
use crate::library::{DataType, OpType};
use crate::shape::GemmShape;

/// Search knobs for [`GemmProfiler::profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileOptions {
    /// Measure every feasible kernel and keep the fastest. When false, the
    /// first kernel that runs at all is taken.
    pub profile_all: bool,
    /// Compile profilers concurrently (only used with `profile_all`).
    pub parallel: bool,
    /// Emit the batched GEMM kernel.
    pub batched: bool,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            profile_all: true,
            parallel: false,
            batched: false,
        }
    }
}

/// A kernel ready to hand to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedKernel {
    pub candidate: Arc<KernelCandidate>,
    /// Instance re-emitted with the requested epilogue.
    pub kernel: KernelInstance,
    /// Measured time; `None` for the unmeasured default kernel.
    pub runtime: Option<Runtime>,
}

impl SelectedKernel {
    pub fn name(&self) -> &str {
        &self.kernel.name
    }

    pub fn opdef(&self) -> &str {
        &self.kernel.opdef
    }
}

/// Autotuner for one architecture.
///
/// The selection cache is keyed by shape only, so a profiler (and the cache
/// it is given) should serve a single output dtype.
pub struct GemmProfiler<E: ProfilerEngine, C: KernelCatalog = CutlassCatalog> {
    arch: Arch,
    engine: E,
    catalog: C,
    cache: Arc<SelectionCache>,
}

impl<E: ProfilerEngine, C: KernelCatalog> std::fmt::Debug for GemmProfiler<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemmProfiler")
            .field("arch", &self.arch)
            .field("cache", &self.cache)
            .finish()
    }
}

impl<E: ProfilerEngine> GemmProfiler<E> {
    /// Profiler over the built-in catalog with a fresh cache. Fails for
    /// architectures without a kernel generator or default kernels.
    pub fn new(sm: u32, engine: E) -> Result<Self> {
        Self::with_cache(sm, engine, Arc::new(SelectionCache::new()))
    }

    /// Profiler sharing an existing cache.
    pub fn with_cache(sm: u32, engine: E, cache: Arc<SelectionCache>) -> Result<Self> {
        GemmProfiler::with_catalog(sm, engine, CutlassCatalog, cache)
    }
}

impl<E: ProfilerEngine, C: KernelCatalog> GemmProfiler<E, C> {
    /// Profiler drawing its candidates from `catalog`.
    pub fn with_catalog(sm: u32, engine: E, catalog: C, cache: Arc<SelectionCache>) -> Result<Self> {
        let arch = Arch::try_from(sm)?;
        Ok(Self {
            arch,
            engine,
            catalog,
            cache,
        })
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<SelectionCache> {
        &self.cache
    }

    /// Pick the best kernel for `M x N x K`.
    ///
    /// Nothing is cached when no kernel could be selected, so a later call
    /// can retry.
    pub fn select_op(
        &self,
        m: usize,
        n: usize,
        k: usize,
        out_dtype: DataType,
        profile_all: bool,
        parallel: bool,
    ) -> Result<BenchmarkResult> {
        let shape = GemmShape::new(m, n, k)?;
        if let Some(hit) = self.cache.get(&shape) {
            tracing::debug!("cache hit for {}: {}", shape, hit.candidate.name);
            return Ok(hit);
        }

        let candidates = self.catalog.generate(self.arch, out_dtype)?;
        let total = candidates.len();
        let feasible: Vec<Arc<KernelCandidate>> = feasible_candidates(candidates, shape)
            .into_iter()
            .map(Arc::new)
            .collect();

        if feasible.is_empty() {
            return Err(CutlassError::SearchExhausted {
                shape,
                reason: ExhaustedReason::NoFeasibleCandidate,
            });
        }
        tracing::info!(
            "{} {}: {}/{} candidates pass the alignment check for {}",
            self.arch,
            out_dtype,
            feasible.len(),
            total,
            shape
        );

        let best = if profile_all {
            self.engine.compile_all(&feasible, parallel);
            fastest(feasible.iter().map(|c| BenchmarkResult {
                candidate: Arc::clone(c),
                runtime: self.engine.evaluate(c, shape),
            }))
        } else {
            // compile lazily, one candidate at a time
            feasible.iter().find_map(|c| {
                let runtime = self.engine.evaluate(c, shape);
                runtime.is_finite().then(|| BenchmarkResult {
                    candidate: Arc::clone(c),
                    runtime,
                })
            })
        };

        let best = best.ok_or(CutlassError::SearchExhausted {
            shape,
            reason: ExhaustedReason::NoRunnableCandidate,
        })?;

        tracing::info!("selected {} for {} ({})", best.candidate.name, shape, best.runtime);
        self.cache.insert(shape, best.clone());
        Ok(best)
    }

    /// Profile `M x N x K` and emit the winner with the epilogue of
    /// `op_type`.
    pub fn profile(
        &self,
        op_type: OpType,
        m: usize,
        n: usize,
        k: usize,
        out_dtype: DataType,
        options: ProfileOptions,
    ) -> Result<SelectedKernel> {
        let best = self.select_op(m, n, k, out_dtype, options.profile_all, options.parallel)?;
        let kernel = instantiate_candidate(&best.candidate, op_type, options.batched);
        Ok(SelectedKernel {
            candidate: best.candidate,
            kernel,
            runtime: Some(best.runtime),
        })
    }

    /// The pre-selected kernel for `out_dtype`, without any profiling.
    pub fn get_default(
        &self,
        op_type: OpType,
        out_dtype: DataType,
        batched: bool,
    ) -> Result<SelectedKernel> {
        let sm = self.arch.compute_capability();
        let name = self
            .catalog
            .default_kernel_name(self.arch, out_dtype)
            .ok_or_else(|| CutlassError::UnsupportedDType {
                sm,
                dtype: out_dtype.to_string(),
            })?;

        let candidates = self.catalog.generate(self.arch, out_dtype)?;
        let candidate = find_unique(candidates, name).map_err(|found| CutlassError::MissingDefaultKernel {
            sm,
            dtype: out_dtype.to_string(),
            name: name.to_string(),
            found,
        })?;
        let candidate = Arc::new(candidate);
        let kernel = instantiate_candidate(&candidate, op_type, batched);
        Ok(SelectedKernel {
            candidate,
            kernel,
            runtime: None,
        })
    }
}

/// Minimum finite runtime; on exact ties the earliest result wins.
fn fastest(results: impl Iterator<Item = BenchmarkResult>) -> Option<BenchmarkResult> {
    let mut best: Option<BenchmarkResult> = None;
    for result in results {
        if !result.runtime.is_finite() {
            continue;
        }
        let better = match &best {
            None => true,
            Some(b) => result.runtime.total_cmp(&b.runtime) == Ordering::Less,
        };
        if better {
            best = Some(result);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CompileOutcome;

    /// Engine timing every kernel by its threadblock row count.
    struct IndexEngine;

    impl ProfilerEngine for IndexEngine {
        fn compile_all(&self, candidates: &[Arc<KernelCandidate>], _parallel: bool) -> Vec<CompileOutcome> {
            candidates
                .iter()
                .map(|c| CompileOutcome {
                    name: c.name.clone(),
                    artifact: Ok(c.name.clone().into()),
                })
                .collect()
        }

        fn evaluate(&self, candidate: &KernelCandidate, _shape: GemmShape) -> Runtime {
            Runtime::from_millis(candidate.tile_description.threadblock_shape[0] as f64)
        }
    }

    fn result(name: &str, ms: f64) -> BenchmarkResult {
        let mut c = crate::catalog::generate(Arch::Sm75, DataType::F16).unwrap().remove(0);
        c.name = name.to_string();
        BenchmarkResult {
            candidate: Arc::new(c),
            runtime: Runtime::from_millis(ms),
        }
    }

    #[test]
    fn test_fastest_tie_break_first_seen() {
        let best = fastest(
            vec![
                result("a", 2.0),
                result("b", 1.0),
                result("c", 1.0),
                BenchmarkResult { runtime: Runtime::INFINITE, ..result("d", 0.0) },
            ]
            .into_iter(),
        )
        .unwrap();
        assert_eq!(best.candidate.name, "b");
    }

    #[test]
    fn test_fastest_all_infinite() {
        let all_inf = vec![BenchmarkResult { runtime: Runtime::INFINITE, ..result("a", 0.0) }];
        assert!(fastest(all_inf.into_iter()).is_none());
        assert!(fastest(std::iter::empty()).is_none());
    }

    #[test]
    fn test_unsupported_arch() {
        assert!(matches!(
            GemmProfiler::new(86, IndexEngine),
            Err(CutlassError::UnsupportedArch(86))
        ));
    }

    #[test]
    fn test_invalid_shape() {
        let p = GemmProfiler::new(80, IndexEngine).unwrap();
        assert!(matches!(
            p.select_op(0, 64, 64, DataType::F32, true, false),
            Err(CutlassError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_select_prefers_smallest_tile_m() {
        let p = GemmProfiler::new(75, IndexEngine).unwrap();
        let best = p.select_op(64, 64, 64, DataType::F16, true, false).unwrap();
        // first 64-row tile in enumeration order, at the first alignment
        assert_eq!(best.candidate.name, "cutlass_tensorop_h1688gemm_64x128_32x2_tn_align8");
        assert_eq!(best.runtime, Runtime::from_millis(64.0));
    }

    #[test]
    fn test_default_kernel() {
        let p = GemmProfiler::new(80, IndexEngine).unwrap();
        let k = p.get_default(OpType::DenseBiasRelu, DataType::F16, false).unwrap();
        assert_eq!(k.name(), "cutlass_tensorop_h1688gemm_128x64_32x2_tn_align1");
        assert!(k.opdef().contains("LinearCombinationRelu"));
        assert!(k.runtime.is_none());
    }
}
