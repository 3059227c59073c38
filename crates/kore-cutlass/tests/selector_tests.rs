//! Selector behaviour against a scripted engine (no toolchain needed).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use kore_cutlass::catalog::{default_kernel_name, generate, KernelCatalog};
use kore_cutlass::feasibility::is_feasible;
use kore_cutlass::{
    Arch, CompileOutcome, CutlassError, DataType, ExhaustedReason, GemmProfiler, GemmShape,
    KernelCandidate, OpType, ProfileOptions, ProfilerEngine, Runtime, SelectionCache,
};

type Timing = Box<dyn Fn(&KernelCandidate) -> Runtime + Send + Sync>;

/// Engine with canned runtimes that records every call it receives.
struct MockEngine {
    timing: Timing,
    compile_calls: AtomicUsize,
    compiled: AtomicUsize,
    evaluated: Mutex<Vec<KernelCandidate>>,
    parallel_flags: Mutex<Vec<bool>>,
}

impl MockEngine {
    fn new(timing: impl Fn(&KernelCandidate) -> Runtime + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            timing: Box::new(timing),
            compile_calls: AtomicUsize::new(0),
            compiled: AtomicUsize::new(0),
            evaluated: Mutex::new(Vec::new()),
            parallel_flags: Mutex::new(Vec::new()),
        })
    }

    fn constant(ms: f64) -> Arc<Self> {
        Self::new(move |_| Runtime::from_millis(ms))
    }

    fn compile_calls(&self) -> usize {
        self.compile_calls.load(Ordering::SeqCst)
    }

    fn eval_calls(&self) -> usize {
        self.evaluated.lock().len()
    }

    fn evaluated_alignments(&self) -> Vec<u32> {
        self.evaluated.lock().iter().map(|c| c.alignment).collect()
    }
}

impl ProfilerEngine for MockEngine {
    fn compile_all(&self, candidates: &[Arc<KernelCandidate>], parallel: bool) -> Vec<CompileOutcome> {
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        self.compiled.fetch_add(candidates.len(), Ordering::SeqCst);
        self.parallel_flags.lock().push(parallel);
        candidates
            .iter()
            .map(|c| CompileOutcome {
                name: c.name.clone(),
                artifact: Ok(format!("/bin/{}", c.name).into()),
            })
            .collect()
    }

    fn evaluate(&self, candidate: &KernelCandidate, _shape: GemmShape) -> Runtime {
        self.evaluated.lock().push(candidate.clone());
        (self.timing)(candidate)
    }
}

/// Catalog serving a fixed candidate list and default name.
struct FixedCatalog {
    candidates: Vec<KernelCandidate>,
    default: Option<String>,
}

impl KernelCatalog for FixedCatalog {
    fn generate(&self, _arch: Arch, _out_dtype: DataType) -> kore_cutlass::Result<Vec<KernelCandidate>> {
        Ok(self.candidates.clone())
    }

    fn default_kernel_name(&self, _arch: Arch, _out_dtype: DataType) -> Option<&str> {
        self.default.as_deref()
    }
}

fn fixed_profiler(
    engine: &Arc<MockEngine>,
    candidates: Vec<KernelCandidate>,
    default: Option<&str>,
) -> GemmProfiler<Arc<MockEngine>, FixedCatalog> {
    let catalog = FixedCatalog {
        candidates,
        default: default.map(str::to_string),
    };
    GemmProfiler::with_catalog(75, Arc::clone(engine), catalog, Arc::new(SelectionCache::new())).unwrap()
}

fn feasible(arch: Arch, dtype: DataType, m: usize, n: usize, k: usize) -> Vec<KernelCandidate> {
    let shape = GemmShape::new(m, n, k).unwrap();
    generate(arch, dtype)
        .unwrap()
        .into_iter()
        .filter(|c| is_feasible(c, shape))
        .collect()
}

// ============================================================================
// Search
// ============================================================================

#[test]
fn test_select_minimum_runtime() {
    let target = "cutlass_tensorop_h1688gemm_64x64_32x2_tn_align8";
    let engine = MockEngine::new(move |c| {
        Runtime::from_millis(if c.name == target { 0.1 } else { 1.0 })
    });
    let profiler = GemmProfiler::new(75, Arc::clone(&engine)).unwrap();

    let best = profiler.select_op(128, 128, 128, DataType::F16, true, false).unwrap();
    assert_eq!(best.candidate.name, target);
    assert_eq!(best.runtime, Runtime::from_millis(0.1));

    // every feasible candidate was compiled once and measured once
    assert_eq!(engine.compile_calls(), 1);
    assert_eq!(engine.compiled.load(Ordering::SeqCst), 28);
    assert_eq!(engine.eval_calls(), 28);
}

#[test]
fn test_select_tie_goes_to_enumeration_order() {
    let engine = MockEngine::constant(0.5);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();

    let best = profiler.select_op(256, 256, 256, DataType::F32, true, false).unwrap();
    let first = &feasible(Arch::Sm80, DataType::F32, 256, 256, 256)[0];
    assert_eq!(best.candidate.name, first.name);
}

#[test]
fn test_select_skips_failed_candidates() {
    // align8 kernels "fail to compile"; the fastest runnable one wins
    let engine = MockEngine::new(|c| match c.alignment {
        8 => Runtime::INFINITE,
        4 => Runtime::from_millis(0.3),
        _ => Runtime::from_millis(0.2),
    });
    let profiler = GemmProfiler::new(75, Arc::clone(&engine)).unwrap();

    let best = profiler.select_op(64, 64, 64, DataType::F16, true, false).unwrap();
    assert_eq!(best.candidate.alignment, 2);
    assert!(best.runtime.is_finite());
}

#[test]
fn test_early_exit_takes_first_runnable() {
    let engine = MockEngine::new(|c| match c.alignment {
        8 => Runtime::INFINITE,
        4 => Runtime::from_millis(5.0),
        _ => Runtime::from_millis(0.01),
    });
    let profiler = GemmProfiler::new(75, Arc::clone(&engine)).unwrap();

    let best = profiler.select_op(64, 64, 64, DataType::F16, false, true).unwrap();
    // a faster kernel exists later in the order, but the search stops here
    assert_eq!(best.candidate.alignment, 4);
    assert_eq!(best.candidate.name, "cutlass_tensorop_h1688gemm_256x128_32x2_tn_align4");
    assert_eq!(best.runtime, Runtime::from_millis(5.0));

    // lazy compilation: no batch build, only two kernels touched
    assert_eq!(engine.compile_calls(), 0);
    assert_eq!(engine.eval_calls(), 2);
}

#[test]
fn test_parallel_flag_reaches_engine() {
    let engine = MockEngine::constant(1.0);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();
    profiler.select_op(64, 64, 64, DataType::F16, true, true).unwrap();
    profiler.select_op(32, 32, 32, DataType::F16, true, false).unwrap();
    assert_eq!(*engine.parallel_flags.lock(), vec![true, false]);
}

// ============================================================================
// Alignment filtering
// ============================================================================

#[test]
fn test_aligned_shape_keeps_every_alignment() {
    let engine = MockEngine::constant(1.0);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();
    profiler.select_op(64, 64, 64, DataType::F32, true, false).unwrap();

    let mut aligns = engine.evaluated_alignments();
    aligns.sort_unstable();
    aligns.dedup();
    assert_eq!(aligns, vec![1, 2, 4, 8]);
    assert_eq!(engine.eval_calls(), generate(Arch::Sm80, DataType::F32).unwrap().len());
}

#[test]
fn test_odd_m_leaves_only_align1() {
    let engine = MockEngine::constant(1.0);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();
    let best = profiler.select_op(65, 64, 64, DataType::F32, true, false).unwrap();

    assert_eq!(best.candidate.alignment, 1);
    assert!(engine.evaluated_alignments().iter().all(|&a| a == 1));
    // align1 kernels only come from the Turing tile set
    assert_eq!(engine.eval_calls(), 7);
    assert!(engine
        .evaluated
        .lock()
        .iter()
        .all(|c| c.tile_description.minimum_compute_capability == 75));
}

#[test]
fn test_partial_alignment() {
    let engine = MockEngine::constant(1.0);
    let profiler = GemmProfiler::new(75, Arc::clone(&engine)).unwrap();
    profiler.select_op(64, 64, 36, DataType::F16, true, false).unwrap();

    let mut aligns = engine.evaluated_alignments();
    aligns.sort_unstable();
    aligns.dedup();
    assert_eq!(aligns, vec![1, 2, 4]);
}

// ============================================================================
// Cache
// ============================================================================

#[test]
fn test_cache_hit_skips_engine() {
    let engine = MockEngine::constant(0.25);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();

    let first = profiler.select_op(128, 256, 64, DataType::F16, true, false).unwrap();
    let compiles = engine.compile_calls();
    let evals = engine.eval_calls();

    let second = profiler.select_op(128, 256, 64, DataType::F16, true, false).unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.compile_calls(), compiles);
    assert_eq!(engine.eval_calls(), evals);

    let stats = profiler.cache().stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
}

#[test]
fn test_cache_shared_between_profilers() {
    let cache = Arc::new(SelectionCache::new());
    let warm = MockEngine::constant(1.0);
    let cold = MockEngine::constant(1.0);

    GemmProfiler::with_cache(80, Arc::clone(&warm), Arc::clone(&cache))
        .unwrap()
        .select_op(64, 64, 64, DataType::F16, false, false)
        .unwrap();

    let other = GemmProfiler::with_cache(80, Arc::clone(&cold), Arc::clone(&cache)).unwrap();
    other.select_op(64, 64, 64, DataType::F16, false, false).unwrap();
    assert_eq!(cold.eval_calls(), 0);
    assert!(cache.contains(&GemmShape::new(64, 64, 64).unwrap()));
}

#[test]
fn test_exhausted_search_is_not_cached() {
    let engine = MockEngine::new(|_| Runtime::INFINITE);
    let profiler = GemmProfiler::new(75, Arc::clone(&engine)).unwrap();

    let err = profiler.select_op(64, 64, 64, DataType::F32, true, false).unwrap_err();
    assert!(matches!(
        err,
        CutlassError::SearchExhausted {
            reason: ExhaustedReason::NoRunnableCandidate,
            ..
        }
    ));
    assert!(profiler.cache().is_empty());

    // retried from scratch, not answered from the cache
    let evals = engine.eval_calls();
    assert!(profiler.select_op(64, 64, 64, DataType::F32, false, false).is_err());
    assert_eq!(engine.eval_calls(), evals * 2);
}

// ============================================================================
// Construction and errors
// ============================================================================

#[test]
fn test_unsupported_arch() {
    for sm in [60, 70, 86, 90] {
        match GemmProfiler::new(sm, MockEngine::constant(1.0)) {
            Err(CutlassError::UnsupportedArch(got)) => assert_eq!(got, sm),
            other => panic!("sm{}: expected UnsupportedArch, got {:?}", sm, other),
        }
    }
}

#[test]
fn test_unsupported_output_dtype() {
    let engine = MockEngine::constant(1.0);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();
    assert!(matches!(
        profiler.select_op(64, 64, 64, DataType::BF16, true, false),
        Err(CutlassError::UnsupportedDType { sm: 80, .. })
    ));
    assert!(profiler.get_default(OpType::Dense, DataType::S8, false).is_err());
    assert_eq!(engine.eval_calls(), 0);
}

// ============================================================================
// Defaults and instantiation
// ============================================================================

#[test]
fn test_get_default_matches_table() {
    let engine = MockEngine::constant(1.0);
    for sm in [75, 80] {
        let profiler = GemmProfiler::new(sm, Arc::clone(&engine)).unwrap();
        for dtype in [DataType::F16, DataType::F32] {
            let expected = default_kernel_name(profiler.arch(), dtype).unwrap();
            let kernel = profiler.get_default(OpType::DenseBiasGeluFp16, dtype, false).unwrap();
            assert_eq!(kernel.name(), expected);
            assert!(kernel.opdef().contains("LinearCombinationGELU"));
            assert!(kernel.candidate.source.contains("thread::LinearCombination<"));
            assert!(kernel.runtime.is_none());
        }
    }
    // defaults never touch the engine
    assert_eq!(engine.eval_calls(), 0);
    assert_eq!(engine.compile_calls(), 0);
}

#[test]
fn test_profile_substitutes_epilogue() {
    let engine = MockEngine::constant(0.7);
    let profiler = GemmProfiler::new(80, Arc::clone(&engine)).unwrap();

    let kernel = profiler
        .profile(OpType::DenseBiasRelu, 64, 128, 256, DataType::F16, ProfileOptions::default())
        .unwrap();
    assert_eq!(kernel.name(), kernel.candidate.name);
    assert!(kernel.opdef().contains("LinearCombinationRelu"));
    assert!(kernel.opdef().contains("NoBetaScaling"));
    assert!(!kernel.candidate.source.contains("LinearCombinationRelu"));
    assert_eq!(kernel.runtime, Some(Runtime::from_millis(0.7)));

    // same shape, different epilogue: answered from the cache
    let evals = engine.eval_calls();
    let dense = profiler
        .profile(OpType::Dense, 64, 128, 256, DataType::F16, ProfileOptions::default())
        .unwrap();
    assert_eq!(engine.eval_calls(), evals);
    assert_eq!(dense.name(), kernel.name());
    assert_ne!(dense.opdef(), kernel.opdef());
}

#[test]
fn test_profile_batched() {
    let profiler = GemmProfiler::new(75, MockEngine::constant(1.0)).unwrap();
    let options = ProfileOptions {
        batched: true,
        ..ProfileOptions::default()
    };
    let kernel = profiler
        .profile(OpType::BatchMatmul, 64, 64, 64, DataType::F32, options)
        .unwrap();
    assert!(kernel.opdef().contains("GemmBatched"));
}

// ============================================================================
// Injected catalogs
// ============================================================================

#[test]
fn test_no_feasible_candidate() {
    let engine = MockEngine::constant(1.0);
    let wide_only: Vec<KernelCandidate> = generate(Arch::Sm75, DataType::F16)
        .unwrap()
        .into_iter()
        .filter(|c| c.alignment == 8)
        .collect();
    let profiler = fixed_profiler(&engine, wide_only, None);

    let err = profiler.select_op(65, 64, 64, DataType::F16, true, false).unwrap_err();
    match err {
        CutlassError::SearchExhausted { shape, reason } => {
            assert_eq!(shape, GemmShape::new(65, 64, 64).unwrap());
            assert_eq!(reason, ExhaustedReason::NoFeasibleCandidate);
        }
        other => panic!("expected SearchExhausted, got {:?}", other),
    }
    assert_eq!(engine.compile_calls(), 0);
    assert_eq!(engine.eval_calls(), 0);
    assert!(profiler.cache().is_empty());

    // aligned shapes still resolve through the same catalog
    let best = profiler.select_op(64, 64, 64, DataType::F16, false, false).unwrap();
    assert_eq!(best.candidate.alignment, 8);
}

#[test]
fn test_default_missing_from_catalog() {
    let engine = MockEngine::constant(1.0);
    let profiler = fixed_profiler(
        &engine,
        generate(Arch::Sm75, DataType::F16).unwrap(),
        Some("cutlass_tensorop_h1688gemm_32x32_32x2_tn_align1"),
    );

    match profiler.get_default(OpType::Dense, DataType::F16, false) {
        Err(CutlassError::MissingDefaultKernel { sm, name, found, .. }) => {
            assert_eq!(sm, 75);
            assert_eq!(name, "cutlass_tensorop_h1688gemm_32x32_32x2_tn_align1");
            assert_eq!(found, 0);
        }
        other => panic!("expected MissingDefaultKernel, got {:?}", other),
    }
}

#[test]
fn test_default_ambiguous_in_catalog() {
    let engine = MockEngine::constant(1.0);
    let name = default_kernel_name(Arch::Sm75, DataType::F16).unwrap();
    let mut candidates = generate(Arch::Sm75, DataType::F16).unwrap();
    let dup = candidates.iter().find(|c| c.name == name).cloned().unwrap();
    candidates.push(dup);
    let profiler = fixed_profiler(&engine, candidates, Some(name));

    assert!(matches!(
        profiler.get_default(OpType::DenseBias, DataType::F16, false),
        Err(CutlassError::MissingDefaultKernel { found: 2, .. })
    ));
}

#[test]
fn test_default_absent_from_table() {
    let engine = MockEngine::constant(1.0);
    let profiler = fixed_profiler(&engine, generate(Arch::Sm75, DataType::F32).unwrap(), None);
    assert!(matches!(
        profiler.get_default(OpType::Dense, DataType::F32, false),
        Err(CutlassError::UnsupportedDType { sm: 75, .. })
    ));
}
