//! # kore-cutlass
//!
//! CUTLASS GEMM autotuning for Kore.
//!
//! Provides:
//! - A catalog of tensor-op GEMM kernels for sm75 and sm80
//! - Alignment feasibility filtering per problem shape
//! - An nvcc-backed compile-and-benchmark engine with binary reuse
//! - A memoizing selector (exhaustive or first-runnable search)
//! - Kernel instantiation with fused epilogues (bias, ReLU, GELU, ...)
//! - Pre-selected default kernels when profiling is skipped

pub mod error;
pub mod shape;
pub mod library;
pub mod gemm;
pub mod catalog;
pub mod feasibility;
pub mod engine;
pub mod config;
pub mod nvcc;
pub mod cache;
pub mod instantiate;
pub mod profiler;

pub use error::{CutlassError, ExhaustedReason};
pub use shape::GemmShape;
pub use library::{DataType, OpType};
pub use catalog::{Arch, CutlassCatalog, KernelCandidate, KernelCatalog};
pub use engine::{BenchmarkResult, CompileOutcome, ProfilerEngine, Runtime};
pub use config::ProfilerConfig;
pub use nvcc::NvccEngine;
pub use cache::{CacheStats, SelectionCache};
pub use instantiate::KernelInstance;
pub use profiler::{GemmProfiler, ProfileOptions, SelectedKernel};

pub type Result<T> = std::result::Result<T, CutlassError>;
