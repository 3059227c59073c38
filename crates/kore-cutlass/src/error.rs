use crate::shape::GemmShape;

/// Why a selection produced no kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedReason {
    /// Every enumerated candidate failed the alignment check.
    NoFeasibleCandidate,
    /// Feasible candidates existed but none compiled and ran.
    NoRunnableCandidate,
}

impl std::fmt::Display for ExhaustedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExhaustedReason::NoFeasibleCandidate => write!(f, "no candidate satisfies the alignment"),
            ExhaustedReason::NoRunnableCandidate => write!(f, "no feasible candidate compiled and ran"),
        }
    }
}

/// Errors surfaced by the kernel catalog and the profiler.
///
/// Per-kernel compile and run failures are not errors: the engine reports
/// them as an infinite runtime and the selector moves on.
#[derive(Debug, thiserror::Error)]
pub enum CutlassError {
    #[error("sm{0} is not supported yet")]
    UnsupportedArch(u32),

    #[error("output dtype '{dtype}' is not supported on sm{sm}")]
    UnsupportedDType { sm: u32, dtype: String },

    #[error("unknown data type '{0}'")]
    UnknownDType(String),

    #[error("unknown op type '{0}'")]
    UnknownOpType(String),

    #[error("invalid GEMM shape {m}x{n}x{k}: dimensions must be positive")]
    InvalidShape { m: usize, n: usize, k: usize },

    #[error("kernel name '{name}' carries {found} alignment tokens, expected exactly one")]
    MalformedKernelName { name: String, found: usize },

    #[error("no kernel available for GEMM {shape}: {reason}")]
    SearchExhausted { shape: GemmShape, reason: ExhaustedReason },

    #[error("default kernel '{name}' for sm{sm} {dtype} is missing from the catalog ({found} matches)")]
    MissingDefaultKernel {
        sm: u32,
        dtype: String,
        name: String,
        found: usize,
    },

    #[error("invalid profiler config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CutlassError {
    fn from(e: serde_json::Error) -> Self {
        CutlassError::Config(e.to_string())
    }
}
