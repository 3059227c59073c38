//! Configuration for the toolchain-backed profiler engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CutlassError;
use crate::Result;

/// Where to find CUTLASS and the compiler, and how long external processes
/// may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Root of a CUTLASS checkout (`include/` and `tools/util/include/`).
    pub cutlass_path: PathBuf,

    /// Directory holding compiled profiler binaries, one per kernel name.
    /// Binaries already present are reused.
    pub binary_dir: PathBuf,

    /// Compiler executable.
    pub nvcc: String,

    /// Flags appended after the generated ones.
    pub extra_cflags: Vec<String>,

    /// Upper bound for a single compilation.
    pub compile_timeout_secs: u64,

    /// Upper bound for a single profiler run.
    pub eval_timeout_secs: u64,

    /// Worker count for parallel compilation (None = one per core).
    pub jobs: Option<usize>,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            cutlass_path: PathBuf::from("cutlass"),
            binary_dir: std::env::temp_dir().join("kore_cutlass_profiler"),
            nvcc: "nvcc".into(),
            extra_cflags: Vec::new(),
            compile_timeout_secs: 600,
            eval_timeout_secs: 60,
            jobs: None,
        }
    }
}

impl ProfilerConfig {
    pub fn new(cutlass_path: impl Into<PathBuf>, binary_dir: impl Into<PathBuf>) -> Self {
        Self {
            cutlass_path: cutlass_path.into(),
            binary_dir: binary_dir.into(),
            ..Default::default()
        }
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `CUTLASS_PATH`, `KORE_CUTLASS_BIN_DIR` and
    /// `NVCC` from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("CUTLASS_PATH") {
            config.cutlass_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("KORE_CUTLASS_BIN_DIR") {
            config.binary_dir = PathBuf::from(dir);
        }
        if let Ok(nvcc) = std::env::var("NVCC") {
            config.nvcc = nvcc;
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.nvcc.trim().is_empty() {
            return Err(CutlassError::Config("nvcc must not be empty".into()));
        }
        if self.compile_timeout_secs == 0 || self.eval_timeout_secs == 0 {
            return Err(CutlassError::Config("timeouts must be positive".into()));
        }
        if self.jobs == Some(0) {
            return Err(CutlassError::Config("jobs must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_nvcc(mut self, nvcc: impl Into<String>) -> Self {
        self.nvcc = nvcc.into();
        self
    }

    pub fn with_extra_cflags(mut self, flags: Vec<String>) -> Self {
        self.extra_cflags = flags;
        self
    }

    pub fn with_timeouts(mut self, compile_secs: u64, eval_secs: u64) -> Self {
        self.compile_timeout_secs = compile_secs;
        self.eval_timeout_secs = eval_secs;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }

    /// Compiler flags for a given compute capability.
    pub fn cflags(&self, sm: u32) -> Vec<String> {
        let cutlass = self.cutlass_path.display();
        let mut flags = vec![
            format!("-I{}/include", cutlass),
            format!("-I{}/tools/util/include", cutlass),
            "-O3".to_string(),
            "-std=c++17".to_string(),
            "-DCUTLASS_ENABLE_TENSOR_CORE_MMA=1".to_string(),
            format!("-gencode=arch=compute_{sm},code=[sm_{sm},compute_{sm}]", sm = sm),
            "-Xcompiler=-Wconversion".to_string(),
            "-Xcompiler=-fno-strict-aliasing".to_string(),
        ];
        flags.extend(self.extra_cflags.iter().cloned());
        flags
    }
}
