//! Toolchain-backed profiler engine.
//!
//! Compiles each candidate's profiler program with `nvcc` into
//! `binary_dir/<kernel name>`, then runs it as `<binary> M N K` and reads the
//! mean runtime in milliseconds from stdout.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::catalog::{Arch, KernelCandidate};
use crate::config::ProfilerConfig;
use crate::engine::{CompileOutcome, ProfilerEngine, Runtime};
use crate::error::CutlassError;
use crate::Result;
use crate::shape::GemmShape;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Build state of one kernel within this engine's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactStatus {
    Ready(PathBuf),
    Failed(String),
}

/// Profiler engine that shells out to `nvcc` and the compiled binaries.
pub struct NvccEngine {
    config: ProfilerConfig,
    sm: u32,
    /// Per-kernel build results. A failed build is not retried.
    artifacts: Mutex<HashMap<String, ArtifactStatus>>,
    pool: Option<rayon::ThreadPool>,
}

impl std::fmt::Debug for NvccEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let artifacts = self.artifacts.lock();
        f.debug_struct("NvccEngine")
            .field("sm", &self.sm)
            .field("binary_dir", &self.config.binary_dir)
            .field("artifacts", &artifacts.len())
            .finish()
    }
}

impl NvccEngine {
    pub fn new(arch: Arch, config: ProfilerConfig) -> Result<Self> {
        config.validate()?;
        let pool = match config.jobs {
            Some(jobs) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .thread_name(|i| format!("kore-nvcc-{}", i))
                    .build()
                    .map_err(|e| CutlassError::Config(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            config,
            sm: arch.compute_capability(),
            artifacts: Mutex::new(HashMap::new()),
            pool,
        })
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Location of the profiler binary for `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.config.binary_dir.join(name)
    }

    /// Make sure the profiler for `candidate` exists. No-op if it was built
    /// before, by this engine or a previous process.
    fn ensure_compiled(&self, candidate: &KernelCandidate) -> std::result::Result<PathBuf, String> {
        if let Some(status) = self.artifacts.lock().get(&candidate.name) {
            return match status {
                ArtifactStatus::Ready(path) => Ok(path.clone()),
                ArtifactStatus::Failed(msg) => Err(msg.clone()),
            };
        }

        let output = self.artifact_path(&candidate.name);
        let result = if output.is_file() {
            tracing::debug!("reusing profiler binary {}", output.display());
            Ok(output)
        } else {
            self.compile(candidate, &output)
        };

        let status = match &result {
            Ok(path) => ArtifactStatus::Ready(path.clone()),
            Err(msg) => {
                tracing::warn!("failed to compile {}: {}", candidate.name, msg);
                ArtifactStatus::Failed(msg.clone())
            }
        };
        self.artifacts.lock().insert(candidate.name.clone(), status);
        result
    }

    fn compile(&self, candidate: &KernelCandidate, output: &Path) -> std::result::Result<PathBuf, String> {
        let dir = &self.config.binary_dir;
        std::fs::create_dir_all(dir).map_err(|e| format!("create {}: {}", dir.display(), e))?;

        let mut src = tempfile::Builder::new()
            .prefix(&candidate.name)
            .suffix(".cu")
            .tempfile_in(dir)
            .map_err(|e| format!("temp source: {}", e))?;
        src.write_all(candidate.source.as_bytes())
            .and_then(|_| src.flush())
            .map_err(|e| format!("write source: {}", e))?;

        // A file at `output` is always a complete build.
        let partial = output.with_extension("partial");
        let mut cmd = Command::new(&self.config.nvcc);
        cmd.args(self.config.cflags(self.sm))
            .arg(src.path())
            .arg("-o")
            .arg(&partial);

        tracing::debug!("compiling {}", candidate.name);
        let t_start = Instant::now();
        let run = run_with_timeout(&mut cmd, self.config.compile_timeout())
            .map_err(|e| format!("failed to execute {}: {}", self.config.nvcc, e))?;

        let result = if run.timed_out {
            Err(format!("compilation timed out after {}s", self.config.compile_timeout_secs))
        } else if !run.success() {
            Err(format!("{} exited with {:?}: {}", self.config.nvcc, run.status, run.stderr_tail()))
        } else {
            std::fs::rename(&partial, output)
                .map(|_| output.to_path_buf())
                .map_err(|e| format!("install {}: {}", output.display(), e))
        };
        if result.is_err() {
            let _ = std::fs::remove_file(&partial);
        } else {
            tracing::debug!(
                "compiled {} in {:.1}s",
                candidate.name,
                t_start.elapsed().as_secs_f64()
            );
        }
        result
    }

    fn outcome(&self, candidate: &KernelCandidate) -> CompileOutcome {
        CompileOutcome {
            name: candidate.name.clone(),
            artifact: self.ensure_compiled(candidate),
        }
    }
}

impl ProfilerEngine for NvccEngine {
    fn compile_all(&self, candidates: &[Arc<KernelCandidate>], parallel: bool) -> Vec<CompileOutcome> {
        tracing::info!(
            "compiling {} profiler(s) for sm{}{}",
            candidates.len(),
            self.sm,
            if parallel { " in parallel" } else { "" }
        );

        let outcomes: Vec<CompileOutcome> = if parallel {
            let build = || candidates.par_iter().map(|c| self.outcome(c)).collect();
            match &self.pool {
                Some(pool) => pool.install(build),
                None => build(),
            }
        } else {
            candidates.iter().map(|c| self.outcome(c)).collect()
        };

        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        if failed > 0 {
            tracing::warn!("{}/{} profiler(s) failed to compile", failed, outcomes.len());
        }
        outcomes
    }

    fn evaluate(&self, candidate: &KernelCandidate, shape: GemmShape) -> Runtime {
        let binary = match self.ensure_compiled(candidate) {
            Ok(path) => path,
            Err(_) => return Runtime::INFINITE,
        };

        let mut cmd = Command::new(&binary);
        cmd.args(shape.dims().iter().map(|d| d.to_string()));
        tracing::debug!("invoking evaluation {} {}", binary.display(), shape);

        let run = match run_with_timeout(&mut cmd, self.config.eval_timeout()) {
            Ok(run) => run,
            Err(e) => {
                tracing::warn!("failed to execute {}: {}", binary.display(), e);
                return Runtime::INFINITE;
            }
        };
        if run.timed_out {
            tracing::warn!("{} timed out on {}", candidate.name, shape);
            return Runtime::INFINITE;
        }
        if !run.success() {
            tracing::warn!("{} failed on {}: {}", candidate.name, shape, run.stderr_tail());
            return Runtime::INFINITE;
        }

        match parse_runtime(&run.stdout) {
            Some(rt) => {
                tracing::debug!("{}, {}", candidate.name, rt);
                rt
            }
            None => {
                tracing::warn!(
                    "{} printed no runtime: {:?}",
                    candidate.name,
                    String::from_utf8_lossy(&run.stdout)
                );
                Runtime::INFINITE
            }
        }
    }
}

/// Parse the single float a profiler prints on stdout.
fn parse_runtime(stdout: &[u8]) -> Option<Runtime> {
    let text = std::str::from_utf8(stdout).ok()?;
    let ms: f64 = text.trim().parse().ok()?;
    Some(Runtime::from_millis(ms))
}

/// Captured result of an external process.
#[derive(Debug)]
struct ProcessOutput {
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    timed_out: bool,
}

impl ProcessOutput {
    fn success(&self) -> bool {
        self.status.map(|s| s.success()).unwrap_or(false)
    }

    fn stderr_tail(&self) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let lines: Vec<&str> = text.lines().collect();
        lines[lines.len().saturating_sub(8)..].join("\n")
    }
}

/// Run `cmd` to completion, killing it and everything it spawned once
/// `timeout` elapses.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<ProcessOutput> {
    // nvcc forks cudafe++, cicc and ptxas; a fresh process group lets a
    // timeout take them down together.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes on their own threads so a chatty child cannot block
    // on a full pipe while we poll for exit.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let deadline = Instant::now() + timeout;
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            timed_out = true;
            kill_process_group(&mut child);
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    // A descendant that left the group may still hold the pipes open; leave
    // the readers detached rather than wait on them.
    let collect = |h: Option<std::thread::JoinHandle<Vec<u8>>>| {
        if timed_out {
            return Vec::new();
        }
        h.and_then(|h| h.join().ok()).unwrap_or_default()
    };
    Ok(ProcessOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
        timed_out,
    })
}

#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // the child leads its own group, so its pid is the pgid
    if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        tracing::debug!("killpg({}) failed: {}", child.id(), e);
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}
