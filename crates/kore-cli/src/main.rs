use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kore_cutlass::catalog::{default_kernel_name, generate};
use kore_cutlass::feasibility::is_feasible;
use kore_cutlass::{
    Arch, DataType, GemmProfiler, GemmShape, NvccEngine, OpType, ProfileOptions, ProfilerConfig,
    SelectedKernel,
};

const BANNER: &str = r#"
 _  _____  ____  _____
| |/ / _ \|  _ \| ____|
| ' / | | | |_) |  _|
| . \ |_| |  _ <| |___
|_|\_\___/|_| \_\_____|"#;

#[derive(Parser)]
#[command(
    name = "kore",
    about = "Kore CUTLASS GEMM autotuner",
    long_about = "Enumerate CUTLASS tensor-op GEMM kernels, profile them with nvcc on the\nlocal GPU and emit the fastest one with a fused epilogue.",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show supported architectures, output types, op types and default kernels
    Info,
    /// List candidate kernels for an architecture and output type
    List {
        /// Compute capability (75, 80)
        #[arg(long)]
        sm: u32,
        /// Output dtype: float16, float32
        #[arg(long, default_value = "float16")]
        dtype: String,
        /// Only show kernels feasible for this M (requires --n and --k)
        #[arg(long, requires_all = ["n", "k"])]
        m: Option<usize>,
        #[arg(long, requires_all = ["m", "k"])]
        n: Option<usize>,
        #[arg(long, requires_all = ["m", "n"])]
        k: Option<usize>,
    },
    /// Print the pre-selected kernel (no profiling)
    Default {
        #[arg(long)]
        sm: u32,
        #[arg(long, default_value = "float16")]
        dtype: String,
        /// Op type, e.g. cutlass.dense_bias_relu
        #[arg(long, default_value = "cutlass.dense")]
        op: String,
        #[arg(long)]
        batched: bool,
        /// Also print the C++ operation definition
        #[arg(long)]
        emit: bool,
    },
    /// Profile every feasible kernel for a GEMM shape and print the fastest
    Profile {
        #[arg(long)]
        sm: u32,
        #[arg(long, default_value = "float16")]
        dtype: String,
        #[arg(long, default_value = "cutlass.dense")]
        op: String,
        #[arg(long)]
        m: usize,
        #[arg(long)]
        n: usize,
        #[arg(long)]
        k: usize,
        /// Stop at the first kernel that runs instead of measuring all
        #[arg(long)]
        early_exit: bool,
        /// Compile profilers in parallel
        #[arg(long)]
        parallel: bool,
        #[arg(long)]
        batched: bool,
        /// JSON profiler config (defaults come from CUTLASS_PATH, KORE_CUTLASS_BIN_DIR, NVCC)
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        emit: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info => {
            cmd_info();
            Ok(())
        }
        Commands::List { sm, dtype, m, n, k } => cmd_list(sm, &dtype, m.zip(n).zip(k).map(|((m, n), k)| (m, n, k))),
        Commands::Default { sm, dtype, op, batched, emit } => cmd_default(sm, &dtype, &op, batched, emit),
        Commands::Profile { sm, dtype, op, m, n, k, early_exit, parallel, batched, config, emit } => {
            let options = ProfileOptions {
                profile_all: !early_exit,
                parallel,
                batched,
            };
            cmd_profile(sm, &dtype, &op, (m, n, k), options, config, emit)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn cmd_info() {
    println!("{}", BANNER);
    println!("  v{}  -  CUTLASS GEMM autotuner\n", env!("CARGO_PKG_VERSION"));

    println!("Architectures");
    for arch in Arch::ALL {
        let counts: Vec<String> = [DataType::F16, DataType::F32]
            .iter()
            .map(|&dt| match generate(arch, dt) {
                Ok(ops) => format!("{} {}", ops.len(), dt),
                Err(_) => format!("- {}", dt),
            })
            .collect();
        println!("  {:<6} kernels: {}", arch, counts.join(", "));
    }

    println!("\nOutput dtypes");
    println!("  float16, float32");

    println!("\nOp types");
    for op in OpType::ALL {
        let (epilogue, no_beta) = op.epilogue();
        println!(
            "  {:<30} {}{}",
            op,
            epilogue.tag(),
            if no_beta { " (no beta scaling)" } else { "" }
        );
    }

    println!("\nDefault kernels");
    for arch in Arch::ALL {
        for dt in [DataType::F16, DataType::F32] {
            if let Some(name) = default_kernel_name(arch, dt) {
                println!("  {:<6} {:<8} {}", arch, dt, name);
            }
        }
    }
}

fn cmd_list(sm: u32, dtype: &str, shape: Option<(usize, usize, usize)>) -> kore_cutlass::Result<()> {
    let arch = Arch::try_from(sm)?;
    let dtype: DataType = dtype.parse()?;
    let shape = shape.map(|(m, n, k)| GemmShape::new(m, n, k)).transpose()?;

    let ops = generate(arch, dtype)?;
    let total = ops.len();
    let shown: Vec<_> = ops
        .into_iter()
        .filter(|c| shape.map_or(true, |s| is_feasible(c, s)))
        .collect();

    println!("{:<64} {:>6}", "Kernel", "Align");
    println!("{}", "-".repeat(71));
    for c in &shown {
        println!("{:<64} {:>6}", c.name, c.alignment);
    }
    match shape {
        Some(s) => println!("\n{} of {} kernels feasible for {}", shown.len(), total, s),
        None => println!("\n{} kernels", total),
    }
    Ok(())
}

fn cmd_default(sm: u32, dtype: &str, op: &str, batched: bool, emit: bool) -> kore_cutlass::Result<()> {
    let engine = NvccEngine::new(Arch::try_from(sm)?, ProfilerConfig::from_env())?;
    let profiler = GemmProfiler::new(sm, engine)?;
    let kernel = profiler.get_default(op.parse()?, dtype.parse()?, batched)?;

    println!("{}", kernel.name());
    if emit {
        println!("\n{}", kernel.opdef());
    }
    Ok(())
}

fn cmd_profile(
    sm: u32,
    dtype: &str,
    op: &str,
    (m, n, k): (usize, usize, usize),
    options: ProfileOptions,
    config: Option<PathBuf>,
    emit: bool,
) -> kore_cutlass::Result<()> {
    let op_type: OpType = op.parse()?;
    let dtype: DataType = dtype.parse()?;
    let config = match config {
        Some(path) => ProfilerConfig::from_file(&path)?,
        None => ProfilerConfig::from_env(),
    };

    let engine = Arc::new(NvccEngine::new(Arch::try_from(sm)?, config)?);
    let profiler = GemmProfiler::new(sm, Arc::clone(&engine))?;

    tracing::info!(
        "profiling {}x{}x{} on sm{} ({}, {})",
        m, n, k, sm, dtype, if options.profile_all { "exhaustive" } else { "early exit" }
    );
    let kernel = profiler.profile(op_type, m, n, k, dtype, options)?;
    print_selected(&kernel, emit);
    tracing::info!("binaries in {}", engine.config().binary_dir.display());
    Ok(())
}

fn print_selected(kernel: &SelectedKernel, emit: bool) {
    println!("Kernel:  {}", kernel.name());
    if let Some(runtime) = kernel.runtime {
        println!("Runtime: {}", runtime);
    }
    println!(
        "Tile:    {} (align {})",
        kernel.candidate.tile_description.procedural_name(),
        kernel.candidate.alignment
    );
    if emit {
        println!("\n{}", kernel.opdef());
    }
}
