//! Kernel catalog: every candidate GEMM kernel for an architecture and
//! output type, each paired with its profiler source.
//!
//! Candidates are always built with the plain linear-combination epilogue.
//! The epilogue a caller actually wants is substituted only for the final
//! winner (see [`crate::instantiate`]).

use std::fmt;

use crate::error::CutlassError;
use crate::Result;
use crate::gemm::{emit_instance, emit_profiler, GemmOperation};
use crate::library::{
    DataType, DataTypeConfig, EpilogueFunctor, LayoutType, MathInstruction, SwizzlingFunctor,
    TensorDescription, TileDescription,
};

/// Compute capabilities with a kernel generator and a default-kernel entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Turing
    Sm75,
    /// Ampere
    Sm80,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::Sm75, Arch::Sm80];

    pub fn compute_capability(&self) -> u32 {
        match self {
            Arch::Sm75 => 75,
            Arch::Sm80 => 80,
        }
    }
}

impl TryFrom<u32> for Arch {
    type Error = CutlassError;

    fn try_from(sm: u32) -> std::result::Result<Self, Self::Error> {
        match sm {
            75 => Ok(Arch::Sm75),
            80 => Ok(Arch::Sm80),
            other => Err(CutlassError::UnsupportedArch(other)),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm{}", self.compute_capability())
    }
}

/// One enumerated kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelCandidate {
    /// Canonical procedural name, unique within an arch + dtype family.
    pub name: String,
    pub tile_description: TileDescription,
    /// Vector alignment shared by A, B and C, in elements.
    pub alignment: u32,
    pub swizzling_functor: SwizzlingFunctor,
    pub data_type: DataTypeConfig,
    /// Standalone profiler program for this kernel.
    pub source: String,
}

/// Build one candidate per `(tile, alignment)` pair, tiles outermost.
pub fn enumerate_gemm_operators(
    tile_descriptions: &[TileDescription],
    data_type: DataTypeConfig,
    alignment_constraints: &[u32],
    swizzling_functor: SwizzlingFunctor,
) -> Vec<KernelCandidate> {
    let mut out = Vec::with_capacity(tile_descriptions.len() * alignment_constraints.len());

    for tile in tile_descriptions {
        for &alignment in alignment_constraints {
            let op = GemmOperation::new(
                tile.minimum_compute_capability,
                *tile,
                TensorDescription::new(data_type.element_a, LayoutType::RowMajor, alignment),
                TensorDescription::new(data_type.element_b, LayoutType::ColumnMajor, alignment),
                TensorDescription::new(data_type.element_c, LayoutType::RowMajor, alignment),
                data_type.element_epilogue,
                EpilogueFunctor::LinearCombination,
                swizzling_functor,
            );
            let source = emit_profiler(&op, &emit_instance(&op, false, false));

            out.push(KernelCandidate {
                name: op.procedural_name(),
                tile_description: *tile,
                alignment,
                swizzling_functor,
                data_type,
                source,
            });
        }
    }

    out
}

const MAX_CC: u32 = 1024;

fn check_out_dtype(sm: u32, out_dtype: DataType) -> Result<()> {
    match out_dtype {
        DataType::F16 | DataType::F32 => Ok(()),
        other => Err(CutlassError::UnsupportedDType {
            sm,
            dtype: other.to_string(),
        }),
    }
}

/// Operand types for a math instruction: C and the epilogue run in the
/// accumulator type.
fn data_type_for(inst: &MathInstruction) -> DataTypeConfig {
    DataTypeConfig::new(
        inst.element_a,
        inst.element_b,
        inst.element_accumulator,
        inst.element_accumulator,
    )
}

/// Turing `mma.m16n8k8` kernels.
pub fn generate_sm75_tensor_op_1688(out_dtype: DataType) -> Result<Vec<KernelCandidate>> {
    check_out_dtype(75, out_dtype)?;

    let inst = MathInstruction::tensor_op([16, 8, 8], DataType::F16, DataType::F16, out_dtype);
    let tiles = [
        TileDescription::new([256, 128, 32], 2, [4, 2, 1], inst, 75, MAX_CC),
        TileDescription::new([128, 256, 32], 2, [2, 4, 1], inst, 75, MAX_CC),
        TileDescription::new([128, 128, 32], 2, [2, 2, 1], inst, 75, MAX_CC),
        TileDescription::new([64, 128, 32], 2, [2, 2, 1], inst, 75, MAX_CC),
        TileDescription::new([128, 64, 32], 2, [2, 2, 1], inst, 75, MAX_CC),
        TileDescription::new([64, 64, 32], 2, [2, 2, 1], inst, 75, MAX_CC),
        TileDescription::new([64, 128, 64], 2, [1, 2, 2], inst, 75, MAX_CC),
    ];

    Ok(enumerate_gemm_operators(
        &tiles,
        data_type_for(&inst),
        &[8, 4, 2, 1],
        SwizzlingFunctor::Identity8,
    ))
}

/// Ampere `mma.m16n8k16` kernels, preceded by the Turing set (the only
/// source of align1 kernels on sm80).
pub fn generate_sm80_tensor_op_16816(out_dtype: DataType) -> Result<Vec<KernelCandidate>> {
    check_out_dtype(80, out_dtype)?;

    let inst = MathInstruction::tensor_op([16, 8, 16], DataType::F16, DataType::F16, out_dtype);
    let mut tiles = Vec::new();
    for k in [32, 64] {
        let deep = k == 64;
        tiles.extend([
            TileDescription::new([256, 128, k], 3, [4, 2, 1], inst, 80, MAX_CC),
            TileDescription::new([128, 256, k], 3, [2, 4, 1], inst, 80, MAX_CC),
            TileDescription::new([256, 64, k], 4, [4, 1, 1], inst, 80, MAX_CC),
            TileDescription::new([64, 256, k], 4, [1, 4, 1], inst, 80, MAX_CC),
            TileDescription::new([128, 128, k], if deep { 4 } else { 3 }, [2, 2, 1], inst, 80, MAX_CC),
        ]);
        if !deep {
            tiles.extend([
                TileDescription::new([128, 128, k], 4, [2, 2, 1], inst, 80, MAX_CC),
                TileDescription::new([128, 128, k], 5, [2, 2, 1], inst, 80, MAX_CC),
            ]);
        }
        tiles.extend([
            TileDescription::new([128, 64, k], if deep { 3 } else { 6 }, [2, 2, 1], inst, 80, MAX_CC),
            TileDescription::new([64, 128, k], if deep { 3 } else { 6 }, [2, 2, 1], inst, 80, MAX_CC),
            TileDescription::new([64, 64, k], if deep { 5 } else { 10 }, [2, 2, 1], inst, 80, MAX_CC),
        ]);
    }

    let mut ops = generate_sm75_tensor_op_1688(out_dtype)?;
    ops.extend(enumerate_gemm_operators(
        &tiles,
        data_type_for(&inst),
        &[8, 4, 2],
        SwizzlingFunctor::Identity8,
    ));
    Ok(ops)
}

/// Full candidate list for `arch` and `out_dtype`, in enumeration order.
pub fn generate(arch: Arch, out_dtype: DataType) -> Result<Vec<KernelCandidate>> {
    match arch {
        Arch::Sm75 => generate_sm75_tensor_op_1688(out_dtype),
        Arch::Sm80 => generate_sm80_tensor_op_16816(out_dtype),
    }
}

/// Pre-selected kernel used when profiling is skipped.
pub fn default_kernel_name(arch: Arch, out_dtype: DataType) -> Option<&'static str> {
    // align1 kernels only exist in the Turing set, so sm80 reuses them
    match (arch, out_dtype) {
        (Arch::Sm75 | Arch::Sm80, DataType::F16) => Some("cutlass_tensorop_h1688gemm_128x64_32x2_tn_align1"),
        (Arch::Sm75 | Arch::Sm80, DataType::F32) => Some("cutlass_tensorop_s1688gemm_f16_64x64_32x2_tn_align1"),
        _ => None,
    }
}

/// Where a profiler gets its candidates and pre-selected defaults from.
pub trait KernelCatalog: Send + Sync {
    /// Candidates in enumeration order.
    fn generate(&self, arch: Arch, out_dtype: DataType) -> Result<Vec<KernelCandidate>>;

    fn default_kernel_name(&self, arch: Arch, out_dtype: DataType) -> Option<&str>;
}

/// The built-in sm75/sm80 tensor-op tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CutlassCatalog;

impl KernelCatalog for CutlassCatalog {
    fn generate(&self, arch: Arch, out_dtype: DataType) -> Result<Vec<KernelCandidate>> {
        generate(arch, out_dtype)
    }

    fn default_kernel_name(&self, arch: Arch, out_dtype: DataType) -> Option<&str> {
        default_kernel_name(arch, out_dtype)
    }
}

/// The single candidate named `name`, or how many matched when that is not
/// exactly one.
pub fn find_unique(candidates: Vec<KernelCandidate>, name: &str) -> std::result::Result<KernelCandidate, usize> {
    let mut matches: Vec<KernelCandidate> = candidates.into_iter().filter(|c| c.name == name).collect();
    match matches.len() {
        1 => Ok(matches.remove(0)),
        n => Err(n),
    }
}
