//! CUTLASS library metadata: element types, layouts, tile shapes, and the
//! functor tags spliced into generated kernel source.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CutlassError;

/// Element types understood by the kernel templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 16-bit Brain Float
    BF16,
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 64-bit IEEE 754 double-precision float
    F64,
    /// 8-bit signed integer
    S8,
    /// 8-bit unsigned integer
    U8,
    /// 32-bit signed integer
    S32,
}

impl DataType {
    /// C++ type spliced into kernel templates.
    pub fn tag(&self) -> &'static str {
        match self {
            DataType::F16 => "cutlass::half_t",
            DataType::BF16 => "cutlass::bfloat16_t",
            DataType::F32 => "float",
            DataType::F64 => "double",
            DataType::S8 => "int8_t",
            DataType::U8 => "uint8_t",
            DataType::S32 => "int32_t",
        }
    }

    /// Name used inside procedural kernel names (`f16`, `s8`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::S8 => "s8",
            DataType::U8 => "u8",
            DataType::S32 => "s32",
        }
    }

    /// One-letter accumulator prefix of a kernel core name.
    pub fn short_name(&self) -> &'static str {
        match self {
            DataType::F16 => "h",
            DataType::BF16 => "bf16",
            DataType::F32 => "s",
            DataType::F64 => "d",
            DataType::S8 => "i8",
            DataType::U8 => "u8",
            DataType::S32 => "i",
        }
    }

    /// Caller-facing dtype string (`float16`, `float32`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::F16 => "float16",
            DataType::BF16 => "bfloat16",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
            DataType::S8 => "int8",
            DataType::U8 => "uint8",
            DataType::S32 => "int32",
        }
    }

    /// Size of one element in bits.
    pub fn bits(&self) -> u32 {
        match self {
            DataType::S8 | DataType::U8 => 8,
            DataType::F16 | DataType::BF16 => 16,
            DataType::F32 | DataType::S32 => 32,
            DataType::F64 => 64,
        }
    }
}

impl FromStr for DataType {
    type Err = CutlassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "float16" | "f16" => Ok(DataType::F16),
            "bfloat16" | "bf16" => Ok(DataType::BF16),
            "float32" | "f32" => Ok(DataType::F32),
            "float64" | "f64" => Ok(DataType::F64),
            "int8" | "s8" => Ok(DataType::S8),
            "uint8" | "u8" => Ok(DataType::U8),
            "int32" | "s32" => Ok(DataType::S32),
            other => Err(CutlassError::UnknownDType(other.to_string())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand element types: `(A, B, C, epilogue compute)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataTypeConfig {
    pub element_a: DataType,
    pub element_b: DataType,
    pub element_c: DataType,
    pub element_epilogue: DataType,
}

impl DataTypeConfig {
    pub fn new(a: DataType, b: DataType, c: DataType, epilogue: DataType) -> Self {
        Self {
            element_a: a,
            element_b: b,
            element_c: c,
            element_epilogue: epilogue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayoutType {
    RowMajor,
    ColumnMajor,
}

impl LayoutType {
    pub fn tag(&self) -> &'static str {
        match self {
            LayoutType::RowMajor => "cutlass::layout::RowMajor",
            LayoutType::ColumnMajor => "cutlass::layout::ColumnMajor",
        }
    }

    /// BLAS-style transpose letter: row-major is `t`, column-major is `n`.
    pub fn short_name(&self) -> &'static str {
        match self {
            LayoutType::RowMajor => "t",
            LayoutType::ColumnMajor => "n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpcodeClass {
    TensorOp,
    Simt,
}

impl OpcodeClass {
    pub fn tag(&self) -> &'static str {
        match self {
            OpcodeClass::TensorOp => "cutlass::arch::OpClassTensorOp",
            OpcodeClass::Simt => "cutlass::arch::OpClassSimt",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OpcodeClass::TensorOp => "tensorop",
            OpcodeClass::Simt => "simt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathOperation {
    MultiplyAdd,
    MultiplyAddSaturate,
}

impl MathOperation {
    pub fn tag(&self) -> &'static str {
        match self {
            MathOperation::MultiplyAdd => "cutlass::arch::OpMultiplyAdd",
            MathOperation::MultiplyAddSaturate => "cutlass::arch::OpMultiplyAddSaturate",
        }
    }
}

/// A single MMA instruction shape and its operand types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MathInstruction {
    pub instruction_shape: [u32; 3],
    pub element_a: DataType,
    pub element_b: DataType,
    pub element_accumulator: DataType,
    pub opcode_class: OpcodeClass,
    pub math_operation: MathOperation,
}

impl MathInstruction {
    pub fn tensor_op(shape: [u32; 3], a: DataType, b: DataType, acc: DataType) -> Self {
        Self {
            instruction_shape: shape,
            element_a: a,
            element_b: b,
            element_accumulator: acc,
            opcode_class: OpcodeClass::TensorOp,
            math_operation: MathOperation::MultiplyAdd,
        }
    }
}

/// Threadblock tiling of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileDescription {
    pub threadblock_shape: [u32; 3],
    pub stages: u32,
    pub warp_count: [u32; 3],
    pub math_instruction: MathInstruction,
    pub minimum_compute_capability: u32,
    pub maximum_compute_capability: u32,
}

impl TileDescription {
    pub fn new(
        threadblock_shape: [u32; 3],
        stages: u32,
        warp_count: [u32; 3],
        math_instruction: MathInstruction,
        minimum_compute_capability: u32,
        maximum_compute_capability: u32,
    ) -> Self {
        Self {
            threadblock_shape,
            stages,
            warp_count,
            math_instruction,
            minimum_compute_capability,
            maximum_compute_capability,
        }
    }

    /// `MxN_KxStages`, e.g. `128x64_32x2`.
    pub fn procedural_name(&self) -> String {
        let [m, n, k] = self.threadblock_shape;
        format!("{}x{}_{}x{}", m, n, k, self.stages)
    }

    /// Per-warp tile: threadblock shape split across the warp grid.
    pub fn warp_shape(&self) -> [u32; 3] {
        let tb = self.threadblock_shape;
        let wc = self.warp_count;
        [tb[0] / wc[0], tb[1] / wc[1], tb[2] / wc[2]]
    }
}

/// Element type, layout and vector alignment of one GEMM operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDescription {
    pub element: DataType,
    pub layout: LayoutType,
    pub alignment: u32,
}

impl TensorDescription {
    pub fn new(element: DataType, layout: LayoutType, alignment: u32) -> Self {
        Self { element, layout, alignment }
    }
}

/// Threadblock rasterization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwizzlingFunctor {
    Identity1,
    Identity2,
    Identity4,
    Identity8,
    Batched,
}

impl SwizzlingFunctor {
    pub fn tag(&self) -> &'static str {
        match self {
            SwizzlingFunctor::Identity1 => "cutlass::gemm::threadblock::GemmIdentityThreadblockSwizzle<1>",
            SwizzlingFunctor::Identity2 => "cutlass::gemm::threadblock::GemmIdentityThreadblockSwizzle<2>",
            SwizzlingFunctor::Identity4 => "cutlass::gemm::threadblock::GemmIdentityThreadblockSwizzle<4>",
            SwizzlingFunctor::Identity8 => "cutlass::gemm::threadblock::GemmIdentityThreadblockSwizzle<8>",
            SwizzlingFunctor::Batched => "cutlass::gemm::threadblock::GemmBatchedIdentityThreadblockSwizzle",
        }
    }
}

impl Default for SwizzlingFunctor {
    fn default() -> Self {
        SwizzlingFunctor::Identity8
    }
}

/// Output stage fused after the main loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EpilogueFunctor {
    LinearCombination,
    LinearCombinationRelu,
    LinearCombinationBias,
    LinearCombinationGelu,
    LinearCombinationSigmoid,
    LinearCombinationSilu,
    LinearCombinationHardSwish,
}

impl EpilogueFunctor {
    pub fn tag(&self) -> &'static str {
        match self {
            EpilogueFunctor::LinearCombination => "cutlass::epilogue::thread::LinearCombination",
            EpilogueFunctor::LinearCombinationRelu => "cutlass::epilogue::thread::LinearCombinationRelu",
            // bias is folded in through C with beta scaling disabled
            EpilogueFunctor::LinearCombinationBias => "cutlass::epilogue::thread::LinearCombination",
            EpilogueFunctor::LinearCombinationGelu => "cutlass::epilogue::thread::LinearCombinationGELU",
            EpilogueFunctor::LinearCombinationSigmoid => "cutlass::epilogue::thread::LinearCombinationSigmoid",
            EpilogueFunctor::LinearCombinationSilu => "cutlass::epilogue::thread::LinearCombinationSilu",
            EpilogueFunctor::LinearCombinationHardSwish => "cutlass::epilogue::thread::LinearCombinationHardSwish",
        }
    }
}

/// Caller-facing epilogue kinds, named after the operator patterns that
/// request them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Dense,
    DenseBias,
    DenseBiasRelu,
    DenseBiasGeluFp16,
    DenseBiasGeluFp32,
    DenseBiasSigmoid,
    DenseBiasSilu,
    DenseBiasHardSwish,
    BatchMatmul,
}

impl OpType {
    pub const ALL: [OpType; 9] = [
        OpType::Dense,
        OpType::DenseBias,
        OpType::DenseBiasRelu,
        OpType::DenseBiasGeluFp16,
        OpType::DenseBiasGeluFp32,
        OpType::DenseBiasSigmoid,
        OpType::DenseBiasSilu,
        OpType::DenseBiasHardSwish,
        OpType::BatchMatmul,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Dense => "cutlass.dense",
            OpType::DenseBias => "cutlass.dense_bias",
            OpType::DenseBiasRelu => "cutlass.dense_bias_relu",
            OpType::DenseBiasGeluFp16 => "cutlass.dense_bias_gelu_fp16",
            OpType::DenseBiasGeluFp32 => "cutlass.dense_bias_gelu_fp32",
            OpType::DenseBiasSigmoid => "cutlass.dense_bias_sigmoid",
            OpType::DenseBiasSilu => "cutlass.dense_bias_silu",
            OpType::DenseBiasHardSwish => "cutlass.dense_bias_hardswish",
            OpType::BatchMatmul => "cutlass.batch_matmul",
        }
    }

    /// Epilogue table: the functor to emit and whether beta scaling of the
    /// source operand is skipped.
    pub fn epilogue(&self) -> (EpilogueFunctor, bool) {
        match self {
            OpType::Dense | OpType::BatchMatmul => (EpilogueFunctor::LinearCombination, false),
            OpType::DenseBias => (EpilogueFunctor::LinearCombinationBias, true),
            OpType::DenseBiasRelu => (EpilogueFunctor::LinearCombinationRelu, true),
            OpType::DenseBiasGeluFp16 | OpType::DenseBiasGeluFp32 => {
                (EpilogueFunctor::LinearCombinationGelu, false)
            }
            OpType::DenseBiasSigmoid => (EpilogueFunctor::LinearCombinationSigmoid, true),
            OpType::DenseBiasSilu => (EpilogueFunctor::LinearCombinationSilu, true),
            OpType::DenseBiasHardSwish => (EpilogueFunctor::LinearCombinationHardSwish, true),
        }
    }
}

impl FromStr for OpType {
    type Err = CutlassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpType::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CutlassError::UnknownOpType(s.to_string()))
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
