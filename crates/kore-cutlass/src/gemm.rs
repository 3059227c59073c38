//! GEMM operation description and C++ source emission.
//!
//! A [`GemmOperation`] fully determines one CUTLASS device-level GEMM
//! instantiation. Emission is a pure function of the operation, so the same
//! configuration always produces byte-identical source.

use crate::library::{
    DataType, EpilogueFunctor, LayoutType, OpcodeClass, SwizzlingFunctor, TensorDescription,
    TileDescription,
};

/// Warmup launches before timing starts in a profiler binary.
pub const PROFILER_WARMUP_ITERS: u32 = 5;
/// Timed launches averaged by a profiler binary.
pub const PROFILER_TIMED_ITERS: u32 = 100;

/// One CUTLASS device GEMM instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GemmOperation {
    pub arch: u32,
    pub tile_description: TileDescription,
    pub a: TensorDescription,
    pub b: TensorDescription,
    pub c: TensorDescription,
    pub element_epilogue: DataType,
    pub epilogue_functor: EpilogueFunctor,
    pub swizzling_functor: SwizzlingFunctor,
}

impl GemmOperation {
    pub fn new(
        arch: u32,
        tile_description: TileDescription,
        a: TensorDescription,
        b: TensorDescription,
        c: TensorDescription,
        element_epilogue: DataType,
        epilogue_functor: EpilogueFunctor,
        swizzling_functor: SwizzlingFunctor,
    ) -> Self {
        Self {
            arch,
            tile_description,
            a,
            b,
            c,
            element_epilogue,
            epilogue_functor,
            swizzling_functor,
        }
    }

    fn accumulator(&self) -> DataType {
        self.tile_description.math_instruction.element_accumulator
    }

    /// `{acc}{inst shape}{intermediate}gemm`, e.g. `s1688gemm`.
    pub fn core_name(&self) -> String {
        let inst = self.tile_description.math_instruction;
        let [im, in_, ik] = inst.instruction_shape;
        let intermediate = if inst.opcode_class == OpcodeClass::TensorOp
            && inst.element_a != self.a.element
            && inst.element_a != self.accumulator()
        {
            inst.element_a.name()
        } else {
            ""
        };
        format!(
            "{}{}{}{}{}gemm",
            self.accumulator().short_name(),
            im,
            in_,
            ik,
            intermediate
        )
    }

    /// Core name decorated with the operand types that differ from the
    /// accumulator.
    pub fn extended_name(&self) -> String {
        let acc = self.accumulator();
        let core = self.core_name();
        match (self.c.element != acc, self.a.element != acc) {
            (true, true) => format!("{}_{}_{}", self.c.element.name(), core, self.a.element.name()),
            (false, true) => format!("{}_{}", core, self.a.element.name()),
            _ => core,
        }
    }

    /// Operand layouts as BLAS transpose letters, e.g. `tn`.
    pub fn layout_name(&self) -> String {
        format!("{}{}", self.a.layout.short_name(), self.b.layout.short_name())
    }

    /// Canonical kernel name. The epilogue and swizzle do not take part in
    /// the name, so re-instantiating with another epilogue keeps it stable.
    pub fn procedural_name(&self) -> String {
        format!(
            "cutlass_{}_{}_{}_{}_align{}",
            self.tile_description.math_instruction.opcode_class.name(),
            self.extended_name(),
            self.tile_description.procedural_name(),
            self.layout_name(),
            self.a.alignment
        )
    }

    /// Leading dimension symbols `(lda, ldb, ldc)` in terms of `M`, `N`, `K`.
    pub fn leading_dim(&self) -> (&'static str, &'static str, &'static str) {
        let lda = match self.a.layout {
            LayoutType::RowMajor => "K",
            LayoutType::ColumnMajor => "M",
        };
        let ldb = match self.b.layout {
            LayoutType::RowMajor => "N",
            LayoutType::ColumnMajor => "K",
        };
        let ldc = match self.c.layout {
            LayoutType::RowMajor => "N",
            LayoutType::ColumnMajor => "M",
        };
        (lda, ldb, ldc)
    }

    /// Elements of C written per epilogue vector access.
    pub fn epilogue_vector_length(&self) -> u32 {
        let bits = self.c.element.bits();
        (self.c.alignment * bits).min(128) / bits
    }
}

/// Replace every `${key}` in `template` with its value.
fn substitute(template: &str, values: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("${{{}}}", key), value);
    }
    out
}

const GEMM_TEMPLATE: &str = r#"
// Gemm operator ${operation_name}
using Operation_${operation_name} = cutlass::gemm::device::${kernel_name}<
  ${element_a}, ${layout_a},
  ${element_b}, ${layout_b},
  ${element_c}, ${layout_c},
  ${element_accumulator},
  ${opcode_class},
  ${arch},
  cutlass::gemm::GemmShape<${threadblock_shape_m}, ${threadblock_shape_n}, ${threadblock_shape_k}>,
  cutlass::gemm::GemmShape<${warp_shape_m}, ${warp_shape_n}, ${warp_shape_k}>,
  cutlass::gemm::GemmShape<${instruction_shape_m}, ${instruction_shape_n}, ${instruction_shape_k}>,
  ${epilogue_functor}<
    ${element_c},
    ${epilogue_vector_length},
    ${element_accumulator},
    ${element_epilogue}${scale_type}
  >,
  ${swizzling_functor},
  ${stages},
  ${align_a},
  ${align_b},${split_k_serial}
  ${math_operation}
>;
"#;

/// Emit the `using Operation_<name> = ...` declaration for `op`.
///
/// `no_beta_scaling` drops the `beta * C` term (bias epilogues feed the bias
/// through C); `batched` selects the batched device kernel.
pub fn emit_instance(op: &GemmOperation, no_beta_scaling: bool, batched: bool) -> String {
    let tile = &op.tile_description;
    let inst = tile.math_instruction;
    let warp = tile.warp_shape();
    let scale_type = if no_beta_scaling {
        ",\n    cutlass::epilogue::thread::ScaleType::NoBetaScaling".to_string()
    } else {
        String::new()
    };
    let (kernel_name, split_k_serial) = if batched {
        ("GemmBatched", "")
    } else {
        ("Gemm", "\n  false,")
    };

    substitute(
        GEMM_TEMPLATE,
        &[
            ("operation_name", op.procedural_name()),
            ("kernel_name", kernel_name.to_string()),
            ("element_a", op.a.element.tag().to_string()),
            ("layout_a", op.a.layout.tag().to_string()),
            ("element_b", op.b.element.tag().to_string()),
            ("layout_b", op.b.layout.tag().to_string()),
            ("element_c", op.c.element.tag().to_string()),
            ("layout_c", op.c.layout.tag().to_string()),
            ("element_accumulator", inst.element_accumulator.tag().to_string()),
            ("opcode_class", inst.opcode_class.tag().to_string()),
            ("arch", format!("cutlass::arch::Sm{}", op.arch)),
            ("threadblock_shape_m", tile.threadblock_shape[0].to_string()),
            ("threadblock_shape_n", tile.threadblock_shape[1].to_string()),
            ("threadblock_shape_k", tile.threadblock_shape[2].to_string()),
            ("warp_shape_m", warp[0].to_string()),
            ("warp_shape_n", warp[1].to_string()),
            ("warp_shape_k", warp[2].to_string()),
            ("instruction_shape_m", inst.instruction_shape[0].to_string()),
            ("instruction_shape_n", inst.instruction_shape[1].to_string()),
            ("instruction_shape_k", inst.instruction_shape[2].to_string()),
            ("epilogue_functor", op.epilogue_functor.tag().to_string()),
            ("epilogue_vector_length", op.epilogue_vector_length().to_string()),
            ("element_epilogue", op.element_epilogue.tag().to_string()),
            ("scale_type", scale_type),
            ("swizzling_functor", op.swizzling_functor.tag().to_string()),
            ("stages", tile.stages.to_string()),
            ("align_a", op.a.alignment.to_string()),
            ("align_b", op.b.alignment.to_string()),
            ("split_k_serial", split_k_serial.to_string()),
            ("math_operation", inst.math_operation.tag().to_string()),
        ],
    )
}

const PROFILER_TEMPLATE: &str = r#"#include <cstdlib>
#include <iostream>

#include <cuda_runtime.h>

#include "cutlass/cutlass.h"
#include "cutlass/gemm/device/gemm.h"
#include "cutlass/util/device_memory.h"

#define CUTLASS_CHECK(status)                                              \
  {                                                                        \
    cutlass::Status error = status;                                        \
    if (error != cutlass::Status::kSuccess) {                              \
      std::cerr << "cutlass error: " << cutlassGetStatusString(error)      \
                << " at line " << __LINE__ << std::endl;                   \
      std::exit(EXIT_FAILURE);                                             \
    }                                                                      \
  }

#define CUDA_CHECK(status)                                                 \
  {                                                                        \
    cudaError_t error = status;                                            \
    if (error != cudaSuccess) {                                            \
      std::cerr << "cuda error: " << cudaGetErrorString(error)             \
                << " at line " << __LINE__ << std::endl;                   \
      std::exit(EXIT_FAILURE);                                             \
    }                                                                      \
  }

${operation_def}

int profile(int M, int N, int K) {
  using Gemm = Operation_${operation_name};
  using ElementA = ${element_a};
  using ElementB = ${element_b};
  using ElementC = ${element_c};
  using ElementCompute = typename Gemm::EpilogueOutputOp::ElementCompute;

  cutlass::device_memory::allocation<ElementA> A(size_t(M) * K);
  cutlass::device_memory::allocation<ElementB> B(size_t(K) * N);
  cutlass::device_memory::allocation<ElementC> C(size_t(M) * N);

  ElementCompute alpha = ElementCompute(1);
  ElementCompute beta = ElementCompute(0);

  typename Gemm::Arguments arguments{
    {M, N, K},
    {A.get(), ${lda}},
    {B.get(), ${ldb}},
    {C.get(), ${ldc}},
    {C.get(), ${ldc}},
    {alpha, beta},
    1
  };

  size_t workspace_size = Gemm::get_workspace_size(arguments);
  cutlass::device_memory::allocation<uint8_t> workspace(workspace_size);

  Gemm gemm_op;
  CUTLASS_CHECK(gemm_op.can_implement(arguments));
  CUTLASS_CHECK(gemm_op.initialize(arguments, workspace.get()));

  for (int i = 0; i < ${warmup_iters}; ++i) {
    CUTLASS_CHECK(gemm_op());
  }

  cudaEvent_t events[2];
  for (auto &event : events) {
    CUDA_CHECK(cudaEventCreate(&event));
  }
  CUDA_CHECK(cudaEventRecord(events[0]));
  for (int i = 0; i < ${timed_iters}; ++i) {
    CUTLASS_CHECK(gemm_op());
  }
  CUDA_CHECK(cudaEventRecord(events[1]));
  CUDA_CHECK(cudaEventSynchronize(events[1]));

  float elapsed_ms = 0;
  CUDA_CHECK(cudaEventElapsedTime(&elapsed_ms, events[0], events[1]));
  for (auto event : events) {
    cudaEventDestroy(event);
  }

  std::cout << elapsed_ms / ${timed_iters} << std::endl;
  return 0;
}

int main(int argc, char *argv[]) {
  if (argc != 4) {
    std::cerr << "usage: " << argv[0] << " M N K" << std::endl;
    return EXIT_FAILURE;
  }
  return profile(std::atoi(argv[1]), std::atoi(argv[2]), std::atoi(argv[3]));
}
"#;

/// Wrap a kernel declaration into a standalone benchmark program.
///
/// The program takes `M N K` on the command line and prints the mean
/// runtime in milliseconds on stdout.
pub fn emit_profiler(op: &GemmOperation, operation_def: &str) -> String {
    let (lda, ldb, ldc) = op.leading_dim();
    substitute(
        PROFILER_TEMPLATE,
        &[
            ("operation_def", operation_def.to_string()),
            ("operation_name", op.procedural_name()),
            ("element_a", op.a.element.tag().to_string()),
            ("element_b", op.b.element.tag().to_string()),
            ("element_c", op.c.element.tag().to_string()),
            ("lda", lda.to_string()),
            ("ldb", ldb.to_string()),
            ("ldc", ldc.to_string()),
            ("warmup_iters", PROFILER_WARMUP_ITERS.to_string()),
            ("timed_iters", PROFILER_TIMED_ITERS.to_string()),
        ],
    )
}
