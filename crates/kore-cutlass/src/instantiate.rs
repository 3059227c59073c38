//! Re-materialize a chosen configuration with the epilogue the caller asked
//! for.

use crate::catalog::KernelCandidate;
use crate::gemm::{emit_instance, GemmOperation};
use crate::library::{
    DataTypeConfig, LayoutType, OpType, SwizzlingFunctor, TensorDescription, TileDescription,
};

/// Final kernel handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelInstance {
    /// Canonical deployment name.
    pub name: String,
    /// `using Operation_<name> = ...` declaration.
    pub opdef: String,
}

/// Instantiate a kernel from its configuration together with the epilogue
/// of `op_type`. `batched` forces the batched swizzle.
pub fn create_gemm_operator_with_epilogue(
    op_type: OpType,
    tile_description: &TileDescription,
    data_type: DataTypeConfig,
    alignment: u32,
    swizzling_functor: SwizzlingFunctor,
    batched: bool,
) -> KernelInstance {
    let swizzling_functor = if batched {
        SwizzlingFunctor::Batched
    } else {
        swizzling_functor
    };
    let (epilogue, no_beta_scaling) = op_type.epilogue();

    let op = GemmOperation::new(
        tile_description.minimum_compute_capability,
        *tile_description,
        TensorDescription::new(data_type.element_a, LayoutType::RowMajor, alignment),
        TensorDescription::new(data_type.element_b, LayoutType::ColumnMajor, alignment),
        TensorDescription::new(data_type.element_c, LayoutType::RowMajor, alignment),
        data_type.element_epilogue,
        epilogue,
        swizzling_functor,
    );

    KernelInstance {
        name: op.procedural_name(),
        opdef: emit_instance(&op, no_beta_scaling, batched),
    }
}

/// [`create_gemm_operator_with_epilogue`] for an enumerated candidate.
pub fn instantiate_candidate(candidate: &KernelCandidate, op_type: OpType, batched: bool) -> KernelInstance {
    create_gemm_operator_with_epilogue(
        op_type,
        &candidate.tile_description,
        candidate.data_type,
        candidate.alignment,
        candidate.swizzling_functor,
        batched,
    )
}
