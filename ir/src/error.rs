use snafu::Snafu;

use crate::axis::AxisId;
use crate::tensor::TensorId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Only leaf variables can be bound to values.
    #[snafu(display("cannot bind a value to composite expression {expr}"))]
    BindNonLeaf { expr: String },

    /// Split factors must be positive.
    #[snafu(display("invalid split factor {factor} for axis {axis}"))]
    InvalidSplitFactor { axis: AxisId, factor: i64 },

    /// Contiguity flags must cover the root (or rfactor) domain exactly.
    #[snafu(display("contiguity has {actual} entries but the root domain has {expected}"))]
    ContiguityLengthMismatch { expected: usize, actual: usize },

    /// Leaf position out of range for a scheduling operation.
    #[snafu(display("axis position {position} is out of range for a domain of {ndims} axes"))]
    AxisPositionOutOfRange { position: usize, ndims: usize },

    /// Reorder must be a permutation of the leaf positions.
    #[snafu(display("invalid reorder {permutation:?} for a domain of {ndims} axes"))]
    InvalidReorder { permutation: Vec<usize>, ndims: usize },

    /// Axis handle that does not belong to this graph.
    #[snafu(display("unknown axis {axis}"))]
    UnknownAxis { axis: AxisId },

    /// Tensor handle that does not belong to this fusion.
    #[snafu(display("unknown tensor {tensor}"))]
    UnknownTensor { tensor: TensorId },

    /// Operation parameters that do not fit its operands.
    #[snafu(display("invalid {op} definition: {reason}"))]
    InvalidTensorOp { op: &'static str, reason: String },
}
