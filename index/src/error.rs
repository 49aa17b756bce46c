use snafu::Snafu;

use tessera_ir::{AxisId, TensorId};

pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Internal-consistency failures raised while building indices and
/// predicates. Each one means an earlier pass produced an invalid schedule;
/// lowering is expected to stop on them.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum IndexError {
    /// A root axis that must be indexed has no index after propagation.
    #[snafu(display("no index for root axis {axis} (position {position}) of {tensor}"))]
    MissingRootIndex { tensor: TensorId, axis: AxisId, position: usize },

    /// Producer and consumer partial-split start offsets differ by a
    /// non-constant amount.
    #[snafu(display("partial split offsets of {producer} and its consumer differ by a non-constant amount at {axis}"))]
    NonConstantPartialSplitOffset { producer: TensorId, axis: AxisId },

    #[snafu(display("contiguity has {actual} entries but the root domain has {expected}"))]
    ContiguityLengthMismatch { expected: usize, actual: usize },

    /// Assembled index count differs from `root + double_buffer`.
    #[snafu(display("{tensor} produced {actual} index terms, expected {expected}"))]
    IndexCountMismatch { tensor: TensorId, expected: usize, actual: usize },

    #[snafu(display("invalid swizzle on {tensor}: {reason}"))]
    InvalidSwizzle { tensor: TensorId, reason: &'static str },

    /// A lowering context is already alive on this thread.
    #[snafu(display("nested lowering contexts are not supported"))]
    NestedLowering,

    /// A producer maybe-rfactor axis has no consumer root counterpart.
    #[snafu(display("producer axis {axis} of {producer} does not map to a consumer root axis"))]
    UnmappedProducerAxis { producer: TensorId, axis: AxisId },

    /// The window axis of a gather has no reference index.
    #[snafu(display("gather window axis {axis} of {consumer} has no reference index"))]
    MissingWindowIndex { consumer: TensorId, axis: AxisId },

    /// A gather has no window or padding entry for one of its axes.
    #[snafu(display("gather defining {consumer} has no window for root axis {position}"))]
    InvalidGather { consumer: TensorId, position: usize },

    /// A double-buffered tensor has no axis eligible for double buffering.
    #[snafu(display("double-buffered {tensor} has no valid double-buffer axis"))]
    MissingDoubleBufferAxis { tensor: TensorId },

    /// A compute-at axis of a non-global tensor has no loop in the nest.
    #[snafu(display("no loop for compute-at axis {axis} of {tensor}"))]
    MissingAllocLoop { tensor: TensorId, axis: AxisId },

    /// Unswitch predicates never cover the padded region.
    #[snafu(display("unswitch predicates cannot be padding predicates"))]
    UnswitchPadding,

    /// More loops than reference axes.
    #[snafu(display("{loops} loops cannot index a reference of {ndims} axes"))]
    InvalidReference { loops: usize, ndims: usize },

    #[snafu(display("IR error: {source}"))]
    Ir { source: tessera_ir::Error },
}

impl From<tessera_ir::Error> for IndexError {
    fn from(source: tessera_ir::Error) -> Self {
        Self::Ir { source }
    }
}
