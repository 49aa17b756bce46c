//! Tensors and the operations defining them.

use smallvec::SmallVec;
use snafu::ensure;

use crate::axis::AxisId;
use crate::domain::TensorDomain;
use crate::error::{InvalidTensorOpSnafu, Result};
use crate::types::MemoryType;

/// Stable handle of a tensor inside a [`Fusion`](crate::Fusion).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("T{_0}")]
pub struct TensorId(pub(crate) u32);

impl TensorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Operation producing a tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TensorOp {
    /// Elementwise op; roots map one to one.
    Pointwise,
    /// Reduction; the consumer keeps the reduced axes as reduction axes.
    Reduction,
    /// Inserts new broadcast axes where `is_new` is set.
    Broadcast { is_new: Vec<bool> },
    /// `out[i] = in[i - offsets[i]]`, padding with `pad_width` elements.
    Shift { offsets: Vec<i64>, pad_width: Vec<i64> },
    /// Sliding window: the output root domain is the input domain followed
    /// by one window axis per input axis.
    Gather { window_shape: Vec<i64>, pad_width: Vec<[i64; 2]> },
}

impl TensorOp {
    /// Shift by `offsets`, padding `pad_width` elements per axis.
    pub fn shift(offsets: Vec<i64>, pad_width: Vec<i64>) -> Result<Self> {
        ensure!(
            offsets.len() == pad_width.len(),
            InvalidTensorOpSnafu {
                op: "shift",
                reason: format!("{} offsets but {} pad widths", offsets.len(), pad_width.len()),
            }
        );
        ensure!(
            pad_width.iter().all(|w| *w >= 0),
            InvalidTensorOpSnafu { op: "shift", reason: format!("negative pad width in {pad_width:?}") }
        );
        Ok(Self::Shift { offsets, pad_width })
    }

    /// Sliding window of `window_shape`, padded by `[left, right]` per axis.
    pub fn gather(window_shape: Vec<i64>, pad_width: Vec<[i64; 2]>) -> Result<Self> {
        ensure!(
            window_shape.len() == pad_width.len(),
            InvalidTensorOpSnafu {
                op: "gather",
                reason: format!("{} window axes but {} pad widths", window_shape.len(), pad_width.len()),
            }
        );
        ensure!(
            window_shape.iter().all(|w| *w >= 1),
            InvalidTensorOpSnafu { op: "gather", reason: format!("empty window in {window_shape:?}") }
        );
        ensure!(
            pad_width.iter().flatten().all(|w| *w >= 0),
            InvalidTensorOpSnafu { op: "gather", reason: format!("negative pad width in {pad_width:?}") }
        );
        Ok(Self::Gather { window_shape, pad_width })
    }

    /// Check the parameters against the root domain size of the tensor
    /// this op defines.
    pub fn validate(&self, root_len: usize) -> Result<()> {
        match self {
            Self::Pointwise | Self::Reduction => Ok(()),
            Self::Broadcast { is_new } => {
                ensure!(
                    is_new.len() == root_len,
                    InvalidTensorOpSnafu {
                        op: "broadcast",
                        reason: format!("{} flags for {root_len} root axes", is_new.len()),
                    }
                );
                Ok(())
            }
            Self::Shift { offsets, pad_width } => {
                Self::shift(offsets.clone(), pad_width.clone())?;
                ensure!(
                    offsets.len() == root_len,
                    InvalidTensorOpSnafu {
                        op: "shift",
                        reason: format!("{} offsets for {root_len} root axes", offsets.len()),
                    }
                );
                Ok(())
            }
            Self::Gather { window_shape, pad_width } => {
                Self::gather(window_shape.clone(), pad_width.clone())?;
                ensure!(
                    root_len == 2 * window_shape.len(),
                    InvalidTensorOpSnafu {
                        op: "gather",
                        reason: format!("{root_len} root axes for {} window axes", window_shape.len()),
                    }
                );
                Ok(())
            }
        }
    }

    /// Shift offset along root axis `axis`.
    pub fn shift_offset(&self, axis: usize) -> Option<i64> {
        match self {
            Self::Shift { offsets, .. } => offsets.get(axis).copied(),
            _ => None,
        }
    }

    /// Index of the window axis paired with input axis `axis`.
    pub fn gather_axis(&self, axis: usize) -> Option<usize> {
        match self {
            Self::Gather { window_shape, .. } => Some(axis + window_shape.len()),
            _ => None,
        }
    }

    /// Whether this op introduces padded (out-of-bounds) elements.
    pub fn has_padding(&self) -> bool {
        match self {
            Self::Shift { pad_width, .. } => pad_width.iter().any(|w| *w > 0),
            Self::Gather { pad_width, .. } => pad_width.iter().any(|[l, r]| *l > 0 || *r > 0),
            _ => false,
        }
    }
}

/// Definition of a tensor: an operation and its input tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorExpr {
    pub op: TensorOp,
    pub inputs: SmallVec<[TensorId; 2]>,
}

/// Shared-memory swizzle of a tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Swizzle {
    #[default]
    None,
    /// `index(second) = (index(first) + index(second)) % extent(second)`.
    Transpose { first: AxisId, second: AxisId },
}

#[derive(Debug, Clone)]
pub struct Tensor {
    pub(crate) id: TensorId,
    pub(crate) domain: TensorDomain,
    pub(crate) memory_type: MemoryType,
    pub(crate) definition: Option<TensorExpr>,
    pub(crate) compute_at_position: usize,
    pub(crate) double_buffered: bool,
    pub(crate) swizzle: Swizzle,
}

impl Tensor {
    pub fn id(&self) -> TensorId {
        self.id
    }

    /// Numeric name used for runtime scalars such as `T3.stride[0]`.
    pub fn name(&self) -> u32 {
        self.id.0
    }

    pub fn domain(&self) -> &TensorDomain {
        &self.domain
    }

    pub fn domain_mut(&mut self) -> &mut TensorDomain {
        &mut self.domain
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn definition(&self) -> Option<&TensorExpr> {
        self.definition.as_ref()
    }

    pub fn op(&self) -> Option<&TensorOp> {
        self.definition.as_ref().map(|def| &def.op)
    }

    /// Number of leaf axes shared with the consumer's loop nest.
    pub fn compute_at_position(&self) -> usize {
        self.compute_at_position
    }

    pub fn is_double_buffered(&self) -> bool {
        self.double_buffered
    }

    pub fn swizzle(&self) -> Swizzle {
        self.swizzle
    }

    /// Leaf axis at `pos`.
    pub fn axis(&self, pos: usize) -> AxisId {
        self.domain.axis(pos)
    }

    pub fn set_compute_at(&mut self, position: usize) {
        self.compute_at_position = position;
    }

    pub fn set_double_buffered(&mut self, double_buffered: bool) {
        self.double_buffered = double_buffered;
    }

    pub fn set_swizzle(&mut self, swizzle: Swizzle) {
        self.swizzle = swizzle;
    }

    pub fn set_memory_type(&mut self, memory_type: MemoryType) {
        self.memory_type = memory_type;
    }
}
