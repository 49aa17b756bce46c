//! Fundamental type definitions shared across the IR.
//!
//! Classification tags for axes, parallel bindings, memory spaces and the
//! operator enums used by symbolic index expressions.

use strum::{Display, EnumIter, IntoEnumIterator};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Constant value carried by a leaf expression.
///
/// Index arithmetic only needs integers and the booleans produced by
/// predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Int(i64),
    Bool(bool),
}

impl ConstValue {
    /// Integer payload, if any.
    pub fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Bool(_) => None,
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(v),
            Self::Int(_) => None,
        }
    }
}

// ============================================================================
// OPERATORS
// ============================================================================

/// Unary operators on index expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum UnaryOp {
    Neg,
}

/// Binary operators on index expressions.
///
/// `Div` and `Mod` truncate toward zero. `CeilDiv` rounds up for
/// non-negative operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    CeilDiv,
    Min,
    Max,
    Lt,
    Ge,
    And,
}

impl BinaryOp {
    /// Whether the result is a boolean.
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Ge)
    }

    /// Whether `a op b == b op a`.
    pub fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Min | Self::Max | Self::And)
    }
}

// ============================================================================
// AXIS CLASSIFICATION
// ============================================================================

/// Classification of an iteration axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum IterType {
    /// Regular data-parallel iteration.
    #[default]
    Iteration,
    /// Reduction axis; never part of a tensor's allocation.
    Reduction,
    /// Broadcast axis that still occupies a stride in memory.
    BroadcastWithStride,
    /// Broadcast axis with no physical storage.
    BroadcastWithoutStride,
    /// Stride-only axis created by strided window access.
    Stride,
}

impl IterType {
    pub fn is_broadcast(self) -> bool {
        matches!(self, Self::BroadcastWithStride | Self::BroadcastWithoutStride)
    }

    pub fn is_reduction(self) -> bool {
        matches!(self, Self::Reduction)
    }

    pub fn is_stride(self) -> bool {
        matches!(self, Self::Stride)
    }
}

/// Parallel binding of an axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ParallelType {
    #[default]
    #[strum(serialize = "S")]
    Serial,
    #[strum(serialize = "blockIdx.x")]
    BIDx,
    #[strum(serialize = "blockIdx.y")]
    BIDy,
    #[strum(serialize = "blockIdx.z")]
    BIDz,
    #[strum(serialize = "threadIdx.x")]
    TIDx,
    #[strum(serialize = "threadIdx.y")]
    TIDy,
    #[strum(serialize = "threadIdx.z")]
    TIDz,
    #[strum(serialize = "V")]
    Vectorize,
    #[strum(serialize = "UR")]
    Unroll,
    #[strum(serialize = "US")]
    Unswitch,
}

impl ParallelType {
    /// Bound to a block dimension (`blockIdx.*`).
    pub fn is_block_dim(self) -> bool {
        matches!(self, Self::BIDx | Self::BIDy | Self::BIDz)
    }

    /// Bound to a thread dimension (`threadIdx.*`).
    pub fn is_thread_dim(self) -> bool {
        matches!(self, Self::TIDx | Self::TIDy | Self::TIDz)
    }

    /// Bound to either a block or a thread dimension.
    pub fn is_thread(self) -> bool {
        self.is_block_dim() || self.is_thread_dim()
    }

    /// Unrolled by the backend: `Unroll`, `Unswitch` or `Vectorize`.
    pub fn is_unrolled(self) -> bool {
        matches!(self, Self::Unroll | Self::Unswitch | Self::Vectorize)
    }

    /// Name of the runtime scalar holding the size of this dimension.
    ///
    /// Returns `None` for non-thread bindings.
    pub fn dim_name(self) -> Option<&'static str> {
        let name = match self {
            Self::BIDx => "gridDim.x",
            Self::BIDy => "gridDim.y",
            Self::BIDz => "gridDim.z",
            Self::TIDx => "blockDim.x",
            Self::TIDy => "blockDim.y",
            Self::TIDz => "blockDim.z",
            _ => return None,
        };
        Some(name)
    }

    /// All block and thread bindings, in declaration order.
    pub fn thread_types() -> impl Iterator<Item = Self> {
        Self::iter().filter(|pt| pt.is_thread())
    }
}

/// Memory space a tensor is allocated in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
pub enum MemoryType {
    #[default]
    Local,
    Shared,
    Global,
}
