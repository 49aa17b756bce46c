//! Split and merge transforms between axes.

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::axis::AxisId;
use crate::expr::Expr;

/// Stable handle of a transform inside a [`DomainGraph`](crate::DomainGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("t{_0}")]
pub struct TransformId(pub(crate) u32);

impl TransformId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Split of one axis into `outer` and `inner`.
///
/// With `inner_split` the inner output has extent `factor`; otherwise the
/// outer output does. Non-zero `start_offset`/`stop_offset` trim the input
/// before splitting (a partial split).
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub input: AxisId,
    pub outer: AxisId,
    pub inner: AxisId,
    pub factor: Arc<Expr>,
    pub inner_split: bool,
    pub start_offset: Arc<Expr>,
    pub stop_offset: Arc<Expr>,
}

impl Split {
    pub fn is_partial(&self) -> bool {
        !self.start_offset.is_zero() || !self.stop_offset.is_zero()
    }
}

/// Merge of `outer` and `inner` into `out`, iterated as
/// `outer * extent(inner) + inner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    pub outer: AxisId,
    pub inner: AxisId,
    pub out: AxisId,
}

/// Edge of the domain transform graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Split(Split),
    Merge(Merge),
}

impl Transform {
    pub fn inputs(&self) -> SmallVec<[AxisId; 2]> {
        match self {
            Self::Split(split) => smallvec![split.input],
            Self::Merge(merge) => smallvec![merge.outer, merge.inner],
        }
    }

    pub fn outputs(&self) -> SmallVec<[AxisId; 2]> {
        match self {
            Self::Split(split) => smallvec![split.outer, split.inner],
            Self::Merge(merge) => smallvec![merge.out],
        }
    }

    pub fn as_split(&self) -> Option<&Split> {
        match self {
            Self::Split(split) => Some(split),
            Self::Merge(_) => None,
        }
    }

    pub fn as_merge(&self) -> Option<&Merge> {
        match self {
            Self::Merge(merge) => Some(merge),
            Self::Split(_) => None,
        }
    }
}
