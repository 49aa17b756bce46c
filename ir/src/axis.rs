//! Iteration axes.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::expr::Expr;
use crate::transform::TransformId;
use crate::types::{IterType, ParallelType};

/// Stable handle of an axis inside a [`DomainGraph`](crate::DomainGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("a{_0}")]
pub struct AxisId(pub(crate) u32);

impl AxisId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One dimension of an iteration space.
///
/// The logical range of an axis is `[start, extent - stop_offset)`. Axes are
/// never changed once created except for their parallel binding, which is
/// fixed before lowering starts.
#[derive(Debug, Clone)]
pub struct Axis {
    pub(crate) id: AxisId,
    pub(crate) start: Arc<Expr>,
    pub(crate) extent: Arc<Expr>,
    pub(crate) stop_offset: Arc<Expr>,
    pub(crate) iter_type: IterType,
    pub(crate) parallel_type: ParallelType,
    pub(crate) is_rfactor: bool,
    pub(crate) definition: Option<TransformId>,
    pub(crate) uses: SmallVec<[TransformId; 2]>,
}

impl Axis {
    pub fn id(&self) -> AxisId {
        self.id
    }

    pub fn start(&self) -> &Arc<Expr> {
        &self.start
    }

    pub fn extent(&self) -> &Arc<Expr> {
        &self.extent
    }

    pub fn stop_offset(&self) -> &Arc<Expr> {
        &self.stop_offset
    }

    pub fn iter_type(&self) -> IterType {
        self.iter_type
    }

    pub fn parallel_type(&self) -> ParallelType {
        self.parallel_type
    }

    /// Introduced by an rfactor transformation rather than the declared shape.
    pub fn is_rfactor(&self) -> bool {
        self.is_rfactor
    }

    /// Transform that produced this axis; `None` for root axes.
    pub fn definition(&self) -> Option<TransformId> {
        self.definition
    }

    /// Transforms consuming this axis.
    pub fn uses(&self) -> &[TransformId] {
        &self.uses
    }

    pub fn is_broadcast(&self) -> bool {
        self.iter_type.is_broadcast()
    }

    pub fn is_reduction(&self) -> bool {
        self.iter_type.is_reduction()
    }

    pub fn is_stride(&self) -> bool {
        self.iter_type.is_stride()
    }

    pub fn is_thread(&self) -> bool {
        self.parallel_type.is_thread()
    }

    pub fn is_block_dim(&self) -> bool {
        self.parallel_type.is_block_dim()
    }

    pub fn is_thread_dim(&self) -> bool {
        self.parallel_type.is_thread_dim()
    }

    /// Whether the logical range may not cover `[0, extent)`.
    pub fn maybe_partial(&self) -> bool {
        !self.start.is_zero() || !self.stop_offset.is_zero()
    }
}
