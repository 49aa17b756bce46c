//! Loop nests produced by scheduling.
//!
//! A [`ForLoop`] is the lowered form of one leaf axis: its running index,
//! its bounds and the flags that affect how indices inside it are built.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bon::bon;

use crate::axis::AxisId;
use crate::expr::Expr;
use crate::graph::DomainGraph;
use crate::types::ParallelType;

static NEXT_LOOP_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of a loop. Loops are compared by identity, never structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("L{_0}")]
pub struct LoopId(u32);

/// Which copy of a double-buffered loop this is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DoubleBufferStage {
    #[default]
    None,
    /// Loads the first stage before the main loop starts.
    Prolog,
    /// Steady-state loop loading stage `i + 1` while computing stage `i`.
    Main,
}

#[derive(Debug, Clone)]
pub struct ForLoop {
    id: LoopId,
    axis: AxisId,
    index: Arc<Expr>,
    start: Arc<Expr>,
    stop: Arc<Expr>,
    vectorize: bool,
    unrolled: bool,
    double_buffer_stage: DoubleBufferStage,
    vectorize_shift: Option<Arc<Expr>>,
}

#[bon]
impl ForLoop {
    #[builder]
    pub fn new(
        axis: AxisId,
        index: Arc<Expr>,
        #[builder(default = Expr::zero())] start: Arc<Expr>,
        stop: Arc<Expr>,
        #[builder(default)] vectorize: bool,
        #[builder(default)] unrolled: bool,
        #[builder(default)] double_buffer_stage: DoubleBufferStage,
        vectorize_shift: Option<Arc<Expr>>,
    ) -> Self {
        let id = LoopId(NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed));
        Self { id, axis, index, start, stop, vectorize, unrolled, double_buffer_stage, vectorize_shift }
    }
}

impl ForLoop {
    /// Loop over a leaf axis as lowering would create it.
    ///
    /// Thread-bound axes use the parallel index as their running index.
    /// Broadcast axes iterate only over zero.
    pub fn for_axis(graph: &DomainGraph, axis: AxisId, name: &str) -> Self {
        let ax = graph.axis(axis);
        let pt = ax.parallel_type();
        let (index, stop) = if ax.is_broadcast() {
            (Expr::zero(), Expr::one())
        } else if pt.is_thread() {
            (Expr::parallel_index(pt), ax.extent().clone())
        } else {
            (Expr::loop_index(name), ax.extent().clone())
        };
        Self::builder()
            .axis(axis)
            .index(index)
            .start(ax.start().clone())
            .stop(stop)
            .vectorize(pt == ParallelType::Vectorize)
            .unrolled(pt.is_unrolled())
            .build()
    }

    pub fn id(&self) -> LoopId {
        self.id
    }

    pub fn axis(&self) -> AxisId {
        self.axis
    }

    pub fn index(&self) -> &Arc<Expr> {
        &self.index
    }

    pub fn start(&self) -> &Arc<Expr> {
        &self.start
    }

    pub fn stop(&self) -> &Arc<Expr> {
        &self.stop
    }

    pub fn vectorize(&self) -> bool {
        self.vectorize
    }

    pub fn is_unrolled(&self) -> bool {
        self.unrolled
    }

    pub fn double_buffer_stage(&self) -> DoubleBufferStage {
        self.double_buffer_stage
    }

    /// Offset added to the innermost index of a vectorized access.
    pub fn vectorize_shift(&self) -> Option<&Arc<Expr>> {
        self.vectorize_shift.as_ref()
    }

    /// Iterates exactly once: `start + 1 == stop` with both constant.
    pub fn is_trivial(&self) -> bool {
        match (self.start.as_int(), self.stop.as_int()) {
            (Some(start), Some(stop)) => start + 1 == stop,
            _ => false,
        }
    }

    /// Copy of this loop (same identity) running as a double-buffer stage.
    pub fn with_double_buffer_stage(&self, stage: DoubleBufferStage) -> Self {
        Self { double_buffer_stage: stage, ..self.clone() }
    }
}
