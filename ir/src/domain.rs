//! Tensor domains.

use snafu::ensure;

use crate::axis::AxisId;
use crate::error::{
    AxisPositionOutOfRangeSnafu, ContiguityLengthMismatchSnafu, InvalidReorderSnafu, Result,
};
use crate::expr::IntoExpr;
use crate::graph::DomainGraph;

/// Root, optional rfactor and leaf axes of one tensor, plus the contiguity
/// of its allocation.
///
/// `contiguity[i]` says whether axis `i` of the maybe-rfactor domain is laid
/// out directly next to axis `i + 1` in memory. Leaf axes only ever change
/// by applying new transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDomain {
    root: Vec<AxisId>,
    rfactor: Option<Vec<AxisId>>,
    leaf: Vec<AxisId>,
    contiguity: Vec<bool>,
}

impl TensorDomain {
    /// Unscheduled domain over `root`.
    pub fn new(root: Vec<AxisId>, contiguity: Vec<bool>) -> Result<Self> {
        let leaf = root.clone();
        Self::from_parts(root, None, leaf, contiguity)
    }

    /// Unscheduled domain with every root axis contiguous.
    pub fn contiguous(root: Vec<AxisId>) -> Self {
        let contiguity = vec![true; root.len()];
        let leaf = root.clone();
        Self { root, rfactor: None, leaf, contiguity }
    }

    pub fn from_parts(
        root: Vec<AxisId>,
        rfactor: Option<Vec<AxisId>>,
        leaf: Vec<AxisId>,
        contiguity: Vec<bool>,
    ) -> Result<Self> {
        let expected = rfactor.as_ref().unwrap_or(&root).len();
        ensure!(contiguity.len() == expected, ContiguityLengthMismatchSnafu { expected, actual: contiguity.len() });
        Ok(Self { root, rfactor, leaf, contiguity })
    }

    pub fn root(&self) -> &[AxisId] {
        &self.root
    }

    pub fn rfactor(&self) -> Option<&[AxisId]> {
        self.rfactor.as_deref()
    }

    pub fn has_rfactor(&self) -> bool {
        self.rfactor.is_some()
    }

    /// The rfactor domain if present, otherwise the root domain.
    pub fn maybe_rfactor(&self) -> &[AxisId] {
        self.rfactor.as_deref().unwrap_or(&self.root)
    }

    pub fn leaf(&self) -> &[AxisId] {
        &self.leaf
    }

    pub fn contiguity(&self) -> &[bool] {
        &self.contiguity
    }

    /// Leaf axis at `pos`.
    pub fn axis(&self, pos: usize) -> AxisId {
        self.leaf[pos]
    }

    pub fn ndims(&self) -> usize {
        self.leaf.len()
    }

    /// Position of `axis` in the root domain.
    pub fn root_position(&self, axis: AxisId) -> Option<usize> {
        self.root.iter().position(|id| *id == axis)
    }

    /// Leaf axes that are not reductions.
    pub fn no_reductions(&self, graph: &DomainGraph) -> Vec<AxisId> {
        self.leaf.iter().copied().filter(|id| !graph.axis(*id).is_reduction()).collect()
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    fn check_position(&self, pos: usize) -> Result<()> {
        ensure!(pos < self.leaf.len(), AxisPositionOutOfRangeSnafu { position: pos, ndims: self.leaf.len() });
        Ok(())
    }

    /// Split leaf axis `pos`; the outputs take its place as `[outer, inner]`.
    pub fn split(&mut self, graph: &mut DomainGraph, pos: usize, factor: impl IntoExpr, inner_split: bool) -> Result<()> {
        self.check_position(pos)?;
        let (outer, inner) = graph.split(self.leaf[pos], factor, inner_split)?;
        self.leaf.splice(pos..=pos, [outer, inner]);
        Ok(())
    }

    /// Partial split of leaf axis `pos`.
    pub fn split_partial(
        &mut self,
        graph: &mut DomainGraph,
        pos: usize,
        factor: impl IntoExpr,
        start_offset: impl IntoExpr,
        stop_offset: impl IntoExpr,
    ) -> Result<()> {
        self.check_position(pos)?;
        let (outer, inner) =
            graph.split_partial(self.leaf[pos], factor, true, start_offset.into_expr(), stop_offset.into_expr())?;
        self.leaf.splice(pos..=pos, [outer, inner]);
        Ok(())
    }

    /// Merge leaf axes `pos` and `pos + 1`.
    pub fn merge(&mut self, graph: &mut DomainGraph, pos: usize) -> Result<()> {
        self.check_position(pos + 1)?;
        let out = graph.merge(self.leaf[pos], self.leaf[pos + 1]);
        self.leaf.splice(pos..=pos + 1, [out]);
        Ok(())
    }

    /// Reorder leaf axes: new position `i` holds old axis `permutation[i]`.
    pub fn reorder(&mut self, permutation: &[usize]) -> Result<()> {
        let ndims = self.leaf.len();
        let mut seen = vec![false; ndims];
        let valid = permutation.len() == ndims
            && permutation.iter().all(|&p| p < ndims && !std::mem::replace(&mut seen[p], true));
        ensure!(valid, InvalidReorderSnafu { permutation: permutation.to_vec(), ndims });
        self.leaf = permutation.iter().map(|&p| self.leaf[p]).collect();
        Ok(())
    }
}
