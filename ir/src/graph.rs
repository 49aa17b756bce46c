//! Domain transform graph.
//!
//! Arena of every axis and every split/merge between them. Axes and
//! transforms are addressed by [`AxisId`] and [`TransformId`] handles that
//! stay valid for the lifetime of the graph. [`DomainGraph::axis`] panics on
//! a handle from a different graph, the same way slice indexing does;
//! [`DomainGraph::try_axis`] reports it instead.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bon::bon;
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};
use tracing::trace;

use crate::axis::{Axis, AxisId};
use crate::error::{InvalidSplitFactorSnafu, Result, UnknownAxisSnafu};
use crate::expr::{Expr, IntoExpr};
use crate::transform::{Merge, Split, Transform, TransformId};
use crate::types::{IterType, ParallelType};

#[derive(Debug, Clone, Default)]
pub struct DomainGraph {
    axes: Vec<Axis>,
    transforms: Vec<Transform>,
}

#[bon]
impl DomainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root axis.
    #[builder]
    pub fn new_axis(
        &mut self,
        extent: Arc<Expr>,
        #[builder(default = Expr::zero())] start: Arc<Expr>,
        #[builder(default = Expr::zero())] stop_offset: Arc<Expr>,
        #[builder(default)] iter_type: IterType,
        #[builder(default)] parallel_type: ParallelType,
        #[builder(default)] is_rfactor: bool,
    ) -> AxisId {
        self.push_axis(Axis {
            id: AxisId(0),
            start,
            extent,
            stop_offset,
            iter_type,
            parallel_type,
            is_rfactor,
            definition: None,
            uses: SmallVec::new(),
        })
    }
}

impl DomainGraph {
    /// Iteration axis of constant extent.
    pub fn iteration_axis(&mut self, extent: i64) -> AxisId {
        self.new_axis().extent(Expr::int(extent)).call()
    }

    /// Broadcast axis of extent one without physical storage.
    pub fn broadcast_axis(&mut self) -> AxisId {
        self.new_axis().extent(Expr::one()).iter_type(IterType::BroadcastWithoutStride).call()
    }

    /// Reduction axis of constant extent.
    pub fn reduction_axis(&mut self, extent: i64) -> AxisId {
        self.new_axis().extent(Expr::int(extent)).iter_type(IterType::Reduction).call()
    }

    fn push_axis(&mut self, mut axis: Axis) -> AxisId {
        let id = AxisId(self.axes.len() as u32);
        axis.id = id;
        self.axes.push(axis);
        id
    }

    fn push_transform(&mut self, transform: Transform) -> TransformId {
        let id = TransformId(self.transforms.len() as u32);
        for input in transform.inputs() {
            self.axes[input.index()].uses.push(id);
        }
        for output in transform.outputs() {
            self.axes[output.index()].definition = Some(id);
        }
        self.transforms.push(transform);
        id
    }

    fn derived_axis(&mut self, extent: Arc<Expr>, iter_type: IterType, is_rfactor: bool) -> AxisId {
        self.push_axis(Axis {
            id: AxisId(0),
            start: Expr::zero(),
            extent,
            stop_offset: Expr::zero(),
            iter_type,
            parallel_type: ParallelType::Serial,
            is_rfactor,
            definition: None,
            uses: SmallVec::new(),
        })
    }

    // ========================================================================
    // Transforms
    // ========================================================================

    /// Split `input` by `factor`, returning `(outer, inner)`.
    pub fn split(&mut self, input: AxisId, factor: impl IntoExpr, inner_split: bool) -> Result<(AxisId, AxisId)> {
        self.split_partial(input, factor, inner_split, Expr::zero(), Expr::zero())
    }

    /// Split the range `[start_offset, extent - stop_offset)` of `input`.
    pub fn split_partial(
        &mut self,
        input: AxisId,
        factor: impl IntoExpr,
        inner_split: bool,
        start_offset: Arc<Expr>,
        stop_offset: Arc<Expr>,
    ) -> Result<(AxisId, AxisId)> {
        let factor = factor.into_expr();
        if let Some(value) = factor.as_int() {
            ensure!(value > 0, InvalidSplitFactorSnafu { axis: input, factor: value });
        }

        let (trimmed, iter_type, is_rfactor) = {
            let axis = self.axis(input);
            (axis.extent.sub(&start_offset).sub(&stop_offset), axis.iter_type, axis.is_rfactor)
        };
        let remainder = trimmed.ceil_div(&factor);
        let (outer_extent, inner_extent) =
            if inner_split { (remainder, factor.clone()) } else { (factor.clone(), remainder) };

        let outer = self.derived_axis(outer_extent, iter_type, is_rfactor);
        let inner = self.derived_axis(inner_extent, iter_type, is_rfactor);
        let id = self.push_transform(Transform::Split(Split {
            input,
            outer,
            inner,
            factor,
            inner_split,
            start_offset,
            stop_offset,
        }));
        trace!(transform = %id, %input, %outer, %inner, "split");
        Ok((outer, inner))
    }

    /// Merge `outer` and `inner` into one axis.
    pub fn merge(&mut self, outer: AxisId, inner: AxisId) -> AxisId {
        let (extent, iter_type, is_rfactor) = {
            let o = self.axis(outer);
            let i = self.axis(inner);
            (o.extent.mul(&i.extent), merged_iter_type(o.iter_type, i.iter_type), o.is_rfactor || i.is_rfactor)
        };
        let out = self.derived_axis(extent, iter_type, is_rfactor);
        let id = self.push_transform(Transform::Merge(Merge { outer, inner, out }));
        trace!(transform = %id, %outer, %inner, %out, "merge");
        out
    }

    /// Bind an axis to a parallel type before lowering.
    pub fn parallelize(&mut self, axis: AxisId, parallel_type: ParallelType) {
        self.axes[axis.index()].parallel_type = parallel_type;
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn axis(&self, id: AxisId) -> &Axis {
        &self.axes[id.index()]
    }

    /// Checked [`axis`](Self::axis).
    pub fn try_axis(&self, id: AxisId) -> Result<&Axis> {
        self.axes.get(id.index()).context(UnknownAxisSnafu { axis: id })
    }

    pub fn transform(&self, id: TransformId) -> &Transform {
        &self.transforms[id.index()]
    }

    pub fn definition(&self, id: AxisId) -> Option<&Transform> {
        self.axis(id).definition.map(|t| self.transform(t))
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len()
    }

    pub fn axes(&self) -> impl Iterator<Item = &Axis> {
        self.axes.iter()
    }

    // ========================================================================
    // Traversals
    // ========================================================================

    /// Transforms needed to produce `leaves`, in topological order
    /// (every transform comes after the transforms defining its inputs).
    pub fn exprs_to(&self, leaves: &[AxisId]) -> Vec<TransformId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for &leaf in leaves {
            self.collect_definitions(leaf, &mut visited, &mut order);
        }
        order
    }

    fn collect_definitions(&self, axis: AxisId, visited: &mut HashSet<TransformId>, order: &mut Vec<TransformId>) {
        let Some(tid) = self.axis(axis).definition else { return };
        if !visited.insert(tid) {
            return;
        }
        for input in self.transform(tid).inputs() {
            self.collect_definitions(input, visited, order);
        }
        order.push(tid);
    }

    /// Axes with no definition that `of` is derived from.
    pub fn inputs_of(&self, of: &[AxisId]) -> Vec<AxisId> {
        self.inputs_stopping_at(of, &HashSet::new())
    }

    /// Inputs of `of`, stopping at any axis in `order`, returned in the
    /// order they appear in `order`.
    pub fn inputs_of_ordered_as(&self, of: &[AxisId], order: &[AxisId]) -> Vec<AxisId> {
        let stop: HashSet<AxisId> = order.iter().copied().collect();
        let inputs: HashSet<AxisId> = self.inputs_stopping_at(of, &stop).into_iter().collect();
        order.iter().copied().filter(|id| inputs.contains(id)).collect()
    }

    fn inputs_stopping_at(&self, of: &[AxisId], stop: &HashSet<AxisId>) -> Vec<AxisId> {
        let mut visited = HashSet::new();
        let mut inputs = Vec::new();
        let mut stack: Vec<AxisId> = of.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            match self.definition(id) {
                Some(def) if !stop.contains(&id) => stack.extend(def.inputs().into_iter().rev()),
                _ => inputs.push(id),
            }
        }
        inputs
    }

    /// Axes lying on some path from an axis in `from` to an axis in `to`,
    /// both ends included.
    pub fn all_between(&self, from: &[AxisId], to: &[AxisId]) -> HashSet<AxisId> {
        let from: HashSet<AxisId> = from.iter().copied().collect();
        let mut reaches = HashMap::new();
        for &id in to {
            self.reaches_from(id, &from, &mut reaches);
        }
        reaches.into_iter().filter_map(|(id, hit)| hit.then_some(id)).collect()
    }

    fn reaches_from(&self, id: AxisId, from: &HashSet<AxisId>, memo: &mut HashMap<AxisId, bool>) -> bool {
        if let Some(hit) = memo.get(&id) {
            return *hit;
        }
        let mut hit = from.contains(&id);
        if let Some(def) = self.definition(id) {
            for input in def.inputs() {
                hit |= self.reaches_from(input, from, memo);
            }
        }
        memo.insert(id, hit);
        hit
    }
}

fn merged_iter_type(outer: IterType, inner: IterType) -> IterType {
    match (outer.is_broadcast(), inner.is_broadcast()) {
        (true, true) => {
            if outer == IterType::BroadcastWithStride || inner == IterType::BroadcastWithStride {
                IterType::BroadcastWithStride
            } else {
                IterType::BroadcastWithoutStride
            }
        }
        (true, false) => inner,
        (false, true) => outer,
        (false, false) if outer.is_reduction() || inner.is_reduction() => IterType::Reduction,
        (false, false) if outer.is_stride() || inner.is_stride() => IterType::Stride,
        (false, false) => IterType::Iteration,
    }
}
