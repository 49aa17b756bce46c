//! Reference tensor of a loop nest.
//!
//! The reference mirrors the loop nest being emitted: its leaf axis `i` is
//! the concrete axis of loop `i`. Indices are computed once against the
//! reference and then moved onto a producer or consumer through the
//! co-iteration classes their axes share with the reference.
//!
//! The reference is made of existing axes: every concrete axis keeps the
//! transform history it already has in the graph.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use tessera_ir::{AxisId, Expr, ForLoop, TensorDomain};

use crate::context::LowerContext;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ReferenceTensor {
    domain: TensorDomain,
    /// Concrete axis to the reference axis of its class.
    concrete_to_id: HashMap<AxisId, AxisId>,
}

impl ReferenceTensor {
    /// Reference whose leaf axes follow `loops` one to one.
    pub fn build(ctx: &LowerContext<'_>, loops: &[ForLoop]) -> Result<Self> {
        let graph = ctx.fusion().graph();
        let index_map = ctx.ca_index_map();
        for l in loops {
            graph.try_axis(l.axis())?;
        }

        let leaf: Vec<AxisId> = loops.iter().map(|l| index_map.concrete(l.axis())).collect();
        let root = graph.inputs_of(&leaf);
        let contiguity = vec![false; root.len()];

        let mut concrete_to_id = HashMap::new();
        for id in graph.all_between(&root, &leaf) {
            concrete_to_id.entry(index_map.concrete(id)).or_insert(id);
        }

        trace!(leaf = ?leaf, roots = root.len(), "reference tensor");
        let domain = TensorDomain::from_parts(root, None, leaf, contiguity)?;
        Ok(Self { domain, concrete_to_id })
    }

    /// Reference of an empty loop nest.
    pub fn empty() -> Self {
        Self { domain: TensorDomain::contiguous(Vec::new()), concrete_to_id: HashMap::new() }
    }

    pub fn domain(&self) -> &TensorDomain {
        &self.domain
    }

    /// Leaf axis at `pos`, matching loop `pos`.
    pub fn axis(&self, pos: usize) -> AxisId {
        self.domain.axis(pos)
    }

    pub fn ndims(&self) -> usize {
        self.domain.ndims()
    }

    pub fn concrete_to_id(&self) -> &HashMap<AxisId, AxisId> {
        &self.concrete_to_id
    }

    /// Reference axis in the class of `concrete`, if the reference has one.
    pub fn id_of_concrete(&self, concrete: AxisId) -> Option<AxisId> {
        self.concrete_to_id.get(&concrete).copied()
    }
}

/// Map reference axes to the axes of `domain` in the same index class.
///
/// Covers every axis between the root and leaf domains. Axes whose class has
/// no reference axis are left out.
pub fn index_map_reference_to(
    ctx: &LowerContext<'_>,
    domain: &TensorDomain,
    reference: &ReferenceTensor,
) -> HashMap<AxisId, AxisId> {
    let index_map = ctx.ca_index_map();
    ctx.fusion()
        .graph()
        .all_between(domain.root(), domain.leaf())
        .into_iter()
        .filter_map(|id| reference.id_of_concrete(index_map.concrete(id)).map(|ref_id| (ref_id, id)))
        .collect()
}

/// Halo-extended extents of reference axes, keyed by the axes they are
/// mapped to.
pub fn reference_halo_extent_map(
    ctx: &LowerContext<'_>,
    index_map_from_ref: &HashMap<AxisId, AxisId>,
) -> HashMap<AxisId, Arc<Expr>> {
    index_map_from_ref
        .iter()
        .filter_map(|(ref_id, id)| ctx.halo().extent(*ref_id).map(|extent| (*id, extent.clone())))
        .collect()
}
