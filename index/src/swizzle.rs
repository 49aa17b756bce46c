//! Shared-memory swizzle.
//!
//! A transpose swizzle rotates the index of its second axis by the index of
//! its first one, `j' = (i + j) % extent(j)`, so that a warp reading a
//! column of a shared buffer touches distinct banks.
//!
//! The swizzled axes are leaf axes, while ordinary propagation stops at
//! whatever level the reference reached. Indices are first pushed forward
//! to the leaves, then the swizzled index is propagated back to the roots
//! along the transforms that depend on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use snafu::ensure;
use tracing::trace;

use tessera_ir::{AxisId, Expr, MemoryType, Swizzle, Tensor, TensorId, Transform};

use crate::context::LowerContext;
use crate::error::{InvalidSwizzleSnafu, Result};
use crate::index_compute::IndexCompute;

#[derive(Debug, Clone)]
pub struct IndexSwizzle<'f> {
    compute: IndexCompute<'f>,
    tensor: TensorId,
    memory_type: MemoryType,
    swizzle: Swizzle,
}

impl<'f> IndexSwizzle<'f> {
    /// Swizzle pass over `tensor`, starting from the result of propagating
    /// indices onto its domain.
    pub fn new(ctx: &LowerContext<'f>, tensor: &Tensor, indexed: &IndexCompute<'f>) -> Result<Self> {
        let domain = tensor.domain();
        let compute = IndexCompute::builder()
            .ctx(ctx)
            .domain(domain)
            .index_map(indexed.index_map().clone())
            .extent_map(indexed.extent_map().clone())
            .zero_domains(indexed.zero_domains().clone())
            .zero_merged_in(indexed.zero_merged_in().clone())
            .root_contiguity(vec![false; domain.maybe_rfactor().len()])
            .build()?;
        Ok(Self { compute, tensor: tensor.id(), memory_type: tensor.memory_type(), swizzle: tensor.swizzle() })
    }

    pub fn run(&mut self) -> Result<()> {
        let Swizzle::Transpose { first, second } = self.swizzle else {
            return Ok(());
        };
        ensure!(
            self.memory_type == MemoryType::Shared,
            InvalidSwizzleSnafu { tensor: self.tensor, reason: "transpose swizzle requires shared memory" }
        );
        ensure!(first != second, InvalidSwizzleSnafu { tensor: self.tensor, reason: "swizzle axes must differ" });

        update_leaf_indices(&mut self.compute);

        let (Some(first_index), Some(second_index)) =
            (self.compute.index_of(first).cloned(), self.compute.index_of(second).cloned())
        else {
            return Ok(());
        };
        let extent = self.compute.graph().axis(second).extent().clone();
        let swizzled = first_index.add(&second_index).rem(&extent);
        trace!(tensor = %self.tensor, axis = %second, index = %swizzled, "swizzle");
        self.compute.index_map_mut().insert(second, swizzled);

        let mut changed = HashSet::from([second]);
        self.compute.run_from_changed(&mut changed);
        Ok(())
    }

    pub fn index_map(&self) -> &HashMap<AxisId, Arc<Expr>> {
        self.compute.index_map()
    }

    pub fn compute(&self) -> &IndexCompute<'f> {
        &self.compute
    }
}

/// Push indices forward from intermediate axes to the leaf axes.
///
/// ```text
/// split  in -> (outer, inner):  inner = in % factor, outer = in / factor
/// merge  (outer, inner) -> out: out = inner * extent(outer) + outer
/// ```
///
/// Outputs that already have an index are kept.
fn update_leaf_indices(compute: &mut IndexCompute<'_>) {
    let graph = compute.graph();
    for tid in graph.exprs_to(compute.leaf()) {
        match graph.transform(tid) {
            Transform::Split(split) => {
                if compute.index_of(split.outer).is_some() {
                    continue;
                }
                let Some(in_index) = compute.index_of(split.input).cloned() else { continue };
                let factor = split.factor.clone();
                let in_extent = compute.extent(split.input);
                compute.index_map_mut().insert(split.inner, in_index.rem(&factor));
                compute.index_map_mut().insert(split.outer, in_index.div(&factor));
                compute.extent_map_mut().insert(split.inner, factor.clone());
                compute.extent_map_mut().insert(split.outer, in_extent.ceil_div(&factor));
            }
            Transform::Merge(merge) => {
                if compute.index_of(merge.out).is_some() {
                    continue;
                }
                let (Some(outer), Some(inner)) =
                    (compute.index_of(merge.outer).cloned(), compute.index_of(merge.inner).cloned())
                else {
                    continue;
                };
                let outer_extent = compute.extent(merge.outer);
                let inner_extent = compute.extent(merge.inner);
                compute.index_map_mut().insert(merge.out, inner.mul(&outer_extent).add(&outer));
                compute.extent_map_mut().insert(merge.out, outer_extent.mul(&inner_extent));
            }
        }
    }
}
