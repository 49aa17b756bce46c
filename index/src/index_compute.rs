//! Backward index propagation.
//!
//! Given indices of some axes of a domain (normally one per loop, at the
//! leaf axes), [`IndexCompute`] undoes the splits and merges that produced
//! them to recover indices of their inputs, down to the root axes.
//!
//! # Rules
//!
//! ```text
//! split  in -> (outer, inner):  in = outer * extent(inner) + inner
//! merge  (outer, inner) -> out: outer = out / extent(inner)
//!                               inner = out % extent(inner)
//! ```
//!
//! Axes whose storage is not allocated (for example the parts of a local
//! buffer outside its allocation point) are *zero domains*: their index is
//! zero and their extent does not count. An axis whose history merged in a
//! zero domain is *zero-merged-in*; its allocated extent is smaller than its
//! logical extent, so merges above it do not decompose with div/mod but
//! send the whole index down one side.
//!
//! A transform whose needed indices are missing is skipped. An axis with no
//! index after [`run`](IndexCompute::run) is simply not determined by the
//! seed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bon::bon;
use tracing::trace;

use tessera_ir::{AxisId, DomainGraph, Expr, Merge, Split, TensorDomain, Transform};

use crate::contiguity::ContigIds;
use crate::context::LowerContext;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct IndexCompute<'f> {
    graph: &'f DomainGraph,
    leaf: Vec<AxisId>,
    maybe_rfactor: Vec<AxisId>,
    index_map: HashMap<AxisId, Arc<Expr>>,
    extent_map: HashMap<AxisId, Arc<Expr>>,
    zero_domains: HashSet<AxisId>,
    zero_merged_in: HashSet<AxisId>,
    contig_ids: HashSet<AxisId>,
    preferred_paths: HashSet<AxisId>,
    reference_halo_extent_map: HashMap<AxisId, Arc<Expr>>,
}

#[bon]
impl<'f> IndexCompute<'f> {
    /// Set up propagation over `domain` from a seed index map.
    ///
    /// When any `root_contiguity` flag is set (and contiguous indexing is
    /// enabled), seeded axes that are subsumed by a seeded contiguous axis
    /// are dropped from the seed so that the contiguous axis is indexed
    /// through the linear path.
    #[builder]
    pub fn new(
        ctx: &LowerContext<'f>,
        domain: &TensorDomain,
        #[builder(default)] index_map: HashMap<AxisId, Arc<Expr>>,
        #[builder(default)] extent_map: HashMap<AxisId, Arc<Expr>>,
        #[builder(default)] zero_domains: HashSet<AxisId>,
        #[builder(default)] zero_merged_in: HashSet<AxisId>,
        #[builder(default)] root_contiguity: Vec<bool>,
        #[builder(default)] preferred_paths: HashSet<AxisId>,
        #[builder(default)] reference_halo_extent_map: HashMap<AxisId, Arc<Expr>>,
    ) -> Result<Self> {
        let graph = ctx.fusion().graph();
        let mut this = Self {
            graph,
            leaf: domain.leaf().to_vec(),
            maybe_rfactor: domain.maybe_rfactor().to_vec(),
            index_map,
            extent_map,
            zero_domains,
            zero_merged_in,
            contig_ids: HashSet::new(),
            preferred_paths,
            reference_halo_extent_map,
        };

        if ctx.config().contig_indexing && root_contiguity.iter().any(|c| *c) {
            let finder = ContigIds::new(graph, ctx.halo(), domain.leaf(), domain.maybe_rfactor(), &root_contiguity)?;
            for contig_id in finder.contig_ids() {
                if !this.index_map.contains_key(contig_id) {
                    continue;
                }
                if let Some(within) = finder.within_contig_ids().get(contig_id) {
                    for id in within {
                        this.index_map.remove(id);
                    }
                }
            }
            this.contig_ids = finder.contig_ids().clone();
        }

        Ok(this)
    }
}

impl<'f> IndexCompute<'f> {
    /// Propagate over every transform leading to the leaf domain, from the
    /// leaves towards the roots.
    pub fn run(&mut self) {
        let graph = self.graph;
        for tid in graph.exprs_to(&self.leaf).into_iter().rev() {
            self.handle(graph.transform(tid));
        }
    }

    /// Like [`run`](Self::run), but only revisit transforms with an output in
    /// `changed`; the inputs of every revisited transform join `changed`.
    pub(crate) fn run_from_changed(&mut self, changed: &mut HashSet<AxisId>) {
        let graph = self.graph;
        for tid in graph.exprs_to(&self.leaf).into_iter().rev() {
            let transform = graph.transform(tid);
            if !transform.outputs().iter().any(|id| changed.contains(id)) {
                continue;
            }
            self.handle(transform);
            changed.extend(transform.inputs());
        }
    }

    fn handle(&mut self, transform: &Transform) {
        match transform {
            Transform::Split(split) => self.handle_split(split),
            Transform::Merge(merge) => self.handle_merge(merge),
        }
    }

    fn handle_split(&mut self, split: &Split) {
        let (in_id, outer_id, inner_id) = (split.input, split.outer, split.inner);
        let (Some(outer_ind), Some(inner_ind)) =
            (self.index_map.get(&outer_id).cloned(), self.index_map.get(&inner_id).cloned())
        else {
            return;
        };

        let outer_zero = self.is_zero(outer_id);
        let inner_zero = self.is_zero(inner_id);
        let zero_merged_in =
            self.has_zero_merged(in_id) || self.has_zero_merged(inner_id) || self.has_zero_merged(outer_id);

        if inner_zero && outer_zero {
            self.zero_domains.insert(in_id);
        }
        if zero_merged_in {
            self.zero_merged_in.insert(in_id);
        }

        if self.is_zero(in_id) {
            self.index_map.insert(in_id, Expr::zero());
            self.extent_map.insert(in_id, Expr::zero());
        } else if zero_merged_in && outer_zero {
            self.index_map.insert(in_id, inner_ind);
            self.extent_map.insert(in_id, self.extent(inner_id));
        } else if zero_merged_in && inner_zero {
            self.index_map.insert(in_id, outer_ind);
            self.extent_map.insert(in_id, self.extent(outer_id));
        } else {
            let index = outer_ind.mul(&self.extent(inner_id)).add(&inner_ind);
            self.index_map.insert(in_id, index);
            // Only a partial allocation changes the extent.
            if zero_merged_in {
                self.extent_map.insert(in_id, self.extent(outer_id).mul(&self.extent(inner_id)));
            }
        }
        trace!(input = %in_id, index = %self.index_map[&in_id], "undo split");
    }

    fn handle_merge(&mut self, merge: &Merge) {
        let Merge { outer: outer_id, inner: inner_id, out: out_id } = *merge;
        let Some(out_ind) = self.index_map.get(&out_id).cloned() else { return };

        if self.is_zero(out_id) {
            for id in [outer_id, inner_id] {
                self.index_map.insert(id, Expr::zero());
                self.extent_map.insert(id, Expr::zero());
                self.zero_domains.insert(id);
            }
            return;
        }

        if !self.has_zero_merged(out_id) && self.contig_ids.contains(&out_id) {
            let input_ids = self.graph.inputs_of_ordered_as(&[out_id], &self.maybe_rfactor);
            if let Some((last, rest)) = input_ids.split_last() {
                for id in rest {
                    self.index_map.insert(*id, Expr::zero());
                }
                self.index_map.insert(*last, out_ind);
                trace!(out = %out_id, root = %last, "contiguous merge index");
                return;
            }
        }

        let inner_extent =
            self.reference_halo_extent_map.get(&inner_id).cloned().unwrap_or_else(|| self.extent(inner_id));
        let outer_extent = self.extent(outer_id);
        let graph = self.graph;
        let inner_axis = graph.axis(inner_id);
        let outer_axis = graph.axis(outer_id);

        if inner_axis.is_broadcast() && inner_extent.is_one() {
            self.index_map.insert(outer_id, out_ind);
            self.index_map.insert(inner_id, Expr::zero());
            self.extent_map.insert(outer_id, self.extent(out_id));
        } else if outer_axis.is_broadcast() && outer_extent.is_one() {
            self.index_map.insert(outer_id, Expr::zero());
            self.index_map.insert(inner_id, out_ind);
            self.extent_map.insert(inner_id, self.extent(out_id));
        } else if self.has_zero_merged(out_id) {
            let through_outer = if !inner_axis.is_broadcast() && !outer_axis.is_broadcast() {
                self.preferred_paths.contains(&outer_id) && !self.preferred_paths.contains(&inner_id)
            } else {
                inner_axis.is_broadcast() && !outer_axis.is_broadcast()
            };
            let (taken, zeroed) = if through_outer { (outer_id, inner_id) } else { (inner_id, outer_id) };
            self.index_map.insert(taken, out_ind);
            self.extent_map.insert(taken, self.extent(out_id));
            self.index_map.insert(zeroed, Expr::zero());
            self.extent_map.insert(zeroed, Expr::zero());
            self.zero_domains.insert(zeroed);
            self.zero_merged_in.insert(inner_id);
            self.zero_merged_in.insert(outer_id);
            trace!(out = %out_id, %taken, "zero-merged merge");
        } else {
            self.index_map.insert(outer_id, out_ind.div(&inner_extent));
            self.index_map.insert(inner_id, out_ind.rem(&inner_extent));
        }
    }

    // ========================================================================
    // Re-targeting
    // ========================================================================

    /// Propagation over `new_domain` seeded from this one through `id_map`
    /// (old axis to new axis). Extents carry over with the same "declared
    /// extent unless overridden" rule, and so do zero markers. The returned
    /// instance has already been run.
    pub fn update(
        &self,
        ctx: &LowerContext<'f>,
        new_domain: &TensorDomain,
        id_map: &HashMap<AxisId, AxisId>,
        root_contiguity: Vec<bool>,
        reference_halo_extent_map: HashMap<AxisId, Arc<Expr>>,
    ) -> Result<IndexCompute<'f>> {
        let mut index_map = HashMap::new();
        let mut extent_map = HashMap::new();
        let mut zero_domains = HashSet::new();
        let mut zero_merged_in = HashSet::new();

        for (&prev_id, &new_id) in id_map {
            if let Some(index) = self.index_map.get(&prev_id) {
                index_map.insert(new_id, index.clone());
            }
            extent_map.insert(new_id, self.extent(prev_id));
            if self.zero_domains.contains(&prev_id) {
                zero_domains.insert(new_id);
            }
            if self.zero_merged_in.contains(&prev_id) {
                zero_merged_in.insert(new_id);
            }
        }

        let mut updated = IndexCompute::builder()
            .ctx(ctx)
            .domain(new_domain)
            .index_map(index_map)
            .extent_map(extent_map)
            .zero_domains(zero_domains)
            .zero_merged_in(zero_merged_in)
            .root_contiguity(root_contiguity)
            .reference_halo_extent_map(reference_halo_extent_map)
            .build()?;
        updated.run();
        Ok(updated)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Extent to use for `id`: the overridden one if any, else the declared
    /// extent.
    pub fn extent(&self, id: AxisId) -> Arc<Expr> {
        self.extent_map.get(&id).cloned().unwrap_or_else(|| self.graph.axis(id).extent().clone())
    }

    pub fn is_zero(&self, id: AxisId) -> bool {
        self.zero_domains.contains(&id)
    }

    pub fn has_zero_merged(&self, id: AxisId) -> bool {
        self.zero_merged_in.contains(&id) || self.is_zero(id)
    }

    pub fn index_of(&self, id: AxisId) -> Option<&Arc<Expr>> {
        self.index_map.get(&id)
    }

    pub fn index_map(&self) -> &HashMap<AxisId, Arc<Expr>> {
        &self.index_map
    }

    pub fn extent_map(&self) -> &HashMap<AxisId, Arc<Expr>> {
        &self.extent_map
    }

    pub fn zero_domains(&self) -> &HashSet<AxisId> {
        &self.zero_domains
    }

    pub fn zero_merged_in(&self) -> &HashSet<AxisId> {
        &self.zero_merged_in
    }

    pub fn contig_ids(&self) -> &HashSet<AxisId> {
        &self.contig_ids
    }

    pub fn leaf(&self) -> &[AxisId] {
        &self.leaf
    }

    pub(crate) fn graph(&self) -> &'f DomainGraph {
        self.graph
    }

    pub(crate) fn index_map_mut(&mut self) -> &mut HashMap<AxisId, Arc<Expr>> {
        &mut self.index_map
    }

    pub(crate) fn extent_map_mut(&mut self) -> &mut HashMap<AxisId, Arc<Expr>> {
        &mut self.extent_map
    }
}
