//! Contiguous merge detection.
//!
//! A merge is contiguous when both of its inputs are contiguous and the root
//! axes they are derived from form an unbroken, in-order run of the root
//! domain in which every axis is marked contiguous. An axis produced by
//! such merges can be indexed with a single stride: the merged index is
//! the linear offset into the whole run.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use snafu::ensure;
use tracing::trace;

use tessera_ir::{AxisId, DomainGraph, Merge, Transform};

use crate::error::{ContiguityLengthMismatchSnafu, Result};
use crate::halo::HaloInfo;

/// Topmost axes of contiguous merge chains.
#[derive(Debug, Clone, Default)]
pub struct ContigIds {
    contig_ids: HashSet<AxisId>,
    /// Contiguous axis to every finer axis it subsumes.
    within_contig_ids: HashMap<AxisId, HashSet<AxisId>>,
    is_contig_root: HashMap<AxisId, bool>,
}

impl ContigIds {
    /// Analyze the transforms leading from `root` to `ids`.
    ///
    /// A root axis starts contiguous when its flag is set and it has no
    /// halo.
    pub fn new(
        graph: &DomainGraph,
        halo: &HaloInfo,
        ids: &[AxisId],
        root: &[AxisId],
        root_contiguity: &[bool],
    ) -> Result<Self> {
        let mut this = Self::default();
        if ids.is_empty() {
            return Ok(this);
        }

        ensure!(
            root.len() == root_contiguity.len(),
            ContiguityLengthMismatchSnafu { expected: root.len(), actual: root_contiguity.len() }
        );

        for (&id, &contiguous) in root.iter().zip_eq(root_contiguity) {
            let is_contig = contiguous && !halo.root_axis_info(id).has_halo();
            if is_contig {
                this.contig_ids.insert(id);
                this.within_contig_ids.insert(id, HashSet::new());
            }
            this.is_contig_root.insert(id, is_contig);
        }

        for tid in graph.exprs_to(ids) {
            // Split outputs are never contiguous.
            if let Transform::Merge(merge) = graph.transform(tid) {
                this.handle_merge(graph, root, merge);
            }
        }

        Ok(this)
    }

    fn handle_merge(&mut self, graph: &DomainGraph, root: &[AxisId], merge: &Merge) {
        if !self.is_contig(merge.inner) || !self.is_contig(merge.outer) {
            return;
        }

        let mut ordered_inputs = graph.inputs_of_ordered_as(&[merge.outer], root);
        ordered_inputs.extend(graph.inputs_of_ordered_as(&[merge.inner], root));

        let all_contig_roots = ordered_inputs.iter().all(|id| {
            let axis = graph.axis(*id);
            self.is_contig_root.get(id).copied().unwrap_or(false) && !axis.is_broadcast() && !axis.is_reduction()
        });
        if !all_contig_roots {
            return;
        }

        // Skip to the first input, then every input must follow in order.
        let Some(first) = ordered_inputs.first() else { return };
        let Some(start) = root.iter().position(|id| id == first) else { return };
        let matched = root[start..].iter().zip(&ordered_inputs).take_while(|(r, i)| r == i).count();
        if matched != ordered_inputs.len() {
            return;
        }

        self.contig_ids.remove(&merge.inner);
        self.contig_ids.remove(&merge.outer);
        self.contig_ids.insert(merge.out);

        let mut within_out = HashSet::from([merge.inner, merge.outer]);
        for id in [merge.inner, merge.outer] {
            if let Some(within) = self.within_contig_ids.remove(&id) {
                within_out.extend(within);
            }
        }
        trace!(out = %merge.out, subsumed = within_out.len(), "contiguous merge");
        self.within_contig_ids.insert(merge.out, within_out);
    }

    pub fn is_contig(&self, id: AxisId) -> bool {
        self.contig_ids.contains(&id)
    }

    pub fn contig_ids(&self) -> &HashSet<AxisId> {
        &self.contig_ids
    }

    pub fn within_contig_ids(&self) -> &HashMap<AxisId, HashSet<AxisId>> {
        &self.within_contig_ids
    }
}
