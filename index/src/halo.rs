//! Halo regions of axes.
//!
//! A shift or gather reads its producer outside the consumer's logical
//! range. The producer then has to provide that extra region, its halo, on
//! the matching side of the axis. Halo widths are attached to root axes and
//! carried down to the axes derived from them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tessera_ir::{AxisId, DomainGraph, Expr, Fusion, TensorOp, Transform};
use tracing::{debug, trace};

use crate::replay::pairwise_root_map;

/// Left and right halo widths of a root axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AxisHaloInfo {
    widths: [i64; 2],
}

impl AxisHaloInfo {
    pub fn new(left: i64, right: i64) -> Self {
        Self { widths: [left, right] }
    }

    /// Width at side `pos`: 0 is left, 1 is right. Any other side has none.
    pub fn width_at(&self, pos: usize) -> i64 {
        self.widths.get(pos).copied().unwrap_or(0)
    }

    /// Sum of both sides.
    pub fn width(&self) -> i64 {
        self.widths[0] + self.widths[1]
    }

    pub fn has_halo(&self) -> bool {
        self.width() > 0
    }

    /// Widen each side to at least the width of `other`.
    pub fn merge(&mut self, other: &AxisHaloInfo) {
        self.widths[0] = self.widths[0].max(other.widths[0]);
        self.widths[1] = self.widths[1].max(other.widths[1]);
    }

    fn grow(&mut self, pos: usize, width: i64) {
        self.widths[pos] += width;
    }
}

#[derive(Debug, Clone, Default)]
pub struct HaloInfo {
    root_axis_map: HashMap<AxisId, AxisHaloInfo>,
    /// Halo widths of derived axes.
    halo_width_map: HashMap<AxisId, i64>,
    /// Halo-extended extents.
    extent_map: HashMap<AxisId, Arc<Expr>>,
    /// Root axis to the derived axes carrying its halo.
    inheritance_map: HashMap<AxisId, HashSet<AxisId>>,
}

impl HaloInfo {
    /// Propagate `seeds` and the halo required by shifts and gathers from
    /// consumers to producers, then down every tensor's transforms.
    pub fn build(fusion: &Fusion, seeds: &HashMap<AxisId, AxisHaloInfo>) -> Self {
        let mut info = Self { root_axis_map: seeds.clone(), ..Self::default() };

        for consumer in fusion.tensors().rev() {
            let Some(def) = consumer.definition() else { continue };
            for &producer in &def.inputs {
                for (p_id, c_id) in pairwise_root_map(fusion, producer, consumer.id()) {
                    let mut required = info.root_axis_info(c_id);
                    let position = consumer.domain().root_position(c_id);
                    match (&def.op, position) {
                        (TensorOp::Shift { offsets, .. }, Some(pos)) => {
                            let offset = offsets.get(pos).copied().unwrap_or(0);
                            if offset > 0 {
                                required.grow(0, offset);
                            } else {
                                required.grow(1, -offset);
                            }
                        }
                        (TensorOp::Gather { pad_width, .. }, Some(pos)) => {
                            if let Some([left, right]) = pad_width.get(pos) {
                                required.grow(0, *left);
                                required.grow(1, *right);
                            }
                        }
                        _ => {}
                    }
                    if required.has_halo() {
                        info.root_axis_map.entry(p_id).or_default().merge(&required);
                    }
                }
            }
        }

        for tensor in fusion.tensors() {
            info.build_domain(fusion.graph(), tensor.domain().root(), tensor.domain().leaf());
        }

        debug!(halo_roots = info.root_axis_map.values().filter(|h| h.has_halo()).count(), "halo info built");
        info
    }

    fn build_domain(&mut self, graph: &DomainGraph, root: &[AxisId], leaf: &[AxisId]) {
        for &id in root {
            let halo = self.root_axis_info(id);
            if !halo.has_halo() {
                continue;
            }
            self.extent_map.insert(id, graph.axis(id).extent().add_int(halo.width()));
            self.inheritance_map.entry(id).or_default().insert(id);
        }

        for tid in graph.exprs_to(leaf) {
            match graph.transform(tid) {
                Transform::Split(split) => {
                    let width = self.input_halo_width(split.input);
                    if width == 0 {
                        continue;
                    }
                    let target = if split.inner_split { split.inner } else { split.outer };
                    self.halo_width_map.insert(target, width);
                    self.extent_map.insert(target, split.factor.add_int(width));
                    self.inherit(split.input, target);
                    trace!(input = %split.input, %target, width, "halo through split");
                }
                Transform::Merge(merge) => {
                    if !self.extent_map.contains_key(&merge.outer) && !self.extent_map.contains_key(&merge.inner) {
                        continue;
                    }
                    let extent = self.extent_or(graph, merge.outer).mul(&self.extent_or(graph, merge.inner));
                    self.extent_map.insert(merge.out, extent);
                    self.inherit(merge.outer, merge.out);
                    self.inherit(merge.inner, merge.out);
                }
            }
        }
    }

    fn input_halo_width(&self, id: AxisId) -> i64 {
        self.halo_width_map.get(&id).copied().unwrap_or_else(|| self.root_axis_info(id).width())
    }

    fn inherit(&mut self, from: AxisId, to: AxisId) {
        for inheriting in self.inheritance_map.values_mut() {
            if inheriting.contains(&from) {
                inheriting.insert(to);
            }
        }
    }

    fn extent_or(&self, graph: &DomainGraph, id: AxisId) -> Arc<Expr> {
        self.extent_map.get(&id).cloned().unwrap_or_else(|| graph.axis(id).extent().clone())
    }

    /// Halo of a root axis; zero widths when it has none.
    pub fn root_axis_info(&self, id: AxisId) -> AxisHaloInfo {
        self.root_axis_map.get(&id).copied().unwrap_or_default()
    }

    /// Halo-extended extent, if `id` carries halo.
    pub fn extent(&self, id: AxisId) -> Option<&Arc<Expr>> {
        self.extent_map.get(&id)
    }

    /// Whether a derived axis carries halo.
    pub fn has_halo_width(&self, id: AxisId) -> bool {
        self.halo_width_map.contains_key(&id)
    }

    pub fn halo_width(&self, id: AxisId) -> i64 {
        self.halo_width_map.get(&id).copied().unwrap_or(0)
    }

    /// Whether `leaf` carries halo inherited from `root`.
    pub fn is_halo_inherited(&self, root: AxisId, leaf: AxisId) -> bool {
        self.inheritance_map.get(&root).is_some_and(|ids| ids.contains(&leaf))
    }
}

/// Extent of a root axis including its halo.
pub(crate) fn halo_extent_of_root(halo: &HaloInfo, id: AxisId, extent: &Arc<Expr>) -> Arc<Expr> {
    let info = halo.root_axis_info(id);
    if info.has_halo() { extent.add_int(info.width()) } else { extent.clone() }
}
