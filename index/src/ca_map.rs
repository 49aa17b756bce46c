//! Co-iteration equivalence classes of axes.
//!
//! Axes of different tensors that are known to iterate together share a
//! class. Each class has a concrete representative used as the canonical
//! handle of the class.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use strum::{Display, EnumIter};
use tracing::debug;

use tessera_ir::{AxisId, DomainGraph, Fusion};

use crate::replay::consumer_to_producer;

/// What a [`ComputeAtMap`] considers co-iterating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum MappingMode {
    /// Every producer/consumer pair; used to validate parallel bindings.
    Parallel,
    /// Pairs that address the same elements; broadcast axes only join
    /// broadcast axes.
    Index,
    /// Pairs that share a loop: producer axes left of the compute-at
    /// position and their history.
    Loop,
}

/// Union-find over axis handles with a concrete axis per class.
#[derive(Debug, Clone)]
pub struct ComputeAtMap {
    mode: MappingMode,
    parent: HashMap<AxisId, AxisId>,
    concrete: HashMap<AxisId, AxisId>,
}

impl ComputeAtMap {
    pub fn new(mode: MappingMode) -> Self {
        Self { mode, parent: HashMap::new(), concrete: HashMap::new() }
    }

    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    fn find(&self, mut id: AxisId) -> AxisId {
        while let Some(&next) = self.parent.get(&id) {
            if next == id {
                break;
            }
            id = next;
        }
        id
    }

    /// Put `a` and `b` in the same class. Call [`finalize`](Self::finalize)
    /// afterwards to refresh concrete axes.
    pub fn map_axes(&mut self, a: AxisId, b: AxisId) {
        let ra = self.find(a);
        let rb = self.find(b);
        self.parent.entry(a).or_insert(a);
        self.parent.entry(b).or_insert(b);
        if ra != rb {
            let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent.insert(child, root);
        }
    }

    pub fn are_mapped(&self, a: AxisId, b: AxisId) -> bool {
        a == b || self.find(a) == self.find(b)
    }

    /// Concrete axis of the class of `id`; an unmapped axis is its own
    /// concrete axis.
    pub fn concrete(&self, id: AxisId) -> AxisId {
        self.concrete.get(&id).copied().unwrap_or(id)
    }

    /// Members of the class of `id`, sorted.
    pub fn class_of(&self, id: AxisId) -> Vec<AxisId> {
        let root = self.find(id);
        let members: Vec<AxisId> = self.parent.keys().copied().filter(|m| self.find(*m) == root).sorted().collect();
        if members.is_empty() { vec![id] } else { members }
    }

    /// Pick the concrete axis of every class: the first non-broadcast
    /// member, or the first member when all of them are broadcasts.
    pub fn finalize(&mut self, graph: &DomainGraph) {
        let mut best: HashMap<AxisId, AxisId> = HashMap::new();
        for &id in self.parent.keys() {
            let root = self.find(id);
            let key = |a: AxisId| (graph.axis(a).is_broadcast(), a);
            best.entry(root).and_modify(|cur| if key(id) < key(*cur) { *cur = id }).or_insert(id);
        }
        self.concrete = self.parent.keys().map(|&id| (id, best[&self.find(id)])).collect();
    }
}

/// The three co-iteration maps lowering consults.
#[derive(Debug, Clone)]
pub struct CaMaps {
    pub parallel: ComputeAtMap,
    pub index: ComputeAtMap,
    pub loops: ComputeAtMap,
}

impl CaMaps {
    /// Maps with no pairs; every axis is its own class.
    pub fn empty() -> Self {
        Self {
            parallel: ComputeAtMap::new(MappingMode::Parallel),
            index: ComputeAtMap::new(MappingMode::Index),
            loops: ComputeAtMap::new(MappingMode::Loop),
        }
    }

    /// Derive all three maps from every producer/consumer pair of `fusion`.
    pub fn build(fusion: &Fusion) -> Self {
        let mut maps = Self::empty();
        let graph = fusion.graph();

        for consumer in fusion.tensors() {
            let Some(def) = consumer.definition() else { continue };
            for &producer_id in &def.inputs {
                let producer = fusion.tensor(producer_id);
                let ca_leaves = &producer.domain().leaf()[..producer.compute_at_position().min(producer.domain().ndims())];
                let loop_axes: HashSet<AxisId> = graph.all_between(producer.domain().root(), ca_leaves);

                for (c_id, p_id) in consumer_to_producer(fusion, producer_id, consumer.id()) {
                    maps.parallel.map_axes(c_id, p_id);
                    if graph.axis(c_id).is_broadcast() == graph.axis(p_id).is_broadcast() {
                        maps.index.map_axes(c_id, p_id);
                    }
                    if loop_axes.contains(&p_id) {
                        maps.loops.map_axes(c_id, p_id);
                    }
                }
            }
        }

        maps.finalize(graph);
        debug!(
            parallel = maps.parallel.parent.len(),
            index = maps.index.parent.len(),
            loops = maps.loops.parent.len(),
            "co-iteration maps built"
        );
        maps
    }

    pub fn get(&self, mode: MappingMode) -> &ComputeAtMap {
        match mode {
            MappingMode::Parallel => &self.parallel,
            MappingMode::Index => &self.index,
            MappingMode::Loop => &self.loops,
        }
    }

    pub fn finalize(&mut self, graph: &DomainGraph) {
        self.parallel.finalize(graph);
        self.index.finalize(graph);
        self.loops.finalize(graph);
    }
}
