//! Reductions over a single element.

use std::collections::HashSet;

use tessera_ir::{AxisId, DomainGraph};

/// Reduction axes of constant extent one, and every axis derived only from
/// them. Such axes reduce nothing and are skipped by indexing.
#[derive(Debug, Clone, Default)]
pub struct TrivialReductionInfo {
    derived: HashSet<AxisId>,
}

impl TrivialReductionInfo {
    pub fn build(graph: &DomainGraph) -> Self {
        let mut derived = HashSet::new();
        // Outputs are always created after their inputs, so one pass in
        // handle order sees every input before its uses.
        for axis in graph.axes() {
            let trivial = match axis.definition() {
                None => axis.is_reduction() && axis.extent().as_int() == Some(1),
                Some(tid) => graph.transform(tid).inputs().iter().all(|input| derived.contains(input)),
            };
            if trivial {
                derived.insert(axis.id());
            }
        }
        Self { derived }
    }

    pub fn is_derived(&self, axis: AxisId) -> bool {
        self.derived.contains(&axis)
    }
}
