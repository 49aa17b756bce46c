//! Start and stop offsets of partially split root axes.

use std::collections::HashMap;
use std::sync::Arc;

use tessera_ir::{AxisId, Expr, Fusion, Transform};

/// Offsets of every axis that is the input of a partial split.
#[derive(Debug, Clone, Default)]
pub struct PartialSplitMap {
    start_offsets: HashMap<AxisId, Arc<Expr>>,
    stop_offsets: HashMap<AxisId, Arc<Expr>>,
}

impl PartialSplitMap {
    pub fn build(fusion: &Fusion) -> Self {
        let graph = fusion.graph();
        let mut map = Self::default();
        for tensor in fusion.tensors() {
            for tid in graph.exprs_to(tensor.domain().leaf()) {
                let Transform::Split(split) = graph.transform(tid) else { continue };
                if !split.is_partial() {
                    continue;
                }
                map.start_offsets.insert(split.input, split.start_offset.clone());
                map.stop_offsets.insert(split.input, split.stop_offset.clone());
            }
        }
        map
    }

    pub fn start_offset(&self, axis: AxisId) -> Option<&Arc<Expr>> {
        self.start_offsets.get(&axis)
    }

    pub fn stop_offset(&self, axis: AxisId) -> Option<&Arc<Expr>> {
        self.stop_offsets.get(&axis)
    }
}
