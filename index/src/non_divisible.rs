//! Splits that need their own predicate.
//!
//! A root predicate only bounds root indices. When an intermediate axis is
//! split by a factor that does not divide its extent, the padded tail of the
//! split iterates past the intermediate extent while every root index can
//! still be in range, so the split input is predicated on its own.

use std::collections::HashMap;

use tessera_ir::{AxisId, ExpressionEvaluator, Fusion, Split, TensorId, Transform};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct NonDivisibleSplitInfo {
    splits_to_predicate: HashMap<TensorId, Vec<Split>>,
}

impl NonDivisibleSplitInfo {
    pub fn build(fusion: &Fusion) -> Self {
        let graph = fusion.graph();
        let mut info = Self::default();
        for tensor in fusion.tensors() {
            let maybe_rfactor = tensor.domain().maybe_rfactor();
            let splits: Vec<Split> = graph
                .exprs_to(tensor.domain().leaf())
                .into_iter()
                .filter_map(|tid| match graph.transform(tid) {
                    Transform::Split(split) => Some(split),
                    Transform::Merge(_) => None,
                })
                .filter(|split| !maybe_rfactor.contains(&split.input))
                .filter(|split| !is_divisible(fusion, split))
                .cloned()
                .collect();
            if !splits.is_empty() {
                trace!(tensor = %tensor.id(), count = splits.len(), "non-divisible splits");
                info.splits_to_predicate.insert(tensor.id(), splits);
            }
        }
        info
    }

    /// Non-divisible splits of `tensor` that are predicated.
    pub fn splits_to_predicate(&self, tensor: TensorId) -> &[Split] {
        self.splits_to_predicate.get(&tensor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Inputs of the splits of `tensor` that are predicated.
    pub fn axes_to_predicate(&self, tensor: TensorId) -> impl Iterator<Item = AxisId> + '_ {
        self.splits_to_predicate(tensor).iter().map(|split| split.input)
    }
}

/// Statically known to divide; symbolic extents or factors never are.
fn is_divisible(fusion: &Fusion, split: &Split) -> bool {
    let extent = fusion.graph().axis(split.input).extent();
    match (ExpressionEvaluator::evaluate_const(extent), ExpressionEvaluator::evaluate_const(&split.factor)) {
        (Some(e), Some(f)) if f != 0 => e % f == 0,
        _ => false,
    }
}
