//! Shared fixtures: small fusions, loop nests and evaluation shorthands.

use tessera_ir::ExpressionEvaluator;
use tessera_ir::prelude::*;

use crate::context::LowerContext;

/// Lowering context with every option at its default.
pub fn context(fusion: &Fusion) -> LowerContext<'_> {
    LowerContext::builder().fusion(fusion).build().expect("valid fusion")
}

/// One loop per leaf axis of `tensor`, named after `names`.
pub fn loops_for(fusion: &Fusion, tensor: TensorId, names: &[&str]) -> Vec<ForLoop> {
    let leaf = fusion.tensor(tensor).domain().leaf();
    assert_eq!(leaf.len(), names.len(), "one name per leaf axis");
    leaf.iter().zip(names).map(|(axis, name)| ForLoop::for_axis(fusion.graph(), *axis, name)).collect()
}

/// Evaluate `expr` with loop indices bound by name.
pub fn eval_with(expr: &Arc<Expr>, bindings: &[(&str, i64)]) -> Option<i64> {
    let mut ee = ExpressionEvaluator::new();
    for (name, value) in bindings {
        ee.bind_name(*name, *value);
    }
    ee.evaluate_int(expr)
}

/// `input -> output` pointwise pair of the given memory types.
pub fn pointwise_pair(extents: &[i64], input: MemoryType, output: MemoryType) -> (Fusion, TensorId, TensorId) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(extents, input);
    let t1 = fusion.derived_tensor(extents, output, TensorOp::Pointwise, vec![t0]);
    (fusion, t0, t1)
}
