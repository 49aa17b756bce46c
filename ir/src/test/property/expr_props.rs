//! Simplifying constructors must not change what an expression evaluates to.

use std::sync::Arc;

use proptest::prelude::*;

use crate::eval::ExpressionEvaluator;
use crate::expr::Expr;

use super::generators::*;

fn vars() -> Vec<Arc<Expr>> {
    (0..3).map(|i| Expr::named(format!("x{i}"))).collect()
}

fn evaluator(values: [i64; 3]) -> ExpressionEvaluator {
    let mut ee = ExpressionEvaluator::new();
    for (i, v) in values.iter().enumerate() {
        ee.bind_name(format!("x{i}"), *v);
    }
    ee
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Whenever the unsimplified tree evaluates, the simplified one agrees.
    #[test]
    fn simplification_preserves_value(tree in arb_expr_tree(), values in prop::array::uniform3(-30i64..=30)) {
        let vars = vars();
        let raw = tree.build_raw(&vars);
        let simplified = tree.build(&vars);

        if let Some(expected) = evaluator(values).evaluate_int(&raw) {
            prop_assert_eq!(evaluator(values).evaluate_int(&simplified), Some(expected));
        }
    }

    /// Trees over constants only fold to a single constant when defined.
    #[test]
    fn constant_trees_fold(tree in arb_expr_tree()) {
        let built = tree.build(&vars());
        if !built.has_vars() && ExpressionEvaluator::evaluate_const(&tree.build_raw(&vars())).is_some() {
            prop_assert!(built.is_const(), "{built} was not folded");
        }
    }
}
