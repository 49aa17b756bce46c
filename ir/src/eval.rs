//! Constant evaluation of index expressions.
//!
//! [`eval_unary_op`] and [`eval_binary_op`] are the folding primitives used
//! by the simplifying constructors. [`ExpressionEvaluator`] evaluates whole
//! expressions against bound runtime values, memoizing every node it folds.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::ensure;
use tracing::trace;

use crate::error::{BindNonLeafSnafu, Result};
use crate::expr::{Expr, ExprOp, VarKind};
use crate::types::{BinaryOp, ConstValue, ParallelType, UnaryOp};

/// Evaluate a unary operation on a constant value.
///
/// Returns `None` if the operation is not defined for the value type.
pub fn eval_unary_op(op: UnaryOp, v: ConstValue) -> Option<ConstValue> {
    match op {
        UnaryOp::Neg => eval_neg(v),
    }
}

/// Evaluate a binary operation on constant values.
///
/// Returns `None` if:
/// - The operands have incompatible types
/// - The operation would divide by zero
///
/// # Semantics
///
/// - `Div` and `Mod` truncate toward zero
/// - `CeilDiv` is `(a + b - 1) / b`
/// - Integer operations use wrapping arithmetic
pub fn eval_binary_op(op: BinaryOp, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    match op {
        BinaryOp::Add => eval_int(a, b, |x, y| Some(x.wrapping_add(y))),
        BinaryOp::Sub => eval_int(a, b, |x, y| Some(x.wrapping_sub(y))),
        BinaryOp::Mul => eval_int(a, b, |x, y| Some(x.wrapping_mul(y))),
        BinaryOp::Div => eval_int(a, b, i64::checked_div),
        BinaryOp::Mod => eval_int(a, b, i64::checked_rem),
        BinaryOp::CeilDiv => eval_int(a, b, eval_ceil_div),
        BinaryOp::Min => eval_int(a, b, |x, y| Some(x.min(y))),
        BinaryOp::Max => eval_int(a, b, |x, y| Some(x.max(y))),
        BinaryOp::Lt => eval_cmp(a, b, |x, y| x < y),
        BinaryOp::Ge => eval_cmp(a, b, |x, y| x >= y),
        BinaryOp::And => match (a, b) {
            (ConstValue::Bool(x), ConstValue::Bool(y)) => Some(ConstValue::Bool(x && y)),
            _ => None,
        },
    }
}

// ============================================================================
// Operations
// ============================================================================

#[inline]
fn eval_neg(v: ConstValue) -> Option<ConstValue> {
    match v {
        ConstValue::Int(x) => Some(ConstValue::Int(x.wrapping_neg())),
        ConstValue::Bool(_) => None,
    }
}

#[inline]
fn eval_int(a: ConstValue, b: ConstValue, f: impl FnOnce(i64, i64) -> Option<i64>) -> Option<ConstValue> {
    match (a, b) {
        (ConstValue::Int(x), ConstValue::Int(y)) => f(x, y).map(ConstValue::Int),
        _ => None,
    }
}

#[inline]
fn eval_cmp(a: ConstValue, b: ConstValue, f: impl FnOnce(i64, i64) -> bool) -> Option<ConstValue> {
    match (a, b) {
        (ConstValue::Int(x), ConstValue::Int(y)) => Some(ConstValue::Bool(f(x, y))),
        _ => None,
    }
}

#[inline]
fn eval_ceil_div(x: i64, y: i64) -> Option<i64> {
    x.wrapping_add(y).wrapping_sub(1).checked_div(y)
}

// ============================================================================
// Expression evaluator
// ============================================================================

/// Evaluates expressions against bound runtime values.
///
/// Results of every evaluated node are cached by expression id. The cache
/// is append-only: expressions never change once built, so no entry is ever
/// invalidated.
#[derive(Debug, Default, Clone)]
pub struct ExpressionEvaluator {
    known_values: HashMap<u64, ConstValue>,
    named_values: HashMap<String, ConstValue>,
    parallel_dims: HashMap<ParallelType, i64>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an expression that depends on no runtime values.
    pub fn evaluate_const(expr: &Arc<Expr>) -> Option<i64> {
        Self::new().evaluate_int(expr)
    }

    /// Bind a leaf variable (identified by its node) to a value.
    pub fn bind(&mut self, expr: &Arc<Expr>, value: i64) -> Result<()> {
        ensure!(expr.is_var(), BindNonLeafSnafu { expr: expr.to_string() });
        self.known_values.insert(expr.id(), ConstValue::Int(value));
        Ok(())
    }

    /// Bind every variable with this name.
    pub fn bind_name(&mut self, name: impl Into<String>, value: i64) {
        self.named_values.insert(name.into(), ConstValue::Int(value));
    }

    /// Bind the size of a parallel dimension.
    pub fn bind_parallel_dim(&mut self, pt: ParallelType, value: i64) {
        self.parallel_dims.insert(pt, value);
    }

    pub fn evaluate_int(&mut self, expr: &Arc<Expr>) -> Option<i64> {
        self.evaluate(expr).and_then(ConstValue::as_int)
    }

    pub fn evaluate(&mut self, expr: &Arc<Expr>) -> Option<ConstValue> {
        if let Some(cv) = expr.as_const() {
            return Some(cv);
        }
        if let Some(cv) = self.known_values.get(&expr.id()) {
            return Some(*cv);
        }

        let value = match expr.op() {
            ExprOp::Const(cv) => Some(*cv),
            ExprOp::Var(var) => match var.kind {
                VarKind::MagicZero => Some(ConstValue::Int(0)),
                VarKind::ParallelDim(pt) => self
                    .parallel_dims
                    .get(&pt)
                    .map(|v| ConstValue::Int(*v))
                    .or_else(|| self.named_values.get(&var.name).copied()),
                _ => self.named_values.get(&var.name).copied(),
            },
            ExprOp::Unary(op, a) => {
                let a = self.evaluate(a)?;
                eval_unary_op(*op, a)
            }
            ExprOp::Binary(op, a, b) => {
                let a = self.evaluate(a)?;
                let b = self.evaluate(b)?;
                eval_binary_op(*op, a, b)
            }
        }?;

        trace!(expr.id = expr.id(), ?value, "evaluated");
        self.known_values.insert(expr.id(), value);
        Some(value)
    }
}
