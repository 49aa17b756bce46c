//! Expression constructors.
//!
//! Leaf constructors live on [`Expr`]; arithmetic is built with methods on
//! `Arc<Expr>` that fold constants and drop identities before allocating a
//! node. [`Expr::binary`] is the raw, non-simplifying form.

use std::sync::Arc;

use crate::eval::{eval_binary_op, eval_unary_op};
use crate::types::{BinaryOp, ConstValue, ParallelType, UnaryOp};

use super::core::{Expr, ExprOp, Var, VarKind};

/// Name of the runtime magic-zero scalar.
pub const MAGIC_ZERO_NAME: &str = "nvfuser_zero";

/// Conversion into an index expression.
pub trait IntoExpr {
    fn into_expr(self) -> Arc<Expr>;
}

impl IntoExpr for i64 {
    fn into_expr(self) -> Arc<Expr> {
        Expr::int(self)
    }
}

impl IntoExpr for Arc<Expr> {
    fn into_expr(self) -> Arc<Expr> {
        self
    }
}

impl IntoExpr for &Arc<Expr> {
    fn into_expr(self) -> Arc<Expr> {
        self.clone()
    }
}

// ============================================================================
// Leaves
// ============================================================================

impl Expr {
    pub fn constant(value: ConstValue) -> Arc<Self> {
        Self::from_op(ExprOp::Const(value))
    }

    pub fn int(value: i64) -> Arc<Self> {
        Self::constant(ConstValue::Int(value))
    }

    pub fn bool(value: bool) -> Arc<Self> {
        Self::constant(ConstValue::Bool(value))
    }

    pub fn zero() -> Arc<Self> {
        Self::int(0)
    }

    pub fn one() -> Arc<Self> {
        Self::int(1)
    }

    fn var(name: impl Into<String>, kind: VarKind) -> Arc<Self> {
        Self::from_op(ExprOp::Var(Var { name: name.into(), kind }))
    }

    /// Running index of a serial loop.
    pub fn loop_index(name: impl Into<String>) -> Arc<Self> {
        Self::var(name, VarKind::LoopIndex)
    }

    /// Runtime scalar such as `T0.stride[1]`.
    pub fn named(name: impl Into<String>) -> Arc<Self> {
        Self::var(name, VarKind::Named)
    }

    /// `threadIdx.x`, `blockIdx.y`, ...
    pub fn parallel_index(pt: ParallelType) -> Arc<Self> {
        Self::var(pt.to_string(), VarKind::ParallelIndex(pt))
    }

    /// `blockDim.x`, `gridDim.y`, ... Serial-like bindings get the plain
    /// binding name.
    pub fn parallel_dim(pt: ParallelType) -> Arc<Self> {
        let name = pt.dim_name().map(str::to_string).unwrap_or_else(|| pt.to_string());
        Self::var(name, VarKind::ParallelDim(pt))
    }

    pub fn magic_zero() -> Arc<Self> {
        Self::var(MAGIC_ZERO_NAME, VarKind::MagicZero)
    }

    /// Binary node without any simplification.
    pub fn binary(op: BinaryOp, lhs: Arc<Expr>, rhs: Arc<Expr>) -> Arc<Self> {
        Self::from_op(ExprOp::Binary(op, lhs, rhs))
    }

    /// Unary node without any simplification.
    pub fn unary(op: UnaryOp, operand: Arc<Expr>) -> Arc<Self> {
        Self::from_op(ExprOp::Unary(op, operand))
    }
}

// ============================================================================
// Simplifying arithmetic
// ============================================================================

#[allow(clippy::should_implement_trait)]
impl Expr {
    pub fn add(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Mul, self, rhs)
    }

    pub fn div(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Div, self, rhs)
    }

    pub fn rem(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Mod, self, rhs)
    }

    pub fn ceil_div(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::CeilDiv, self, rhs)
    }

    pub fn min(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Min, self, rhs)
    }

    pub fn max(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Max, self, rhs)
    }

    pub fn lt(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Lt, self, rhs)
    }

    pub fn ge(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::Ge, self, rhs)
    }

    pub fn and(self: &Arc<Self>, rhs: &Arc<Expr>) -> Arc<Expr> {
        simplified_binary(BinaryOp::And, self, rhs)
    }

    pub fn neg(self: &Arc<Self>) -> Arc<Expr> {
        if let Some(cv) = self.as_const()
            && let Some(folded) = eval_unary_op(UnaryOp::Neg, cv)
        {
            return Expr::constant(folded);
        }
        Expr::unary(UnaryOp::Neg, self.clone())
    }

    /// `self + value` for an integer literal.
    pub fn add_int(self: &Arc<Self>, value: i64) -> Arc<Expr> {
        self.add(&Expr::int(value))
    }

    /// `self * value` for an integer literal.
    pub fn mul_int(self: &Arc<Self>, value: i64) -> Arc<Expr> {
        self.mul(&Expr::int(value))
    }
}

fn simplified_binary(op: BinaryOp, lhs: &Arc<Expr>, rhs: &Arc<Expr>) -> Arc<Expr> {
    if let (Some(a), Some(b)) = (lhs.as_const(), rhs.as_const())
        && let Some(folded) = eval_binary_op(op, a, b)
    {
        return Expr::constant(folded);
    }
    simplify_identity(op, lhs, rhs).unwrap_or_else(|| Expr::binary(op, lhs.clone(), rhs.clone()))
}

fn simplify_identity(op: BinaryOp, lhs: &Arc<Expr>, rhs: &Arc<Expr>) -> Option<Arc<Expr>> {
    match op {
        BinaryOp::Add => {
            if lhs.is_zero() {
                return Some(rhs.clone());
            }
            if rhs.is_zero() {
                return Some(lhs.clone());
            }
            // x + (-c) reads better as x - c
            let negated = rhs.as_int().filter(|c| *c < 0).and_then(i64::checked_neg)?;
            Some(Expr::binary(BinaryOp::Sub, lhs.clone(), Expr::int(negated)))
        }
        BinaryOp::Sub => rhs.is_zero().then(|| lhs.clone()),
        BinaryOp::Mul => {
            if lhs.is_zero() || rhs.is_zero() {
                Some(Expr::zero())
            } else if lhs.is_one() {
                Some(rhs.clone())
            } else if rhs.is_one() {
                Some(lhs.clone())
            } else {
                None
            }
        }
        BinaryOp::Div | BinaryOp::CeilDiv => {
            if rhs.is_one() {
                Some(lhs.clone())
            } else if lhs.is_zero() && op == BinaryOp::Div {
                Some(Expr::zero())
            } else {
                None
            }
        }
        BinaryOp::Mod => (rhs.is_one() || lhs.is_zero()).then(Expr::zero),
        BinaryOp::And => {
            if lhs.as_bool() == Some(false) || rhs.as_bool() == Some(false) {
                Some(Expr::bool(false))
            } else if lhs.is_true() {
                Some(rhs.clone())
            } else if rhs.is_true() {
                Some(lhs.clone())
            } else {
                None
            }
        }
        BinaryOp::Min | BinaryOp::Max | BinaryOp::Lt | BinaryOp::Ge => None,
    }
}
