//! Core [`Expr`] struct and structural queries.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::types::{BinaryOp, ConstValue, ParallelType, UnaryOp};

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(1);

/// Wrapper for `Arc<Expr>` that hashes and compares by stable id.
#[derive(Clone)]
pub struct ExprKey(pub Arc<Expr>);

impl std::fmt::Debug for ExprKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExprKey(id={})", self.0.id)
    }
}

impl PartialEq for ExprKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for ExprKey {}

impl Hash for ExprKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

/// What a leaf variable stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// Running index of a serial loop.
    LoopIndex,
    /// Runtime scalar such as a tensor stride or size.
    Named,
    /// `threadIdx.*` / `blockIdx.*`.
    ParallelIndex(ParallelType),
    /// `blockDim.*` / `gridDim.*`.
    ParallelDim(ParallelType),
    /// Zero that the backend compiler cannot see through.
    MagicZero,
}

/// Unelaborated leaf variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: String,
    pub kind: VarKind,
}

/// Operation of an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprOp {
    Const(ConstValue),
    Var(Var),
    Unary(UnaryOp, Arc<Expr>),
    Binary(BinaryOp, Arc<Expr>, Arc<Expr>),
}

/// Node of a symbolic index expression.
///
/// Every node carries a process-unique `id`. Equality is structural:
/// two separately built `i * 4` nodes compare equal. Identity comparisons
/// go through [`Expr::id`] or [`ExprKey`].
#[derive(Debug)]
pub struct Expr {
    pub(crate) id: u64,
    pub(crate) op: ExprOp,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id || self.op == other.op
    }
}

impl Eq for Expr {}

impl Expr {
    pub(crate) fn from_op(op: ExprOp) -> Arc<Self> {
        Arc::new(Self { id: NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed), op })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn op(&self) -> &ExprOp {
        &self.op
    }

    /// Constant payload of a leaf constant.
    pub fn as_const(&self) -> Option<ConstValue> {
        match &self.op {
            ExprOp::Const(cv) => Some(*cv),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_const().and_then(ConstValue::as_int)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_const().and_then(ConstValue::as_bool)
    }

    pub fn as_var(&self) -> Option<&Var> {
        match &self.op {
            ExprOp::Var(var) => Some(var),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self.op, ExprOp::Const(_))
    }

    pub fn is_zero(&self) -> bool {
        self.as_int() == Some(0)
    }

    pub fn is_one(&self) -> bool {
        self.as_int() == Some(1)
    }

    pub fn is_true(&self) -> bool {
        self.as_bool() == Some(true)
    }

    pub fn is_var(&self) -> bool {
        matches!(self.op, ExprOp::Var(_))
    }

    /// Whether this node has no defining operation.
    ///
    /// Constants and variables are leaves; everything else is elaborated
    /// arithmetic.
    pub fn is_leaf(&self) -> bool {
        matches!(self.op, ExprOp::Const(_) | ExprOp::Var(_))
    }

    pub fn is_magic_zero(&self) -> bool {
        matches!(&self.op, ExprOp::Var(Var { kind: VarKind::MagicZero, .. }))
    }

    /// Whether this is `x + magic_zero`.
    pub fn is_protected_with_magic_zero(&self) -> bool {
        matches!(&self.op, ExprOp::Binary(BinaryOp::Add, _, rhs) if rhs.is_magic_zero())
    }

    /// Direct operands of this node.
    pub fn sources(&self) -> SmallVec<[&Arc<Expr>; 2]> {
        match &self.op {
            ExprOp::Const(_) | ExprOp::Var(_) => SmallVec::new(),
            ExprOp::Unary(_, a) => smallvec::smallvec![a],
            ExprOp::Binary(_, a, b) => smallvec::smallvec![a, b],
        }
    }

    /// Leaf nodes reachable from this expression, each visited once.
    pub fn leaves(self: &Arc<Self>) -> Vec<Arc<Expr>> {
        let mut visited = HashSet::new();
        let mut stack = vec![self.clone()];
        let mut leaves = Vec::new();
        while let Some(node) = stack.pop() {
            if !visited.insert(node.id) {
                continue;
            }
            if node.is_leaf() {
                leaves.push(node);
                continue;
            }
            stack.extend(node.sources().into_iter().cloned());
        }
        leaves
    }

    /// Whether any variable appears in this expression.
    pub fn has_vars(self: &Arc<Self>) -> bool {
        self.leaves().iter().any(|leaf| leaf.is_var())
    }
}
