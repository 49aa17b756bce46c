//! Symbolic index expressions.
//!
//! Index and predicate arithmetic is built from [`Expr`] nodes: integer and
//! boolean constants, named runtime scalars, loop indices and parallel
//! indices, combined with the operators in [`BinaryOp`](crate::BinaryOp).
//! Constructors fold constants and drop identities so the expressions handed
//! to later passes stay small.

pub mod constructors;
pub mod core;
pub mod display;

pub use constructors::IntoExpr;
pub use core::{Expr, ExprKey, ExprOp, Var, VarKind};
