//! Intermediate representation for tensor index lowering.
//!
//! This crate defines the data that index lowering works on: symbolic index
//! expressions and their evaluator, the axis transform graph, tensor
//! domains, tensors grouped in a fusion, and the loops lowering emits.
//!
//! # Module Organization
//!
//! - [`types`] - Operator enums and axis/parallel/memory classifications
//! - [`expr`] - Symbolic index expressions with simplifying constructors
//! - [`eval`] - Constant folding and the [`ExpressionEvaluator`]
//! - [`axis`], [`transform`], [`graph`] - The split/merge axis graph
//! - [`domain`] - Root, rfactor and leaf domains of a tensor
//! - [`tensor`], [`fusion`] - Tensors and their defining operations
//! - [`loops`] - Lowered for-loops
//! - [`error`] - Error types and result handling

pub mod axis;
pub mod domain;
pub mod error;
pub mod eval;
pub mod expr;
pub mod fusion;
pub mod graph;
pub mod loops;
pub mod prelude;
pub mod tensor;
pub mod transform;
pub mod types;


pub use axis::{Axis, AxisId};
pub use domain::TensorDomain;
pub use error::{Error, Result};
pub use eval::{ExpressionEvaluator, eval_binary_op, eval_unary_op};
pub use expr::{Expr, ExprKey, ExprOp, IntoExpr, Var, VarKind};
pub use fusion::Fusion;
pub use graph::DomainGraph;
pub use loops::{DoubleBufferStage, ForLoop, LoopId};
pub use tensor::{Swizzle, Tensor, TensorExpr, TensorId, TensorOp};
pub use transform::{Merge, Split, Transform, TransformId};
pub use types::{BinaryOp, ConstValue, IterType, MemoryType, ParallelType, UnaryOp};
