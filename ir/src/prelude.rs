//! Common imports for building fusions and index expressions.
//!
//! ```rust,ignore
//! use tessera_ir::prelude::*;
//! ```

pub use crate::axis::AxisId;
pub use crate::domain::TensorDomain;
pub use crate::expr::{Expr, ExprKey, IntoExpr};
pub use crate::fusion::Fusion;
pub use crate::graph::DomainGraph;
pub use crate::loops::{ForLoop, LoopId};
pub use crate::tensor::{Swizzle, TensorId, TensorOp};
pub use crate::types::{IterType, MemoryType, ParallelType};

pub use std::sync::Arc;
