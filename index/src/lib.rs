//! Index and predicate generation for scheduled tensor kernels.
//!
//! Given a [`Fusion`](tessera_ir::Fusion) whose tensors have been split,
//! merged, reordered and parallelized, this crate computes the symbolic
//! index of every tensor access inside a loop nest and the predicates that
//! keep those accesses in bounds.
//!
//! # Module Organization
//!
//! - [`context`] - [`LowerContext`], the per-lowering analyses
//! - [`ca_map`] - Co-iteration classes of axes (parallel, index and loop)
//! - [`trivial_reduction`], [`partial_split`], [`non_divisible`], [`halo`],
//!   [`double_buffer`], [`parallel_dims`] - Analyses consulted while indexing
//! - [`contiguity`] - Merges that can be indexed with a single stride
//! - [`index_compute`] - Leaf-to-root index propagation
//! - [`reference`], [`loop_index`] - Reference tensors and loop index seeds
//! - [`offsets`] - Halo, gather, shift and partial split offsets
//! - [`swizzle`] - Shared memory swizzles
//! - [`strided`] - Per-dimension strided indices of producers and consumers
//! - [`predicate`] - Start and stop predicates of root axes
//! - [`replay`] - Producer/consumer axis pairing
//! - [`config`], [`error`] - Configuration and error types
//!
//! # Example
//!
//! ```ignore
//! let ctx = LowerContext::builder().fusion(&fusion).build()?;
//! let index = consumer_index(&ctx, out, &loops)?;
//! let (predicates, _) = reference_root_predicates(&ctx, out, &loops, None, false)?;
//! ```

pub mod ca_map;
pub mod config;
pub mod context;
pub mod contiguity;
pub mod double_buffer;
pub mod error;
pub mod halo;
pub mod index_compute;
pub mod loop_index;
pub mod non_divisible;
pub mod offsets;
pub mod parallel_dims;
pub mod partial_split;
pub mod predicate;
pub mod reference;
pub mod replay;
pub mod strided;
pub mod swizzle;
pub mod trivial_reduction;


pub use ca_map::{CaMaps, ComputeAtMap, MappingMode};
pub use config::IndexConfig;
pub use context::{LowerContext, is_lowering};
pub use contiguity::ContigIds;
pub use error::{IndexError, Result};
pub use halo::{AxisHaloInfo, HaloInfo};
pub use index_compute::IndexCompute;
pub use parallel_dims::{ParallelDimensionMap, equal_dim};
pub use predicate::{RootPredicateInfo, reference_root_predicates};
pub use reference::ReferenceTensor;
pub use strided::{
    TensorIndex, consumer_index, consumer_strided_indices, producer_index, producer_strided_indices,
};
