//! Double-buffered tensors.
//!
//! A double-buffered tensor allocates two copies of the region below its
//! double-buffer loop and alternates between them each iteration, loading
//! iteration `i + 1` while computing on iteration `i`.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::OptionExt;
use tracing::debug;

use tessera_ir::{AxisId, DoubleBufferStage, Expr, ForLoop, Fusion, MemoryType, Tensor, TensorId};

use crate::ca_map::ComputeAtMap;
use crate::error::{MissingDoubleBufferAxisSnafu, Result};

#[derive(Debug, Clone, Default)]
pub struct DoubleBufferInfo {
    axes: HashMap<TensorId, AxisId>,
    original_alloc_sizes: HashMap<TensorId, Arc<Expr>>,
}

impl DoubleBufferInfo {
    pub fn build(fusion: &Fusion) -> Result<Self> {
        let mut info = Self::default();
        for tensor in fusion.tensors().filter(|t| t.is_double_buffered()) {
            let axis = double_buffer_axis_of(fusion, tensor)
                .context(MissingDoubleBufferAxisSnafu { tensor: tensor.id() })?;
            let size = original_alloc_size_of(fusion, tensor);
            debug!(tensor = %tensor.id(), %axis, %size, "double buffer");
            info.axes.insert(tensor.id(), axis);
            info.original_alloc_sizes.insert(tensor.id(), size);
        }
        Ok(info)
    }

    /// Leaf axis whose loop alternates the buffers of `tensor`.
    pub fn double_buffer_axis(&self, tensor: TensorId) -> Option<AxisId> {
        self.axes.get(&tensor).copied()
    }

    /// Size of one buffer of `tensor`.
    pub fn original_alloc_size(&self, tensor: TensorId) -> Option<&Arc<Expr>> {
        self.original_alloc_sizes.get(&tensor)
    }

    /// Replace the size of one buffer, e.g. after allocation rounded it up.
    pub fn set_original_alloc_size(&mut self, tensor: TensorId, size: Arc<Expr>) {
        self.original_alloc_sizes.insert(tensor, size);
    }

    /// Loop of `loops` running the double-buffer axis of `tensor`.
    pub fn double_buffer_loop<'l>(
        &self,
        tensor: TensorId,
        loops: &'l [ForLoop],
        loop_map: &ComputeAtMap,
        ignore_prologue: bool,
    ) -> Option<&'l ForLoop> {
        let axis = self.double_buffer_axis(tensor)?;
        double_buffer_loop(axis, loops, loop_map, ignore_prologue)
    }
}

/// Loop of `loops` mapped to `axis`. With `ignore_prologue`, a prologue copy
/// of the loop does not count.
pub fn double_buffer_loop<'l>(
    axis: AxisId,
    loops: &'l [ForLoop],
    loop_map: &ComputeAtMap,
    ignore_prologue: bool,
) -> Option<&'l ForLoop> {
    let found = loops.iter().find(|l| loop_map.are_mapped(l.axis(), axis))?;
    if ignore_prologue && found.double_buffer_stage() == DoubleBufferStage::Prolog {
        return None;
    }
    Some(found)
}

/// Innermost non-broadcast, non-thread leaf axis left of both the compute-at
/// position and the first unrolled axis.
fn double_buffer_axis_of(fusion: &Fusion, tensor: &Tensor) -> Option<AxisId> {
    let graph = fusion.graph();
    let leaf = tensor.domain().leaf();
    let first_unroll = leaf.iter().position(|id| graph.axis(*id).parallel_type().is_unrolled()).unwrap_or(leaf.len());
    let limit = tensor.compute_at_position().min(first_unroll).min(leaf.len());
    leaf[..limit].iter().rev().copied().find(|id| {
        let axis = graph.axis(*id);
        !axis.is_thread() && !axis.is_broadcast()
    })
}

/// Product of the extents right of the compute-at position that take
/// storage in the tensor's memory type.
fn original_alloc_size_of(fusion: &Fusion, tensor: &Tensor) -> Arc<Expr> {
    let graph = fusion.graph();
    let ca = tensor.compute_at_position().min(tensor.domain().ndims());
    tensor.domain().leaf()[ca..]
        .iter()
        .map(|id| graph.axis(*id))
        .filter(|axis| !axis.is_broadcast() && !axis.is_reduction())
        .filter(|axis| match tensor.memory_type() {
            MemoryType::Local => !axis.is_thread(),
            MemoryType::Shared => !axis.is_block_dim(),
            MemoryType::Global => true,
        })
        .fold(Expr::one(), |size, axis| size.mul(axis.extent()))
}
