//! From loops to indices.
//!
//! Helpers that decide which index each loop of the nest contributes to a
//! tensor access, where a non-global tensor is allocated inside the nest,
//! and how the reference tensor is indexed from the loops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use snafu::{OptionExt, ensure};
use tracing::trace;

use tessera_ir::{AxisId, DomainGraph, Expr, ForLoop, LoopId, MemoryType, ParallelType, Tensor, TensorDomain};

use crate::context::LowerContext;
use crate::error::{InvalidReferenceSnafu, MissingAllocLoopSnafu, Result};
use crate::index_compute::IndexCompute;
use crate::reference::ReferenceTensor;

// ============================================================================
// Allocation point
// ============================================================================

/// Where a tensor is allocated in a loop nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocInfo {
    /// Innermost loop enclosing the allocation; `None` allocates outside
    /// every loop.
    pub alloc_loop: Option<LoopId>,
    pub alloc_pos: usize,
}

/// Allocation point of `tensor` in `loops`.
///
/// Global tensors are allocated outside the nest. Other tensors are
/// allocated inside the loops of their compute-at axes, stopping at the
/// first unrolled loop. `id_map` translates the tensor's leaf axes before
/// they are matched with loops.
pub fn alloc_information(
    ctx: &LowerContext<'_>,
    tensor: &Tensor,
    loops: &[ForLoop],
    id_map: &HashMap<AxisId, AxisId>,
) -> Result<AllocInfo> {
    let ca = tensor.compute_at_position();
    if tensor.memory_type() == MemoryType::Global {
        return Ok(AllocInfo { alloc_loop: None, alloc_pos: 0 });
    }

    let graph = ctx.fusion().graph();
    let mut alloc_loop = None;
    let mut next = 0;
    for pos in 0..ca.min(tensor.domain().ndims()) {
        let mut local = tensor.axis(pos);
        if let Some(mapped) = id_map.get(&local) {
            local = *mapped;
        }
        if ctx.trivial_reductions().is_derived(local) {
            continue;
        }
        let concrete = ctx.ca_parallel_map().concrete(local);
        let offset = loops[next..]
            .iter()
            .position(|l| {
                ctx.ca_loop_map().are_mapped(concrete, l.axis())
                    || ctx.ca_loop_map().are_mapped(local, l.axis())
                    || graph.axis(l.axis()).parallel_type() == ParallelType::Unroll
            })
            .context(MissingAllocLoopSnafu { tensor: tensor.id(), axis: local })?;
        let found = &loops[next + offset];
        if graph.axis(found.axis()).parallel_type() == ParallelType::Unroll {
            break;
        }
        alloc_loop = Some(found.id());
        next += offset + 1;
    }
    Ok(AllocInfo { alloc_loop, alloc_pos: ca })
}

// ============================================================================
// Loop to index
// ============================================================================

/// Index contributed by each loop to a non-global tensor, plus the loops
/// that do not contribute at all.
#[derive(Debug, Clone, Default)]
pub struct LoopIndexMap {
    pub indices: HashMap<LoopId, Arc<Expr>>,
    pub zero_loops: HashSet<LoopId>,
}

/// Map each loop to the index it contributes to `tensor`.
///
/// Loops outside the allocation only contribute when the buffer is shared
/// across the threads they are bound to. Inside the allocation, loops bound
/// to a block (shared memory) or a thread (local memory) dimension the
/// tensor is parallelized on the same way, and vectorized loops, contribute
/// zero. `double_buffer_loop` reads one iteration ahead.
pub fn index_map_from_tensor(
    ctx: &LowerContext<'_>,
    tensor: &Tensor,
    loops: &[ForLoop],
    alloc_loop: Option<LoopId>,
    as_consumer: bool,
    double_buffer_loop: Option<LoopId>,
) -> LoopIndexMap {
    let graph = ctx.fusion().graph();
    let memory_type = tensor.memory_type();
    let is_shared = memory_type == MemoryType::Shared;
    let is_global = memory_type == MemoryType::Global;
    let is_local = memory_type == MemoryType::Local;

    let mut within_alloc = alloc_loop.is_none();
    let mut map = LoopIndexMap::default();

    for l in loops {
        let axis = graph.axis(l.axis());
        let same_parallel_type = as_consumer || has_matching_parallel_axis(ctx, tensor, l.axis());

        let mut index = if !within_alloc {
            if (axis.is_thread_dim() && is_shared) || (axis.is_thread() && is_global) {
                l.index().clone()
            } else {
                map.zero_loops.insert(l.id());
                Expr::zero()
            }
        } else if (axis.is_block_dim() && is_shared && same_parallel_type)
            || (axis.is_thread() && is_local && same_parallel_type)
            || l.vectorize()
        {
            if !l.vectorize() {
                map.zero_loops.insert(l.id());
            }
            Expr::zero()
        } else {
            l.index().clone()
        };

        // A trivial loop only ever runs at its start.
        if index == *l.index() && l.is_trivial() {
            index = l.start().clone();
        }
        if Some(l.id()) == double_buffer_loop {
            index = index.add(&Expr::one());
        }
        map.indices.insert(l.id(), index);

        if !within_alloc && Some(l.id()) == alloc_loop {
            within_alloc = true;
        }
    }
    map
}

/// Whether `tensor` has a leaf axis that shares a class with `loop_axis`
/// and carries the same parallel type.
fn has_matching_parallel_axis(ctx: &LowerContext<'_>, tensor: &Tensor, loop_axis: AxisId) -> bool {
    let graph = ctx.fusion().graph();
    let ca = tensor.compute_at_position();
    tensor
        .domain()
        .leaf()
        .iter()
        .enumerate()
        .find(|(pos, id)| {
            ctx.ca_index_map().are_mapped(loop_axis, **id)
                || (ctx.ca_loop_map().are_mapped(loop_axis, **id) && *pos < ca)
        })
        .is_some_and(|(_, id)| graph.axis(*id).parallel_type() == graph.axis(loop_axis).parallel_type())
}

/// Loops inside the allocation of a local tensor whose index is used to
/// address it. Such accesses are only static when these loops are unrolled.
///
/// `id_map` translates the tensor's leaf axes (producer to consumer when
/// indexing a producer).
pub fn ensure_static_indexing(
    ctx: &LowerContext<'_>,
    tensor: &Tensor,
    alloc_loop: Option<LoopId>,
    loops: &[ForLoop],
    id_map: &HashMap<AxisId, AxisId>,
) -> Vec<LoopId> {
    if tensor.memory_type() != MemoryType::Local {
        return Vec::new();
    }

    let graph = ctx.fusion().graph();
    let mut within_alloc = alloc_loop.is_none();
    let mut required = Vec::new();
    for l in loops {
        if !within_alloc {
            within_alloc = Some(l.id()) == alloc_loop;
            continue;
        }
        if l.vectorize() || graph.axis(l.axis()).is_thread() {
            continue;
        }
        let indexed = tensor.domain().leaf().iter().any(|id| {
            let axis = graph.axis(*id);
            if axis.is_broadcast() || axis.is_reduction() || axis.is_stride() {
                return false;
            }
            let id = id_map.get(id).copied().unwrap_or(*id);
            ctx.ca_loop_map().are_mapped(l.axis(), id)
        });
        if indexed {
            required.push(l.id());
        }
    }
    required
}

// ============================================================================
// Reference indexing
// ============================================================================

/// Whether `index` of an unrolled loop should be protected with the magic
/// zero so that the backend cannot hoist it out of the unrolled body.
pub fn protect_with_magic_zero(
    ctx: &LowerContext<'_>,
    l: &ForLoop,
    reference_axis: Option<AxisId>,
    index: Option<&Arc<Expr>>,
) -> bool {
    if !ctx.config().magic_zero {
        return false;
    }
    let graph = ctx.fusion().graph();
    let ref_simple = reference_axis.is_none_or(|id| graph.axis(id).definition().is_some());
    let index_simple = index.is_none_or(|ind| !ind.is_leaf() && !ind.is_zero());
    l.is_unrolled() && (!ref_simple || !index_simple)
}

/// Axes reachable from `preferred_roots` going towards the leaves of
/// `domain`. Used to pick a side when undoing a zero-merged merge.
pub fn build_preferred_paths(
    graph: &DomainGraph,
    domain: &TensorDomain,
    preferred_roots: HashSet<AxisId>,
) -> HashSet<AxisId> {
    let mut preferred = preferred_roots;
    for tid in graph.exprs_to(domain.leaf()) {
        let transform = graph.transform(tid);
        if transform.inputs().iter().any(|id| preferred.contains(id)) {
            preferred.extend(transform.outputs());
        }
    }
    preferred
}

/// Index the reference directly from the loop indices.
///
/// Vectorized loops contribute zero and `double_buffer_loop` reads one
/// iteration ahead. The innermost loop that needs it is protected with the
/// magic zero.
pub fn reference_indexing<'f>(
    ctx: &LowerContext<'f>,
    loops: &[ForLoop],
    reference: &ReferenceTensor,
    double_buffer_loop: Option<LoopId>,
) -> Result<IndexCompute<'f>> {
    ensure!(loops.len() <= reference.ndims(), InvalidReferenceSnafu { loops: loops.len(), ndims: reference.ndims() });

    let mut index_map = HashMap::new();
    let mut magic_zero_loop = None;
    for (pos, l) in loops.iter().enumerate() {
        let ref_axis = reference.axis(pos);
        let mut index = if l.vectorize() { Expr::zero() } else { l.index().clone() };
        if Some(l.id()) == double_buffer_loop {
            index = index.add(&Expr::one());
        }
        if protect_with_magic_zero(ctx, l, Some(ref_axis), Some(&index)) {
            magic_zero_loop = Some(ref_axis);
        }
        index_map.insert(ref_axis, index);
    }

    if let Some(ref_axis) = magic_zero_loop
        && let Some(index) = index_map.get_mut(&ref_axis)
    {
        *index = index.add(&Expr::magic_zero());
        trace!(axis = %ref_axis, "magic zero");
    }

    reference_indexing_with(ctx, reference, index_map, HashSet::new(), HashSet::new(), HashMap::new())
}

/// Index the reference from an explicit seed.
pub fn reference_indexing_with<'f>(
    ctx: &LowerContext<'f>,
    reference: &ReferenceTensor,
    index_map: HashMap<AxisId, Arc<Expr>>,
    zero_domains: HashSet<AxisId>,
    preferred_paths: HashSet<AxisId>,
    reference_halo_extent_map: HashMap<AxisId, Arc<Expr>>,
) -> Result<IndexCompute<'f>> {
    let domain = reference.domain();
    let mut compute = IndexCompute::builder()
        .ctx(ctx)
        .domain(domain)
        .index_map(index_map)
        .zero_domains(zero_domains)
        .root_contiguity(vec![false; domain.maybe_rfactor().len()])
        .preferred_paths(preferred_paths)
        .reference_halo_extent_map(reference_halo_extent_map)
        .build()?;
    compute.run();
    Ok(compute)
}
