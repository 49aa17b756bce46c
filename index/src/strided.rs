//! Strided index assembly.
//!
//! Turns the root indices produced by propagation into one term per root
//! axis, already multiplied by its stride, for the four cases of producer or
//! consumer in global or non-global memory. Summing the terms of a
//! [`TensorIndex`] gives the flat element offset.
//!
//! Global tensors use runtime strides `T<name>.stride[k]`, except along runs
//! of contiguous axes where the stride is the product of the (halo-extended)
//! extents to the right. Shared and local tensors have no runtime strides:
//! an axis' stride is the product of the allocated extents to its right.
//! A double-buffered tensor gets one more term selecting its buffer.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use snafu::{OptionExt, ensure};
use tracing::debug;

use tessera_ir::{AxisId, Expr, ForLoop, IterType, LoopId, MemoryType, Tensor, TensorId};

use crate::context::LowerContext;
use crate::error::{IndexCountMismatchSnafu, InvalidReferenceSnafu, MissingDoubleBufferAxisSnafu, MissingRootIndexSnafu, Result};
use crate::halo::halo_extent_of_root;
use crate::index_compute::IndexCompute;
use crate::loop_index::{
    LoopIndexMap, alloc_information, build_preferred_paths, ensure_static_indexing, index_map_from_tensor,
    reference_indexing, reference_indexing_with,
};
use crate::offsets::{
    global_consumer_offset_with_partial_split, producer_index_with_gather, producer_index_with_halo,
    producer_index_with_partial_split,
};
use crate::reference::{ReferenceTensor, index_map_reference_to, reference_halo_extent_map};
use crate::replay::consumer_to_producer;
use crate::swizzle::IndexSwizzle;

/// Strided index terms of one tensor access.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorIndex {
    tensor: TensorId,
    indices: Vec<Arc<Expr>>,
    unroll_required: Vec<LoopId>,
}

impl TensorIndex {
    pub fn new(tensor: TensorId, indices: Vec<Arc<Expr>>, unroll_required: Vec<LoopId>) -> Self {
        Self { tensor, indices, unroll_required }
    }

    pub fn tensor(&self) -> TensorId {
        self.tensor
    }

    /// One term per maybe-rfactor root axis, plus the buffer term of a
    /// double-buffered tensor.
    pub fn indices(&self) -> &[Arc<Expr>] {
        &self.indices
    }

    pub fn into_indices(self) -> Vec<Arc<Expr>> {
        self.indices
    }

    /// Loops that must be unrolled for this access to be statically indexed.
    pub fn unroll_required(&self) -> &[LoopId] {
        &self.unroll_required
    }

    /// Sum of the terms.
    pub fn flat(&self) -> Arc<Expr> {
        self.indices.iter().filter(|t| !t.is_zero()).fold(Expr::zero(), |acc, t| acc.add(t))
    }
}

impl fmt::Display for TensorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.tensor, self.flat())
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Index of `producer` read by the expression defining `consumer`, inside
/// the loop nest `loops`.
#[tracing::instrument(skip_all, fields(producer = %producer, consumer = %consumer, loops = loops.len()))]
pub fn producer_index(
    ctx: &LowerContext<'_>,
    producer: TensorId,
    consumer: TensorId,
    loops: &[ForLoop],
) -> Result<TensorIndex> {
    let fusion = ctx.fusion();
    let tensor = fusion.try_tensor(producer)?;
    let root_len = tensor.domain().maybe_rfactor().len();
    if tensor.domain().no_reductions(fusion.graph()).is_empty() {
        return Ok(TensorIndex::new(producer, vec![Expr::zero(); root_len], Vec::new()));
    }

    let index = match tensor.memory_type() {
        MemoryType::Global => global_producer_indices(ctx, producer, consumer, loops)?,
        MemoryType::Shared | MemoryType::Local => non_global_producer_indices(ctx, producer, consumer, loops)?,
    };

    let expected = root_len + usize::from(tensor.is_double_buffered());
    ensure!(
        index.indices.len() == expected,
        IndexCountMismatchSnafu { tensor: producer, expected, actual: index.indices.len() }
    );
    debug!(%index, "producer index");
    Ok(index)
}

/// Index of `consumer` written inside the loop nest `loops`.
#[tracing::instrument(skip_all, fields(consumer = %consumer, loops = loops.len()))]
pub fn consumer_index(ctx: &LowerContext<'_>, consumer: TensorId, loops: &[ForLoop]) -> Result<TensorIndex> {
    let fusion = ctx.fusion();
    let tensor = fusion.try_tensor(consumer)?;
    if tensor.domain().no_reductions(fusion.graph()).is_empty() {
        let root_len = tensor.domain().maybe_rfactor().len();
        return Ok(TensorIndex::new(consumer, vec![Expr::zero(); root_len], Vec::new()));
    }

    let index = match tensor.memory_type() {
        MemoryType::Global => global_consumer_indices(ctx, consumer, loops)?,
        MemoryType::Shared | MemoryType::Local => non_global_consumer_indices(ctx, consumer, loops)?,
    };
    debug!(%index, "consumer index");
    Ok(index)
}

pub fn producer_strided_indices(
    ctx: &LowerContext<'_>,
    producer: TensorId,
    consumer: TensorId,
    loops: &[ForLoop],
) -> Result<Vec<Arc<Expr>>> {
    producer_index(ctx, producer, consumer, loops).map(TensorIndex::into_indices)
}

pub fn consumer_strided_indices(
    ctx: &LowerContext<'_>,
    consumer: TensorId,
    loops: &[ForLoop],
) -> Result<Vec<Arc<Expr>>> {
    consumer_index(ctx, consumer, loops).map(TensorIndex::into_indices)
}

// ============================================================================
// Global memory
// ============================================================================

#[tracing::instrument(skip_all, fields(producer = %producer, consumer = %consumer))]
pub fn global_producer_indices(
    ctx: &LowerContext<'_>,
    producer: TensorId,
    consumer: TensorId,
    loops: &[ForLoop],
) -> Result<TensorIndex> {
    let fusion = ctx.fusion();
    let graph = fusion.graph();
    let (p_tv, c_tv) = (fusion.try_tensor(producer)?, fusion.try_tensor(consumer)?);

    let reference = ReferenceTensor::build(ctx, loops)?;
    let c2p = consumer_to_producer(fusion, producer, consumer);
    let ref_to_producer = reference_to_producer(ctx, &c2p, c_tv, &reference);

    let db_loop = ctx.double_buffer().double_buffer_loop(consumer, loops, ctx.ca_loop_map(), true).map(ForLoop::id);
    let ref_compute = reference_indexing(ctx, loops, &reference, db_loop)?;
    let halo_extents = reference_halo_extent_map(ctx, &ref_to_producer);
    let producer_indexing =
        ref_compute.update(ctx, p_tv.domain(), &ref_to_producer, p_tv.domain().contiguity().to_vec(), halo_extents)?;

    let root = p_tv.domain().maybe_rfactor();
    let strides = global_strides(ctx, p_tv, producer_indexing.index_map(), false)?;
    let vectorize_shift = loops.last().and_then(ForLoop::vectorize_shift);

    let mut indices = vec![Expr::zero(); root.len()];
    for (i, &id) in root.iter().enumerate() {
        let axis = graph.axis(id);
        if axis.is_reduction() || axis.is_broadcast() || ctx.trivial_reductions().is_derived(id) {
            continue;
        }
        let index = producer_indexing
            .index_of(id)
            .cloned()
            .context(MissingRootIndexSnafu { tensor: producer, axis: id, position: i })?;
        let index = producer_index_with_halo(ctx, p_tv, i, index, c_tv)?;
        let index =
            producer_index_with_gather(ctx, index, i, p_tv, c_tv, reference.concrete_to_id(), ref_compute.index_map())?;
        let index = producer_index_with_partial_split(ctx, index, id, p_tv, c_tv)?;
        if index.is_zero() {
            continue;
        }
        indices[i] = strided_term(&index, &strides[i], i + 1 == root.len(), vectorize_shift);
    }
    Ok(TensorIndex::new(producer, indices, Vec::new()))
}

#[tracing::instrument(skip_all, fields(consumer = %consumer))]
pub fn global_consumer_indices(ctx: &LowerContext<'_>, consumer: TensorId, loops: &[ForLoop]) -> Result<TensorIndex> {
    let fusion = ctx.fusion();
    let graph = fusion.graph();
    let c_tv = fusion.try_tensor(consumer)?;

    let reference = ReferenceTensor::build(ctx, loops)?;
    let ref_to_consumer = index_map_reference_to(ctx, c_tv.domain(), &reference);
    let ref_compute = reference_indexing(ctx, loops, &reference, None)?;
    let halo_extents = reference_halo_extent_map(ctx, &ref_to_consumer);
    let consumer_indexing =
        ref_compute.update(ctx, c_tv.domain(), &ref_to_consumer, c_tv.domain().contiguity().to_vec(), halo_extents)?;

    let root = c_tv.domain().maybe_rfactor();
    let strides = global_strides(ctx, c_tv, consumer_indexing.index_map(), true)?;
    let vectorize_shift = loops.last().and_then(ForLoop::vectorize_shift);

    let mut indices = vec![Expr::zero(); root.len()];
    for (i, &id) in root.iter().enumerate() {
        let axis = graph.axis(id);
        if axis.is_reduction() || axis.is_broadcast() || axis.is_stride() || ctx.trivial_reductions().is_derived(id) {
            continue;
        }
        let index = consumer_indexing
            .index_of(id)
            .context(MissingRootIndexSnafu { tensor: consumer, axis: id, position: i })?
            .add(&global_consumer_offset_with_partial_split(ctx, id));
        if index.is_zero() {
            continue;
        }
        indices[i] = strided_term(&index, &strides[i], i + 1 == root.len(), vectorize_shift);
    }
    Ok(TensorIndex::new(consumer, indices, Vec::new()))
}

/// Runtime or contiguous strides of each root axis of a global tensor.
///
/// Axes without storage get stride one and do not consume a runtime stride
/// slot. Walking from the innermost axis out, a contiguous axis takes the
/// running product of the extents to its right.
fn global_strides(
    ctx: &LowerContext<'_>,
    tensor: &Tensor,
    index_map: &HashMap<AxisId, Arc<Expr>>,
    skip_stride_axes: bool,
) -> Result<Vec<Arc<Expr>>> {
    let graph = ctx.fusion().graph();
    let root = tensor.domain().maybe_rfactor();
    let contiguity = tensor.domain().contiguity();
    let unstored = |id: AxisId| {
        let axis = graph.axis(id);
        axis.is_reduction()
            || axis.iter_type() == IterType::BroadcastWithoutStride
            || (skip_stride_axes && axis.is_stride())
    };

    let mut next_slot = 0;
    let mut strides: Vec<Arc<Expr>> = root
        .iter()
        .map(|id| {
            if unstored(*id) {
                return Expr::one();
            }
            let stride = Expr::named(format!("T{}.stride[{next_slot}]", tensor.name()));
            next_slot += 1;
            stride
        })
        .collect();

    let mut contig_stride = Expr::one();
    for (dim, &id) in root.iter().enumerate().rev() {
        if unstored(id) {
            continue;
        }
        let axis = graph.axis(id);
        ensure!(
            index_map.contains_key(&id) || axis.iter_type() == IterType::BroadcastWithStride,
            MissingRootIndexSnafu { tensor: tensor.id(), axis: id, position: dim }
        );
        let extent = halo_extent_of_root(ctx.halo(), id, axis.extent());
        if contiguity.get(dim).copied().unwrap_or(false) {
            strides[dim] = contig_stride.clone();
            contig_stride = contig_stride.mul(&extent);
        } else {
            contig_stride = strides[dim].mul(&extent);
        }
    }
    Ok(strides)
}

fn strided_term(index: &Arc<Expr>, stride: &Arc<Expr>, innermost: bool, shift: Option<&Arc<Expr>>) -> Arc<Expr> {
    let term = index.mul(stride);
    match shift {
        Some(shift) if innermost => term.add(shift),
        _ => term,
    }
}

// ============================================================================
// Shared and local memory
// ============================================================================

#[tracing::instrument(skip_all, fields(producer = %producer, consumer = %consumer))]
pub fn non_global_producer_indices(
    ctx: &LowerContext<'_>,
    producer: TensorId,
    consumer: TensorId,
    loops: &[ForLoop],
) -> Result<TensorIndex> {
    let fusion = ctx.fusion();
    let graph = fusion.graph();
    let (p_tv, c_tv) = (fusion.try_tensor(producer)?, fusion.try_tensor(consumer)?);
    let loop_map = ctx.ca_loop_map();

    let reference = ReferenceTensor::build(ctx, loops)?;
    let c2p = consumer_to_producer(fusion, producer, consumer);
    let p2c_alloc: HashMap<AxisId, AxisId> =
        c_tv.domain().leaf().iter().filter_map(|c| c2p.get(c).map(|p| (*p, *c))).collect();

    let consumer_db_loop = ctx.double_buffer().double_buffer_loop(consumer, loops, loop_map, true).map(ForLoop::id);
    let alloc = alloc_information(ctx, p_tv, loops, &p2c_alloc)?;
    let loop_indices = index_map_from_tensor(ctx, p_tv, loops, alloc.alloc_loop, false, consumer_db_loop);
    let unroll_required = ensure_static_indexing(ctx, p_tv, alloc.alloc_loop, loops, &p2c_alloc);

    let ref_to_producer = reference_to_producer(ctx, &c2p, c_tv, &reference);
    let ref_compute = seeded_reference_indexing(ctx, loops, &reference, &loop_indices, &ref_to_producer)?;
    let halo_extents = reference_halo_extent_map(ctx, &ref_to_producer);
    let producer_indexing =
        ref_compute.update(ctx, p_tv.domain(), &ref_to_producer, p_tv.domain().contiguity().to_vec(), halo_extents)?;

    let mut swizzle = IndexSwizzle::new(ctx, p_tv, &producer_indexing)?;
    swizzle.run()?;
    let index_map = swizzle.index_map();

    let trivial = ctx.trivial_reductions();
    let root = p_tv.domain().maybe_rfactor();
    let skip: HashSet<AxisId> = root
        .iter()
        .copied()
        .filter(|id| {
            let axis = graph.axis(*id);
            if axis.is_broadcast() || axis.is_reduction() || axis.is_stride() || trivial.is_derived(*id) {
                return true;
            }
            !index_map.contains_key(id) && p2c_alloc.get(id).is_some_and(|c| trivial.is_derived(*c))
        })
        .collect();

    let mut indices = vec![Expr::zero(); root.len()];
    for (i, &id) in root.iter().enumerate() {
        if skip.contains(&id) {
            continue;
        }
        let index =
            index_map.get(&id).cloned().context(MissingRootIndexSnafu { tensor: producer, axis: id, position: i })?;
        let index = producer_index_with_halo(ctx, p_tv, i, index, c_tv)?;
        let index =
            producer_index_with_gather(ctx, index, i, p_tv, c_tv, reference.concrete_to_id(), ref_compute.index_map())?;
        let index = producer_index_with_partial_split(ctx, index, id, p_tv, c_tv)?;
        if index.is_zero() {
            continue;
        }
        indices[i] = match allocated_stride(ctx, p_tv, i, &skip, index_map, &producer_indexing)? {
            Some(stride) => index.mul(&stride),
            None => index,
        };
    }

    if p_tv.is_double_buffered()
        && let Some(db_loop) = ctx.double_buffer().double_buffer_loop(producer, loops, loop_map, true)
    {
        let size = ctx
            .double_buffer()
            .original_alloc_size(producer)
            .context(MissingDoubleBufferAxisSnafu { tensor: producer })?;
        indices.push(db_loop.index().rem(&Expr::int(2)).mul(size));
    }
    Ok(TensorIndex::new(producer, indices, unroll_required))
}

#[tracing::instrument(skip_all, fields(consumer = %consumer))]
pub fn non_global_consumer_indices(
    ctx: &LowerContext<'_>,
    consumer: TensorId,
    loops: &[ForLoop],
) -> Result<TensorIndex> {
    let fusion = ctx.fusion();
    let graph = fusion.graph();
    let c_tv = fusion.try_tensor(consumer)?;
    let no_map = HashMap::new();

    let reference = ReferenceTensor::build(ctx, loops)?;
    let alloc = alloc_information(ctx, c_tv, loops, &no_map)?;
    let loop_indices = index_map_from_tensor(ctx, c_tv, loops, alloc.alloc_loop, true, None);
    let unroll_required = ensure_static_indexing(ctx, c_tv, alloc.alloc_loop, loops, &no_map);

    let ref_to_consumer = index_map_reference_to(ctx, c_tv.domain(), &reference);
    let ref_compute = seeded_reference_indexing(ctx, loops, &reference, &loop_indices, &ref_to_consumer)?;
    let halo_extents = reference_halo_extent_map(ctx, &ref_to_consumer);
    let consumer_indexing =
        ref_compute.update(ctx, c_tv.domain(), &ref_to_consumer, c_tv.domain().contiguity().to_vec(), halo_extents)?;

    let mut swizzle = IndexSwizzle::new(ctx, c_tv, &consumer_indexing)?;
    swizzle.run()?;
    let index_map = swizzle.index_map();

    let trivial = ctx.trivial_reductions();
    let root = c_tv.domain().maybe_rfactor();
    let skip: HashSet<AxisId> = root
        .iter()
        .copied()
        .filter(|id| {
            let axis = graph.axis(*id);
            axis.is_broadcast() || axis.is_reduction() || axis.is_stride() || trivial.is_derived(*id)
        })
        .collect();

    let mut indices = vec![Expr::zero(); root.len()];
    for (i, &id) in root.iter().enumerate() {
        if skip.contains(&id) {
            continue;
        }
        let index = index_map.get(&id).context(MissingRootIndexSnafu { tensor: consumer, axis: id, position: i })?;
        if index.is_zero() {
            continue;
        }
        indices[i] = match allocated_stride(ctx, c_tv, i, &skip, index_map, &consumer_indexing)? {
            Some(stride) => index.mul(&stride),
            None => index.clone(),
        };
    }
    ensure!(
        indices.len() == root.len(),
        IndexCountMismatchSnafu { tensor: consumer, expected: root.len(), actual: indices.len() }
    );

    if c_tv.is_double_buffered()
        && let Some(db_loop) = ctx.double_buffer().double_buffer_loop(consumer, loops, ctx.ca_loop_map(), true)
    {
        let size = ctx
            .double_buffer()
            .original_alloc_size(consumer)
            .context(MissingDoubleBufferAxisSnafu { tensor: consumer })?;
        let slot = Expr::one().sub(&db_loop.index().rem(&Expr::int(2)));
        indices.push(slot.mul(size));
    }
    Ok(TensorIndex::new(consumer, indices, unroll_required))
}

/// Product of the allocated extents of the indexed root axes right of
/// `pos`. `None` when there are none.
fn allocated_stride(
    ctx: &LowerContext<'_>,
    tensor: &Tensor,
    pos: usize,
    skip: &HashSet<AxisId>,
    index_map: &HashMap<AxisId, Arc<Expr>>,
    indexing: &IndexCompute<'_>,
) -> Result<Option<Arc<Expr>>> {
    let root = tensor.domain().maybe_rfactor();
    let mut stride: Option<Arc<Expr>> = None;
    for (j, &id) in root.iter().enumerate().skip(pos + 1) {
        if skip.contains(&id) {
            continue;
        }
        ensure!(index_map.contains_key(&id), MissingRootIndexSnafu { tensor: tensor.id(), axis: id, position: j });
        if indexing.is_zero(id) {
            continue;
        }
        let extent = halo_extent_of_root(ctx.halo(), id, &indexing.extent(id));
        stride = Some(match stride {
            Some(stride) => stride.mul(&extent),
            None => extent,
        });
    }
    Ok(stride)
}

// ============================================================================
// Reference plumbing
// ============================================================================

/// Reference axes mapped to producer axes, going through the consumer.
fn reference_to_producer(
    ctx: &LowerContext<'_>,
    c2p: &HashMap<AxisId, AxisId>,
    consumer: &Tensor,
    reference: &ReferenceTensor,
) -> HashMap<AxisId, AxisId> {
    index_map_reference_to(ctx, consumer.domain(), reference)
        .into_iter()
        .filter_map(|(r, c)| c2p.get(&c).map(|p| (r, *p)))
        .collect()
}

/// Index the reference from per-loop indices of a non-global tensor.
/// Propagation prefers paths leading to axes of the indexed tensor that
/// take storage.
fn seeded_reference_indexing<'f>(
    ctx: &LowerContext<'f>,
    loops: &[ForLoop],
    reference: &ReferenceTensor,
    loop_indices: &LoopIndexMap,
    ref_to_tensor: &HashMap<AxisId, AxisId>,
) -> Result<IndexCompute<'f>> {
    ensure!(loops.len() <= reference.ndims(), InvalidReferenceSnafu { loops: loops.len(), ndims: reference.ndims() });
    let graph = ctx.fusion().graph();

    let mut index_map = HashMap::new();
    let mut zero_domains = HashSet::new();
    for (pos, l) in loops.iter().enumerate() {
        let ref_axis = reference.axis(pos);
        let index = loop_indices.indices.get(&l.id()).cloned().unwrap_or_else(|| l.index().clone());
        index_map.insert(ref_axis, index);
        if loop_indices.zero_loops.contains(&l.id()) {
            zero_domains.insert(ref_axis);
        }
    }

    let preferred_roots = ref_to_tensor
        .iter()
        .filter(|(_, id)| {
            let axis = graph.axis(**id);
            !axis.is_broadcast() && !axis.is_reduction() && !axis.is_stride()
        })
        .map(|(ref_id, _)| *ref_id)
        .collect();
    let preferred_paths = build_preferred_paths(graph, reference.domain(), preferred_roots);

    reference_indexing_with(ctx, reference, index_map, zero_domains, preferred_paths, HashMap::new())
}
