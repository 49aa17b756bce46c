//! Root predicates.
//!
//! For a consumer written inside a loop nest, builds the start and stop
//! guards that keep every access inside the valid range of its axes:
//!
//! ```text
//! index + start_offset >= 0 && index + stop_offset < extent
//! ```
//!
//! Predicates are built on the fewest axes that cover the root domain:
//! a chain of merges only needs its output predicated. Splits that do not
//! divide their input are predicated on their own. Guards that are provably
//! true are replaced by a constant `true`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use snafu::ensure;
use tracing::{debug, trace};

use tessera_ir::{AxisId, BinaryOp, Expr, ExprOp, ForLoop, LoopId, ParallelType, Tensor, TensorId, TensorOp, Transform};

use crate::context::LowerContext;
use crate::double_buffer::double_buffer_loop;
use crate::error::{InvalidReferenceSnafu, Result};
use crate::index_compute::IndexCompute;
use crate::loop_index::{protect_with_magic_zero, reference_indexing_with};
use crate::offsets::start_and_stop_offsets;
use crate::reference::{ReferenceTensor, index_map_reference_to, reference_halo_extent_map};

// ============================================================================
// Domains to predicate
// ============================================================================

/// An axis to predicate and the root axes its predicate stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateDomainInfo {
    pub id: AxisId,
    pub covered_ids: HashSet<AxisId>,
    /// Predicates the input of a non-divisible split rather than a root.
    pub is_non_divisible_split: bool,
}

/// Merge-only outputs covering the consumer root domain.
///
/// Root axes with halo, with a partial range, shifted or gathered, or
/// broadcast without a broadcast concrete axis, are predicated on their own.
pub fn predicate_contig_ids(ctx: &LowerContext<'_>, consumer: &Tensor) -> Vec<PredicateDomainInfo> {
    let graph = ctx.fusion().graph();
    let root = consumer.domain().root();
    if root.is_empty() {
        return Vec::new();
    }

    let excluded: HashSet<AxisId> = root
        .iter()
        .enumerate()
        .filter(|&(pos, &id)| {
            let axis = graph.axis(id);
            if ctx.halo().root_axis_info(id).has_halo() || axis.maybe_partial() {
                return true;
            }
            if axis.is_broadcast() && !graph.axis(ctx.ca_loop_map().concrete(id)).is_broadcast() {
                return true;
            }
            match consumer.op() {
                Some(TensorOp::Shift { offsets, .. }) => offsets.get(pos).is_some_and(|o| *o != 0),
                Some(TensorOp::Gather { window_shape, .. }) => window_shape.get(pos).is_some_and(|w| *w != 1),
                _ => false,
            }
        })
        .map(|(_, id)| *id)
        .collect();

    let mut contiguous: Vec<AxisId> = root.to_vec();
    for tid in graph.exprs_to(consumer.domain().leaf()) {
        let Transform::Merge(merge) = graph.transform(tid) else { continue };
        if excluded.contains(&merge.inner) || excluded.contains(&merge.outer) {
            continue;
        }
        if contiguous.contains(&merge.inner) && contiguous.contains(&merge.outer) {
            contiguous.retain(|id| *id != merge.inner && *id != merge.outer);
            contiguous.push(merge.out);
        }
    }

    contiguous
        .into_iter()
        .map(|id| PredicateDomainInfo {
            id,
            covered_ids: graph.inputs_of_ordered_as(&[id], root).into_iter().collect(),
            is_non_divisible_split: false,
        })
        .collect()
}

/// Inputs of the non-divisible splits of `consumer`, each covering itself.
pub fn non_divisible_domains_to_predicate(ctx: &LowerContext<'_>, consumer: &Tensor) -> Vec<PredicateDomainInfo> {
    ctx.non_divisible()
        .axes_to_predicate(consumer.id())
        .map(|id| PredicateDomainInfo { id, covered_ids: HashSet::from([id]), is_non_divisible_split: true })
        .collect()
}

/// Whether the op defining `tensor` writes padding.
pub fn needs_padding(tensor: &Tensor) -> bool {
    tensor.op().is_some_and(TensorOp::has_padding)
}

// ============================================================================
// Omission
// ============================================================================

/// Part of a start offset that still needs checking; `None` when the start
/// predicate always holds.
pub fn simplify_start_offset(start_offset: &Arc<Expr>) -> Option<Arc<Expr>> {
    if start_offset.as_int().is_some_and(|v| v >= 0) {
        return None;
    }
    // min(0, x) + index >= 0 holds whenever x + index >= 0 does.
    if let ExprOp::Binary(BinaryOp::Min, lhs, rhs) = start_offset.op() {
        if lhs.is_zero() {
            return Some(rhs.clone());
        }
        if rhs.is_zero() {
            return Some(lhs.clone());
        }
    }
    Some(start_offset.clone())
}

/// Whether `stop_index + stop_offset < extent(contig_id)` always holds.
///
/// Requires an index that is a leaf, possibly protected with the magic
/// zero, and a plain extent. A constant index must also be statically below
/// a constant extent, so a folded out-of-range sentinel is never dropped.
/// The offset must be a constant that cancels the halo and a parallelized
/// axis needs an exact, halo-free parallel dimension.
pub fn can_omit_stop_predicate(
    ctx: &LowerContext<'_>,
    stop_index: &Arc<Expr>,
    stop_offset: &Arc<Expr>,
    contig_id: AxisId,
) -> bool {
    let axis = ctx.fusion().graph().axis(contig_id);
    let index_simple = stop_index.is_leaf()
        || (stop_index.is_protected_with_magic_zero()
            && matches!(stop_index.op(), ExprOp::Binary(_, lhs, _) if lhs.is_leaf()));
    if !index_simple || !axis.extent().is_leaf() {
        return false;
    }

    let Some(offset) = stop_offset.as_int() else { return false };
    if let Some(index) = stop_index.as_int()
        && axis.extent().as_int().is_none_or(|extent| index + offset >= extent)
    {
        return false;
    }
    let halo = ctx.halo().root_axis_info(contig_id).width();
    if halo + offset > 0 {
        return false;
    }

    let pt = axis.parallel_type();
    if pt.is_thread() && (!ctx.parallel_dims().is_exact(pt) || halo != 0) {
        return false;
    }
    true
}

// ============================================================================
// Predicate indexing
// ============================================================================

/// Index the reference for a start (`start`) or stop predicate.
///
/// Inside an unswitched or vectorized region, loops are replaced by the
/// extreme value their index takes: zero for the start predicate and the
/// last iteration for the stop predicate. A thread loop spanning its whole
/// axis keeps the parallel index. A vectorized region only covers the
/// vectorized loop itself.
pub fn predicate_reference_indexing<'f>(
    ctx: &LowerContext<'f>,
    loops: &[ForLoop],
    reference: &ReferenceTensor,
    unswitch_or_vec_loop: Option<&ForLoop>,
    double_buffer_axis: Option<AxisId>,
    start: bool,
) -> Result<IndexCompute<'f>> {
    ensure!(loops.len() <= reference.ndims(), InvalidReferenceSnafu { loops: loops.len(), ndims: reference.ndims() });
    let graph = ctx.fusion().graph();

    let mut loop_to_index: HashMap<LoopId, Arc<Expr>> = loops.iter().map(|l| (l.id(), l.index().clone())).collect();

    if let Some(region) = unswitch_or_vec_loop {
        let vectorized = graph.axis(region.axis()).parallel_type() == ParallelType::Vectorize;
        let mut within = false;
        for (pos, l) in loops.iter().enumerate() {
            let loop_axis = graph.axis(l.axis());
            within |= l.id() == region.id();
            if within {
                if graph.axis(reference.axis(pos)).is_broadcast() {
                    continue;
                }
                let pt = loop_axis.parallel_type();
                let index = if loop_axis.is_thread() {
                    if l.stop() == loop_axis.extent() {
                        l.index().clone()
                    } else if start {
                        Expr::zero()
                    } else {
                        let dim = ctx.parallel_dims().get(pt).cloned().unwrap_or_else(|| Expr::parallel_dim(pt));
                        dim.sub(&Expr::one())
                    }
                } else if start {
                    Expr::zero()
                } else {
                    loop_axis.extent().sub(&Expr::one())
                };
                loop_to_index.insert(l.id(), index);
            }
            if vectorized && within {
                break;
            }
        }
    }

    if let Some(axis) = double_buffer_axis
        && let Some(db_loop) = double_buffer_loop(axis, loops, ctx.ca_loop_map(), true)
        && let Some(current) = loop_to_index.get_mut(&db_loop.id())
        && **current == **db_loop.index()
    {
        *current = current.add(&Expr::one());
    }

    let mut index_map = HashMap::new();
    let mut magic_zero_axis = None;
    for (pos, l) in loops.iter().enumerate() {
        let ref_axis = reference.axis(pos);
        let index = loop_to_index.get(&l.id()).cloned().unwrap_or_else(|| l.index().clone());
        if protect_with_magic_zero(ctx, l, Some(ref_axis), Some(&index)) {
            magic_zero_axis = Some(ref_axis);
        }
        index_map.insert(ref_axis, index);
    }
    if let Some(ref_axis) = magic_zero_axis
        && let Some(index) = index_map.get_mut(&ref_axis)
        && !index.is_const()
    {
        *index = index.add(&Expr::magic_zero());
    }

    let domain = reference.domain();
    let self_map: HashMap<AxisId, AxisId> =
        graph.all_between(domain.root(), domain.leaf()).into_iter().map(|id| (id, id)).collect();
    let halo_extents = reference_halo_extent_map(ctx, &self_map);

    reference_indexing_with(ctx, reference, index_map, HashSet::new(), HashSet::new(), halo_extents)
}

// ============================================================================
// Root predicates
// ============================================================================

/// Start and stop guards of one predicated axis.
#[derive(Debug, Clone, PartialEq)]
pub struct RootPredicateInfo {
    start_predicate: Arc<Expr>,
    stop_predicate: Arc<Expr>,
    start_offset: Arc<Expr>,
    stop_offset: Arc<Expr>,
    root_ids: HashSet<AxisId>,
}

impl RootPredicateInfo {
    /// Predicate that never holds; used when no padding region exists.
    pub fn false_info() -> Self {
        Self {
            start_predicate: Expr::bool(false),
            stop_predicate: Expr::bool(false),
            start_offset: Expr::zero(),
            stop_offset: Expr::zero(),
            root_ids: HashSet::new(),
        }
    }

    pub fn start_predicate(&self) -> &Arc<Expr> {
        &self.start_predicate
    }

    pub fn stop_predicate(&self) -> &Arc<Expr> {
        &self.stop_predicate
    }

    pub fn start_offset(&self) -> &Arc<Expr> {
        &self.start_offset
    }

    pub fn stop_offset(&self) -> &Arc<Expr> {
        &self.stop_offset
    }

    /// Root axes of the consumer this predicate covers.
    pub fn root_ids(&self) -> &HashSet<AxisId> {
        &self.root_ids
    }
}

/// Predicates of `consumer` inside `loops`, with the reference they were
/// computed against.
///
/// `unswitch_or_vec_loop` is the outermost unswitched loop or the
/// vectorized loop when building a hoisted predicate. `shift_padding` asks
/// for the predicate of the padded region written by a shift or gather.
#[tracing::instrument(
    skip_all,
    fields(consumer = %consumer, loops = loops.len(), unswitch = unswitch_or_vec_loop.is_some(), shift_padding = shift_padding)
)]
pub fn reference_root_predicates(
    ctx: &LowerContext<'_>,
    consumer: TensorId,
    loops: &[ForLoop],
    unswitch_or_vec_loop: Option<&ForLoop>,
    shift_padding: bool,
) -> Result<(Vec<RootPredicateInfo>, ReferenceTensor)> {
    let fusion = ctx.fusion();
    let graph = fusion.graph();
    let c_tv = fusion.try_tensor(consumer)?;
    let unswitch = unswitch_or_vec_loop.is_some();

    if shift_padding && !needs_padding(c_tv) {
        return Ok((vec![RootPredicateInfo::false_info()], ReferenceTensor::empty()));
    }

    let reference = ReferenceTensor::build(ctx, loops)?;
    let ref_to_consumer = index_map_reference_to(ctx, c_tv.domain(), &reference);
    let halo_extents = reference_halo_extent_map(ctx, &ref_to_consumer);
    let db_axis = ctx.double_buffer().double_buffer_axis(consumer);
    let no_contiguity = vec![false; c_tv.domain().maybe_rfactor().len()];

    let stop_indexing = predicate_reference_indexing(ctx, loops, &reference, unswitch_or_vec_loop, db_axis, false)?
        .update(ctx, c_tv.domain(), &ref_to_consumer, no_contiguity.clone(), halo_extents.clone())?;
    let start_indexing = if unswitch {
        let start = predicate_reference_indexing(ctx, loops, &reference, unswitch_or_vec_loop, db_axis, true)?;
        Some(start.update(ctx, c_tv.domain(), &ref_to_consumer, no_contiguity, halo_extents)?)
    } else {
        None
    };
    let stop_map = stop_indexing.index_map();
    let start_map = start_indexing.as_ref().map_or(stop_map, |start| start.index_map());

    let mut domains = predicate_contig_ids(ctx, c_tv);
    domains.extend(non_divisible_domains_to_predicate(ctx, c_tv));

    let mut predicates = Vec::new();
    for domain in domains {
        let id = domain.id;
        let axis = graph.axis(id);
        if axis.is_broadcast() || ctx.trivial_reductions().is_derived(id) {
            continue;
        }
        // Unindexed axes belong to loops outside this nest.
        let Some(stop_index) = stop_map.get(&id).filter(|index| !index.is_zero()) else {
            continue;
        };
        let start_index = start_map.get(&id).unwrap_or(stop_index);

        let (start_offset, stop_offset) = start_and_stop_offsets(
            ctx,
            id,
            c_tv,
            start_map,
            stop_map,
            shift_padding,
            unswitch,
            domain.is_non_divisible_split,
        )?;

        let start_predicate = match simplify_start_offset(&start_offset) {
            Some(offset) => start_index.add(&offset).ge(&Expr::zero()),
            None => Expr::bool(true),
        };
        let stop_predicate = if can_omit_stop_predicate(ctx, stop_index, &stop_offset, id) {
            debug!(axis = %id, "stop predicate omitted");
            Expr::bool(true)
        } else {
            stop_index.add(&stop_offset).lt(axis.extent())
        };
        trace!(axis = %id, start = %start_predicate, stop = %stop_predicate, "root predicate");

        predicates.push(RootPredicateInfo {
            start_predicate,
            stop_predicate,
            start_offset,
            stop_offset,
            root_ids: domain.covered_ids,
        });
    }
    Ok((predicates, reference))
}
