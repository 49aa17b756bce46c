//! Root index adjustments.
//!
//! Offsets added to an already propagated root index so that it addresses
//! the right element: halo and shift differences between a producer and its
//! consumer, the window position of a gather, and trimmed partial splits.
//! The predicate offsets at the bottom turn the same adjustments into the
//! uniform `index + start >= 0` / `index + stop < extent` form.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::{OptionExt, ensure};

use tessera_ir::{AxisId, Expr, ExpressionEvaluator, MemoryType, Tensor, TensorOp};

use crate::context::LowerContext;
use crate::error::{
    InvalidGatherSnafu, MissingWindowIndexSnafu, NonConstantPartialSplitOffsetSnafu, Result, UnmappedProducerAxisSnafu, UnswitchPaddingSnafu,
};
use crate::replay::pairwise_root_map;

// ============================================================================
// Producer offsets
// ============================================================================

/// Offset of a producer root index relative to the consumer index it was
/// derived from: the difference of their left halo widths, minus the shift
/// offset when the consumer shifts the producer.
pub fn producer_halo_offset(
    ctx: &LowerContext<'_>,
    producer: &Tensor,
    producer_axis: usize,
    consumer: &Tensor,
) -> Result<i64> {
    let root = producer.domain().maybe_rfactor();
    let producer_id = *root
        .get(producer_axis)
        .ok_or(tessera_ir::Error::AxisPositionOutOfRange { position: producer_axis, ndims: root.len() })?;
    let consumer_id = pairwise_root_map(ctx.fusion(), producer.id(), consumer.id())
        .into_iter()
        .find_map(|(p, c)| (p == producer_id).then_some(c))
        .context(UnmappedProducerAxisSnafu { producer: producer.id(), axis: producer_id })?;

    let halo = ctx.halo();
    let p_pad = halo.root_axis_info(producer_id).width_at(0);
    let c_pad = halo.root_axis_info(consumer_id).width_at(0);
    let shift = consumer.op().and_then(|op| op.shift_offset(producer_axis)).unwrap_or(0);
    Ok(p_pad - c_pad - shift)
}

pub(crate) fn producer_index_with_halo(
    ctx: &LowerContext<'_>,
    producer: &Tensor,
    producer_axis: usize,
    index: Arc<Expr>,
    consumer: &Tensor,
) -> Result<Arc<Expr>> {
    let offset = producer_halo_offset(ctx, producer, producer_axis, consumer)?;
    Ok(if offset == 0 { index } else { index.add_int(offset) })
}

/// Producer offset of a gather along consumer root axis
/// `consumer_root_axis`: `window_index - pad_left`.
///
/// Zero when the consumer is not a gather, the axis is not gathered, or the
/// window is a single element. `index_map` holds the indices of the
/// consumer's axes, or of reference axes when `concrete_to_ref` is given.
pub fn producer_offset_with_gather(
    ctx: &LowerContext<'_>,
    consumer_root_axis: usize,
    consumer: &Tensor,
    index_map: &HashMap<AxisId, Arc<Expr>>,
    concrete_to_ref: Option<&HashMap<AxisId, AxisId>>,
) -> Result<Arc<Expr>> {
    let Some(op @ TensorOp::Gather { window_shape, pad_width }) = consumer.op() else {
        return Ok(Expr::zero());
    };
    if window_shape.get(consumer_root_axis).is_none_or(|w| *w == 1) {
        return Ok(Expr::zero());
    }

    let invalid = InvalidGatherSnafu { consumer: consumer.id(), position: consumer_root_axis };
    let pad_left = pad_width.get(consumer_root_axis).context(invalid)?[0];
    let mut window_id = op
        .gather_axis(consumer_root_axis)
        .and_then(|pos| consumer.domain().root().get(pos))
        .copied()
        .context(invalid)?;
    if let Some(concrete_to_ref) = concrete_to_ref {
        let concrete = ctx.ca_index_map().concrete(window_id);
        window_id = *concrete_to_ref
            .get(&concrete)
            .context(MissingWindowIndexSnafu { consumer: consumer.id(), axis: window_id })?;
    }
    let window_index =
        index_map.get(&window_id).context(MissingWindowIndexSnafu { consumer: consumer.id(), axis: window_id })?;
    Ok(window_index.add_int(-pad_left))
}

/// Move a producer root index to the window element the loop nest refers to.
pub(crate) fn producer_index_with_gather(
    ctx: &LowerContext<'_>,
    index: Arc<Expr>,
    producer_root_axis: usize,
    producer: &Tensor,
    consumer: &Tensor,
    concrete_to_ref: &HashMap<AxisId, AxisId>,
    ref_index_map: &HashMap<AxisId, Arc<Expr>>,
) -> Result<Arc<Expr>> {
    if !matches!(consumer.op(), Some(TensorOp::Gather { .. })) {
        return Ok(index);
    }
    let graph = ctx.fusion().graph();
    let counted = producer
        .domain()
        .maybe_rfactor()
        .iter()
        .take(producer_root_axis + 1)
        .filter(|id| {
            let axis = graph.axis(**id);
            !axis.is_reduction() && !axis.is_stride()
        })
        .count();
    let Some(consumer_axis) = counted.checked_sub(1) else { return Ok(index) };
    let offset = producer_offset_with_gather(ctx, consumer_axis, consumer, ref_index_map, Some(concrete_to_ref))?;
    Ok(index.add(&offset))
}

/// Start offset of a partially split root axis of a global tensor, zero if
/// it is not partially split. Global allocations are never trimmed.
pub fn global_consumer_offset_with_partial_split(ctx: &LowerContext<'_>, root_id: AxisId) -> Arc<Expr> {
    ctx.partial_splits().start_offset(root_id).cloned().unwrap_or_else(Expr::zero)
}

/// Account for partial-split trimming on a producer root index.
///
/// A global producer is untrimmed, so the consumer's start offset is added.
/// Otherwise the difference between the consumer and producer start offsets
/// is added; it must be a constant.
pub fn producer_index_with_partial_split(
    ctx: &LowerContext<'_>,
    index: Arc<Expr>,
    producer_root_id: AxisId,
    producer: &Tensor,
    consumer: &Tensor,
) -> Result<Arc<Expr>> {
    let Some(consumer_root_id) = pairwise_root_map(ctx.fusion(), producer.id(), consumer.id())
        .into_iter()
        .find_map(|(p, c)| (p == producer_root_id).then_some(c))
    else {
        return Ok(index);
    };

    let consumer_offset = global_consumer_offset_with_partial_split(ctx, consumer_root_id);
    if producer.memory_type() == MemoryType::Global {
        return Ok(if consumer_offset.is_zero() { index } else { index.add(&consumer_offset) });
    }

    let producer_offset = global_consumer_offset_with_partial_split(ctx, producer_root_id);
    let diff = ExpressionEvaluator::evaluate_const(&consumer_offset.sub(&producer_offset));
    let diff = diff.context(NonConstantPartialSplitOffsetSnafu { producer: producer.id(), axis: producer_root_id })?;
    Ok(if diff == 0 { index } else { index.add_int(diff) })
}

// ============================================================================
// Predicate offsets
// ============================================================================

/// Start and stop offsets of a shifted consumer axis. The padded end of the
/// axis is excluded from the normal predicate.
fn shift_offsets(consumer: &Tensor, consumer_id: AxisId, padding_predicate: bool) -> (Arc<Expr>, Arc<Expr>) {
    let Some(TensorOp::Shift { offsets, pad_width }) = consumer.op() else {
        return (Expr::zero(), Expr::zero());
    };
    let Some(pos) = consumer.domain().root_position(consumer_id) else {
        return (Expr::zero(), Expr::zero());
    };
    if padding_predicate {
        return (Expr::zero(), Expr::zero());
    }
    let pad = pad_width.get(pos).copied().unwrap_or(0);
    match offsets.get(pos).copied().unwrap_or(0) {
        o if o > 0 => (Expr::int(-pad), Expr::zero()),
        o if o < 0 => (Expr::zero(), Expr::int(pad)),
        _ => (Expr::zero(), Expr::zero()),
    }
}

/// Start and stop offsets of a gathered consumer axis, covering both the
/// consumer and the producer element it reads.
fn gather_offsets(
    ctx: &LowerContext<'_>,
    consumer: &Tensor,
    consumer_id: AxisId,
    start_index_map: &HashMap<AxisId, Arc<Expr>>,
    stop_index_map: &HashMap<AxisId, Arc<Expr>>,
    padding_predicate: bool,
) -> Result<(Arc<Expr>, Arc<Expr>)> {
    let Some(TensorOp::Gather { window_shape, pad_width }) = consumer.op() else {
        return Ok((Expr::zero(), Expr::zero()));
    };
    let Some(pos) = consumer.domain().root_position(consumer_id) else {
        return Ok((Expr::zero(), Expr::zero()));
    };
    if padding_predicate {
        return Ok((Expr::zero(), Expr::zero()));
    }

    let producer_start = producer_offset_with_gather(ctx, pos, consumer, start_index_map, None)?;
    let producer_stop = producer_offset_with_gather(ctx, pos, consumer, stop_index_map, None)?;
    let (consumer_start, consumer_stop) = (Expr::zero(), Expr::zero());
    if producer_start.is_zero() && producer_stop.is_zero() {
        return Ok((consumer_start, consumer_stop));
    }

    // Producer extent is `extent + window - 1 - pad_left - pad_right`.
    let invalid = InvalidGatherSnafu { consumer: consumer.id(), position: pos };
    let [pad_left, pad_right] = *pad_width.get(pos).context(invalid)?;
    let window = *window_shape.get(pos).context(invalid)?;
    let producer_extent_adjust = window - 1 - pad_left - pad_right;
    let producer_stop = producer_stop.add_int(-producer_extent_adjust);

    let start = if pad_left == 0 { consumer_start } else { consumer_start.min(&producer_start) };
    let stop = if pad_right == 0 { consumer_stop } else { consumer_stop.max(&producer_stop) };
    Ok((start, stop))
}

/// Valid range of a consumer axis as `(start_limit, stop_limit)` offsets
/// from zero and from its extent.
fn limit_offsets(
    ctx: &LowerContext<'_>,
    consumer_id: AxisId,
    padding_predicate: bool,
    non_divisible: bool,
) -> (Arc<Expr>, Arc<Expr>) {
    let axis = ctx.fusion().graph().axis(consumer_id);
    let halo = ctx.halo();
    let mut start_limit = axis.start().clone();
    let mut stop_limit = axis.stop_offset().neg();

    if !non_divisible {
        let info = halo.root_axis_info(consumer_id);
        if padding_predicate {
            stop_limit = stop_limit.add_int(info.width());
        } else {
            start_limit = start_limit.add_int(info.width_at(0));
            stop_limit = stop_limit.add_int(info.width_at(0));
        }
    } else if halo.has_halo_width(consumer_id) {
        stop_limit = stop_limit.add_int(halo.halo_width(consumer_id));
    }
    (start_limit, stop_limit)
}

/// Extra stop offset of an unswitch predicate: the halo width of
/// `consumer_root_id` when an unrolled leaf axis inherits that halo.
pub fn unswitch_stop_offset(ctx: &LowerContext<'_>, consumer_root_id: AxisId, consumer: &Tensor) -> i64 {
    let halo = ctx.halo();
    let info = halo.root_axis_info(consumer_root_id);
    if !info.has_halo() {
        return 0;
    }
    let graph = ctx.fusion().graph();
    let leaf = consumer.domain().leaf();
    let first_unrolled = leaf.iter().position(|id| graph.axis(*id).parallel_type().is_unrolled()).unwrap_or(leaf.len());
    if leaf[first_unrolled..].iter().any(|id| halo.is_halo_inherited(consumer_root_id, *id)) {
        info.width()
    } else {
        0
    }
}

/// Offsets such that the predicates of `consumer_id` read
/// `start_index + start >= 0` and `stop_index + stop < extent`.
///
/// Only root axes and non-divisible split inputs are adjusted; other axes
/// get zero offsets.
#[allow(clippy::too_many_arguments)]
pub fn start_and_stop_offsets(
    ctx: &LowerContext<'_>,
    consumer_id: AxisId,
    consumer: &Tensor,
    start_index_map: &HashMap<AxisId, Arc<Expr>>,
    stop_index_map: &HashMap<AxisId, Arc<Expr>>,
    padding_predicate: bool,
    unswitch: bool,
    non_divisible: bool,
) -> Result<(Arc<Expr>, Arc<Expr>)> {
    if ctx.fusion().graph().axis(consumer_id).definition().is_some() && !non_divisible {
        return Ok((Expr::zero(), Expr::zero()));
    }

    let (mut start, mut stop) = (Expr::zero(), Expr::zero());
    if !non_divisible {
        (start, stop) = match consumer.op() {
            Some(TensorOp::Shift { .. }) => shift_offsets(consumer, consumer_id, padding_predicate),
            Some(TensorOp::Gather { .. }) => {
                gather_offsets(ctx, consumer, consumer_id, start_index_map, stop_index_map, padding_predicate)?
            }
            _ => (start, stop),
        };

        let partial = global_consumer_offset_with_partial_split(ctx, consumer_id);
        start = start.add(&partial);
        stop = stop.add(&partial);

        if unswitch {
            ensure!(!padding_predicate, UnswitchPaddingSnafu);
            stop = stop.add_int(unswitch_stop_offset(ctx, consumer_id, consumer));
        }
    }

    let (start_limit, stop_limit) = limit_offsets(ctx, consumer_id, padding_predicate, non_divisible);
    Ok((start.sub(&start_limit), stop.sub(&stop_limit)))
}
