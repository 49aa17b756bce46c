//! Axis correspondence between a producer and its consumer.
//!
//! Producer and consumer own disjoint axes. Their roots are paired by the
//! defining operation ([`pairwise_root_map`]); derived axes are paired by
//! replaying one side's transforms on top of the other
//! ([`best_effort_replay`]).

use std::collections::{HashMap, HashSet};

use tessera_ir::{AxisId, DomainGraph, Fusion, Transform, TensorId, TensorOp};
use tracing::trace;

/// Pairs `(producer_axis, consumer_axis)` of the producer's maybe-rfactor
/// domain and the consumer's root domain.
///
/// Producer reduction axes have no consumer counterpart. Consumer axes that
/// a broadcast introduces, and the window axes of a gather, have no producer
/// counterpart.
pub fn pairwise_root_map(fusion: &Fusion, producer: TensorId, consumer: TensorId) -> Vec<(AxisId, AxisId)> {
    let graph = fusion.graph();
    let producer_axes =
        fusion.tensor(producer).domain().maybe_rfactor().iter().copied().filter(|id| !graph.axis(*id).is_reduction());

    let consumer_root = fusion.tensor(consumer).domain().root();
    let consumer_axes: Vec<AxisId> = match fusion.tensor(consumer).op() {
        Some(TensorOp::Broadcast { is_new }) => consumer_root
            .iter()
            .enumerate()
            .filter(|(i, _)| !is_new.get(*i).copied().unwrap_or(false))
            .map(|(_, id)| *id)
            .collect(),
        Some(TensorOp::Gather { window_shape, .. }) => consumer_root.iter().take(window_shape.len()).copied().collect(),
        _ => consumer_root.to_vec(),
    };

    producer_axes.zip(consumer_axes).collect()
}

/// Map axes of the `from` domain onto axes of the `to` domain.
///
/// Starting from `root_pairs`, every transform leading to `from_leaf` whose
/// inputs are already mapped is matched against a transform of the same
/// shape leading to `to_leaf`; matched outputs are paired. A merge with an
/// unmapped broadcast input forwards the mapping of its other input. Axes
/// that cannot be matched are left out.
pub fn best_effort_replay(
    graph: &DomainGraph,
    from_leaf: &[AxisId],
    to_leaf: &[AxisId],
    root_pairs: impl IntoIterator<Item = (AxisId, AxisId)>,
) -> HashMap<AxisId, AxisId> {
    let mut map: HashMap<AxisId, AxisId> = root_pairs.into_iter().collect();
    let to_exprs: HashSet<_> = graph.exprs_to(to_leaf).into_iter().collect();

    for tid in graph.exprs_to(from_leaf) {
        match graph.transform(tid) {
            Transform::Split(split) => {
                let Some(&to_in) = map.get(&split.input) else { continue };
                let matched = graph.axis(to_in).uses().iter().filter(|t| to_exprs.contains(t)).find_map(|t| {
                    graph.transform(*t).as_split().filter(|other| {
                        other.factor == split.factor
                            && other.inner_split == split.inner_split
                            && other.start_offset == split.start_offset
                            && other.stop_offset == split.stop_offset
                    })
                });
                if let Some(other) = matched {
                    map.insert(split.outer, other.outer);
                    map.insert(split.inner, other.inner);
                }
            }
            Transform::Merge(merge) => match (map.get(&merge.outer).copied(), map.get(&merge.inner).copied()) {
                (Some(to_outer), Some(to_inner)) => {
                    let matched = graph.axis(to_outer).uses().iter().filter(|t| to_exprs.contains(t)).find_map(|t| {
                        graph.transform(*t).as_merge().filter(|other| other.outer == to_outer && other.inner == to_inner)
                    });
                    if let Some(other) = matched {
                        map.insert(merge.out, other.out);
                    }
                }
                (Some(to_outer), None) if graph.axis(merge.inner).is_broadcast() => {
                    map.insert(merge.out, to_outer);
                }
                (None, Some(to_inner)) if graph.axis(merge.outer).is_broadcast() => {
                    map.insert(merge.out, to_inner);
                }
                _ => {}
            },
        }
    }

    trace!(mapped = map.len(), "best effort replay");
    map
}

/// Consumer-to-producer map over every axis the two domains share.
pub fn consumer_to_producer(fusion: &Fusion, producer: TensorId, consumer: TensorId) -> HashMap<AxisId, AxisId> {
    let root_pairs = pairwise_root_map(fusion, producer, consumer).into_iter().map(|(p, c)| (c, p));
    best_effort_replay(
        fusion.graph(),
        fusion.tensor(consumer).domain().leaf(),
        fusion.tensor(producer).domain().leaf(),
        root_pairs,
    )
}
