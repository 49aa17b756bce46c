//! Per-fusion analyses built with the lowering context.

use tessera_ir::{Fusion, MemoryType, TensorDomain, TensorOp};

use crate::ca_map::{CaMaps, MappingMode};
use crate::non_divisible::NonDivisibleSplitInfo;
use crate::replay::{consumer_to_producer, pairwise_root_map};
use crate::test::helpers::{context, pointwise_pair};
use crate::trivial_reduction::TrivialReductionInfo;

#[test]
fn test_trivial_reduction_and_its_splits() {
    let mut fusion = Fusion::new();
    let root = vec![
        fusion.graph_mut().iteration_axis(8),
        fusion.graph_mut().reduction_axis(1),
        fusion.graph_mut().reduction_axis(4),
    ];
    let t = fusion.new_tensor().domain(TensorDomain::contiguous(root.clone())).call();
    fusion.split(t, 1, 2).unwrap();

    let info = TrivialReductionInfo::build(fusion.graph());
    assert!(!info.is_derived(root[0]));
    assert!(info.is_derived(root[1]));
    assert!(!info.is_derived(root[2]));
    assert!(info.is_derived(fusion.leaf(t, 1)));
    assert!(info.is_derived(fusion.leaf(t, 2)));
}

#[test]
fn test_partial_split_offsets() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[16], MemoryType::Global);
    let root = fusion.leaf(t, 0);
    fusion.split_partial(t, 0, 4, 1, 2).unwrap();

    let ctx = context(&fusion);
    let splits = ctx.partial_splits();
    assert_eq!(splits.start_offset(root).and_then(|e| e.as_int()), Some(1));
    assert_eq!(splits.stop_offset(root).and_then(|e| e.as_int()), Some(2));
    assert!(splits.start_offset(fusion.leaf(t, 0)).is_none());
}

#[test]
fn test_only_intermediate_non_divisible_splits_are_predicated() {
    let mut fusion = Fusion::new();
    // Root split: covered by the root predicate.
    let t0 = fusion.tensor_of(&[10], MemoryType::Global);
    fusion.split(t0, 0, 4).unwrap();
    // Intermediate split that does not divide 30.
    let t1 = fusion.tensor_of(&[10, 3], MemoryType::Global);
    fusion.merge(t1, 0).unwrap();
    let merged = fusion.leaf(t1, 0);
    fusion.split(t1, 0, 4).unwrap();
    // Intermediate split that divides 32.
    let t2 = fusion.tensor_of(&[8, 4], MemoryType::Global);
    fusion.merge(t2, 0).unwrap();
    fusion.split(t2, 0, 4).unwrap();

    let info = NonDivisibleSplitInfo::build(&fusion);
    assert!(info.splits_to_predicate(t0).is_empty());
    assert_eq!(info.axes_to_predicate(t1).collect::<Vec<_>>(), vec![merged]);
    assert!(info.splits_to_predicate(t2).is_empty());
}

#[test]
fn test_loop_map_stops_at_compute_at() {
    let (mut fusion, t0, t1) = pointwise_pair(&[8, 4], MemoryType::Global, MemoryType::Global);
    fusion.tensor_mut(t0).set_compute_at(1);

    let maps = CaMaps::build(&fusion);
    let (p0, p1) = (fusion.leaf(t0, 0), fusion.leaf(t0, 1));
    let (c0, c1) = (fusion.leaf(t1, 0), fusion.leaf(t1, 1));

    for mode in [MappingMode::Parallel, MappingMode::Index] {
        assert!(maps.get(mode).are_mapped(p0, c0));
        assert!(maps.get(mode).are_mapped(p1, c1));
    }
    assert!(maps.loops.are_mapped(p0, c0));
    assert!(!maps.loops.are_mapped(p1, c1));
    assert_eq!(maps.loops.concrete(c1), c1);
    assert_eq!(maps.index.class_of(c1), vec![p1, c1]);
}

#[test]
fn test_broadcast_only_joins_parallel_map() {
    let mut fusion = Fusion::new();
    let root = vec![fusion.graph_mut().broadcast_axis()];
    let t0 = fusion.new_tensor().domain(TensorDomain::contiguous(root)).memory_type(MemoryType::Global).call();
    let t1 = fusion.derived_tensor(&[8], MemoryType::Global, TensorOp::Pointwise, vec![t0]);
    let (p, c) = (fusion.leaf(t0, 0), fusion.leaf(t1, 0));

    let maps = CaMaps::build(&fusion);
    assert!(maps.parallel.are_mapped(p, c));
    assert!(!maps.index.are_mapped(p, c));
    // The iteration axis represents the class even though it came later.
    assert_eq!(maps.parallel.concrete(p), c);
}

#[test]
fn test_replay_pairs_matching_splits() {
    let (mut fusion, t0, t1) = pointwise_pair(&[16], MemoryType::Global, MemoryType::Global);
    fusion.split(t0, 0, 4).unwrap();
    fusion.split(t1, 0, 4).unwrap();
    fusion.split(t1, 0, 2).unwrap();

    let p_root = fusion.tensor(t0).domain().root()[0];
    let c_root = fusion.tensor(t1).domain().root()[0];
    assert_eq!(pairwise_root_map(&fusion, t0, t1), vec![(p_root, c_root)]);

    let c2p = consumer_to_producer(&fusion, t0, t1);
    // The consumer's second split has no producer counterpart.
    assert_eq!(c2p.get(&fusion.leaf(t1, 2)), Some(&fusion.leaf(t0, 1)));
    assert!(c2p.get(&fusion.leaf(t1, 0)).is_none());
    assert!(c2p.get(&fusion.leaf(t1, 1)).is_none());
}
