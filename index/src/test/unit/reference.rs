use std::collections::HashMap;

use tessera_ir::MemoryType;

use crate::context::LowerContext;
use crate::halo::AxisHaloInfo;
use crate::reference::{ReferenceTensor, index_map_reference_to, reference_halo_extent_map};
use crate::test::helpers::{context, loops_for, pointwise_pair};

#[test]
fn test_reference_follows_loop_nest() {
    let (mut fusion, t0, t1) = pointwise_pair(&[16], MemoryType::Global, MemoryType::Global);
    let (p_root, c_root) = (fusion.leaf(t0, 0), fusion.leaf(t1, 0));
    fusion.split(t1, 0, 4).unwrap();
    let loops = loops_for(&fusion, t1, &["i", "j"]);

    let ctx = context(&fusion);
    let reference = ReferenceTensor::build(&ctx, &loops).unwrap();
    assert_eq!(reference.ndims(), 2);
    assert_eq!(reference.domain().root(), &[c_root]);
    assert_eq!(reference.axis(1), fusion.leaf(t1, 1));

    // The producer root is the concrete axis of the consumer root.
    assert_eq!(reference.id_of_concrete(p_root), Some(c_root));
    let to_producer = index_map_reference_to(&ctx, fusion.tensor(t0).domain(), &reference);
    assert_eq!(to_producer, HashMap::from([(c_root, p_root)]));
}

#[test]
fn test_unrelated_axes_are_not_mapped() {
    let mut fusion = tessera_ir::Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let t1 = fusion.tensor_of(&[8], MemoryType::Global);
    let loops = loops_for(&fusion, t1, &["i"]);

    let ctx = context(&fusion);
    let reference = ReferenceTensor::build(&ctx, &loops).unwrap();
    assert!(index_map_reference_to(&ctx, fusion.tensor(t0).domain(), &reference).is_empty());
}

#[test]
fn test_halo_extent_is_keyed_by_target_axis() {
    let (fusion, t0, t1) = pointwise_pair(&[16], MemoryType::Global, MemoryType::Global);
    let (p_root, c_root) = (fusion.leaf(t0, 0), fusion.leaf(t1, 0));
    let loops = loops_for(&fusion, t1, &["i"]);

    let seeds = HashMap::from([(c_root, AxisHaloInfo::new(1, 0))]);
    let ctx = LowerContext::builder().fusion(&fusion).halo_seeds(seeds).build().unwrap();
    let reference = ReferenceTensor::build(&ctx, &loops).unwrap();
    let to_producer = index_map_reference_to(&ctx, fusion.tensor(t0).domain(), &reference);
    let extents = reference_halo_extent_map(&ctx, &to_producer);
    assert_eq!(extents.len(), 1);
    assert_eq!(extents[&p_root].to_string(), "17");
}

#[test]
fn test_empty_reference() {
    let reference = ReferenceTensor::empty();
    assert_eq!(reference.ndims(), 0);
    assert!(reference.concrete_to_id().is_empty());
}
