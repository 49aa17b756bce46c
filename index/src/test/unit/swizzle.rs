//! Shared-memory swizzle.

use std::collections::{BTreeSet, HashMap};

use tessera_ir::{Expr, Fusion, MemoryType, Swizzle};

use crate::error::IndexError;
use crate::index_compute::IndexCompute;
use crate::strided::consumer_index;
use crate::swizzle::IndexSwizzle;
use crate::test::helpers::{context, eval_with, loops_for};

fn transposed(memory_type: MemoryType) -> (Fusion, tessera_ir::TensorId) {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 4], memory_type);
    let (first, second) = (fusion.leaf(t, 0), fusion.leaf(t, 1));
    fusion.tensor_mut(t).set_swizzle(Swizzle::Transpose { first, second });
    (fusion, t)
}

#[test]
fn test_transpose_rotates_second_axis() {
    let (fusion, t) = transposed(MemoryType::Shared);
    let loops = loops_for(&fusion, t, &["i", "j"]);

    let ctx = context(&fusion);
    let index = consumer_index(&ctx, t, &loops).unwrap();
    assert_eq!(index.indices()[1].to_string(), "(i + j) % 4");
    assert_eq!(index.flat().to_string(), "i * 4 + (i + j) % 4");
}

#[test]
fn test_transpose_outside_shared_memory_is_rejected() {
    let (fusion, t) = transposed(MemoryType::Local);
    let loops = loops_for(&fusion, t, &["i", "j"]);

    let ctx = context(&fusion);
    let err = consumer_index(&ctx, t, &loops).unwrap_err();
    assert!(matches!(err, IndexError::InvalidSwizzle { tensor, .. } if tensor == t));
}

#[test]
fn test_root_indices_are_pushed_to_split_leaves() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Shared);
    let (a, b) = (fusion.leaf(t, 0), fusion.leaf(t, 1));
    fusion.split(t, 1, 4).unwrap();
    let (outer, inner) = (fusion.leaf(t, 1), fusion.leaf(t, 2));
    fusion.tensor_mut(t).set_swizzle(Swizzle::Transpose { first: a, second: inner });

    let ctx = context(&fusion);
    let indexed = IndexCompute::builder()
        .ctx(&ctx)
        .domain(fusion.tensor(t).domain())
        .index_map(HashMap::from([(a, Expr::loop_index("i")), (b, Expr::loop_index("x"))]))
        .build()
        .unwrap();
    let mut swizzle = IndexSwizzle::new(&ctx, fusion.tensor(t), &indexed).unwrap();
    swizzle.run().unwrap();

    let map = swizzle.index_map();
    assert_eq!(eval_with(&map[&outer], &[("x", 5)]), Some(1));
    assert_eq!(eval_with(&map[&inner], &[("i", 3), ("x", 6)]), Some(1));
    // Rotating the inner leaf keeps each row a permutation of the buffer row.
    for i in 0..4 {
        let row: BTreeSet<i64> =
            (0..8).filter_map(|x| eval_with(&map[&b], &[("i", i), ("x", x)])).collect();
        assert_eq!(row, (0..8).collect());
    }
    assert_eq!(eval_with(&map[&b], &[("i", 1), ("x", 3)]), Some(0));
}

#[test]
fn test_forward_merge_puts_inner_index_outermost() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 2, 4], MemoryType::Shared);
    let (a, y, z) = (fusion.leaf(t, 0), fusion.leaf(t, 1), fusion.leaf(t, 2));
    fusion.merge(t, 1).unwrap();
    let merged = fusion.leaf(t, 1);
    fusion.tensor_mut(t).set_swizzle(Swizzle::Transpose { first: a, second: merged });

    let ctx = context(&fusion);
    let seed = HashMap::from([(a, Expr::loop_index("i")), (y, Expr::loop_index("y")), (z, Expr::loop_index("z"))]);
    let indexed = IndexCompute::builder().ctx(&ctx).domain(fusion.tensor(t).domain()).index_map(seed).build().unwrap();
    let mut swizzle = IndexSwizzle::new(&ctx, fusion.tensor(t), &indexed).unwrap();
    swizzle.run().unwrap();

    let map = swizzle.index_map();
    // `inner * extent(outer) + outer`, then rotated by `i`.
    assert_eq!(eval_with(&map[&merged], &[("i", 0), ("y", 1), ("z", 0)]), Some(1));
    assert_eq!(eval_with(&map[&merged], &[("i", 2), ("y", 0), ("z", 3)]), Some(0));
    for i in 0..4 {
        let mut slots = BTreeSet::new();
        for (yv, zv) in (0..2).flat_map(|yv| (0..4).map(move |zv| (yv, zv))) {
            let bind = [("i", i), ("y", yv), ("z", zv)];
            let slot = eval_with(&map[&y], &bind).zip(eval_with(&map[&z], &bind)).map(|(hi, lo)| hi * 4 + lo);
            slots.extend(slot);
        }
        assert_eq!(slots, (0..8).collect());
    }
}

#[test]
fn test_no_swizzle_is_a_pass_through() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Shared);
    fusion.split(t, 1, 4).unwrap();
    let leaf = fusion.tensor(t).domain().leaf().to_vec();

    let ctx = context(&fusion);
    let seed = leaf.iter().zip(["i", "j", "k"]).map(|(id, name)| (*id, Expr::loop_index(name))).collect();
    let mut indexed =
        IndexCompute::builder().ctx(&ctx).domain(fusion.tensor(t).domain()).index_map(seed).build().unwrap();
    indexed.run();
    let mut swizzle = IndexSwizzle::new(&ctx, fusion.tensor(t), &indexed).unwrap();
    swizzle.run().unwrap();
    assert_eq!(swizzle.index_map(), indexed.index_map());
}
