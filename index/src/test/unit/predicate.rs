//! Root predicates and their omission.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use test_case::test_case;

use tessera_ir::{Expr, Fusion, MemoryType, ParallelType, TensorOp};

use crate::context::LowerContext;
use crate::error::IndexError;
use crate::halo::AxisHaloInfo;
use crate::predicate::{RootPredicateInfo, can_omit_stop_predicate, reference_root_predicates, simplify_start_offset};
use crate::test::helpers::{context, loops_for};

#[test]
fn test_full_loop_needs_no_predicate() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8], MemoryType::Global);
    let loops = loops_for(&fusion, t, &["i"]);

    let ctx = context(&fusion);
    let (predicates, reference) = reference_root_predicates(&ctx, t, &loops, None, false).unwrap();
    assert_eq!(reference.ndims(), 1);
    assert_eq!(predicates.len(), 1);
    assert!(predicates[0].start_predicate().is_true());
    assert!(predicates[0].stop_predicate().is_true());
    assert_eq!(predicates[0].root_ids(), &HashSet::from([fusion.leaf(t, 0)]));
}

#[test_case(AxisHaloInfo::new(0, 2), "true", "i < 8"; "right_halo_keeps_stop")]
#[test_case(AxisHaloInfo::new(2, 0), "i - 2 >= 0", "true"; "left_halo_moves_start")]
fn test_halo_predicates(halo: AxisHaloInfo, start: &str, stop: &str) {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8], MemoryType::Global);
    let loops = loops_for(&fusion, t, &["i"]);
    let seeds = HashMap::from([(fusion.leaf(t, 0), halo)]);

    let ctx = LowerContext::builder().fusion(&fusion).halo_seeds(seeds).build().unwrap();
    let (predicates, _) = reference_root_predicates(&ctx, t, &loops, None, false).unwrap();
    assert_eq!(predicates.len(), 1);
    assert_eq!(predicates[0].start_predicate().to_string(), start);
    assert_eq!(predicates[0].stop_predicate().to_string(), stop);
}

#[test]
fn test_merged_axes_share_one_predicate() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[10, 3], MemoryType::Global);
    let (a0, a1) = (fusion.leaf(t, 0), fusion.leaf(t, 1));
    fusion.merge(t, 0).unwrap();
    let merged = fusion.leaf(t, 0);
    fusion.split(t, 0, 4).unwrap();
    let loops = loops_for(&fusion, t, &["i", "j"]);

    let ctx = context(&fusion);
    let (predicates, _) = reference_root_predicates(&ctx, t, &loops, None, false).unwrap();

    // 30 is not a multiple of 4: the split input is predicated on its own.
    assert_eq!(predicates.len(), 2);
    assert_eq!(predicates[0].root_ids(), &HashSet::from([a0, a1]));
    assert_eq!(predicates[1].root_ids(), &HashSet::from([merged]));
    for predicate in &predicates {
        assert!(predicate.start_predicate().is_true());
        assert_eq!(predicate.stop_predicate().to_string(), "i * 4 + j < 30");
    }
}

#[test]
fn test_shift_trims_start() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::Shift { offsets: vec![1], pad_width: vec![1] };
    let t1 = fusion.derived_tensor(&[8], MemoryType::Global, op, vec![t0]);
    let loops = loops_for(&fusion, t1, &["i"]);

    let ctx = context(&fusion);
    let (predicates, _) = reference_root_predicates(&ctx, t1, &loops, None, false).unwrap();
    assert_eq!(predicates[0].start_predicate().to_string(), "i - 1 >= 0");
    assert_eq!(predicates[0].start_offset().as_int(), Some(-1));
    assert!(predicates[0].stop_predicate().is_true());
}

#[test]
fn test_padding_predicate_without_padding_is_false() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8], MemoryType::Global);
    let loops = loops_for(&fusion, t, &["i"]);

    let ctx = context(&fusion);
    let (predicates, reference) = reference_root_predicates(&ctx, t, &loops, None, true).unwrap();
    assert_eq!(predicates, vec![RootPredicateInfo::false_info()]);
    assert_eq!(reference.ndims(), 0);
}

#[test]
fn test_unswitch_uses_last_iteration() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8, 10], MemoryType::Global);
    fusion.split(t, 1, 4).unwrap();
    fusion.parallelize(t, 1, ParallelType::Unswitch);
    let loops = loops_for(&fusion, t, &["i", "j", "k"]);

    let ctx = context(&fusion);
    let (predicates, _) = reference_root_predicates(&ctx, t, &loops, Some(&loops[1]), false).unwrap();
    assert_eq!(predicates.len(), 2);

    assert!(predicates[0].stop_predicate().is_true());
    // Last iteration of the unswitched loops: 2 * 4 + 3 is past the extent.
    assert!(predicates[1].start_predicate().is_true());
    assert_eq!(predicates[1].stop_predicate().as_bool(), Some(false));
}

#[test]
fn test_unswitch_rejects_padding() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::Shift { offsets: vec![1], pad_width: vec![1] };
    let t1 = fusion.derived_tensor(&[8], MemoryType::Global, op, vec![t0]);
    let loops = loops_for(&fusion, t1, &["i"]);

    let ctx = context(&fusion);
    let err = reference_root_predicates(&ctx, t1, &loops, Some(&loops[0]), true).unwrap_err();
    assert_eq!(err, IndexError::UnswitchPadding);
}

#[test_case(128, 128, true; "exact_dimension")]
#[test_case(128, 64, false; "mixed_extents")]
fn test_thread_predicate_depends_on_exactness(first: i64, second: i64, omitted: bool) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[first], MemoryType::Global);
    let t1 = fusion.tensor_of(&[second], MemoryType::Global);
    fusion.parallelize(t0, 0, ParallelType::TIDx);
    fusion.parallelize(t1, 0, ParallelType::TIDx);
    let loops = loops_for(&fusion, t0, &["i"]);

    let ctx = context(&fusion);
    assert_eq!(ctx.parallel_dims().is_exact(ParallelType::TIDx), omitted);
    let (predicates, _) = reference_root_predicates(&ctx, t0, &loops, None, false).unwrap();
    assert_eq!(predicates[0].stop_predicate().is_true(), omitted);
    if !omitted {
        assert_eq!(predicates[0].stop_predicate().to_string(), "threadIdx.x < 128");
    }
}

#[test_case(64, 128, "threadIdx.x < 64"; "inexact_dimension_keeps_guard")]
#[test_case(64, 64, "true"; "exact_dimension_omits_guard")]
fn test_unswitched_thread_loop_keeps_parallel_index(first: i64, second: i64, stop: &str) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[first], MemoryType::Global);
    let t1 = fusion.tensor_of(&[second], MemoryType::Global);
    fusion.parallelize(t0, 0, ParallelType::TIDx);
    fusion.parallelize(t1, 0, ParallelType::TIDx);
    let loops = loops_for(&fusion, t0, &["i"]);

    let ctx = context(&fusion);
    let (predicates, _) = reference_root_predicates(&ctx, t0, &loops, Some(&loops[0]), false).unwrap();
    assert_eq!(predicates.len(), 1);
    assert!(predicates[0].start_predicate().is_true());
    assert_eq!(predicates[0].stop_predicate().to_string(), stop);
}

#[test]
fn test_simplify_start_offset() {
    let x = Expr::named("x");
    assert_eq!(simplify_start_offset(&Expr::int(2)), None);
    assert_eq!(simplify_start_offset(&Expr::zero()), None);
    assert_eq!(simplify_start_offset(&Expr::int(-1)).and_then(|e| e.as_int()), Some(-1));
    assert_eq!(simplify_start_offset(&Expr::zero().min(&x)), Some(x.clone()));
    assert_eq!(simplify_start_offset(&x.min(&Expr::zero())), Some(x.clone()));
    assert_eq!(simplify_start_offset(&x), Some(x));
}

#[test_case(Expr::loop_index("i"), 0, true; "loop_index")]
#[test_case(Expr::int(7), 0, true; "constant_in_range")]
#[test_case(Expr::int(7), 1, false; "constant_pushed_out_by_offset")]
#[test_case(Expr::int(8), 0, false; "constant_at_extent")]
#[test_case(Expr::loop_index("i").add(&Expr::one()), 0, false; "elaborated_index")]
fn test_stop_predicate_omission(index: Arc<Expr>, offset: i64, omitted: bool) {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8], MemoryType::Global);
    let axis = fusion.leaf(t, 0);

    let ctx = context(&fusion);
    assert_eq!(can_omit_stop_predicate(&ctx, &index, &Expr::int(offset), axis), omitted);
}
