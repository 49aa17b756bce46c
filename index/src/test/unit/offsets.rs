use std::collections::HashMap;

use test_case::test_case;

use tessera_ir::{Expr, Fusion, MemoryType, TensorOp};

use crate::offsets::{global_consumer_offset_with_partial_split, producer_halo_offset, producer_offset_with_gather};
use crate::test::helpers::context;

#[test_case(1, 0; "shift_right")]
#[test_case(-1, 1; "shift_left")]
fn test_producer_halo_offset(shift: i64, expected: i64) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::shift(vec![shift], vec![1]).unwrap();
    let t1 = fusion.derived_tensor(&[8], MemoryType::Global, op, vec![t0]);

    let ctx = context(&fusion);
    let offset = producer_halo_offset(&ctx, fusion.tensor(t0), 0, fusion.tensor(t1)).unwrap();
    assert_eq!(offset, expected);
}

#[test]
fn test_gather_offset_is_window_minus_left_pad() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::gather(vec![3], vec![[1, 1]]).unwrap();
    let t1 = fusion.derived_tensor(&[8, 3], MemoryType::Global, op, vec![t0]);
    let window = fusion.tensor(t1).domain().root()[1];

    let ctx = context(&fusion);
    let index_map = HashMap::from([(window, Expr::loop_index("w"))]);
    let offset = producer_offset_with_gather(&ctx, 0, fusion.tensor(t1), &index_map, None).unwrap();
    assert_eq!(offset.to_string(), "w - 1");

    // Not a gather: nothing to add.
    let offset = producer_offset_with_gather(&ctx, 0, fusion.tensor(t0), &index_map, None).unwrap();
    assert!(offset.is_zero());
}

#[test]
fn test_gather_offset_requires_window_index() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::gather(vec![3], vec![[1, 1]]).unwrap();
    let t1 = fusion.derived_tensor(&[8, 3], MemoryType::Global, op, vec![t0]);

    let ctx = context(&fusion);
    assert!(producer_offset_with_gather(&ctx, 0, fusion.tensor(t1), &HashMap::new(), None).is_err());
}

#[test]
fn test_partial_split_start_offset() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[16], MemoryType::Global);
    let root = fusion.leaf(t, 0);
    fusion.split_partial(t, 0, 4, 1, 2).unwrap();
    let other = fusion.tensor_of(&[16], MemoryType::Global);

    let ctx = context(&fusion);
    assert_eq!(global_consumer_offset_with_partial_split(&ctx, root).as_int(), Some(1));
    assert!(global_consumer_offset_with_partial_split(&ctx, fusion.leaf(other, 0)).is_zero());
}
