//! Double-buffered shared memory.

use tessera_ir::{DoubleBufferStage, Fusion, MemoryType, TensorId, TensorOp};

use crate::context::LowerContext;
use crate::error::IndexError;
use crate::strided::{consumer_index, producer_index};
use crate::test::helpers::{context, eval_with, loops_for};

/// `T0 (global) -> T1 (shared, double-buffered at 1) -> T2 (global)`.
fn double_buffered_fusion() -> (Fusion, TensorId, TensorId) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8, 4], MemoryType::Global);
    let t1 = fusion.derived_tensor(&[8, 4], MemoryType::Shared, TensorOp::Pointwise, vec![t0]);
    let t2 = fusion.derived_tensor(&[8, 4], MemoryType::Global, TensorOp::Pointwise, vec![t1]);
    fusion.tensor_mut(t1).set_compute_at(1);
    fusion.tensor_mut(t1).set_double_buffered(true);
    (fusion, t1, t2)
}

#[test]
fn test_double_buffer_axis_and_size() {
    let (fusion, t1, _) = double_buffered_fusion();
    let ctx = context(&fusion);
    assert_eq!(ctx.double_buffer().double_buffer_axis(t1), Some(fusion.leaf(t1, 0)));
    assert_eq!(ctx.double_buffer().original_alloc_size(t1).map(ToString::to_string).as_deref(), Some("4"));
}

#[test]
fn test_reader_and_writer_use_opposite_buffers() {
    let (fusion, t1, t2) = double_buffered_fusion();
    let ctx = context(&fusion);

    let read_loops = loops_for(&fusion, t2, &["i", "j"]);
    let read = producer_index(&ctx, t1, t2, &read_loops).unwrap();
    assert_eq!(read.indices().len(), 3);
    assert_eq!(read.indices()[1].to_string(), "j");
    assert_eq!(read.indices()[2].to_string(), "i % 2 * 4");

    let write_loops = loops_for(&fusion, t1, &["i", "k"]);
    let write = consumer_index(&ctx, t1, &write_loops).unwrap();
    assert_eq!(write.indices().len(), 3);
    assert_eq!(write.indices()[1].to_string(), "k");
    assert_eq!(write.indices()[2].to_string(), "(1 - i % 2) * 4");

    for i in 0..8 {
        let read_slot = eval_with(&read.indices()[2], &[("i", i)]).unwrap();
        let write_slot = eval_with(&write.indices()[2], &[("i", i)]).unwrap();
        assert!(read_slot == 0 || read_slot == 4);
        assert_eq!(read_slot + write_slot, 4, "iteration {i}");
    }
}

#[test]
fn test_prologue_writes_without_buffer_term() {
    let (fusion, t1, _) = double_buffered_fusion();
    let ctx = context(&fusion);

    let mut loops = loops_for(&fusion, t1, &["i", "k"]);
    loops[0] = loops[0].with_double_buffer_stage(DoubleBufferStage::Prolog);
    let write = consumer_index(&ctx, t1, &loops).unwrap();
    assert_eq!(write.indices().len(), 2);
}

#[test]
fn test_double_buffer_needs_an_outer_axis() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let t1 = fusion.derived_tensor(&[8], MemoryType::Shared, TensorOp::Pointwise, vec![t0]);
    fusion.tensor_mut(t1).set_double_buffered(true);

    let err = LowerContext::builder().fusion(&fusion).build().unwrap_err();
    assert_eq!(err, IndexError::MissingDoubleBufferAxis { tensor: t1 });
}
