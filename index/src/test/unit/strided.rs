//! Strided index assembly for global, shared and local tensors.

use test_case::test_case;

use tessera_ir::{Fusion, MemoryType, TensorDomain, TensorOp};

use crate::config::IndexConfig;
use crate::context::LowerContext;
use crate::error::IndexError;
use crate::strided::{consumer_index, consumer_strided_indices, producer_index};
use crate::test::helpers::{context, loops_for, pointwise_pair};

#[test]
fn test_global_consumer_split_inner() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8, 16], MemoryType::Global);
    fusion.split(t, 1, 4).unwrap();
    let loops = loops_for(&fusion, t, &["i", "j", "k"]);

    let ctx = context(&fusion);
    let index = consumer_index(&ctx, t, &loops).unwrap();
    assert_eq!(index.indices()[0].to_string(), "i * 16");
    assert_eq!(index.indices()[1].to_string(), "j * 4 + k");
    assert_eq!(index.flat().to_string(), "i * 16 + (j * 4 + k)");
    assert_eq!(index.to_string(), "T0[i * 16 + (j * 4 + k)]");
    assert!(index.unroll_required().is_empty());
}

#[test_case(vec![false, false], "i * T0.stride[0] + j * T0.stride[1]"; "no_contiguity")]
#[test_case(vec![false, true], "i * T0.stride[0] + j"; "inner_contiguous")]
#[test_case(vec![true, true], "i * 6 + j"; "fully_contiguous")]
fn test_global_strides(contiguity: Vec<bool>, expected: &str) {
    let mut fusion = Fusion::new();
    let root = vec![fusion.graph_mut().iteration_axis(4), fusion.graph_mut().iteration_axis(6)];
    let domain = TensorDomain::new(root, contiguity).unwrap();
    let t = fusion.new_tensor().domain(domain).memory_type(MemoryType::Global).call();
    let loops = loops_for(&fusion, t, &["i", "j"]);

    let ctx = context(&fusion);
    assert_eq!(consumer_index(&ctx, t, &loops).unwrap().flat().to_string(), expected);
}

#[test]
fn test_contiguous_merge_uses_single_index() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Global);
    fusion.merge(t, 0).unwrap();
    let loops = loops_for(&fusion, t, &["i"]);

    let ctx = context(&fusion);
    let indices = consumer_strided_indices(&ctx, t, &loops).unwrap();
    assert!(indices[0].is_zero());
    assert_eq!(indices[1].to_string(), "i");
}

#[test]
fn test_contig_indexing_disabled_decomposes_merge() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Global);
    fusion.merge(t, 0).unwrap();
    let loops = loops_for(&fusion, t, &["i"]);

    let config = IndexConfig::builder().contig_indexing(false).build();
    let ctx = LowerContext::builder().fusion(&fusion).config(config).build().unwrap();
    let index = consumer_index(&ctx, t, &loops).unwrap();
    assert_eq!(index.flat().to_string(), "i / 8 * 8 + i % 8");
}

#[test]
fn test_reduction_axis_takes_no_storage() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8, 4], MemoryType::Global);
    let root = vec![fusion.graph_mut().iteration_axis(8), fusion.graph_mut().reduction_axis(4)];
    let t1 = fusion
        .new_tensor()
        .domain(TensorDomain::contiguous(root))
        .memory_type(MemoryType::Global)
        .op(TensorOp::Reduction)
        .inputs(vec![t0])
        .call();
    let loops = loops_for(&fusion, t1, &["i", "r"]);

    let ctx = context(&fusion);
    let consumer = consumer_index(&ctx, t1, &loops).unwrap();
    assert!(consumer.indices()[1].is_zero());
    assert_eq!(consumer.flat().to_string(), "i");

    let producer = producer_index(&ctx, t0, t1, &loops).unwrap();
    assert_eq!(producer.flat().to_string(), "i * 4 + r");
}

#[test]
fn test_only_reductions_index_zero() {
    let mut fusion = Fusion::new();
    let root = vec![fusion.graph_mut().reduction_axis(4)];
    let t = fusion.new_tensor().domain(TensorDomain::contiguous(root)).memory_type(MemoryType::Global).call();
    let loops = loops_for(&fusion, t, &["r"]);

    let ctx = context(&fusion);
    let index = consumer_index(&ctx, t, &loops).unwrap();
    assert_eq!(index.indices().len(), 1);
    assert!(index.flat().is_zero());
}

#[test_case(-1, "i + 1"; "shift_left")]
#[test_case(1, "i"; "shift_right_into_halo")]
fn test_global_producer_of_shift(offset: i64, expected: &str) {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::Shift { offsets: vec![offset], pad_width: vec![1] };
    let t1 = fusion.derived_tensor(&[8], MemoryType::Global, op, vec![t0]);
    let loops = loops_for(&fusion, t1, &["i"]);

    let ctx = context(&fusion);
    let index = producer_index(&ctx, t0, t1, &loops).unwrap();
    assert_eq!(index.flat().to_string(), expected);
}

#[test]
fn test_pointwise_producer_follows_consumer_split() {
    let (mut fusion, t0, t1) = pointwise_pair(&[8, 16], MemoryType::Global, MemoryType::Global);
    fusion.split(t1, 1, 4).unwrap();
    let loops = loops_for(&fusion, t1, &["i", "j", "k"]);

    let ctx = context(&fusion);
    let index = producer_index(&ctx, t0, t1, &loops).unwrap();
    assert_eq!(index.flat().to_string(), "i * 16 + (j * 4 + k)");
}

#[test]
fn test_local_producer_requires_unroll() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let t1 = fusion.derived_tensor(&[8], MemoryType::Local, TensorOp::Pointwise, vec![t0]);
    let t2 = fusion.derived_tensor(&[8], MemoryType::Global, TensorOp::Pointwise, vec![t1]);
    let loops = loops_for(&fusion, t2, &["i"]);

    let ctx = context(&fusion);
    let index = producer_index(&ctx, t1, t2, &loops).unwrap();
    assert_eq!(index.flat().to_string(), "i");
    assert_eq!(index.unroll_required(), &[loops[0].id()]);
}

#[test]
fn test_thread_parallel_local_producer_indexes_zero() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[128], MemoryType::Global);
    let t1 = fusion.derived_tensor(&[128], MemoryType::Local, TensorOp::Pointwise, vec![t0]);
    let t2 = fusion.derived_tensor(&[128], MemoryType::Global, TensorOp::Pointwise, vec![t1]);
    fusion.parallelize(t1, 0, tessera_ir::ParallelType::TIDx);
    fusion.parallelize(t2, 0, tessera_ir::ParallelType::TIDx);
    let loops = loops_for(&fusion, t2, &["i"]);

    let ctx = context(&fusion);
    let index = producer_index(&ctx, t1, t2, &loops).unwrap();
    assert!(index.flat().is_zero());
    assert!(index.unroll_required().is_empty());

    let consumer = consumer_index(&ctx, t2, &loops).unwrap();
    assert_eq!(consumer.flat().to_string(), "threadIdx.x");
}

#[test]
fn test_foreign_handles_are_errors() {
    let mut other = Fusion::new();
    other.tensor_of(&[4], MemoryType::Global);
    let foreign = other.tensor_of(&[4, 4], MemoryType::Global);
    let foreign_loops = loops_for(&other, foreign, &["a", "b"]);

    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8], MemoryType::Global);
    let loops = loops_for(&fusion, t, &["i"]);

    let ctx = context(&fusion);
    let err = consumer_index(&ctx, foreign, &loops).unwrap_err();
    assert_eq!(err, IndexError::Ir { source: tessera_ir::Error::UnknownTensor { tensor: foreign } });
    assert!(producer_index(&ctx, t, foreign, &loops).is_err());

    let err = consumer_index(&ctx, t, &foreign_loops).unwrap_err();
    let axis = foreign_loops[0].axis();
    assert_eq!(err, IndexError::Ir { source: tessera_ir::Error::UnknownAxis { axis } });
}
