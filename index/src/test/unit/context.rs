use tessera_ir::{Fusion, MemoryType, TensorOp};

use crate::ca_map::CaMaps;
use crate::config::{DEFAULT_WARP_SIZE, IndexConfig};
use crate::context::{LowerContext, is_lowering};
use crate::error::IndexError;
use crate::test::helpers::{context, pointwise_pair};

#[test]
fn test_one_context_per_thread() {
    let mut fusion = Fusion::new();
    fusion.tensor_of(&[8], MemoryType::Global);

    assert!(!is_lowering());
    let ctx = context(&fusion);
    assert!(is_lowering());

    let err = LowerContext::builder().fusion(&fusion).build().unwrap_err();
    assert_eq!(err, IndexError::NestedLowering);
    assert!(is_lowering());

    drop(ctx);
    assert!(!is_lowering());
    assert!(LowerContext::builder().fusion(&fusion).build().is_ok());
    assert!(!is_lowering());
}

#[test]
fn test_failed_build_releases_thread() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[8], MemoryType::Shared);
    fusion.tensor_mut(t).set_double_buffered(true);

    assert!(LowerContext::builder().fusion(&fusion).build().is_err());
    assert!(!is_lowering());
}

#[test]
fn test_supplied_maps_replace_derived_ones() {
    let (fusion, t0, t1) = pointwise_pair(&[8], MemoryType::Global, MemoryType::Global);
    let (p, c) = (fusion.leaf(t0, 0), fusion.leaf(t1, 0));

    {
        let ctx = context(&fusion);
        assert!(ctx.ca_index_map().are_mapped(p, c));
        assert_eq!(ctx.ca_index_map().concrete(c), p);
    }

    let ctx = LowerContext::builder().fusion(&fusion).ca_maps(CaMaps::empty()).build().unwrap();
    assert!(!ctx.ca_index_map().are_mapped(p, c));
    assert_eq!(ctx.ca_index_map().concrete(c), c);
}

#[test]
fn test_default_config() {
    let config = IndexConfig::default();
    assert!(config.magic_zero);
    assert!(config.contig_indexing);
    assert_eq!(config.warp_size, DEFAULT_WARP_SIZE);

    let config = IndexConfig::builder().magic_zero(false).warp_size(64).build();
    assert_eq!(config, IndexConfig { magic_zero: false, contig_indexing: true, warp_size: 64 });
}

#[test]
fn test_malformed_gather_fails_the_build() {
    let mut fusion = Fusion::new();
    let t0 = fusion.tensor_of(&[8], MemoryType::Global);
    let op = TensorOp::Gather { window_shape: vec![3], pad_width: vec![[1, 1]] };
    fusion.derived_tensor(&[8], MemoryType::Global, op, vec![t0]);

    let err = LowerContext::builder().fusion(&fusion).build().unwrap_err();
    assert!(matches!(err, IndexError::Ir { source: tessera_ir::Error::InvalidTensorOp { op: "gather", .. } }));
    assert!(!is_lowering());
}
