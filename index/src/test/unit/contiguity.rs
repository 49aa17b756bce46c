use std::collections::{HashMap, HashSet};

use test_case::test_case;

use tessera_ir::{Fusion, MemoryType};

use crate::contiguity::ContigIds;
use crate::error::IndexError;
use crate::halo::{AxisHaloInfo, HaloInfo};

fn contig_ids(fusion: &Fusion, tensor: tessera_ir::TensorId, flags: &[bool]) -> ContigIds {
    let domain = fusion.tensor(tensor).domain();
    ContigIds::new(fusion.graph(), &HaloInfo::default(), domain.leaf(), domain.root(), flags).unwrap()
}

#[test]
fn test_merge_chain_collapses_to_output() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[2, 3, 4], MemoryType::Global);
    let root = fusion.tensor(t).domain().root().to_vec();
    fusion.merge(t, 0).unwrap();
    fusion.merge(t, 0).unwrap();
    let merged = fusion.leaf(t, 0);

    let ids = contig_ids(&fusion, t, &[true, true, true]);
    assert_eq!(ids.contig_ids(), &HashSet::from([merged]));
    let within = &ids.within_contig_ids()[&merged];
    assert!(root.iter().all(|id| within.contains(id)));
    assert_eq!(within.len(), 4);
}

#[test_case(vec![true, false, true], vec![0, 2]; "flags_only")]
#[test_case(vec![false, false, false], vec![]; "none")]
fn test_unmerged_roots_follow_flags(flags: Vec<bool>, expected: Vec<usize>) {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[2, 3, 4], MemoryType::Global);
    let root = fusion.tensor(t).domain().root().to_vec();

    let ids = contig_ids(&fusion, t, &flags);
    let expected: HashSet<_> = expected.into_iter().map(|pos| root[pos]).collect();
    assert_eq!(ids.contig_ids(), &expected);
}

#[test]
fn test_merge_across_non_contiguous_root_is_not_contiguous() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Global);
    fusion.merge(t, 0).unwrap();
    let merged = fusion.leaf(t, 0);

    let ids = contig_ids(&fusion, t, &[false, true]);
    assert!(!ids.is_contig(merged));
    assert!(ids.is_contig(fusion.tensor(t).domain().root()[1]));
}

#[test]
fn test_reordered_merge_is_not_contiguous() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Global);
    fusion.reorder(t, &[1, 0]).unwrap();
    fusion.merge(t, 0).unwrap();
    let merged = fusion.leaf(t, 0);

    let ids = contig_ids(&fusion, t, &[true, true]);
    assert!(!ids.is_contig(merged));
    assert_eq!(ids.contig_ids().len(), 2);
}

#[test]
fn test_halo_breaks_contiguity() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Global);
    let root = fusion.tensor(t).domain().root().to_vec();
    fusion.merge(t, 0).unwrap();
    let merged = fusion.leaf(t, 0);

    let seeds = HashMap::from([(root[1], AxisHaloInfo::new(1, 0))]);
    let halo = HaloInfo::build(&fusion, &seeds);
    let domain = fusion.tensor(t).domain();
    let ids = ContigIds::new(fusion.graph(), &halo, domain.leaf(), domain.root(), &[true, true]).unwrap();
    assert!(!ids.is_contig(merged));
    assert!(!ids.is_contig(root[1]));
}

#[test]
fn test_flag_count_must_match_root() {
    let mut fusion = Fusion::new();
    let t = fusion.tensor_of(&[4, 8], MemoryType::Global);
    let domain = fusion.tensor(t).domain();

    let err = ContigIds::new(fusion.graph(), &HaloInfo::default(), domain.leaf(), domain.root(), &[true]).unwrap_err();
    assert_eq!(err, IndexError::ContiguityLengthMismatch { expected: 2, actual: 1 });
}
