//! Size of every parallel dimension a kernel launches with.
//!
//! Each thread and block dimension is backed by one or more concrete axes.
//! When all of them have the same extent the dimension is *exact*: every
//! thread index along it is in bounds for every axis bound to it, so
//! predicates on those axes can be dropped.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use tessera_ir::{AxisId, Expr, ExprOp, ExpressionEvaluator, Fusion, ParallelType, VarKind};

use crate::ca_map::ComputeAtMap;

/// How `threadIdx.x` was padded by the launch configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarpPadding {
    /// `threadIdx.x` is padded to a multiple of the warp size.
    pub is_tidx_padded: bool,
    /// The padded `threadIdx.x` is exactly one warp.
    pub is_tidx_single_warp: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ParallelDimensionMap {
    dim_map: HashMap<ParallelType, Arc<Expr>>,
    exact_types: Vec<ParallelType>,
    /// Constant extents seen per concrete axis.
    constant_extents: HashMap<AxisId, BTreeSet<i64>>,
    /// Concrete axes bound to each parallel type.
    concrete_doms: HashMap<ParallelType, BTreeSet<AxisId>>,
}

impl ParallelDimensionMap {
    pub fn build(fusion: &Fusion, index_map: &ComputeAtMap, warp: WarpPadding, warp_size: i64) -> Self {
        let mut map = Self::default();
        let graph = fusion.graph();

        for tensor in fusion.tensors() {
            for &id in tensor.domain().leaf() {
                map.register_constant_extent(fusion, index_map, id);
                let pt = graph.axis(id).parallel_type();
                if pt.is_thread() {
                    map.concrete_doms.entry(pt).or_default().insert(index_map.concrete(id));
                }
            }
        }

        for pt in ParallelType::thread_types() {
            let Some(doms) = map.concrete_doms.get(&pt).cloned() else { continue };
            if doms.len() == 1 {
                map.populate_single(pt, &doms);
            } else {
                map.populate_multiple(fusion, pt, &doms);
            }
        }

        map.adjust_for_warp_padding(warp, warp_size);
        debug!(dims = %map, "parallel dimension map built");
        map
    }

    fn register_constant_extent(&mut self, fusion: &Fusion, index_map: &ComputeAtMap, id: AxisId) {
        let extent = fusion.graph().axis(id).extent();
        let Some(value) = ExpressionEvaluator::evaluate_const(extent) else { return };
        // A size-one input most likely comes from a broadcast, which says
        // nothing about the real dimension.
        if extent.leaves().iter().any(|leaf| leaf.is_one()) {
            return;
        }
        self.constant_extents.entry(index_map.concrete(id)).or_default().insert(value);
    }

    fn populate_single(&mut self, pt: ParallelType, doms: &BTreeSet<AxisId>) {
        let consts = doms.first().and_then(|id| self.constant_extents.get(id));
        match consts {
            Some(values) if values.len() == 1 => {
                let value = values.first().copied().unwrap_or_default();
                self.dim_map.insert(pt, Expr::int(value));
                self.exact_types.push(pt);
            }
            Some(_) => {
                self.dim_map.insert(pt, Expr::parallel_dim(pt));
            }
            None => {
                self.dim_map.insert(pt, Expr::parallel_dim(pt));
                self.exact_types.push(pt);
            }
        }
    }

    fn populate_multiple(&mut self, fusion: &Fusion, pt: ParallelType, doms: &BTreeSet<AxisId>) {
        let graph = fusion.graph();
        let mut all_equal = true;
        let mut known_dimension: Option<&Arc<Expr>> = None;
        let mut known_const: Option<i64> = None;

        for &concrete in doms {
            let axis = graph.axis(concrete);
            if axis.is_broadcast() {
                continue;
            }
            if let Some(values) = self.constant_extents.get(&concrete) {
                if values.len() > 1 {
                    all_equal = false;
                    break;
                }
                let this_const = values.first().copied().unwrap_or_default();
                match known_const {
                    None => known_const = Some(this_const),
                    Some(known) if known == this_const => continue,
                    Some(_) => {
                        all_equal = false;
                        break;
                    }
                }
            }

            let this_dimension = axis.extent();
            match known_dimension {
                None => known_dimension = Some(this_dimension),
                Some(known) if !equal_dim(known, this_dimension) => {
                    all_equal = false;
                    break;
                }
                Some(_) => {}
            }
        }

        if all_equal {
            self.exact_types.push(pt);
        }
        let dim = match known_const {
            Some(value) if all_equal => Expr::int(value),
            _ => Expr::parallel_dim(pt),
        };
        self.dim_map.insert(pt, dim);
    }

    fn adjust_for_warp_padding(&mut self, warp: WarpPadding, warp_size: i64) {
        if !warp.is_tidx_padded {
            return;
        }
        let pt = ParallelType::TIDx;
        let Some(dim) = self.dim_map.get(&pt).cloned() else { return };

        if self.is_exact(pt) && dim.as_int().is_some_and(|d| d % warp_size == 0) {
            return;
        }

        let padded = if warp.is_tidx_single_warp {
            Expr::int(warp_size)
        } else if dim == Expr::parallel_dim(pt) {
            dim
        } else if let Some(d) = dim.as_int() {
            Expr::int((d + warp_size - 1) / warp_size * warp_size)
        } else {
            dim.ceil_div(&Expr::int(warp_size)).mul_int(warp_size)
        };
        debug!(%padded, "threadIdx.x padded to warps");
        self.dim_map.insert(pt, padded);
        self.exact_types.retain(|t| *t != pt);
    }

    /// Dimension of `pt`, if any axis is bound to it.
    pub fn get(&self, pt: ParallelType) -> Option<&Arc<Expr>> {
        self.dim_map.get(&pt)
    }

    pub fn is_exact(&self, pt: ParallelType) -> bool {
        self.exact_types.contains(&pt)
    }
}

impl fmt::Display for ParallelDimensionMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for pt in ParallelType::thread_types() {
            let Some(dim) = self.get(pt) else { continue };
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let exactness = if self.is_exact(pt) { "exact" } else { "non-exact" };
            write!(f, "{pt}: {dim} ({exactness})")?;
        }
        Ok(())
    }
}

/// Conservative symbolic equality of two dimensions: `false` does not
/// prove they differ.
///
/// Definitions are compared through their first operand only.
pub fn equal_dim(dim1: &Arc<Expr>, dim2: &Arc<Expr>) -> bool {
    if Arc::ptr_eq(dim1, dim2) || dim1.id() == dim2.id() {
        return true;
    }

    match (dim1.op(), dim2.op()) {
        (ExprOp::Const(a), ExprOp::Const(b)) => a == b,
        (ExprOp::Var(a), ExprOp::Var(b)) => {
            a.kind != VarKind::LoopIndex && b.kind != VarKind::LoopIndex && a.name == b.name
        }
        (ExprOp::Binary(op1, lhs1, _), ExprOp::Binary(op2, lhs2, _)) if op1 == op2 => equal_dim(lhs1, lhs2),
        (ExprOp::Unary(op1, a1), ExprOp::Unary(op2, a2)) if op1 == op2 => equal_dim(a1, a2),
        _ => false,
    }
}
