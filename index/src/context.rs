//! Lowering context shared by every index and predicate computation.
//!
//! A [`LowerContext`] is built once per lowering of a fusion. It owns the
//! analyses the index and predicate builders consult (co-iteration maps,
//! halo, partial splits, double buffering and so on) and is passed to them
//! by reference.
//!
//! Only one context may be alive on a thread at a time. Building a second
//! one while the first is still alive fails with
//! [`IndexError::NestedLowering`](crate::IndexError::NestedLowering).

use std::cell::Cell;
use std::collections::HashMap;
use std::marker::PhantomData;

use bon::bon;
use snafu::ensure;
use tracing::debug;

use tessera_ir::{AxisId, Fusion, TensorId};

use crate::ca_map::{CaMaps, ComputeAtMap};
use crate::config::IndexConfig;
use crate::double_buffer::DoubleBufferInfo;
use crate::error::{NestedLoweringSnafu, Result};
use crate::halo::{AxisHaloInfo, HaloInfo};
use crate::non_divisible::NonDivisibleSplitInfo;
use crate::parallel_dims::{ParallelDimensionMap, WarpPadding};
use crate::partial_split::PartialSplitMap;
use crate::trivial_reduction::TrivialReductionInfo;

thread_local! {
    static LOWERING_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks this thread as lowering until dropped. Not `Send`.
#[derive(Debug)]
struct LoweringGuard {
    _not_send: PhantomData<*const ()>,
}

impl LoweringGuard {
    fn acquire() -> Result<Self> {
        let was_active = LOWERING_ACTIVE.with(|active| active.replace(true));
        ensure!(!was_active, NestedLoweringSnafu);
        Ok(Self { _not_send: PhantomData })
    }
}

impl Drop for LoweringGuard {
    fn drop(&mut self) {
        LOWERING_ACTIVE.with(|active| active.set(false));
    }
}

/// Whether a [`LowerContext`] is alive on the current thread.
pub fn is_lowering() -> bool {
    LOWERING_ACTIVE.with(Cell::get)
}

#[derive(Debug)]
pub struct LowerContext<'f> {
    fusion: &'f Fusion,
    config: IndexConfig,
    trivial_reductions: TrivialReductionInfo,
    ca_maps: CaMaps,
    parallel_dims: ParallelDimensionMap,
    halo: HaloInfo,
    partial_splits: PartialSplitMap,
    non_divisible: NonDivisibleSplitInfo,
    double_buffer: DoubleBufferInfo,
    _guard: LoweringGuard,
}

#[bon]
impl<'f> LowerContext<'f> {
    /// Run every analysis over `fusion`.
    ///
    /// `ca_maps` replaces the co-iteration maps derived from the fusion.
    /// `halo_seeds` gives root axes halo before it is propagated to
    /// producers.
    #[builder]
    #[tracing::instrument(skip_all, fields(tensors = fusion.tensors().count()))]
    pub fn new(
        fusion: &'f Fusion,
        ca_maps: Option<CaMaps>,
        #[builder(default)] config: IndexConfig,
        #[builder(default)] warp_padding: WarpPadding,
        #[builder(default)] halo_seeds: HashMap<AxisId, AxisHaloInfo>,
    ) -> Result<Self> {
        let guard = LoweringGuard::acquire()?;
        fusion.validate()?;
        let graph = fusion.graph();

        let trivial_reductions = TrivialReductionInfo::build(graph);
        let ca_maps = match ca_maps {
            Some(mut maps) => {
                maps.finalize(graph);
                maps
            }
            None => CaMaps::build(fusion),
        };
        let parallel_dims = ParallelDimensionMap::build(fusion, &ca_maps.index, warp_padding, config.warp_size);
        let halo = HaloInfo::build(fusion, &halo_seeds);
        let partial_splits = PartialSplitMap::build(fusion);
        let non_divisible = NonDivisibleSplitInfo::build(fusion);
        let double_buffer = DoubleBufferInfo::build(fusion)?;

        debug!(?config, "lowering context ready");
        Ok(Self {
            fusion,
            config,
            trivial_reductions,
            ca_maps,
            parallel_dims,
            halo,
            partial_splits,
            non_divisible,
            double_buffer,
            _guard: guard,
        })
    }
}

impl<'f> LowerContext<'f> {
    pub fn fusion(&self) -> &'f Fusion {
        self.fusion
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn ca_maps(&self) -> &CaMaps {
        &self.ca_maps
    }

    pub fn ca_index_map(&self) -> &ComputeAtMap {
        &self.ca_maps.index
    }

    pub fn ca_loop_map(&self) -> &ComputeAtMap {
        &self.ca_maps.loops
    }

    pub fn ca_parallel_map(&self) -> &ComputeAtMap {
        &self.ca_maps.parallel
    }

    pub fn trivial_reductions(&self) -> &TrivialReductionInfo {
        &self.trivial_reductions
    }

    pub fn parallel_dims(&self) -> &ParallelDimensionMap {
        &self.parallel_dims
    }

    pub fn halo(&self) -> &HaloInfo {
        &self.halo
    }

    pub fn partial_splits(&self) -> &PartialSplitMap {
        &self.partial_splits
    }

    pub fn non_divisible(&self) -> &NonDivisibleSplitInfo {
        &self.non_divisible
    }

    pub fn double_buffer(&self) -> &DoubleBufferInfo {
        &self.double_buffer
    }

    /// Overrides the size of one buffer of a double-buffered tensor.
    pub fn set_original_alloc_size(&mut self, tensor: TensorId, size: std::sync::Arc<tessera_ir::Expr>) {
        self.double_buffer.set_original_alloc_size(tensor, size);
    }
}
