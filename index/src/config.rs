//! Index lowering configuration.
//!
//! Provides typed configuration with a bon builder and environment
//! variable fallbacks.

use bon::bon;

/// Default CUDA warp size.
pub const DEFAULT_WARP_SIZE: i64 = 32;

/// Switches that change how indices and predicates are generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Protect predicate indices of unrolled loops with `+ nvfuser_zero`.
    pub magic_zero: bool,
    /// Index contiguous merged axes with a single stride.
    pub contig_indexing: bool,
    /// Warp size used when `threadIdx.x` is padded to whole warps.
    pub warp_size: i64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[bon]
impl IndexConfig {
    #[builder]
    pub fn new(
        #[builder(default = true)] magic_zero: bool,
        #[builder(default = true)] contig_indexing: bool,
        #[builder(default = DEFAULT_WARP_SIZE)] warp_size: i64,
    ) -> Self {
        Self { magic_zero, contig_indexing, warp_size }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSERA_DISABLE_MAGIC_ZERO` - Do not protect unrolled indices
    /// * `TESSERA_DISABLE_CONTIG_INDEXING` - Always index root axes separately
    /// * `TESSERA_WARP_SIZE=N` - Warp size (default: 32)
    pub fn from_env() -> Self {
        let magic_zero = std::env::var("TESSERA_DISABLE_MAGIC_ZERO").is_err();
        let contig_indexing = std::env::var("TESSERA_DISABLE_CONTIG_INDEXING").is_err();
        let warp_size = if let Ok(s) = std::env::var("TESSERA_WARP_SIZE")
            && let Ok(n) = s.parse::<i64>()
            && n > 0
        {
            n
        } else {
            DEFAULT_WARP_SIZE
        };

        Self { magic_zero, contig_indexing, warp_size }
    }
}
