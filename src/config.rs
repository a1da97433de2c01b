//! Engine configuration.

/// Tuning parameters for [`reorder`](crate::reorder).
///
/// Zero means "pick automatically" for `depth`, `parallel_depth`, and
/// `threads`; the resolved value is described on each field.
#[derive(Debug, Clone)]
pub struct BisectionConfig {
    /// Maximum recursion depth. 0 resolves to ⌊log₂ D⌋ for a collection of
    /// D documents.
    pub depth: usize,

    /// Number of top recursion levels that use the caching gain kernel.
    /// At large partitions many documents share terms, so the hit rate is
    /// high; at small partitions per-pass invalidation costs more than the
    /// recomputation it saves. Below these levels the plain kernel (or the
    /// precomputed kernel, when `degree_limit` is set) takes over.
    pub cache_depth: usize,

    /// Number of top levels at which the two recursive subcalls fork onto
    /// the worker pool. 0 resolves to max(3, log₂ workers + 2); leaf work
    /// stays sequential to avoid scheduler overhead. No forking happens on
    /// a single-worker pool.
    pub parallel_depth: usize,

    /// Worker pool size. 0 resolves to the number of logical CPUs; 1 runs
    /// everything sequentially.
    pub threads: usize,

    /// Degree cap for the precomputed gain tables. 0 disables the
    /// precomputed kernel entirely; when set, partitions below the caching
    /// levels read term gains from per-(n₁, n₂) tables and fall back to
    /// direct evaluation for degrees at or above the cap.
    pub degree_limit: usize,
}

impl Default for BisectionConfig {
    fn default() -> Self {
        Self {
            depth: 0,
            cache_depth: 3,
            parallel_depth: 0,
            threads: 0,
            degree_limit: 0,
        }
    }
}
