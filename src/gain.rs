//! Move-gain computation: the BP cost function and its three kernels.
//!
//! All kernels write the same quantity into the gain slots; they differ
//! only in how many evaluations of the per-term cost they reuse. The
//! caching kernel amortizes within one pass through a per-thread cache
//! invalidated by generation counting; the precomputed kernel reads whole
//! tables built ahead of time for the half sizes the recursion visits.

use std::cell::RefCell;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustc_hash::FxHashMap;

use crate::range::DocumentRange;

/// Precomputed log2 values for small integers; degrees and half sizes in
/// the hot loop are almost always below this bound.
const LOG2_TABLE_SIZE: usize = 4096;

pub(crate) struct Log2Table {
    values: Box<[f64]>,
}

impl Log2Table {
    pub fn new() -> Self {
        let mut values = vec![0.0f64; LOG2_TABLE_SIZE];
        for (i, value) in values.iter_mut().enumerate().skip(1) {
            *value = (i as f64).log2();
        }
        Self {
            values: values.into_boxed_slice(),
        }
    }

    /// `log2(n)`, with `log2(0)` pinned to 0 so empty sides contribute
    /// nothing to the cost.
    #[inline]
    pub fn get(&self, n: u64) -> f64 {
        match self.values.get(n as usize) {
            Some(&value) => value,
            None => (n as f64).log2(),
        }
    }
}

/// Cost of one term split `d1`/`d2` across sides of `n1`/`n2` documents:
/// `d1·(log₂ n1 − log₂(d1 + 1)) + d2·(log₂ n2 − log₂(d2 + 1))`.
#[inline]
pub(crate) fn term_cost(log2: &Log2Table, logn1: f64, logn2: f64, d1: u64, d2: u64) -> f64 {
    d1 as f64 * (logn1 - log2.get(d1 + 1)) + d2 as f64 * (logn2 - log2.get(d2 + 1))
}

/// Decrease in cost from moving one document containing this term from the
/// `d1` side to the `d2` side. Positive means the move pays. Callers
/// guarantee `d1 ≥ 1`: the document being scored sits on the `d1` side and
/// contains the term.
#[inline]
fn move_gain(log2: &Log2Table, logn1: f64, logn2: f64, d1: u64, d2: u64) -> f64 {
    term_cost(log2, logn1, logn2, d1, d2) - term_cost(log2, logn1, logn2, d1 - 1, d2 + 1)
}

/// Kernel identity, fixed per call site by the recursion driver.
#[derive(Clone, Copy)]
pub(crate) enum GainKernel<'a> {
    Plain,
    Caching,
    Precomputed(&'a PrecomputedGains),
}

/// Write move gains for every handle in `range`. `from_n`/`from_deg`
/// describe the side the handles currently sit on, `to_n`/`to_deg` the
/// other one.
#[allow(clippy::too_many_arguments)]
pub(crate) fn compute_move_gains(
    kernel: GainKernel<'_>,
    range: &DocumentRange<'_>,
    from_n: usize,
    to_n: usize,
    from_deg: &[u64],
    to_deg: &[u64],
    log2: &Log2Table,
    parallel: bool,
) {
    match kernel {
        GainKernel::Plain => plain_gains(range, from_n, to_n, from_deg, to_deg, log2, parallel),
        GainKernel::Caching => caching_gains(range, from_n, to_n, from_deg, to_deg, log2),
        GainKernel::Precomputed(tables) => {
            precomputed_gains(tables, range, from_n, to_n, from_deg, to_deg, log2)
        }
    }
}

fn plain_gains(
    range: &DocumentRange<'_>,
    from_n: usize,
    to_n: usize,
    from_deg: &[u64],
    to_deg: &[u64],
    log2: &Log2Table,
    parallel: bool,
) {
    let logn1 = log2.get(from_n as u64);
    let logn2 = log2.get(to_n as u64);

    let per_document = |&handle: &u32| {
        let mut gain = 0.0f64;
        for &t in range.terms(handle) {
            gain += move_gain(
                log2,
                logn1,
                logn2,
                from_deg[t as usize],
                to_deg[t as usize],
            );
        }
        range.set_gain(handle, gain);
    };

    if parallel {
        range.handles().par_iter().for_each(per_document);
    } else {
        range.handles().iter().for_each(per_document);
    }
}

// ── Caching kernel ───────────────────────────────────────────────────────

struct CacheEntry {
    value: f64,
    generation: u64,
}

/// Per-worker term-gain cache. Entries are invalidated wholesale by bumping
/// the pass generation; a lookup hits only while the stored generation
/// matches the current one, so the cache is never cleared.
struct TermGainCache {
    entries: Vec<CacheEntry>,
    generation: u64,
}

impl TermGainCache {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
            generation: 0,
        }
    }

    fn begin_pass(&mut self, term_count: usize) {
        if self.entries.len() < term_count {
            self.entries.resize_with(term_count, || CacheEntry {
                value: 0.0,
                generation: 0,
            });
        }
        // Fresh entries carry generation 0, which never matches a live pass.
        self.generation += 1;
    }

    #[inline]
    fn get(&self, term: u32) -> Option<f64> {
        let entry = &self.entries[term as usize];
        (entry.generation == self.generation).then_some(entry.value)
    }

    #[inline]
    fn insert(&mut self, term: u32, value: f64) {
        self.entries[term as usize] = CacheEntry {
            value,
            generation: self.generation,
        };
    }
}

thread_local! {
    static TERM_GAIN_CACHE: RefCell<TermGainCache> = const { RefCell::new(TermGainCache::new()) };
}

/// One side of a gain pass stays on one worker, so every document in it
/// sees the same cache and the same degree snapshot; the gain of a term is
/// the same for all of them.
fn caching_gains(
    range: &DocumentRange<'_>,
    from_n: usize,
    to_n: usize,
    from_deg: &[u64],
    to_deg: &[u64],
    log2: &Log2Table,
) {
    let logn1 = log2.get(from_n as u64);
    let logn2 = log2.get(to_n as u64);

    TERM_GAIN_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        cache.begin_pass(from_deg.len());
        for &handle in range.handles() {
            let mut gain = 0.0f64;
            for &t in range.terms(handle) {
                let term_gain = match cache.get(t) {
                    Some(value) => value,
                    None => {
                        let value = move_gain(
                            log2,
                            logn1,
                            logn2,
                            from_deg[t as usize],
                            to_deg[t as usize],
                        );
                        cache.insert(t, value);
                        value
                    }
                };
                gain += term_gain;
            }
            range.set_gain(handle, gain);
        }
    });
}

// ── Precomputed kernel ───────────────────────────────────────────────────

/// Term-gain tables for the `(n1, n2)` half sizes the recursion will visit,
/// generated by halving the initial size. Degrees at or above the cap fall
/// back to direct evaluation.
pub(crate) struct PrecomputedGains {
    tables: FxHashMap<(u32, u32), Box<[f64]>>,
    degree_limit: usize,
}

impl PrecomputedGains {
    pub fn new(size: u32, degree_limit: usize, log2: &Log2Table) -> Self {
        let mut this = Self {
            tables: FxHashMap::default(),
            degree_limit,
        };
        if size >= 2 && degree_limit > 0 {
            this.fill(size, log2);
        }
        this
    }

    /// Mirror the recursion: a range of `n` documents splits into halves of
    /// `n / 2` and `n - n / 2`, and each side is scored against the other.
    fn fill(&mut self, n: u32, log2: &Log2Table) {
        let n1 = n / 2;
        let n2 = n - n1;
        if !self.tables.contains_key(&(n1, n2)) {
            let table = self.build_table(n1, n2, log2);
            self.tables.insert((n1, n2), table);
            if n1 >= 2 {
                self.fill(n1, log2);
            }
            if n2 >= 2 && n2 != n1 {
                self.fill(n2, log2);
            }
        }
        if !self.tables.contains_key(&(n2, n1)) {
            let table = self.build_table(n2, n1, log2);
            self.tables.insert((n2, n1), table);
        }
    }

    fn build_table(&self, from_n: u32, to_n: u32, log2: &Log2Table) -> Box<[f64]> {
        let limit = self.degree_limit;
        let logn1 = log2.get(from_n as u64);
        let logn2 = log2.get(to_n as u64);
        let mut table = vec![0.0f64; limit * limit];
        // Row 0 stays zero: a document on the from side always has d1 ≥ 1.
        for d1 in 1..limit {
            for d2 in 0..limit {
                table[d1 * limit + d2] = move_gain(log2, logn1, logn2, d1 as u64, d2 as u64);
            }
        }
        table.into_boxed_slice()
    }

    fn table(&self, from_n: u32, to_n: u32) -> Option<&[f64]> {
        self.tables.get(&(from_n, to_n)).map(|t| t.as_ref())
    }
}

fn precomputed_gains(
    tables: &PrecomputedGains,
    range: &DocumentRange<'_>,
    from_n: usize,
    to_n: usize,
    from_deg: &[u64],
    to_deg: &[u64],
    log2: &Log2Table,
) {
    let logn1 = log2.get(from_n as u64);
    let logn2 = log2.get(to_n as u64);
    let limit = tables.degree_limit as u64;
    let table = tables.table(from_n as u32, to_n as u32);

    for &handle in range.handles() {
        let mut gain = 0.0f64;
        for &t in range.terms(handle) {
            let d1 = from_deg[t as usize];
            let d2 = to_deg[t as usize];
            gain += match table {
                Some(table) if d1 < limit && d2 < limit => {
                    table[(d1 * limit + d2) as usize]
                }
                _ => move_gain(log2, logn1, logn2, d1, d2),
            };
        }
        range.set_gain(handle, gain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::ForwardIndex;
    use crate::range::GainScratch;

    #[test]
    fn test_log2_table() {
        let table = Log2Table::new();
        assert_eq!(table.get(0), 0.0);
        assert_eq!(table.get(1), 0.0);
        assert_eq!(table.get(2), 1.0);
        assert_eq!(table.get(1024), 10.0);
        // Fallback beyond the table.
        assert!((table.get(8192) - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_term_cost_empty_sides() {
        let log2 = Log2Table::new();
        // Zero degree on both sides contributes nothing.
        assert_eq!(term_cost(&log2, 3.0, 3.0, 0, 0), 0.0);
        // One side empty: only the other contributes.
        let cost = term_cost(&log2, 3.0, 2.0, 0, 4);
        assert!((cost - 4.0 * (2.0 - log2.get(5))).abs() < 1e-12);
    }

    #[test]
    fn test_move_gain_prefers_concentration() {
        let log2 = Log2Table::new();
        // A term with most documents on the other side wants to move.
        let gain = move_gain(&log2, 2.0, 2.0, 1, 3);
        assert!(gain > 0.0);
        // A term with most documents here wants to stay.
        let loss = move_gain(&log2, 2.0, 2.0, 3, 1);
        assert!(loss < 0.0);
    }

    /// A clustered fixture with degrees spread enough to exercise cache
    /// hits and table lookups.
    fn fixture() -> ForwardIndex {
        let docs: Vec<(u32, Vec<u32>)> = (0..8u32)
            .map(|id| {
                let base = if id % 3 == 0 { vec![0, 1] } else { vec![1, 2, 3] };
                (id, base)
            })
            .collect();
        ForwardIndex::from_documents(docs, 4).unwrap()
    }

    fn gains_with(kernel: GainKernel<'_>, fwd: &ForwardIndex) -> Vec<f64> {
        let log2 = Log2Table::new();
        let gains = GainScratch::new(fwd.len()).unwrap();
        let mut docs: Vec<u32> = (0..fwd.len() as u32).collect();
        let partition = crate::range::DocumentRange::new(&mut docs, fwd, &gains).split();

        let mut left_deg = vec![0u64; 4];
        let mut right_deg = vec![0u64; 4];
        for &h in partition.left.handles() {
            for &t in partition.left.terms(h) {
                left_deg[t as usize] += 1;
            }
        }
        for &h in partition.right.handles() {
            for &t in partition.right.terms(h) {
                right_deg[t as usize] += 1;
            }
        }

        let (n1, n2) = (partition.left.len(), partition.right.len());
        compute_move_gains(
            kernel, &partition.left, n1, n2, &left_deg, &right_deg, &log2, false,
        );
        compute_move_gains(
            kernel, &partition.right, n2, n1, &right_deg, &left_deg, &log2, false,
        );

        (0..fwd.len() as u32).map(|h| gains.get(h)).collect()
    }

    #[test]
    fn test_kernels_agree() {
        let fwd = fixture();
        let log2 = Log2Table::new();
        let tables = PrecomputedGains::new(fwd.len() as u32, 16, &log2);

        let plain = gains_with(GainKernel::Plain, &fwd);
        let caching = gains_with(GainKernel::Caching, &fwd);
        let precomputed = gains_with(GainKernel::Precomputed(&tables), &fwd);

        for ((&p, &c), &t) in plain.iter().zip(&caching).zip(&precomputed) {
            assert!((p - c).abs() < 1e-9, "plain {p} vs caching {c}");
            assert!((p - t).abs() < 1e-9, "plain {p} vs precomputed {t}");
        }
    }

    #[test]
    fn test_precomputed_degree_fallback() {
        // Cap of 2 forces direct evaluation for the degree-3 term.
        let fwd = fixture();
        let log2 = Log2Table::new();
        let tables = PrecomputedGains::new(fwd.len() as u32, 2, &log2);

        let plain = gains_with(GainKernel::Plain, &fwd);
        let precomputed = gains_with(GainKernel::Precomputed(&tables), &fwd);
        for (&p, &t) in plain.iter().zip(&precomputed) {
            assert!((p - t).abs() < 1e-9);
        }
    }

    #[test]
    fn test_precomputed_covers_recursion_shapes() {
        let log2 = Log2Table::new();
        let tables = PrecomputedGains::new(10, 4, &log2);
        // 10 → (5, 5) → (2, 3) → (1, 1) / (1, 2)
        for shape in [(5, 5), (2, 3), (3, 2), (1, 1), (1, 2), (2, 1)] {
            assert!(tables.table(shape.0, shape.1).is_some(), "missing {shape:?}");
        }
    }

    #[test]
    fn test_cache_invalidated_between_passes() {
        let log2 = Log2Table::new();
        let fwd = ForwardIndex::from_documents([(0u32, vec![0]), (1, vec![0])], 1).unwrap();
        let gains = GainScratch::new(2).unwrap();
        let mut docs: Vec<u32> = vec![0, 1];
        let partition = crate::range::DocumentRange::new(&mut docs, &fwd, &gains).split();

        // First pass with one degree distribution, second with another; a
        // stale cache would repeat the first value.
        compute_move_gains(
            GainKernel::Caching, &partition.left, 1, 1, &[1], &[1], &log2, false,
        );
        let first = gains.get(0);
        compute_move_gains(
            GainKernel::Caching, &partition.left, 1, 1, &[1], &[5], &log2, false,
        );
        let second = gains.get(0);

        assert!((first - second).abs() > 1e-9);
        let expected = term_cost(&log2, 0.0, 0.0, 1, 5) - term_cost(&log2, 0.0, 0.0, 0, 6);
        assert!((second - expected).abs() < 1e-12);
    }
}
