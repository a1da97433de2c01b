//! The bisection engine: degree maps, the swap phase, the per-partition
//! refinement loop, and the recursive driver.
//!
//! Each partition runs a fixed number of refinement passes; within a pass
//! the steps (degrees → gains → sort → swap) are strictly ordered, while
//! the two sides of a partition and the two recursive subcalls are free to
//! run in parallel on disjoint handle subranges.

use crate::DocId;
use crate::config::BisectionConfig;
use crate::error::{Error, Result};
use crate::forward::ForwardIndex;
use crate::gain::{self, GainKernel, Log2Table, PrecomputedGains};
use crate::progress::Progress;
use crate::range::{DocumentPartition, DocumentRange, GainScratch};

/// Refinement passes per partition. A calibrated constant, not a
/// convergence criterion: gains are negligible after twenty passes on
/// realistic collections.
const REFINEMENT_ITERATIONS: usize = 20;

// ── Degree maps ──────────────────────────────────────────────────────────

struct DegreePair {
    left: Vec<u64>,
    right: Vec<u64>,
}

fn try_zeroed(len: usize) -> Result<Vec<u64>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
    v.resize(len, 0);
    Ok(v)
}

/// Count, per term, how many documents of `range` contain it.
fn compute_degrees(range: &DocumentRange<'_>) -> Result<Vec<u64>> {
    let mut degrees = try_zeroed(range.term_count())?;
    for &handle in range.handles() {
        for &t in range.terms(handle) {
            degrees[t as usize] += 1;
        }
    }
    Ok(degrees)
}

fn compute_degree_pair(
    partition: &DocumentPartition<'_>,
    parallel: bool,
) -> Result<DegreePair> {
    if parallel {
        let (left, right) = rayon::join(
            || compute_degrees(&partition.left),
            || compute_degrees(&partition.right),
        );
        Ok(DegreePair {
            left: left?,
            right: right?,
        })
    } else {
        Ok(DegreePair {
            left: compute_degrees(&partition.left)?,
            right: compute_degrees(&partition.right)?,
        })
    }
}

// ── Gain pass ────────────────────────────────────────────────────────────

/// Score both sides. Degree arguments are swapped for the right side so
/// the kernel always sees "from" as the side the handle currently sits on.
fn compute_gains(
    partition: &DocumentPartition<'_>,
    degrees: &DegreePair,
    kernel: GainKernel<'_>,
    log2: &Log2Table,
    parallel: bool,
) {
    let n1 = partition.left.len();
    let n2 = partition.right.len();
    if parallel {
        rayon::join(
            || {
                gain::compute_move_gains(
                    kernel, &partition.left, n1, n2, &degrees.left, &degrees.right, log2, true,
                )
            },
            || {
                gain::compute_move_gains(
                    kernel, &partition.right, n2, n1, &degrees.right, &degrees.left, log2, true,
                )
            },
        );
    } else {
        gain::compute_move_gains(
            kernel, &partition.left, n1, n2, &degrees.left, &degrees.right, log2, false,
        );
        gain::compute_move_gains(
            kernel, &partition.right, n2, n1, &degrees.right, &degrees.left, log2, false,
        );
    }
}

// ── Swap phase ───────────────────────────────────────────────────────────

/// Walk both halves in lockstep, exchanging handle pairs while the combined
/// gain is positive. Handles arrive sorted by descending gain, so the first
/// non-profitable pair ends the pass; later pairs are not rescanned.
///
/// Degree maps are updated as each document crosses, keeping the left/right
/// counts exact. Gains are left stale on purpose; the next pass recomputes
/// them.
fn swap(partition: &mut DocumentPartition<'_>, degrees: &mut DegreePair) {
    let pairs = partition.left.len().min(partition.right.len());
    for i in 0..pairs {
        let l = partition.left.handle_at(i);
        let r = partition.right.handle_at(i);
        if partition.left.gain(l) + partition.right.gain(r) <= 0.0 {
            break;
        }
        for &t in partition.left.terms(l) {
            degrees.left[t as usize] -= 1;
            degrees.right[t as usize] += 1;
        }
        for &t in partition.right.terms(r) {
            degrees.left[t as usize] += 1;
            degrees.right[t as usize] -= 1;
        }
        partition.left.set_handle(i, r);
        partition.right.set_handle(i, l);
    }
}

// ── Refinement loop ──────────────────────────────────────────────────────

fn process_partition(
    partition: &mut DocumentPartition<'_>,
    kernel: GainKernel<'_>,
    log2: &Log2Table,
    parallel: bool,
) -> Result<()> {
    let mut degrees = compute_degree_pair(partition, parallel)?;
    for _ in 0..REFINEMENT_ITERATIONS {
        compute_gains(partition, &degrees, kernel, log2, parallel);
        if parallel {
            let DocumentPartition { left, right } = &mut *partition;
            rayon::join(|| left.sort_by_gain(true), || right.sort_by_gain(true));
        } else {
            partition.left.sort_by_gain(false);
            partition.right.sort_by_gain(false);
        }
        swap(partition, &mut degrees);
    }
    Ok(())
}

// ── Recursive driver ─────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn recursive_bisection(
    range: DocumentRange<'_>,
    depth: usize,
    parallel_depth: usize,
    cache_depth: usize,
    precomputed: Option<&PrecomputedGains>,
    log2: &Log2Table,
    progress: &Progress,
) -> Result<()> {
    let size = range.len();
    let mut partition = range.split();

    // The caching kernel pays off while partitions are large and documents
    // share many terms; once the caching levels are spent, fall through to
    // the precomputed tables if configured, else compute directly.
    let (kernel, next_cache_depth) = if cache_depth >= 1 {
        (GainKernel::Caching, cache_depth - 1)
    } else if let Some(tables) = precomputed {
        (GainKernel::Precomputed(tables), 0)
    } else {
        (GainKernel::Plain, 0)
    };
    process_partition(&mut partition, kernel, log2, parallel_depth > 0)?;
    progress.update(size as u64);

    if depth > 1 && size > 2 {
        let DocumentPartition { left, right } = partition;
        if parallel_depth > 0 {
            let (outcome_left, outcome_right) = rayon::join(
                || {
                    recursive_bisection(
                        left,
                        depth - 1,
                        parallel_depth - 1,
                        next_cache_depth,
                        precomputed,
                        log2,
                        progress,
                    )
                },
                || {
                    recursive_bisection(
                        right,
                        depth - 1,
                        parallel_depth - 1,
                        next_cache_depth,
                        precomputed,
                        log2,
                        progress,
                    )
                },
            );
            outcome_left?;
            outcome_right?;
        } else {
            recursive_bisection(
                left,
                depth - 1,
                0,
                next_cache_depth,
                precomputed,
                log2,
                progress,
            )?;
            recursive_bisection(
                right,
                depth - 1,
                0,
                next_cache_depth,
                precomputed,
                log2,
                progress,
            )?;
        }
    } else {
        // Terminal blocks get a reproducible base ordering.
        partition.left.sort_by_id();
        partition.right.sort_by_id();
    }
    Ok(())
}

// ── Entry point ──────────────────────────────────────────────────────────

/// Compute a document reordering of `fwd` by recursive graph bisection.
///
/// Returns `mapping` with `mapping[old_id] = new_id`. The mapping is always
/// a permutation of `[0, D)`; degenerate collections (fewer than two
/// documents, or an empty dictionary) come back in their construction
/// order.
pub fn reorder(fwd: &ForwardIndex, config: &BisectionConfig) -> Result<Vec<DocId>> {
    let num_docs = fwd.len();
    if num_docs == 0 {
        return Ok(Vec::new());
    }
    if num_docs < 2 || fwd.term_count() == 0 {
        return Ok(entry_order_mapping(fwd));
    }

    let threads = if config.threads == 0 {
        num_cpus::get()
    } else {
        config.threads
    };
    let depth = if config.depth == 0 {
        num_docs.ilog2() as usize
    } else {
        config.depth
    };
    let parallel_depth = if threads <= 1 {
        0
    } else if config.parallel_depth == 0 {
        (threads.ilog2() as usize + 2).max(3)
    } else {
        config.parallel_depth
    };

    log::debug!(
        "bisection: {num_docs} documents, {} terms, depth {depth}, \
         cache depth {}, {threads} threads",
        fwd.term_count(),
        config.cache_depth,
    );

    let log2 = Log2Table::new();
    let precomputed = (config.degree_limit > 0)
        .then(|| PrecomputedGains::new(num_docs as u32, config.degree_limit, &log2));
    let gains = GainScratch::new(num_docs)?;
    let mut handles: Vec<u32> = (0..num_docs as u32).collect();
    let progress = Progress::new("bisection", num_docs as u64 * depth as u64);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| Error::Internal(format!("worker pool: {e}")))?;
    pool.install(|| {
        recursive_bisection(
            DocumentRange::new(&mut handles, fwd, &gains),
            depth,
            parallel_depth,
            config.cache_depth,
            precomputed.as_ref(),
            &log2,
            &progress,
        )
    })?;

    let mut mapping = vec![0u32; num_docs];
    for (position, &handle) in handles.iter().enumerate() {
        mapping[fwd.doc_id(handle as usize) as usize] = position as u32;
    }
    log::info!("bisection finished: {num_docs} documents reordered");
    Ok(mapping)
}

/// Mapping that reproduces the forward index's own entry order.
fn entry_order_mapping(fwd: &ForwardIndex) -> Vec<DocId> {
    let mut mapping = vec![0u32; fwd.len()];
    for position in 0..fwd.len() {
        mapping[fwd.doc_id(position) as usize] = position as u32;
    }
    mapping
}

/// Invert a permutation: `inverse[mapping[i]] = i`.
pub fn invert_mapping(mapping: &[DocId]) -> Vec<DocId> {
    let mut inverse = vec![0u32; mapping.len()];
    for (old, &new) in mapping.iter().enumerate() {
        inverse[new as usize] = old as u32;
    }
    inverse
}
