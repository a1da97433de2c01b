//! Recursive graph bisection for inverted index reordering.
//!
//! Computes a document identifier permutation such that, after an inverted
//! index is rewritten under the new ordering, documents sharing terms sit
//! close together: posting-list gaps shrink and delta/variable-byte coded
//! lists compress better.
//!
//! This library provides:
//! - A CSR forward index (document → ascending term ids) with constructors
//!   from explicit documents, an in-memory inverted index, or the
//!   binary-collection `.docs` layout, plus compact persistence
//! - The bisection engine: recursive midpoint partitioning with a fixed
//!   gain/sort/swap refinement loop per partition
//! - Three gain kernels (plain, caching, precomputed) over a table-backed
//!   log2 cost function
//! - Fork-join parallelism on a dedicated rayon pool, with per-thread
//!   generation-counted gain caches
//!
//! The returned mapping satisfies `mapping[old_id] = new_id`; applying it
//! to the inverted index is left to the caller.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod forward;
pub mod progress;

mod gain;
mod range;

pub use config::BisectionConfig;
pub use engine::{invert_mapping, reorder};
pub use error::{Error, Result};
pub use forward::{Document, ForwardIndex};
pub use progress::Progress;

/// Identifier of a document in the original collection, dense in `[0, D)`.
pub type DocId = u32;
/// Identifier of a term in the dictionary, dense in `[0, T)`.
pub type TermId = u32;
