//! Weight storage for online learners.
//!
//! A store maps raw indices, usually a feature hash combined with a position inside the
//! feature's bucket, onto `f32` fields. Each feature owns a bucket of `stride` consecutive
//! fields (weight, gradient accumulators, normalization statistics and so on). Capacities are
//! powers of two, so any `u64` raw index wraps into the store with a bitwise and.
//!
//! [`DenseWeights`] allocates all buckets up front in a single block, which can also be moved into
//! memory shared with forked processes. [`SparseWeights`] provides the same addressing but
//! allocates buckets on first access. [`Weights`] selects either at runtime, usually built from a
//! [`WeightsConfig`].
//!
//! Fields are [`Cell`](std::cell::Cell)s: reading and writing only requires a shared reference,
//! which lets aliases of a store work on the same fields. No store is `Sync`.
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(missing_docs)]

use std::cell::Cell;

mod bucket;
mod config;
mod dense;
mod error;
mod layout;
mod raw;
mod shared;
mod sparse;
mod store;
mod weights;

pub use bucket::BucketRef;
pub use config::WeightsConfig;
pub use dense::{DenseIter, DenseWeights};
pub use error::{LayoutError, PromoteError, UnsupportedOperation};
pub use layout::WeightLayout;
pub use shared::shared_memory_supported;
pub use sparse::{SparseIter, SparseWeights};
pub use store::{BucketInit, WeightStore};
pub use weights::{Weights, WeightsIter};

/// The value stored in a field.
pub type Weight = f32;

/// A single weight field.
pub type Field = Cell<Weight>;
