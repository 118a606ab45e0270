//! The addressing contract shared by dense and sparse stores.
use std::ptr::NonNull;

use crate::{
    bucket::BucketRef,
    error::{LayoutError, PromoteError, UnsupportedOperation},
    layout::WeightLayout,
    Field, Weight,
};

/// Callback run on a bucket's fields together with the raw index of its first field.
///
/// The stride is the length of the passed slice. Any context is captured by the closure.
pub type BucketInit = Box<dyn FnMut(&[Field], u64)>;

/// Mask-addressed storage of strided weight buckets.
///
/// Raw indices are wrapped with [`mask`][Self::mask], so every `u64` addresses some field. A
/// field is a [`Cell`][std::cell::Cell], so reads and writes only need a shared reference. This
/// also lets aliases of a store access the same fields. Stores are not `Sync`; concurrent use
/// needs external sharding or synchronization.
pub trait WeightStore {
    /// Iterator over the buckets of the store.
    type Iter<'s>: Iterator<Item = BucketRef<'s>>
    where
        Self: 's;

    /// The store's capacity and stride.
    fn layout(&self) -> WeightLayout;

    /// Mask wrapping raw indices into the store.
    fn mask(&self) -> u64 {
        self.layout().mask()
    }

    /// Exponent of the number of fields per bucket.
    fn stride_shift(&self) -> u32 {
        self.layout().stride_shift()
    }

    /// Number of fields per bucket.
    fn stride(&self) -> usize {
        self.layout().stride()
    }

    /// Changes the number of fields per bucket, keeping the total capacity.
    fn set_stride_shift(&mut self, stride_shift: u32) -> Result<(), LayoutError>;

    /// Returns `false` for placeholder stores created with zero length.
    fn is_valid(&self) -> bool {
        !self.layout().is_degenerate()
    }

    /// Returns `true` when this store borrows the memory of another store.
    fn is_aliased(&self) -> bool;

    /// The field addressed by a raw index.
    fn field(&self, raw_index: u64) -> &Field;

    /// Reads the field addressed by a raw index.
    fn get(&self, raw_index: u64) -> Weight {
        self.field(raw_index).get()
    }

    /// Writes the field addressed by a raw index.
    fn set(&self, raw_index: u64, value: Weight) {
        self.field(raw_index).set(value)
    }

    /// The fields of a bucket, given a bucket index that is already wrapped into the store.
    fn bucket(&self, bucket_index: u64) -> &[Field];

    /// Registers a default initialization for buckets.
    ///
    /// Dense stores run it on every bucket right away. Sparse stores run it on each bucket
    /// materialized from now on, but not on buckets that already exist.
    fn set_default<F>(&mut self, init: F)
    where
        F: FnMut(&[Field], u64) + 'static;

    /// Sets the field at `offset` to zero in every existing bucket.
    fn zero_field(&self, offset: usize);

    /// Number of buckets currently backed by memory.
    fn bucket_count(&self) -> usize;

    /// Iterates over the existing buckets.
    fn iter(&self) -> Self::Iter<'_>;

    /// Address of the first field of a contiguous backing block.
    fn raw_base_address(&self) -> Result<NonNull<Weight>, UnsupportedOperation>;

    /// Moves the backing block into an anonymous shared memory mapping.
    fn promote_to_shared(&mut self, length: usize) -> Result<(), PromoteError>;
}
