//! Fixed-capacity weight storage in a single contiguous block.
use std::{fmt, ops::Index, ptr::NonNull};

use crate::{
    bucket::BucketRef,
    error::{LayoutError, PromoteError, UnsupportedOperation},
    layout::WeightLayout,
    raw::HeapBlock,
    shared::SharedMapping,
    store::WeightStore,
    Field, Weight,
};

/// Memory backing a dense store.
enum Block {
    Heap(HeapBlock),
    Shared(SharedMapping),
}

impl Block {
    fn fields(&self) -> &[Field] {
        match self {
            Block::Heap(heap) => heap.fields(),
            Block::Shared(mapping) => mapping.fields(),
        }
    }
}

enum Backing<'a> {
    Owned(Block),
    Borrowed(&'a Block),
}

/// Dense weight storage: `length` buckets of `stride` fields, allocated up front.
///
/// The lifetime is that of the store an alias borrows from. Stores created by
/// [`new`][Self::new] own their block and can use any lifetime, usually `'static`.
///
/// There is no `Clone` implementation: a copy of a store is always an [`alias`][Self::alias]
/// sharing the same block. Independent storage is created with [`new`][Self::new] followed by
/// [`copy_fields_from`][Self::copy_fields_from].
pub struct DenseWeights<'a> {
    backing: Backing<'a>,
    layout: WeightLayout,
}

impl Default for DenseWeights<'_> {
    /// Returns an invalid placeholder without any fields.
    fn default() -> Self {
        Self::from_layout(WeightLayout::default())
    }
}

impl fmt::Debug for DenseWeights<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseWeights")
            .field("layout", &self.layout)
            .field("aliased", &self.is_aliased())
            .field("shared", &self.is_shared())
            .finish()
    }
}

impl<'a> DenseWeights<'a> {
    /// Allocates `length` buckets of `1 << stride_shift` zeroed fields.
    ///
    /// A `length` of zero produces an invalid placeholder store.
    pub fn try_new(length: usize, stride_shift: u32) -> Result<Self, LayoutError> {
        WeightLayout::try_new(length, stride_shift).map(Self::from_layout)
    }

    /// Allocates `length` buckets of `1 << stride_shift` zeroed fields.
    ///
    /// Panics when `length` is not zero or a power of two. Allocation failure aborts the process.
    pub fn new(length: usize, stride_shift: u32) -> Self {
        Self::from_layout(WeightLayout::new(length, stride_shift))
    }

    /// Allocates zeroed fields for the given layout.
    pub fn from_layout(layout: WeightLayout) -> Self {
        if !layout.is_degenerate() {
            log::debug!(
                "allocating dense weights: {} buckets, stride {}",
                layout.bucket_count(),
                layout.stride()
            );
        }
        Self {
            backing: Backing::Owned(Block::Heap(HeapBlock::zeroed(layout.field_count()))),
            layout,
        }
    }

    fn block(&self) -> &Block {
        match &self.backing {
            Backing::Owned(block) => block,
            Backing::Borrowed(block) => block,
        }
    }

    /// All fields in address order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        self.block().fields()
    }

    /// Returns a store sharing this store's fields and addressing parameters.
    ///
    /// The alias never frees the fields. The borrow keeps the owner alive and keeps it from being
    /// promoted while the alias exists.
    pub fn alias(&self) -> DenseWeights<'_> {
        DenseWeights {
            backing: Backing::Borrowed(self.block()),
            layout: self.layout,
        }
    }

    /// Returns `true` when the fields live in a shared memory mapping.
    pub fn is_shared(&self) -> bool {
        matches!(self.block(), Block::Shared(_))
    }

    /// Runs `init` on every bucket in address order, passing the raw index of its first field.
    pub fn apply_default(&self, mut init: impl FnMut(&[Field], u64)) {
        let shift = self.layout.stride_shift();
        for (bucket, fields) in self.fields().chunks_exact(self.layout.stride()).enumerate() {
            init(fields, (bucket as u64) << shift);
        }
    }

    /// Copies all field values of `other` into this store.
    ///
    /// Panics when the stores differ in capacity.
    pub fn copy_fields_from(&self, other: &DenseWeights<'_>) {
        assert_eq!(
            self.layout.field_count(),
            other.layout.field_count(),
            "cannot copy between dense stores of different capacity"
        );
        for (dst, src) in self.fields().iter().zip(other.fields()) {
            dst.set(src.get());
        }
    }
}

impl WeightStore for DenseWeights<'_> {
    type Iter<'s>
        = DenseIter<'s>
    where
        Self: 's;

    #[inline]
    fn layout(&self) -> WeightLayout {
        self.layout
    }

    fn set_stride_shift(&mut self, stride_shift: u32) -> Result<(), LayoutError> {
        self.layout = self.layout.with_stride_shift(stride_shift)?;
        log::debug!("dense weights now use stride {}", self.layout.stride());
        Ok(())
    }

    fn is_aliased(&self) -> bool {
        matches!(self.backing, Backing::Borrowed(_))
    }

    /// Panics for invalid placeholder stores, which have no fields to address.
    #[inline]
    fn field(&self, raw_index: u64) -> &Field {
        &self.fields()[self.layout.field_index(raw_index)]
    }

    /// Panics when `bucket_index` is outside of the store.
    #[inline]
    fn bucket(&self, bucket_index: u64) -> &[Field] {
        let start = self.layout.bucket_start(bucket_index) as usize;
        &self.fields()[start..start + self.layout.stride()]
    }

    fn set_default<F>(&mut self, init: F)
    where
        F: FnMut(&[Field], u64) + 'static,
    {
        self.apply_default(init)
    }

    /// Panics when `offset` is not smaller than the stride.
    fn zero_field(&self, offset: usize) {
        let stride = self.layout.stride();
        assert!(offset < stride, "field offset {offset} outside of stride {stride}");
        for fields in self.fields().chunks_exact(stride) {
            fields[offset].set(0.0);
        }
    }

    fn bucket_count(&self) -> usize {
        self.layout.bucket_count()
    }

    fn iter(&self) -> DenseIter<'_> {
        DenseIter {
            rest: self.fields(),
            next_index: 0,
            stride: self.layout.stride(),
        }
    }

    fn raw_base_address(&self) -> Result<NonNull<Weight>, UnsupportedOperation> {
        Ok(NonNull::from(self.fields()).cast::<Weight>())
    }

    /// Moves the fields into an anonymous shared memory mapping.
    ///
    /// `length` is the bucket count the store was created with. The heap block is freed and the
    /// mapping stays alive for the rest of the process. Promoting an already shared store does
    /// nothing.
    fn promote_to_shared(&mut self, length: usize) -> Result<(), PromoteError> {
        let expected = self.layout.field_count();
        let Backing::Owned(block) = &mut self.backing else {
            return Err(PromoteError::Aliased);
        };
        let found = length
            .checked_shl(self.layout.stride_shift())
            .filter(|&found| found >> self.layout.stride_shift() == length)
            .unwrap_or(usize::MAX);
        if found != expected {
            return Err(PromoteError::LengthMismatch { expected, found });
        }
        match block {
            Block::Shared(_) => {
                log::debug!("dense weights are already shared");
            }
            Block::Heap(heap) => {
                let mapping = SharedMapping::copy_of(heap.fields())?;
                // drops the heap block
                *block = Block::Shared(mapping);
            }
        }
        Ok(())
    }
}

impl Index<u64> for DenseWeights<'_> {
    type Output = Field;

    #[inline]
    fn index(&self, raw_index: u64) -> &Field {
        self.field(raw_index)
    }
}

/// Iterator over the buckets of a [`DenseWeights`] in increasing address order.
///
/// Iterators compare equal when they are at the same position of the same store.
#[derive(Clone)]
pub struct DenseIter<'a> {
    rest: &'a [Field],
    next_index: u64,
    stride: usize,
}

impl<'a> Iterator for DenseIter<'a> {
    type Item = BucketRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < self.stride {
            return None;
        }
        let (fields, rest) = self.rest.split_at(self.stride);
        self.rest = rest;
        let index = self.next_index;
        self.next_index += self.stride as u64;
        Some(BucketRef::new(fields, index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for DenseIter<'_> {
    fn len(&self) -> usize {
        self.rest.len() / self.stride
    }
}

impl PartialEq for DenseIter<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.rest, other.rest)
    }
}

impl Eq for DenseIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_wraparound() {
        let weights = DenseWeights::new(8, 1);
        assert_eq!(weights.fields().len(), 16);
        assert_eq!(weights.mask(), 15);
        assert_eq!(weights.stride(), 2);

        weights[4].set(3.5);
        assert_eq!(weights[4].get(), 3.5);
        assert_eq!(weights[20].get(), 3.5);
        assert_eq!(weights.get(4 + 16 * 1000), 3.5);
    }

    #[test]
    fn buckets_are_stride_apart() {
        let weights = DenseWeights::new(16, 2);
        let base = weights.raw_base_address().unwrap().as_ptr().cast_const();
        for bucket in 0..16u64 {
            let fields = weights.bucket(bucket);
            assert_eq!(fields.len(), 4);
            // SAFETY: in bounds of the 64 field block
            assert_eq!(fields.as_ptr().cast::<Weight>(), unsafe {
                base.add(bucket as usize * 4)
            });
        }
    }

    #[test]
    fn default_runs_on_every_bucket_in_order() {
        let mut weights = DenseWeights::new(8, 2);
        weights.bucket(3)[1].set(7.0);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
        let record = seen.clone();
        weights.set_default(move |fields, raw_index| {
            assert_eq!(fields.len(), 4);
            fields[0].set(raw_index as Weight);
            record.borrow_mut().push(raw_index);
        });
        assert_eq!(*seen.borrow(), (0..8).map(|b| b * 4).collect::<Vec<_>>());
        assert_eq!(weights.bucket(5)[0].get(), 20.0);
        // fields the callback doesn't touch keep their values
        assert_eq!(weights.bucket(3)[1].get(), 7.0);
    }

    #[test]
    fn zero_field_only_clears_one_offset() {
        let weights = DenseWeights::new(4, 1);
        weights.apply_default(|fields, _| {
            fields[0].set(1.0);
            fields[1].set(2.0);
        });
        weights.zero_field(1);
        for bucket in weights.iter() {
            assert_eq!(bucket.to_vec(), vec![1.0, 0.0]);
        }
    }

    #[test]
    #[should_panic(expected = "outside of stride")]
    fn zero_field_rejects_wide_offsets() {
        DenseWeights::new(4, 1).zero_field(2);
    }

    #[test]
    fn iteration_is_in_address_order() {
        let weights = DenseWeights::new(4, 2);
        let indices: Vec<u64> = weights.iter().map(|bucket| bucket.index()).collect();
        assert_eq!(indices, vec![0, 4, 8, 12]);
        assert_eq!(weights.iter().len(), 4);

        let mut a = weights.iter();
        let mut b = weights.iter();
        assert!(a == b);
        a.next();
        assert!(a != b);
        b.next();
        assert!(a == b);
    }

    #[test]
    fn aliases_share_fields() {
        let weights = DenseWeights::new(8, 0);
        {
            let alias = weights.alias();
            assert!(alias.is_aliased());
            assert!(!weights.is_aliased());
            alias[3].set(9.0);
            assert_eq!(alias.mask(), weights.mask());
            let nested = alias.alias();
            assert_eq!(nested[3].get(), 9.0);
        }
        assert_eq!(weights[3].get(), 9.0);
    }

    #[test]
    fn aliases_cannot_promote() {
        let weights = DenseWeights::new(8, 0);
        let mut alias = weights.alias();
        assert_eq!(alias.promote_to_shared(8), Err(PromoteError::Aliased));
    }

    #[test]
    fn copy_gives_independent_storage() {
        let source = DenseWeights::new(4, 1);
        source[5].set(2.5);
        let copy = DenseWeights::new(4, 1);
        copy.copy_fields_from(&source);
        assert!(!copy.is_aliased());
        assert_eq!(copy[5].get(), 2.5);
        copy[5].set(0.5);
        assert_eq!(source[5].get(), 2.5);
    }

    #[test]
    fn placeholder_store() {
        let weights = DenseWeights::default();
        assert!(!weights.is_valid());
        assert_eq!(weights.mask(), 0);
        assert_eq!(weights.iter().count(), 0);
        assert!(!DenseWeights::new(0, 2).is_valid());
        assert!(DenseWeights::new(1, 0).is_valid());
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn indexing_a_placeholder_panics() {
        let weights = DenseWeights::default();
        weights[7].get();
    }

    #[test]
    fn stride_shift_changes_keep_capacity() {
        let mut weights = DenseWeights::new(8, 1);
        weights[13].set(1.0);
        weights.set_stride_shift(2).unwrap();
        assert_eq!(weights.stride(), 4);
        assert_eq!(weights.mask(), 15);
        assert_eq!(weights.bucket(3)[1].get(), 1.0);
        assert_eq!(
            weights.set_stride_shift(5),
            Err(LayoutError::StrideTooWide { stride_shift: 5 })
        );
    }

    #[cfg(unix)]
    #[test]
    fn promotion_keeps_values() {
        let mut weights = DenseWeights::new(8, 1);
        weights[4].set(3.5);
        weights[15].set(-2.0);
        assert_eq!(
            weights.promote_to_shared(4),
            Err(PromoteError::LengthMismatch {
                expected: 16,
                found: 8
            })
        );
        weights.promote_to_shared(8).unwrap();
        assert!(weights.is_shared());
        assert!(!weights.is_aliased());
        assert_eq!(weights[4].get(), 3.5);
        assert_eq!(weights[15].get(), -2.0);

        {
            let alias = weights.alias();
            assert!(alias.is_aliased());
            alias[0].set(1.0);
        }
        assert_eq!(weights[0].get(), 1.0);

        // promoting twice is a no-op
        weights.promote_to_shared(8).unwrap();
        assert_eq!(weights[4].get(), 3.5);
    }
}
