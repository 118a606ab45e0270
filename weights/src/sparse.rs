//! Weight storage allocating buckets on first access.
use std::{cell::RefCell, fmt, marker::PhantomData, ops::Index, ptr::NonNull};

use hashbrown::{hash_map::Entry, HashMap};
use pstore_util::hash::BuildHasherDefault;

use crate::{
    bucket::BucketRef,
    error::{LayoutError, PromoteError, UnsupportedOperation},
    layout::WeightLayout,
    store::{BucketInit, WeightStore},
    Field, Weight,
};

type BucketMap = HashMap<u64, Box<[Field]>, BuildHasherDefault>;

/// Buckets and default initialization shared between a sparse store and its aliases.
#[derive(Default)]
struct BucketTable {
    // Buckets are boxed and never removed, so references to their fields stay valid for as long
    // as the table is alive, even when the map itself reallocates.
    buckets: RefCell<BucketMap>,
    init: RefCell<Option<BucketInit>>,
}

enum Backing<'a> {
    Owned(BucketTable),
    Borrowed(&'a BucketTable),
}

/// Sparse weight storage: the addressing of [`DenseWeights`][crate::DenseWeights], but buckets
/// are only allocated when first accessed.
///
/// Every access succeeds; touching a missing bucket creates it. Buckets are never freed before
/// the owning store is dropped. Iteration visits buckets in the order of the underlying hash map,
/// which is not sorted by bucket index.
pub struct SparseWeights<'a> {
    backing: Backing<'a>,
    layout: WeightLayout,
}

impl Default for SparseWeights<'_> {
    /// Returns an invalid placeholder.
    fn default() -> Self {
        Self::from_layout(WeightLayout::default())
    }
}

impl fmt::Debug for SparseWeights<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseWeights")
            .field("layout", &self.layout)
            .field("aliased", &self.is_aliased())
            .field("buckets", &self.bucket_count())
            .finish()
    }
}

impl<'a> SparseWeights<'a> {
    /// Creates an empty store addressing `length` buckets of `1 << stride_shift` fields.
    pub fn try_new(length: usize, stride_shift: u32) -> Result<Self, LayoutError> {
        WeightLayout::try_new(length, stride_shift).map(Self::from_layout)
    }

    /// Creates an empty store addressing `length` buckets of `1 << stride_shift` fields.
    ///
    /// Panics when `length` is not zero or a power of two.
    pub fn new(length: usize, stride_shift: u32) -> Self {
        Self::from_layout(WeightLayout::new(length, stride_shift))
    }

    /// Creates an empty store with the given layout.
    pub fn from_layout(layout: WeightLayout) -> Self {
        Self {
            backing: Backing::Owned(BucketTable::default()),
            layout,
        }
    }

    fn table(&self) -> &BucketTable {
        match &self.backing {
            Backing::Owned(table) => table,
            Backing::Borrowed(table) => table,
        }
    }

    /// Returns a store sharing this store's buckets, default initialization and addressing
    /// parameters.
    ///
    /// Buckets created through the alias are visible through the owning store and vice versa.
    pub fn alias(&self) -> SparseWeights<'_> {
        SparseWeights {
            backing: Backing::Borrowed(self.table()),
            layout: self.layout,
        }
    }

    /// Returns the fields of a bucket if it was already materialized.
    pub fn find_bucket(&self, bucket_index: u64) -> Option<&[Field]> {
        let buckets = self.table().buckets.borrow();
        let fields = NonNull::from(&**buckets.get(&bucket_index)?);
        // SAFETY: buckets are boxed and never removed while the table is borrowed by `self`
        Some(unsafe { fields.as_ref() })
    }

    /// Returns `true` when the bucket containing `raw_index` exists.
    pub fn contains(&self, raw_index: u64) -> bool {
        self.find_bucket(self.layout.bucket_of(raw_index)).is_some()
    }

    fn materialize(&self, bucket_index: u64) -> &[Field] {
        let table = self.table();
        let (fields, created) = match table.buckets.borrow_mut().entry(bucket_index) {
            Entry::Occupied(entry) => (NonNull::from(&**entry.get()), false),
            Entry::Vacant(entry) => {
                let fields = (0..self.layout.stride()).map(|_| Field::new(0.0)).collect();
                (NonNull::from(&**entry.insert(fields)), true)
            }
        };
        // SAFETY: buckets are boxed and never removed while the table is borrowed by `self`
        let fields: &[Field] = unsafe { fields.as_ref() };

        if created {
            log::trace!("materialized sparse bucket {bucket_index}");
            if let Some(init) = table.init.borrow_mut().as_mut() {
                init(fields, self.layout.bucket_start(bucket_index));
            }
        }
        fields
    }
}

impl WeightStore for SparseWeights<'_> {
    type Iter<'s>
        = SparseIter<'s>
    where
        Self: 's;

    #[inline]
    fn layout(&self) -> WeightLayout {
        self.layout
    }

    /// Fails with [`LayoutError::BucketsExist`] once any bucket was materialized and with
    /// [`LayoutError::AliasedBuckets`] when called on an alias.
    fn set_stride_shift(&mut self, stride_shift: u32) -> Result<(), LayoutError> {
        if self.is_aliased() {
            return Err(LayoutError::AliasedBuckets);
        }
        if self.bucket_count() != 0 {
            return Err(LayoutError::BucketsExist);
        }
        self.layout = self.layout.with_stride_shift(stride_shift)?;
        log::debug!("sparse weights now use stride {}", self.layout.stride());
        Ok(())
    }

    fn is_aliased(&self) -> bool {
        matches!(self.backing, Backing::Borrowed(_))
    }

    /// Creates the bucket when missing.
    ///
    /// Panics when a default initialization running for the new bucket accesses a missing bucket
    /// itself.
    #[inline]
    fn field(&self, raw_index: u64) -> &Field {
        let fields = self.materialize(self.layout.bucket_of(raw_index));
        &fields[self.layout.offset_of(raw_index)]
    }

    /// Creates the bucket when missing.
    #[inline]
    fn bucket(&self, bucket_index: u64) -> &[Field] {
        self.materialize(bucket_index)
    }

    /// Records `init` to run on every bucket created from now on.
    ///
    /// Buckets that already exist are left untouched. Replaces any previously registered
    /// initialization, also for aliases sharing this store's buckets.
    fn set_default<F>(&mut self, init: F)
    where
        F: FnMut(&[Field], u64) + 'static,
    {
        *self.table().init.borrow_mut() = Some(Box::new(init));
    }

    /// Only visits existing buckets; no bucket is created.
    fn zero_field(&self, offset: usize) {
        let stride = self.layout.stride();
        assert!(offset < stride, "field offset {offset} outside of stride {stride}");
        for fields in self.table().buckets.borrow().values() {
            fields[offset].set(0.0);
        }
    }

    fn bucket_count(&self) -> usize {
        self.table().buckets.borrow().len()
    }

    /// Iterates over the buckets existing at the time of the call, in hash map order.
    fn iter(&self) -> SparseIter<'_> {
        let entries: Vec<_> = self
            .table()
            .buckets
            .borrow()
            .iter()
            .map(|(&index, fields)| (index, NonNull::from(&**fields)))
            .collect();
        SparseIter {
            entries: entries.into_iter(),
            _phantom: PhantomData,
        }
    }

    fn raw_base_address(&self) -> Result<NonNull<Weight>, UnsupportedOperation> {
        Err(UnsupportedOperation::RawBaseAddress)
    }

    fn promote_to_shared(&mut self, _length: usize) -> Result<(), PromoteError> {
        Err(UnsupportedOperation::SharedMemory.into())
    }
}

impl Index<u64> for SparseWeights<'_> {
    type Output = Field;

    #[inline]
    fn index(&self, raw_index: u64) -> &Field {
        self.field(raw_index)
    }
}

/// Iterator over the buckets of a [`SparseWeights`].
///
/// Yields the bucket number as [`BucketRef::index`]. The order follows the bucket map and is not
/// sorted. Iterators compare equal when their next bucket is the same.
pub struct SparseIter<'a> {
    entries: std::vec::IntoIter<(u64, NonNull<[Field]>)>,
    _phantom: PhantomData<&'a BucketTable>,
}

impl<'a> Iterator for SparseIter<'a> {
    type Item = BucketRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, fields) = self.entries.next()?;
        // SAFETY: the store this iterator borrows keeps its buckets alive and never removes them
        Some(BucketRef::new(unsafe { fields.as_ref() }, index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for SparseIter<'_> {}

impl PartialEq for SparseIter<'_> {
    fn eq(&self, other: &Self) -> bool {
        let next = |iter: &Self| {
            let (_, fields) = iter.entries.as_slice().first()?;
            Some(fields.cast::<Field>())
        };
        next(self) == next(other)
    }
}

impl Eq for SparseIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn scenario_lazy_default() {
        let mut weights = SparseWeights::new(8, 0);
        assert_eq!(weights[5].get(), 0.0);
        assert_eq!(weights.bucket_count(), 1);

        weights.set_default(|fields, _| fields[0].set(1.0));
        assert_eq!(weights[6].get(), 1.0);
        assert_eq!(weights[5].get(), 0.0);
        assert_eq!(weights.bucket_count(), 2);
    }

    #[test]
    fn default_runs_once_per_new_bucket() {
        let mut weights = SparseWeights::new(16, 2);
        weights.bucket(1);
        weights.bucket(2);

        let calls = Rc::new(RefCell::new(vec![]));
        let record = calls.clone();
        weights.set_default(move |fields, raw_index| {
            assert_eq!(fields.len(), 4);
            fields[3].set(0.5);
            record.borrow_mut().push(raw_index);
        });
        assert!(calls.borrow().is_empty());

        // bucket 5 holds raw indices 20..24
        assert_eq!(weights[21].get(), 0.0);
        assert_eq!(weights[23].get(), 0.5);
        weights[22].set(4.0);
        assert_eq!(weights.bucket(5)[2].get(), 4.0);
        assert_eq!(*calls.borrow(), vec![20]);

        assert_eq!(weights.bucket(1)[3].get(), 0.0);
        assert_eq!(*calls.borrow(), vec![20]);
    }

    #[test]
    fn initialization_sees_the_bucket_before_access_returns() {
        let mut weights = SparseWeights::new(4, 1);
        weights.set_default(|fields, raw_index| fields[1].set(raw_index as Weight));
        weights[7].set(weights[7].get() + 1.0);
        assert_eq!(weights[7].get(), 7.0);
    }

    #[test]
    fn masks_before_bucketing() {
        let weights = SparseWeights::new(8, 1);
        weights[3].set(2.0);
        assert_eq!(weights[3 + 16].get(), 2.0);
        assert_eq!(weights[u64::MAX & !12].get(), 2.0);
        assert_eq!(weights.bucket_count(), 1);
        assert!(weights.contains(19));
        assert!(!weights.contains(4));
    }

    #[test]
    fn zero_field_creates_no_buckets() {
        let weights = SparseWeights::new(8, 1);
        weights[0].set(1.0);
        weights[1].set(2.0);
        weights[5].set(3.0);
        weights.zero_field(1);
        assert_eq!(weights.bucket_count(), 2);
        assert_eq!(weights[0].get(), 1.0);
        assert_eq!(weights[1].get(), 0.0);
        assert_eq!(weights[5].get(), 0.0);
        assert!(weights.find_bucket(7).is_none());
    }

    #[test]
    fn unsupported_operations() {
        let mut weights = SparseWeights::new(8, 0);
        assert_eq!(
            weights.raw_base_address(),
            Err(UnsupportedOperation::RawBaseAddress)
        );
        assert_eq!(
            weights.promote_to_shared(8),
            Err(PromoteError::Unsupported(UnsupportedOperation::SharedMemory))
        );
    }

    #[test]
    fn aliases_share_buckets_and_defaults() {
        let mut weights = SparseWeights::new(8, 0);
        weights.set_default(|fields, _| fields[0].set(-1.0));
        weights[1].set(5.0);
        {
            let alias = weights.alias();
            assert!(alias.is_aliased());
            assert_eq!(alias[1].get(), 5.0);
            assert_eq!(alias[2].get(), -1.0);
        }
        assert!(!weights.is_aliased());
        assert_eq!(weights.bucket_count(), 2);
        assert_eq!(weights[2].get(), -1.0);
    }

    #[test]
    fn iteration_yields_bucket_numbers() {
        let weights = SparseWeights::new(64, 1);
        for bucket in [40u64, 3, 17, 9] {
            weights.bucket(bucket)[1].set(bucket as Weight);
        }
        let mut seen: Vec<u64> = weights
            .iter()
            .map(|bucket| {
                assert_eq!(bucket.len(), 2);
                assert_eq!(bucket[1].get(), bucket.index() as Weight);
                bucket.index()
            })
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![3, 9, 17, 40]);

        let mut a = weights.iter();
        let b = weights.iter();
        assert!(a == b);
        assert_eq!(a.by_ref().count(), 4);
        assert!(a != b);
        assert!(a == SparseWeights::new(4, 0).iter());
    }

    #[test]
    fn stride_is_fixed_once_buckets_exist() {
        let mut weights = SparseWeights::new(8, 0);
        weights.set_stride_shift(2).unwrap();
        assert_eq!(weights.bucket(0).len(), 4);
        assert_eq!(weights.set_stride_shift(1), Err(LayoutError::BucketsExist));
    }

    #[test]
    fn aliases_keep_the_owners_stride() {
        let owner = SparseWeights::new(8, 0);
        let mut alias = owner.alias();
        assert_eq!(alias.set_stride_shift(2), Err(LayoutError::AliasedBuckets));
        assert_eq!(alias.stride(), 1);

        owner[0].set(1.0);
        assert_eq!(alias.bucket(0).len(), alias.stride());
        assert_eq!(alias[3].get(), 0.0);
        assert_eq!(owner.bucket_count(), 2);
    }

    #[test]
    fn placeholder_store() {
        let weights = SparseWeights::default();
        assert!(!weights.is_valid());
        assert_eq!(weights.iter().count(), 0);
        assert_eq!(weights.mask(), 0);
    }

    #[test]
    fn callback_can_capture_context() {
        let mut weights = SparseWeights::new(8, 0);
        let counter = Rc::new(Cell::new(0.0));
        let next = counter.clone();
        weights.set_default(move |fields, _| {
            next.set(next.get() + 1.0);
            fields[0].set(next.get());
        });
        assert_eq!(weights[0].get(), 1.0);
        assert_eq!(weights[1].get(), 2.0);
        assert_eq!(weights[0].get(), 1.0);
        assert_eq!(counter.get(), 2.0);
    }
}
