//! Views of single buckets.
use std::{fmt, ops::Deref, slice};

use crate::{Field, Weight};

/// A reference to one bucket of a store: `stride` consecutive fields.
///
/// Produced by store iterators. Dereferences to the bucket's fields.
#[derive(Clone, Copy)]
pub struct BucketRef<'a> {
    fields: &'a [Field],
    index: u64,
}

impl<'a> BucketRef<'a> {
    pub(crate) fn new(fields: &'a [Field], index: u64) -> Self {
        Self { fields, index }
    }

    /// The index identifying this bucket during iteration.
    ///
    /// For dense stores this is the raw index of the bucket's first field (`bucket * stride`).
    /// For sparse stores it is the bucket number itself, i.e. the key of the bucket map.
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// All fields of the bucket.
    #[inline]
    pub fn fields(&self) -> &'a [Field] {
        self.fields
    }

    /// The bucket's first field.
    #[inline]
    pub fn first(&self) -> &'a Field {
        &self.fields[0]
    }

    /// Iterates over all `stride` fields of the bucket.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'a, Field> {
        self.fields.iter()
    }

    /// Iterates over the fields before `end`, for scans covering only part of a bucket.
    ///
    /// Panics when `end` exceeds the stride.
    #[inline]
    pub fn iter_to(&self, end: usize) -> slice::Iter<'a, Field> {
        self.fields[..end].iter()
    }

    /// Copies the bucket's current values.
    pub fn to_vec(&self) -> Vec<Weight> {
        self.fields.iter().map(|field| field.get()).collect()
    }
}

impl Deref for BucketRef<'_> {
    type Target = [Field];

    fn deref(&self) -> &Self::Target {
        self.fields
    }
}

impl<'a> IntoIterator for BucketRef<'a> {
    type Item = &'a Field;
    type IntoIter = slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

/// Buckets compare equal when they refer to the same memory.
impl PartialEq for BucketRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.fields, other.fields)
    }
}

impl Eq for BucketRef<'_> {}

impl fmt::Debug for BucketRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketRef")
            .field("index", &self.index)
            .field("fields", &self.to_vec())
            .finish()
    }
}
