//! Runtime selection between dense and sparse storage.
use std::{ops::Index, ptr::NonNull};

use crate::{
    bucket::BucketRef,
    dense::{DenseIter, DenseWeights},
    error::{LayoutError, PromoteError, UnsupportedOperation},
    layout::WeightLayout,
    sparse::{SparseIter, SparseWeights},
    store::WeightStore,
    Field, Weight,
};

/// The weights of a model, stored densely or sparsely.
#[derive(Debug)]
pub enum Weights<'a> {
    /// All buckets allocated up front.
    Dense(DenseWeights<'a>),
    /// Buckets allocated on first access.
    Sparse(SparseWeights<'a>),
}

impl Default for Weights<'_> {
    fn default() -> Self {
        Weights::Dense(DenseWeights::default())
    }
}

impl<'a> From<DenseWeights<'a>> for Weights<'a> {
    fn from(weights: DenseWeights<'a>) -> Self {
        Weights::Dense(weights)
    }
}

impl<'a> From<SparseWeights<'a>> for Weights<'a> {
    fn from(weights: SparseWeights<'a>) -> Self {
        Weights::Sparse(weights)
    }
}

macro_rules! dispatch {
    ($self:expr, $weights:ident => $body:expr) => {
        match $self {
            Weights::Dense($weights) => $body,
            Weights::Sparse($weights) => $body,
        }
    };
}

impl Weights<'_> {
    /// Returns `true` for sparse storage.
    pub fn is_sparse(&self) -> bool {
        matches!(self, Weights::Sparse(_))
    }

    /// Returns the dense store, if this is one.
    pub fn as_dense(&self) -> Option<&DenseWeights<'_>> {
        match self {
            Weights::Dense(dense) => Some(dense),
            Weights::Sparse(_) => None,
        }
    }

    /// Returns the sparse store, if this is one.
    pub fn as_sparse(&self) -> Option<&SparseWeights<'_>> {
        match self {
            Weights::Dense(_) => None,
            Weights::Sparse(sparse) => Some(sparse),
        }
    }

    /// Returns an alias of the active store.
    pub fn alias(&self) -> Weights<'_> {
        match self {
            Weights::Dense(dense) => Weights::Dense(dense.alias()),
            Weights::Sparse(sparse) => Weights::Sparse(sparse.alias()),
        }
    }
}

impl WeightStore for Weights<'_> {
    type Iter<'s>
        = WeightsIter<'s>
    where
        Self: 's;

    fn layout(&self) -> WeightLayout {
        dispatch!(self, weights => weights.layout())
    }

    fn set_stride_shift(&mut self, stride_shift: u32) -> Result<(), LayoutError> {
        dispatch!(self, weights => weights.set_stride_shift(stride_shift))
    }

    fn is_aliased(&self) -> bool {
        dispatch!(self, weights => weights.is_aliased())
    }

    #[inline]
    fn field(&self, raw_index: u64) -> &Field {
        dispatch!(self, weights => weights.field(raw_index))
    }

    fn bucket(&self, bucket_index: u64) -> &[Field] {
        dispatch!(self, weights => weights.bucket(bucket_index))
    }

    fn set_default<F>(&mut self, init: F)
    where
        F: FnMut(&[Field], u64) + 'static,
    {
        dispatch!(self, weights => weights.set_default(init))
    }

    fn zero_field(&self, offset: usize) {
        dispatch!(self, weights => weights.zero_field(offset))
    }

    fn bucket_count(&self) -> usize {
        dispatch!(self, weights => weights.bucket_count())
    }

    fn iter(&self) -> WeightsIter<'_> {
        match self {
            Weights::Dense(dense) => WeightsIter::Dense(dense.iter()),
            Weights::Sparse(sparse) => WeightsIter::Sparse(sparse.iter()),
        }
    }

    fn raw_base_address(&self) -> Result<NonNull<Weight>, UnsupportedOperation> {
        dispatch!(self, weights => weights.raw_base_address())
    }

    fn promote_to_shared(&mut self, length: usize) -> Result<(), PromoteError> {
        dispatch!(self, weights => weights.promote_to_shared(length))
    }
}

impl Index<u64> for Weights<'_> {
    type Output = Field;

    #[inline]
    fn index(&self, raw_index: u64) -> &Field {
        self.field(raw_index)
    }
}

/// Iterator over the buckets of [`Weights`].
#[derive(PartialEq, Eq)]
pub enum WeightsIter<'a> {
    /// Iterating a dense store.
    Dense(DenseIter<'a>),
    /// Iterating a sparse store.
    Sparse(SparseIter<'a>),
}

impl<'a> Iterator for WeightsIter<'a> {
    type Item = BucketRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            WeightsIter::Dense(iter) => iter.next(),
            WeightsIter::Sparse(iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            WeightsIter::Dense(iter) => iter.size_hint(),
            WeightsIter::Sparse(iter) => iter.size_hint(),
        }
    }
}

impl ExactSizeIterator for WeightsIter<'_> {}
