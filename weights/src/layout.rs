//! Addressing parameters shared by all store variants.
use crate::{error::LayoutError, Field};

/// Capacity and stride of a weight store.
///
/// A store holds `length` buckets of `stride = 1 << stride_shift` fields each. The number of
/// buckets is a power of two, so wrapping an arbitrary raw index into the store is a bitwise and
/// with [`mask`][Self::mask].
///
/// A zero length produces a degenerate layout that has no fields at all. It is only useful as a
/// placeholder and reports a mask of zero.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct WeightLayout {
    field_count: usize,
    stride_shift: u32,
}

impl WeightLayout {
    /// Returns the layout for `length` buckets of `1 << stride_shift` fields.
    pub fn try_new(length: usize, stride_shift: u32) -> Result<Self, LayoutError> {
        if length != 0 && !length.is_power_of_two() {
            return Err(LayoutError::NotPowerOfTwo { length });
        }
        let overflow = LayoutError::Overflow {
            length,
            stride_shift,
        };
        let stride = 1usize.checked_shl(stride_shift).ok_or(overflow)?;
        let field_count = length.checked_mul(stride).ok_or(overflow)?;
        let byte_size = field_count
            .checked_mul(std::mem::size_of::<Field>())
            .ok_or(overflow)?;
        if byte_size > isize::MAX as usize {
            return Err(overflow);
        }
        Ok(Self {
            field_count,
            stride_shift,
        })
    }

    /// Returns the layout for `length` buckets of `1 << stride_shift` fields.
    ///
    /// Panics when `length` is not zero or a power of two or when the store would not fit into
    /// the address space. See [`try_new`][Self::try_new] for a non-panicking version.
    pub fn new(length: usize, stride_shift: u32) -> Self {
        match Self::try_new(length, stride_shift) {
            Ok(layout) => layout,
            Err(err) => panic!("{err}"),
        }
    }

    /// Returns `true` for the zero-length placeholder layout.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.field_count == 0
    }

    /// Mask wrapping any raw index onto `0..field_count`.
    #[inline]
    pub fn mask(&self) -> u64 {
        self.field_count.saturating_sub(1) as u64
    }

    /// Total number of fields, i.e. `length * stride`.
    #[inline]
    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Number of buckets.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.field_count >> self.stride_shift
    }

    /// Exponent of the stride.
    #[inline]
    pub fn stride_shift(&self) -> u32 {
        self.stride_shift
    }

    /// Number of fields per bucket.
    #[inline]
    pub fn stride(&self) -> usize {
        1 << self.stride_shift
    }

    /// Returns the same capacity split into buckets of `1 << stride_shift` fields.
    pub fn with_stride_shift(&self, stride_shift: u32) -> Result<Self, LayoutError> {
        let fits = if self.is_degenerate() {
            stride_shift < usize::BITS
        } else {
            stride_shift <= self.field_count.trailing_zeros()
        };
        if !fits {
            return Err(LayoutError::StrideTooWide { stride_shift });
        }
        Ok(Self {
            field_count: self.field_count,
            stride_shift,
        })
    }

    /// Wraps a raw index onto a field position.
    #[inline]
    pub fn field_index(&self, raw_index: u64) -> usize {
        (raw_index & self.mask()) as usize
    }

    /// Index of the bucket containing the given raw index.
    #[inline]
    pub fn bucket_of(&self, raw_index: u64) -> u64 {
        (raw_index & self.mask()) >> self.stride_shift
    }

    /// Position of the given raw index within its bucket.
    #[inline]
    pub fn offset_of(&self, raw_index: u64) -> usize {
        (raw_index & self.mask()) as usize & (self.stride() - 1)
    }

    /// Raw index of a bucket's first field.
    #[inline]
    pub fn bucket_start(&self, bucket_index: u64) -> u64 {
        bucket_index << self.stride_shift
    }
}
