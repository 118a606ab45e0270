//! Error types for weight store operations.
use std::fmt;

/// Errors returned when a store's dimensions cannot be represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    /// The requested number of buckets is neither zero nor a power of two.
    NotPowerOfTwo {
        /// The rejected bucket count.
        length: usize,
    },
    /// The total number of fields does not fit into the address space.
    Overflow {
        /// The requested bucket count.
        length: usize,
        /// The requested stride shift.
        stride_shift: u32,
    },
    /// The stride does not evenly divide the store's capacity.
    StrideTooWide {
        /// The rejected stride shift.
        stride_shift: u32,
    },
    /// The stride of a sparse store cannot change once buckets exist.
    BucketsExist,
    /// A sparse alias shares its owner's buckets and cannot change their width.
    AliasedBuckets,
    /// The number of hash bits exceeds the width of the address space.
    TooManyBits {
        /// The requested number of bits.
        bits: u32,
    },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            LayoutError::NotPowerOfTwo { length } => {
                write!(f, "weight store length {length} is not a power of two")
            }
            LayoutError::Overflow {
                length,
                stride_shift,
            } => write!(
                f,
                "weight store of {length} buckets with stride shift {stride_shift} is too large"
            ),
            LayoutError::StrideTooWide { stride_shift } => write!(
                f,
                "stride shift {stride_shift} does not divide the weight store capacity"
            ),
            LayoutError::BucketsExist => {
                write!(f, "cannot change the stride of a sparse store with existing buckets")
            }
            LayoutError::AliasedBuckets => {
                write!(f, "cannot change the stride of an aliased sparse store")
            }
            LayoutError::TooManyBits { bits } => {
                write!(f, "{bits} hash bits exceed the address space")
            }
        }
    }
}

impl std::error::Error for LayoutError {}

/// An operation that the store variant or the platform does not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnsupportedOperation {
    /// Sparse stores have no contiguous base address.
    RawBaseAddress,
    /// Shared memory promotion is only available for dense stores on unix platforms.
    SharedMemory,
}

impl fmt::Display for UnsupportedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedOperation::RawBaseAddress => {
                f.write_str("store has no contiguous base address")
            }
            UnsupportedOperation::SharedMemory => {
                f.write_str("store cannot be promoted to shared memory")
            }
        }
    }
}

impl std::error::Error for UnsupportedOperation {}

/// Errors returned by `promote_to_shared`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PromoteError {
    /// Promotion is not available for this store variant or platform.
    Unsupported(UnsupportedOperation),
    /// Only the store owning its backing memory may promote it.
    Aliased,
    /// The given length does not describe the store's current backing block.
    LengthMismatch {
        /// Number of fields in the backing block.
        expected: usize,
        /// Number of fields described by the passed length.
        found: usize,
    },
}

impl From<UnsupportedOperation> for PromoteError {
    fn from(err: UnsupportedOperation) -> Self {
        PromoteError::Unsupported(err)
    }
}

impl fmt::Display for PromoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromoteError::Unsupported(err) => fmt::Display::fmt(err, f),
            PromoteError::Aliased => f.write_str("an aliased store cannot be promoted"),
            PromoteError::LengthMismatch { expected, found } => write!(
                f,
                "promotion length covers {found} fields but the store holds {expected}"
            ),
        }
    }
}

impl std::error::Error for PromoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PromoteError::Unsupported(err) => Some(err),
            _ => None,
        }
    }
}
