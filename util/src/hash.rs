//! Utilities for computing hashes.
//!
//! These are the hashes used to turn feature identities into raw weight indices and to key the
//! bucket map of sparse stores.
use std::hash::BuildHasher;

use zwohash::ZwoHasher;

/// The default [`BuildHasher`] used throughout the parameter store crates.
pub type BuildHasherDefault = std::hash::BuildHasherDefault<ZwoHasher>;

/// Computes the hash of a value using the default hasher.
#[inline]
pub fn hash_value<T: std::hash::Hash>(value: T) -> u64 {
    BuildHasherDefault::default().hash_one(value)
}

/// Computes the hash of a reference using the default hasher.
///
/// This forwards to [`hash_value`]. Restricting the argument to be a reference is occasionally
/// useful for type inference or for avoiding warnings.
#[inline]
pub fn hash_ref<T: std::hash::Hash>(value: &T) -> u64 {
    hash_value(value)
}

/// Combines a feature hash with an offset inside the feature's bucket into a raw index.
///
/// The result is not masked; stores wrap raw indices into their own address space.
#[inline]
pub fn raw_index(feature_hash: u64, stride_shift: u32, offset: u64) -> u64 {
    feature_hash.wrapping_shl(stride_shift).wrapping_add(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_deterministic() {
        assert_eq!(hash_value("feature"), hash_value("feature"));
        assert_eq!(hash_ref(&17u64), hash_value(17u64));
        assert_ne!(hash_value("a"), hash_value("b"));
    }

    #[test]
    fn raw_index_places_offset_inside_bucket() {
        let hash = 0b1011;
        assert_eq!(raw_index(hash, 2, 0), 0b101100);
        assert_eq!(raw_index(hash, 2, 3), 0b101111);
        assert_eq!(raw_index(u64::MAX, 1, 1), u64::MAX);
    }
}
