//! Model-level description of a weight store.
use crate::{
    dense::DenseWeights, error::LayoutError, layout::WeightLayout, sparse::SparseWeights,
    weights::Weights,
};

/// Describes the weight store of a model: `1 << bits` buckets of `1 << stride_shift` fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WeightsConfig {
    /// Number of hash bits addressing buckets.
    pub bits: u32,
    /// Exponent of the number of fields per bucket.
    pub stride_shift: u32,
    /// Allocate buckets on first access instead of up front.
    pub sparse: bool,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            bits: 18,
            stride_shift: 0,
            sparse: false,
        }
    }
}

impl WeightsConfig {
    /// Number of buckets.
    pub fn length(&self) -> Result<usize, LayoutError> {
        1usize
            .checked_shl(self.bits)
            .ok_or(LayoutError::TooManyBits { bits: self.bits })
    }

    /// Capacity and stride of the described store.
    pub fn layout(&self) -> Result<WeightLayout, LayoutError> {
        WeightLayout::try_new(self.length()?, self.stride_shift)
    }

    /// Creates the described store.
    pub fn build<'a>(&self) -> Result<Weights<'a>, LayoutError> {
        let layout = self.layout()?;
        log::debug!(
            "creating {} weights with {} bits and stride {}",
            if self.sparse { "sparse" } else { "dense" },
            self.bits,
            layout.stride()
        );
        Ok(if self.sparse {
            Weights::Sparse(SparseWeights::from_layout(layout))
        } else {
            Weights::Dense(DenseWeights::from_layout(layout))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WeightStore;

    #[test]
    fn builds_the_configured_variant() {
        let config = WeightsConfig {
            bits: 4,
            stride_shift: 2,
            sparse: true,
        };
        let weights = config.build().unwrap();
        assert!(weights.is_sparse());
        assert_eq!(weights.mask(), 63);
        assert_eq!(weights.stride(), 4);

        let dense = WeightsConfig {
            sparse: false,
            ..config
        }
        .build()
        .unwrap();
        assert_eq!(dense.bucket_count(), 16);
    }

    #[test]
    fn rejects_oversized_stores() {
        let config = WeightsConfig {
            bits: 200,
            ..Default::default()
        };
        assert_eq!(
            config.build().err(),
            Some(LayoutError::TooManyBits { bits: 200 })
        );
        let config = WeightsConfig {
            bits: usize::BITS - 1,
            stride_shift: 4,
            sparse: false,
        };
        assert!(matches!(config.layout(), Err(LayoutError::Overflow { .. })));
    }
}
