//! Product blocks: species-weighted correlation expansion of messages.
//!
//! The scalar-subspace form of a symmetric tensor-product contraction: for
//! correlation order C, node features are expanded into elementwise powers
//! m, m², …, m^C, each weighted per species and channel, then summed. The
//! skip term produced by non-residual interaction variants is added on top.

use crate::autograd::Tensor;
use crate::error::{EquipararError, Result};
use crate::model::layers::BlockWeights;
use crate::model::Backend;
use crate::nn::init;

/// Correlation block following each interaction.
#[derive(Debug)]
pub struct ProductBlock {
    correlation: usize,
    dims: Vec<(usize, usize)>,
    weights: BlockWeights,
}

impl ProductBlock {
    /// Create a block with one `[num_elements, channels]` weight per
    /// correlation order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` if `correlation` is zero.
    pub fn new(
        correlation: usize,
        num_elements: usize,
        channels: usize,
        backend: Backend,
        seed: Option<u64>,
    ) -> Result<Self> {
        if correlation == 0 {
            return Err(EquipararError::InvalidHyperparameter {
                param: "correlation".to_string(),
                value: "0".to_string(),
                constraint: ">= 1".to_string(),
            });
        }

        let dims = vec![(num_elements, channels); correlation];
        let weights = BlockWeights::init(backend, &dims, |i, (r, c)| {
            // Scaled down with the order so high powers start small.
            init::normal(
                &[r, c],
                0.0,
                1.0 / (i + 1) as f32,
                seed.map(|s| s.wrapping_add(i as u64)),
            )
        });

        Ok(Self {
            correlation,
            dims,
            weights,
        })
    }

    /// Correlation order.
    #[must_use]
    pub fn correlation(&self) -> usize {
        self.correlation
    }

    /// Per-order `(num_elements, channels)` dimensions.
    #[must_use]
    pub fn dims(&self) -> &[(usize, usize)] {
        &self.dims
    }

    /// Weight storage.
    #[must_use]
    pub fn weights(&self) -> &BlockWeights {
        &self.weights
    }

    /// Replace the weight storage (used by the converter).
    pub fn set_weights(&mut self, weights: BlockWeights) {
        self.weights = weights;
    }

    /// Forward pass: `[n, channels]` messages to `[n, channels]` features.
    ///
    /// `skip` is the interaction block's species-dependent skip term, added
    /// after the contraction when present.
    #[must_use]
    pub fn forward(&self, message: &Tensor, skip: Option<&Tensor>, one_hot: &Tensor) -> Tensor {
        let w1 = self.weights.block(0, &self.dims);
        let mut out = one_hot.matmul(&w1).mul(message);
        for nu in 2..=self.correlation {
            let w = self.weights.block(nu - 1, &self.dims);
            let coeff = one_hot.matmul(&w);
            out = out.add(&coeff.mul(&message.pow(nu as f32)));
        }
        match skip {
            Some(sc) => out.add(sc),
            None => out,
        }
    }

    /// Append named parameters under `prefix`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.weights.collect_named(prefix, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_one_is_linear_weighting() {
        let block = ProductBlock::new(1, 1, 3, Backend::Generic, Some(9)).expect("valid");
        let one_hot = Tensor::new(&[1.0, 1.0], &[2, 1]);
        let m = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let out = block.forward(&m, None, &one_hot);

        let w = block.weights().block(0, block.dims());
        for i in 0..2 {
            for j in 0..3 {
                let expected = w.data()[j] * m.data()[i * 3 + j];
                assert!((out.data()[i * 3 + j] - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_skip_added() {
        let block = ProductBlock::new(2, 1, 2, Backend::Generic, Some(3)).expect("valid");
        let one_hot = Tensor::new(&[1.0], &[1, 1]);
        let m = Tensor::new(&[0.5, -0.5], &[1, 2]);
        let sc = Tensor::new(&[10.0, 20.0], &[1, 2]);

        let without = block.forward(&m, None, &one_hot);
        let with = block.forward(&m, Some(&sc), &one_hot);
        assert!((with.data()[0] - without.data()[0] - 10.0).abs() < 1e-5);
        assert!((with.data()[1] - without.data()[1] - 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_backends_agree_bitwise() {
        let generic = ProductBlock::new(3, 2, 4, Backend::Generic, Some(21)).expect("valid");
        let fused = ProductBlock::new(3, 2, 4, Backend::Fused, Some(21)).expect("valid");

        let one_hot = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]);
        let m = Tensor::new(&[0.1, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8], &[2, 4]);

        let out_g = generic.forward(&m, None, &one_hot);
        let out_f = fused.forward(&m, None, &one_hot);
        assert_eq!(out_g.data(), out_f.data());
    }

    #[test]
    fn test_rejects_zero_correlation() {
        assert!(ProductBlock::new(0, 1, 4, Backend::Generic, None).is_err());
    }
}
