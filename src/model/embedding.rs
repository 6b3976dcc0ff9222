//! Element embedding: one-hot species rows to hidden scalar channels.

use crate::autograd::Tensor;
use crate::nn::init;

/// Linear embedding of species indicators into the hidden feature space.
///
/// The weight layout is identical in both backends; conversion copies it
/// verbatim and gradient verification compares it directly.
#[derive(Debug)]
pub struct ElementEmbedding {
    weight: Tensor,
    num_elements: usize,
    channels: usize,
}

impl ElementEmbedding {
    /// Create a new embedding `[num_elements, channels]`.
    #[must_use]
    pub fn new(num_elements: usize, channels: usize, seed: Option<u64>) -> Self {
        let weight =
            init::normal(&[num_elements, channels], 0.0, 1.0, seed).requires_grad();
        Self {
            weight,
            num_elements,
            channels,
        }
    }

    /// Embed one-hot species rows: `[n, num_elements]` → `[n, channels]`.
    #[must_use]
    pub fn forward(&self, one_hot: &Tensor) -> Tensor {
        one_hot.matmul(&self.weight)
    }

    /// The embedding weight.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Replace the weight (used by the converter).
    pub fn set_weight(&mut self, weight: Tensor) {
        self.weight = weight;
    }

    /// Number of elements.
    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// Output channel count.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Append named parameters under `prefix`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        out.push((format!("{prefix}.weight"), &self.weight));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_selects_weight_rows() {
        let embedding = ElementEmbedding::new(2, 3, Some(11));
        let one_hot = Tensor::new(&[0.0, 1.0, 1.0, 0.0], &[2, 2]);
        let out = embedding.forward(&one_hot);

        assert_eq!(out.shape(), &[2, 3]);
        // Row 0 selects element 1's embedding, row 1 selects element 0's.
        assert_eq!(&out.data()[0..3], &embedding.weight().data()[3..6]);
        assert_eq!(&out.data()[3..6], &embedding.weight().data()[0..3]);
    }

    #[test]
    fn test_embedding_reproducible() {
        let a = ElementEmbedding::new(2, 4, Some(7));
        let b = ElementEmbedding::new(2, 4, Some(7));
        assert_eq!(a.weight().data(), b.weight().data());
    }
}
