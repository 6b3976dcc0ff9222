//! Fully connected (linear) layer.
//!
//! Implements y = xW^T + b with Xavier-initialized weights.

use super::init::{xavier_uniform, zeros};
use super::module::Module;
use crate::autograd::Tensor;

/// Fully connected layer: y = xW^T + b.
///
/// The weight is stored `[out_features, in_features]` and transposed inside
/// `forward`, so the transposition is part of the recorded tape and gradients
/// reach the stored weight.
///
/// # Shape
///
/// - Input: `(n, in_features)`
/// - Output: `(n, out_features)`
pub struct Linear {
    /// Weight matrix, shape: [out_features, in_features]
    weight: Tensor,

    /// Bias vector, shape: [out_features], or None if bias is disabled
    bias: Option<Tensor>,

    /// Number of input features
    in_features: usize,

    /// Number of output features
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization and bias.
    pub fn new(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(&[out_features, in_features], in_features, out_features, seed)
            .requires_grad();
        let bias = zeros(&[out_features]).requires_grad();

        Self {
            weight,
            bias: Some(bias),
            in_features,
            out_features,
        }
    }

    /// Create a Linear layer without a bias term.
    pub fn without_bias(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(&[out_features, in_features], in_features, out_features, seed)
            .requires_grad();

        Self {
            weight,
            bias: None,
            in_features,
            out_features,
        }
    }

    /// Input feature dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Output feature dimension.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Whether this layer has a bias term.
    #[must_use]
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Reference to the weight tensor.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Replace the weight tensor (used when loading converted parameters).
    pub fn set_weight(&mut self, weight: Tensor) {
        self.weight = weight;
    }

    /// Reference to the bias tensor if present.
    #[must_use]
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        let output = input.matmul(&self.weight.transpose());
        match &self.bias {
            Some(b) => output.broadcast_add(b),
            None => output,
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        match &mut self.bias {
            Some(b) => vec![&mut self.weight, b],
            None => vec![&mut self.weight],
        }
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_linear_forward_shape() {
        let layer = Linear::new(10, 5, Some(42));
        let x = Tensor::ones(&[32, 10]);
        assert_eq!(layer.forward(&x).shape(), &[32, 5]);
    }

    #[test]
    fn test_linear_parameters() {
        let layer = Linear::new(10, 5, Some(42));
        let params = layer.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].shape(), &[5, 10]);
        assert_eq!(params[1].shape(), &[5]);
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_without_bias() {
        let layer = Linear::without_bias(10, 5, Some(42));
        assert_eq!(layer.parameters().len(), 1);
        assert!(!layer.has_bias());
    }

    #[test]
    fn test_linear_reproducible() {
        let layer1 = Linear::new(10, 5, Some(42));
        let layer2 = Linear::new(10, 5, Some(42));
        assert_eq!(layer1.weight().data(), layer2.weight().data());
    }

    #[test]
    fn test_linear_known_values() {
        let mut layer = Linear::new(2, 2, Some(42));
        layer.set_weight(Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]).requires_grad());

        let x = Tensor::new(&[1.0, 2.0], &[1, 2]);
        let out = layer.forward(&x);
        // Identity weight, zero bias: output equals input
        assert!((out.data()[0] - 1.0).abs() < 1e-6);
        assert!((out.data()[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_weight_receives_gradient() {
        clear_graph();
        let layer = Linear::without_bias(3, 2, Some(7));
        let x = Tensor::ones(&[4, 3]);
        layer.forward(&x).sum().backward();

        let grad = get_grad(layer.weight().id()).expect("weight gradient");
        assert_eq!(grad.shape(), &[2, 3]);
        // d(sum(xW^T))/dW_jk = sum_i x_ik = 4 for all-ones input
        assert!(grad.data().iter().all(|&g| (g - 4.0).abs() < 1e-5));
        clear_graph();
    }
}
