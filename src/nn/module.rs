//! The `Module` trait: the interface all layers implement.

use crate::autograd::Tensor;

/// Interface for neural-network layers.
///
/// A module owns its learnable tensors and exposes them for optimizers,
/// serialization, and parameter mapping. `forward` is the plain
/// input-to-output transformation; modules that need extra context (graph
/// structure, species indices) define their own forward methods and implement
/// this trait only for parameter access.
pub trait Module {
    /// Forward pass.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// All learnable tensors, in a fixed declaration order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Mutable access to all learnable tensors, same order as `parameters`.
    fn parameters_mut(&mut self) -> Vec<&mut Tensor>;

    /// Total number of learnable scalar values.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scale {
        factor: Tensor,
    }

    impl Module for Scale {
        fn forward(&self, input: &Tensor) -> Tensor {
            input.mul_scalar(self.factor.item())
        }

        fn parameters(&self) -> Vec<&Tensor> {
            vec![&self.factor]
        }

        fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
            vec![&mut self.factor]
        }
    }

    #[test]
    fn test_num_parameters_default() {
        let m = Scale {
            factor: Tensor::from_slice(&[2.0]),
        };
        assert_eq!(m.num_parameters(), 1);
        assert_eq!(m.forward(&Tensor::from_slice(&[3.0])).data(), &[6.0]);
    }
}
