//! Computation graph: tape recording and the backward pass.

use std::collections::HashMap;
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

/// Entry in the computation tape.
struct TapeEntry {
    /// ID of the output tensor
    output_id: TensorId,

    /// Function to compute input gradients from the output gradient
    grad_fn: Arc<dyn GradFn>,

    /// IDs of input tensors, in forward-call order
    input_ids: Vec<TensorId>,
}

/// Tape-based computation graph.
///
/// Operations are appended in forward order; `backward` walks the tape in
/// reverse, propagating and accumulating gradients. Each thread owns its own
/// graph (thread-local storage in the parent module), so evaluation runs on
/// different threads never interact.
#[allow(missing_debug_implementations)]
pub struct ComputationGraph {
    /// Recorded operations
    tape: Vec<TapeEntry>,

    /// Leaf tensors that require gradients, by ID
    tensors: HashMap<TensorId, Tensor>,
}

impl ComputationGraph {
    /// Create a new empty computation graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tape: Vec::new(),
            tensors: HashMap::new(),
        }
    }

    /// Clear all recorded operations and stored gradients.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.tensors.clear();
    }

    /// Register a tensor so gradients can be stored on it after backward.
    pub fn register_tensor(&mut self, tensor: Tensor) {
        self.tensors.entry(tensor.id()).or_insert(tensor);
    }

    /// Record an operation to the tape.
    pub fn record(
        &mut self,
        output_id: TensorId,
        grad_fn: Arc<dyn GradFn>,
        input_ids: Vec<TensorId>,
    ) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    /// Reverse-mode gradient computation.
    ///
    /// Seeds `grad_output` at `output_id`, walks the tape in reverse, and for
    /// every entry whose output has a gradient propagates it to the entry's
    /// inputs, accumulating where paths merge. Finally, gradients of
    /// registered leaf tensors are stored for retrieval via `get_grad`.
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let grad_out = match grads.get(&entry.output_id) {
                Some(g) => g.clone(),
                None => continue,
            };

            let input_grads = entry.grad_fn.backward(&grad_out);
            debug_assert_eq!(
                input_grads.len(),
                entry.input_ids.len(),
                "{} returned a gradient per input",
                entry.grad_fn.name()
            );

            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                grads
                    .entry(*input_id)
                    .and_modify(|existing| {
                        let new_data: Vec<f32> = existing
                            .data()
                            .iter()
                            .zip(input_grad.data().iter())
                            .map(|(a, b)| a + b)
                            .collect();
                        *existing = Tensor::new(&new_data, existing.shape());
                    })
                    .or_insert(input_grad);
            }
        }

        for (id, grad) in grads {
            if let Some(tensor) = self.tensors.get_mut(&id) {
                if tensor.requires_grad_enabled() && tensor.is_leaf() {
                    tensor.accumulate_grad(grad);
                }
            }
        }
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    /// Whether the tape is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Gradient of a registered tensor, if backward reached it.
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).and_then(|t| t.grad().cloned())
    }

    /// Clear the gradient of one registered tensor.
    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.tensors.get_mut(&id) {
            tensor.clear_grad();
        }
    }
}

impl Default for ComputationGraph {
    fn default() -> Self {
        Self::new()
    }
}
