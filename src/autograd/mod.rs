//! Reverse-mode automatic differentiation engine.
//!
//! The engine uses a define-by-run tape: operations are recorded to a
//! thread-local computation graph during the forward pass, and gradients are
//! computed in reverse tape order during the backward pass. Gradients
//! accumulate for tensors used more than once, which is what makes forces
//! (position gradients) and parameter gradients available from a single
//! backward sweep over the model's energy.
//!
//! # Example
//!
//! ```
//! use equiparar::autograd::{self, Tensor};
//!
//! let x = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();
//! let w = Tensor::from_slice(&[0.5, 0.5, 0.5]).requires_grad();
//!
//! let y = x.mul(&w).sum();
//! y.backward();
//!
//! let dx = autograd::get_grad(x.id()).expect("gradient recorded");
//! assert_eq!(dx.data(), &[0.5, 0.5, 0.5]);
//! autograd::clear_graph();
//! ```

pub mod grad_fn;
mod graph;
mod ops;
mod tensor;

pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

use std::cell::RefCell;

thread_local! {
    /// Computation graph for the current thread.
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    /// Flag to disable gradient tracking (for inference).
    static GRAD_ENABLED: RefCell<bool> = const { RefCell::new(true) };
}

/// Execute a closure without gradient tracking.
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    GRAD_ENABLED.with(|enabled| {
        let prev = *enabled.borrow();
        *enabled.borrow_mut() = false;
        let result = f();
        *enabled.borrow_mut() = prev;
        result
    })
}

/// Check if gradient tracking is currently enabled.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| *enabled.borrow())
}

/// Run a closure against the thread-local computation graph.
pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Clear the computation graph and all stored gradients.
///
/// Call after gradients have been consumed; the tape otherwise keeps growing
/// across forward passes on the same thread.
pub fn clear_graph() {
    GRAPH.with(|graph| graph.borrow_mut().clear());
}

/// Get the accumulated gradient for a tensor by ID, if backward reached it.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}
