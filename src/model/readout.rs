//! Readout heads mapping node features to per-node energies.
//!
//! Intermediate interactions use a plain linear readout; the final block
//! uses a small gated MLP. Readout weights have the same layout in both
//! backends, so conversion copies them verbatim.

use crate::autograd::Tensor;
use crate::model::Gate;
use crate::nn::{Linear, Module};

/// Linear readout: `[n, channels]` → `[n, 1]`.
#[derive(Debug)]
pub struct LinearReadout {
    linear: Linear,
}

impl LinearReadout {
    /// Create a readout for the given channel count.
    #[must_use]
    pub fn new(channels: usize, seed: Option<u64>) -> Self {
        Self {
            linear: Linear::without_bias(channels, 1, seed),
        }
    }

    /// Forward pass.
    #[must_use]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        self.linear.forward(x)
    }

    /// The underlying linear layer.
    #[must_use]
    pub fn linear(&self) -> &Linear {
        &self.linear
    }

    /// Mutable access (used by the converter).
    pub fn linear_mut(&mut self) -> &mut Linear {
        &mut self.linear
    }
}

/// Gated MLP readout used after the final interaction:
/// linear → gate → linear.
#[derive(Debug)]
pub struct GatedReadout {
    hidden: Linear,
    output: Linear,
    gate: Gate,
}

impl GatedReadout {
    /// Create a gated readout with the given hidden width.
    #[must_use]
    pub fn new(channels: usize, hidden_dim: usize, gate: Gate, seed: Option<u64>) -> Self {
        Self {
            hidden: Linear::without_bias(channels, hidden_dim, seed),
            output: Linear::without_bias(
                hidden_dim,
                1,
                seed.map(|s| s.wrapping_add(1)),
            ),
            gate,
        }
    }

    /// Forward pass.
    #[must_use]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let h = self.gate.apply(&self.hidden.forward(x));
        self.output.forward(&h)
    }

    /// The hidden layer.
    #[must_use]
    pub fn hidden(&self) -> &Linear {
        &self.hidden
    }

    /// Mutable hidden layer (used by the converter).
    pub fn hidden_mut(&mut self) -> &mut Linear {
        &mut self.hidden
    }

    /// The output layer.
    #[must_use]
    pub fn output(&self) -> &Linear {
        &self.output
    }

    /// Mutable output layer (used by the converter).
    pub fn output_mut(&mut self) -> &mut Linear {
        &mut self.output
    }
}

/// Readout variant attached to each interaction position.
#[derive(Debug)]
pub enum Readout {
    /// Plain linear head (intermediate blocks).
    Linear(LinearReadout),
    /// Gated MLP head (final block).
    Gated(GatedReadout),
}

impl Readout {
    /// Forward pass: `[n, channels]` → `[n, 1]`.
    #[must_use]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        match self {
            Readout::Linear(r) => r.forward(x),
            Readout::Gated(r) => r.forward(x),
        }
    }

    /// Append named parameters under `prefix`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        match self {
            Readout::Linear(r) => {
                out.push((format!("{prefix}.linear.weight"), r.linear.weight()));
            }
            Readout::Gated(r) => {
                out.push((format!("{prefix}.mlp.layers.0.weight"), r.hidden.weight()));
                out.push((format!("{prefix}.mlp.layers.1.weight"), r.output.weight()));
            }
        }
    }
}
