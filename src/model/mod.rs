//! The atomistic energy model and its configuration.
//!
//! The model is a directed acyclic module graph: element embedding → radial
//! embedding → a fixed sequence of interaction blocks, each followed by a
//! product (correlation) block and a readout → scale/shift and per-element
//! reference energies. Forward evaluation produces a per-graph energy and
//! per-atom forces as the negative gradient of the total energy with respect
//! to positions, obtained from a single backward sweep.
//!
//! A model instance is always tagged with exactly one [`Backend`], which
//! fixes the storage layout of its structured weights. Both layouts run the
//! same arithmetic; see [`crate::convert`] for the mapping between them.

mod embedding;
mod interaction;
mod layers;
mod product;
mod radial;
mod readout;
mod scale_shift;

pub use embedding::ElementEmbedding;
pub use interaction::{InteractionBlock, InteractionOutput};
pub use layers::{BlockWeights, ElementLinear, IrrepsLinear, RadialMlp};
pub use product::ProductBlock;
pub use radial::RadialEmbedding;
pub use readout::{GatedReadout, LinearReadout, Readout};
pub use scale_shift::{Evaluation, ScaleShiftModel};

use serde::{Deserialize, Serialize};

use crate::error::{EquipararError, Result};
use crate::irreps::Irreps;

/// Parameter-layout representation a model is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Reference layout: separate per-block tensors.
    Generic,
    /// Accelerated-kernel layout: per-block tensors transposed, flattened,
    /// and concatenated.
    Fused,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Generic => write!(f, "generic"),
            Backend::Fused => write!(f, "fused"),
        }
    }
}

/// Interaction-block variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    /// Plain message passing; the species-dependent skip term is handed to
    /// the product block.
    Standard,
    /// Skip term added to the message inside the block (residual form).
    Residual,
    /// Like `Standard`, with aggregated messages normalized by a learned
    /// edge-density estimate.
    Density,
}

/// Position of an interaction block in the sequence.
///
/// The first block is special-cased by the conversion correspondence table:
/// its input channel count is fixed by the embedding rather than by the
/// preceding product block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockRole {
    /// First interaction block after the embedding.
    First,
    /// Any later interaction block.
    Subsequent,
}

/// Radial basis family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadialBasisKind {
    /// Spherical Bessel functions of the first kind.
    Bessel,
}

/// Gate nonlinearity applied inside the final readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    /// SiLU (sigmoid-weighted linear unit).
    Silu,
}

impl Gate {
    /// Apply the gate to a tensor.
    #[must_use]
    pub fn apply(&self, x: &crate::autograd::Tensor) -> crate::autograd::Tensor {
        match self {
            Gate::Silu => x.silu(),
        }
    }
}

/// Model hyperparameters.
///
/// All fields survive conversion exactly; the converter copies this struct
/// verbatim into the target model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Neighbor cutoff radius
    pub r_max: f32,
    /// Number of Bessel basis functions
    pub num_bessel: usize,
    /// Degree of the polynomial cutoff envelope
    pub num_polynomial_cutoff: usize,
    /// Maximum angular order carried by the layout bookkeeping
    pub max_ell: usize,
    /// Interaction variant for blocks after the first
    pub interaction: InteractionKind,
    /// Interaction variant for the first block
    pub interaction_first: InteractionKind,
    /// Number of interaction blocks
    pub num_interactions: usize,
    /// Number of chemical elements
    pub num_elements: usize,
    /// Hidden feature layout
    pub hidden_irreps: Irreps,
    /// Layout of the final readout's hidden layer
    pub mlp_irreps: Irreps,
    /// Gate nonlinearity of the final readout
    pub gate: Gate,
    /// Per-element reference energies, indexed by species
    pub atomic_energies: Vec<f32>,
    /// Average neighbor count used to normalize aggregation
    pub avg_num_neighbors: f32,
    /// Atomic numbers handled by the model, in species order
    pub atomic_numbers: Vec<u32>,
    /// Tensor-product correlation order
    pub correlation: usize,
    /// Radial basis family
    pub radial_basis: RadialBasisKind,
    /// Hidden width of the radial MLP
    pub radial_mlp_dim: usize,
    /// Scale applied to interaction energies
    pub atomic_inter_scale: f32,
    /// Shift added to interaction energies
    pub atomic_inter_shift: f32,
}

impl ModelConfig {
    /// Validate internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |param: &str, value: String, constraint: &str| {
            Err(EquipararError::InvalidHyperparameter {
                param: param.to_string(),
                value,
                constraint: constraint.to_string(),
            })
        };

        if self.r_max <= 0.0 {
            return invalid("r_max", self.r_max.to_string(), "> 0");
        }
        if self.num_bessel == 0 {
            return invalid("num_bessel", "0".to_string(), ">= 1");
        }
        if self.num_interactions == 0 {
            return invalid("num_interactions", "0".to_string(), ">= 1");
        }
        if self.correlation == 0 {
            return invalid("correlation", "0".to_string(), ">= 1");
        }
        if self.num_elements == 0 {
            return invalid("num_elements", "0".to_string(), ">= 1");
        }
        if self.atomic_energies.len() != self.num_elements {
            return invalid(
                "atomic_energies",
                format!("{} entries", self.atomic_energies.len()),
                "one entry per element",
            );
        }
        if self.atomic_numbers.len() != self.num_elements {
            return invalid(
                "atomic_numbers",
                format!("{} entries", self.atomic_numbers.len()),
                "one entry per element",
            );
        }
        if self.avg_num_neighbors <= 0.0 {
            return invalid(
                "avg_num_neighbors",
                self.avg_num_neighbors.to_string(),
                "> 0",
            );
        }
        if !self.hidden_irreps.is_scalar() {
            return invalid(
                "hidden_irreps",
                self.hidden_irreps.to_string(),
                "a scalar (0e) layout",
            );
        }
        if !self.mlp_irreps.is_scalar() {
            return invalid(
                "mlp_irreps",
                self.mlp_irreps.to_string(),
                "a scalar (0e) layout",
            );
        }
        Ok(())
    }

    /// Interaction kind of the block at position `t`.
    #[must_use]
    pub fn interaction_kind(&self, t: usize) -> InteractionKind {
        if t == 0 {
            self.interaction_first
        } else {
            self.interaction
        }
    }

    /// Role of the block at position `t`.
    #[must_use]
    pub fn block_role(&self, t: usize) -> BlockRole {
        if t == 0 {
            BlockRole::First
        } else {
            BlockRole::Subsequent
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ModelConfig {
    ModelConfig {
        r_max: 5.0,
        num_bessel: 8,
        num_polynomial_cutoff: 6,
        max_ell: 3,
        interaction: InteractionKind::Residual,
        interaction_first: InteractionKind::Residual,
        num_interactions: 2,
        num_elements: 1,
        hidden_irreps: Irreps::scalars(8),
        mlp_irreps: Irreps::scalars(4),
        gate: Gate::Silu,
        atomic_energies: vec![1.0],
        avg_num_neighbors: 8.0,
        atomic_numbers: vec![6],
        correlation: 3,
        radial_basis: RadialBasisKind::Bessel,
        radial_mlp_dim: 16,
        atomic_inter_scale: 1.0,
        atomic_inter_shift: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validates() {
        test_config().validate().expect("test config is valid");
    }

    #[test]
    fn test_config_rejects_bad_fields() {
        let mut c = test_config();
        c.num_interactions = 0;
        assert!(c.validate().is_err());

        let mut c = test_config();
        c.atomic_energies = vec![1.0, 2.0];
        assert!(c.validate().is_err());

        let mut c = test_config();
        c.hidden_irreps = "8x1o".parse().expect("valid layout");
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let c = test_config();
        let json = serde_json::to_string(&c).expect("serializes");
        let back: ModelConfig = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, c);
    }

    #[test]
    fn test_first_block_selection() {
        let mut c = test_config();
        c.interaction_first = InteractionKind::Density;
        c.interaction = InteractionKind::Standard;

        assert_eq!(c.interaction_kind(0), InteractionKind::Density);
        assert_eq!(c.interaction_kind(1), InteractionKind::Standard);
        assert_eq!(c.block_role(0), BlockRole::First);
        assert_eq!(c.block_role(1), BlockRole::Subsequent);
    }
}
