//! Equiparar: bidirectional model conversion with equivalence verification.
//!
//! An atomistic graph neural network model exists in two parameter-layout
//! representations: the generic backend (separate per-block tensors, the
//! correctness reference) and the fused backend (blocks transposed,
//! flattened, and concatenated the way accelerated kernels consume them).
//! This crate converts trained models between the two representations and
//! verifies that the conversion is lossless under forward evaluation
//! (energy and forces) and backward gradient computation.
//!
//! # Quick Start
//!
//! ```
//! use equiparar::convert::{convert, Direction};
//! use equiparar::data::{diamond_cubic, AtomicBatch};
//! use equiparar::model::{Backend, ScaleShiftModel};
//! use equiparar::verify::{verify_equivalence, ToleranceConfig};
//!
//! # fn main() -> equiparar::error::Result<()> {
//! let config = equiparar::model::ModelConfig {
//!     r_max: 5.0,
//!     num_bessel: 8,
//!     num_polynomial_cutoff: 6,
//!     max_ell: 3,
//!     interaction: equiparar::model::InteractionKind::Residual,
//!     interaction_first: equiparar::model::InteractionKind::Residual,
//!     num_interactions: 2,
//!     num_elements: 1,
//!     hidden_irreps: "8x0e".parse()?,
//!     mlp_irreps: "4x0e".parse()?,
//!     gate: equiparar::model::Gate::Silu,
//!     atomic_energies: vec![1.0],
//!     avg_num_neighbors: 8.0,
//!     atomic_numbers: vec![6],
//!     correlation: 3,
//!     radial_basis: equiparar::model::RadialBasisKind::Bessel,
//!     radial_mlp_dim: 16,
//!     atomic_inter_scale: 1.0,
//!     atomic_inter_shift: 0.0,
//! };
//!
//! let model = ScaleShiftModel::new(config, Backend::Generic, Some(42))?;
//! let fused = convert(&model, Direction::GenericToFused)?;
//!
//! let mut cell = diamond_cubic(3.567, [1, 1, 1], 0);
//! cell.displace_uniform(0.1, 42);
//! let batch = AtomicBatch::from_structures(&[cell], 5.0)?;
//!
//! let report = verify_equivalence(&model, &fused, &batch, ToleranceConfig::default())?;
//! assert!(report.is_equivalent());
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: tape-based reverse-mode automatic differentiation
//! - [`primitives`]: numeric storage underneath tensors
//! - [`irreps`]: irreducible-representation layout descriptors
//! - [`nn`]: layer toolkit (Module trait, Linear, initializers)
//! - [`data`]: atomic graph batches and the scenario structure builder
//! - [`model`]: the energy model and its configuration
//! - [`convert`]: module-graph converter and parameter mapper
//! - [`verify`]: forward/backward equivalence verification

#![warn(missing_docs)]

pub mod autograd;
pub mod convert;
pub mod data;
pub mod error;
pub mod irreps;
pub mod model;
pub mod nn;
pub mod prelude;
pub mod primitives;
pub mod verify;
