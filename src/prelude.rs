//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use equiparar::prelude::*;
//! ```

pub use crate::autograd::Tensor;
pub use crate::convert::{convert, fused_backend_available, Direction};
pub use crate::data::{diamond_cubic, AtomicBatch, AtomicNumberTable, Structure};
pub use crate::error::{EquipararError, Result};
pub use crate::irreps::Irreps;
pub use crate::model::{Backend, InteractionKind, ModelConfig, ScaleShiftModel};
pub use crate::verify::{verify_equivalence, EquivalenceReport, ToleranceConfig};
