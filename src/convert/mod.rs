//! Module Graph Converter: generic ⇄ fused model transformation.
//!
//! The converter walks the source model in a fixed deterministic order
//! (embedding → interaction blocks in sequence → product blocks → readouts),
//! rebuilds the structurally equivalent target module graph from the same
//! configuration, and maps every learnable tensor through the
//! [`mapper`]. Non-learnable constants travel with the configuration and are
//! copied verbatim. The source is never mutated; conversion is
//! bit-deterministic.
//!
//! Which slots change layout is fixed by an explicit correspondence table
//! keyed by interaction variant (`interaction_slots`); the first block is
//! handled by the same table but constructed under
//! [`crate::model::BlockRole::First`], whose input channel count comes from
//! the embedding.

pub mod mapper;

use crate::error::{EquipararError, Result};
use crate::model::{
    Backend, BlockWeights, InteractionBlock, InteractionKind, RadialMlp, Readout, ScaleShiftModel,
};
use crate::nn::Linear;

/// Conversion direction between the two backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Generic layout → fused layout.
    GenericToFused,
    /// Fused layout → generic layout.
    FusedToGeneric,
}

impl Direction {
    /// Backend the source model must be tagged with.
    #[must_use]
    pub fn source(&self) -> Backend {
        match self {
            Direction::GenericToFused => Backend::Generic,
            Direction::FusedToGeneric => Backend::Fused,
        }
    }

    /// Backend the produced model is tagged with.
    #[must_use]
    pub fn target(&self) -> Backend {
        match self {
            Direction::GenericToFused => Backend::Fused,
            Direction::FusedToGeneric => Backend::Generic,
        }
    }

    /// The opposite direction.
    #[must_use]
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::GenericToFused => Direction::FusedToGeneric,
            Direction::FusedToGeneric => Direction::GenericToFused,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {}", self.source(), self.target())
    }
}

/// Whether the fused backend is compiled into this build.
///
/// With the `fused` feature disabled, conversion entry points return
/// [`EquipararError::BackendUnavailable`] and callers skip the conversion
/// path entirely.
#[must_use]
pub fn fused_backend_available() -> bool {
    cfg!(feature = "fused")
}

// ============================================================================
// Correspondence table
// ============================================================================

/// Parameter slot of an interaction block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InteractionSlot {
    LinearUp,
    RadialMlp,
    DensityMlp,
    Skip,
    LinearDown,
}

/// How a slot's storage maps between backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransformKind {
    /// Per-block ⇄ fused-flat layout change.
    BlockLayout,
    /// Identical layout in both backends; copied verbatim.
    Verbatim,
}

struct SlotRule {
    slot: InteractionSlot,
    transform: TransformKind,
}

const STANDARD_SLOTS: &[SlotRule] = &[
    SlotRule {
        slot: InteractionSlot::LinearUp,
        transform: TransformKind::BlockLayout,
    },
    SlotRule {
        slot: InteractionSlot::RadialMlp,
        transform: TransformKind::Verbatim,
    },
    SlotRule {
        slot: InteractionSlot::Skip,
        transform: TransformKind::BlockLayout,
    },
    SlotRule {
        slot: InteractionSlot::LinearDown,
        transform: TransformKind::BlockLayout,
    },
];

const DENSITY_SLOTS: &[SlotRule] = &[
    SlotRule {
        slot: InteractionSlot::LinearUp,
        transform: TransformKind::BlockLayout,
    },
    SlotRule {
        slot: InteractionSlot::RadialMlp,
        transform: TransformKind::Verbatim,
    },
    SlotRule {
        slot: InteractionSlot::DensityMlp,
        transform: TransformKind::Verbatim,
    },
    SlotRule {
        slot: InteractionSlot::Skip,
        transform: TransformKind::BlockLayout,
    },
    SlotRule {
        slot: InteractionSlot::LinearDown,
        transform: TransformKind::BlockLayout,
    },
];

/// Slot list of an interaction variant.
fn interaction_slots(kind: InteractionKind) -> &'static [SlotRule] {
    match kind {
        InteractionKind::Standard | InteractionKind::Residual => STANDARD_SLOTS,
        InteractionKind::Density => DENSITY_SLOTS,
    }
}

// ============================================================================
// Conversion
// ============================================================================

/// Convert a model between backends.
///
/// Produces a newly allocated model in the target layout with numerically
/// identical parameters; the source is read-only.
///
/// # Errors
///
/// - `BackendUnavailable` when the `fused` feature is compiled out.
/// - `BackendMismatch` when the source is not tagged with the direction's
///   source backend.
/// - `LayoutMismatch` when a parameter slot's element count disagrees with
///   the target layout (irrep-layout incompatibility; fatal).
pub fn convert(source: &ScaleShiftModel, direction: Direction) -> Result<ScaleShiftModel> {
    if !fused_backend_available() {
        return Err(EquipararError::BackendUnavailable {
            backend: Backend::Fused.to_string(),
        });
    }
    if source.backend() != direction.source() {
        return Err(EquipararError::BackendMismatch {
            expected: direction.source().to_string(),
            actual: source.backend().to_string(),
        });
    }

    // Target skeleton from the identical configuration; every parameter is
    // overwritten below, so the skeleton seed is irrelevant but fixed.
    let mut target = ScaleShiftModel::new(source.config().clone(), direction.target(), Some(0))?;

    target
        .node_embedding_mut()
        .set_weight(mapper::copy_verbatim(source.node_embedding().weight()));

    for (t, (src_block, tgt_block)) in source
        .interactions()
        .iter()
        .zip(target.interactions_mut().iter_mut())
        .enumerate()
    {
        convert_interaction(t, src_block, tgt_block, direction)?;
    }

    for (t, (src_block, tgt_block)) in source
        .products()
        .iter()
        .zip(target.products_mut().iter_mut())
        .enumerate()
    {
        let slot = format!("products.{t}");
        let dims = src_block.dims().to_vec();
        tgt_block.set_weights(map_block_weights(
            src_block.weights(),
            &dims,
            direction,
            &slot,
        )?);
    }

    for (src_readout, tgt_readout) in source.readouts().iter().zip(target.readouts_mut()) {
        copy_readout(src_readout, tgt_readout)?;
    }

    Ok(target)
}

/// Convert one interaction block, slot by slot, per the correspondence
/// table for its variant.
fn convert_interaction(
    t: usize,
    source: &InteractionBlock,
    target: &mut InteractionBlock,
    direction: Direction,
) -> Result<()> {
    let path = format!("interactions.{t}");
    let role_check = source.role() == target.role() && source.kind() == target.kind();
    if !role_check {
        return Err(EquipararError::BackendMismatch {
            expected: format!("{:?}/{:?} block", source.kind(), source.role()),
            actual: format!("{:?}/{:?} block", target.kind(), target.role()),
        });
    }

    for rule in interaction_slots(source.kind()) {
        match (rule.slot, rule.transform) {
            (InteractionSlot::LinearUp, TransformKind::BlockLayout) => {
                let dims = source.linear_up().dims().to_vec();
                let mapped = map_block_weights(
                    source.linear_up().weights(),
                    &dims,
                    direction,
                    &format!("{path}.linear_up"),
                )?;
                target.linear_up_mut().set_weights(mapped);
            }
            (InteractionSlot::LinearDown, TransformKind::BlockLayout) => {
                let dims = source.linear_down().dims().to_vec();
                let mapped = map_block_weights(
                    source.linear_down().weights(),
                    &dims,
                    direction,
                    &format!("{path}.linear_down"),
                )?;
                target.linear_down_mut().set_weights(mapped);
            }
            (InteractionSlot::Skip, TransformKind::BlockLayout) => {
                let dims = source.skip().dims().to_vec();
                let mapped = map_block_weights(
                    source.skip().weights(),
                    &dims,
                    direction,
                    &format!("{path}.skip"),
                )?;
                target.skip_mut().set_weights(mapped);
            }
            (InteractionSlot::RadialMlp, TransformKind::Verbatim) => {
                copy_mlp(source.radial_mlp(), target.radial_mlp_mut());
            }
            (InteractionSlot::DensityMlp, TransformKind::Verbatim) => {
                if let (Some(src_mlp), Some(tgt_mlp)) =
                    (source.density_mlp(), target.density_mlp_mut())
                {
                    copy_mlp(src_mlp, tgt_mlp);
                }
            }
            (slot, transform) => {
                return Err(EquipararError::Other(format!(
                    "no conversion rule for slot {slot:?} with transform {transform:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Apply the layout transform to a structured weight.
fn map_block_weights(
    source: &BlockWeights,
    dims: &[(usize, usize)],
    direction: Direction,
    slot: &str,
) -> Result<BlockWeights> {
    match (source, direction) {
        (BlockWeights::PerBlock(blocks), Direction::GenericToFused) => Ok(BlockWeights::Fused(
            mapper::fuse_checked(blocks, dims, slot)?,
        )),
        (BlockWeights::Fused(flat), Direction::FusedToGeneric) => {
            Ok(BlockWeights::PerBlock(mapper::split(flat, dims, slot)?))
        }
        _ => Err(EquipararError::BackendMismatch {
            expected: direction.source().to_string(),
            actual: source.backend().to_string(),
        }),
    }
}

/// Copy MLP weights verbatim, layer by layer.
fn copy_mlp(source: &RadialMlp, target: &mut RadialMlp) {
    let weights: Vec<_> = source
        .layers()
        .iter()
        .map(|l| mapper::copy_verbatim(l.weight()))
        .collect();
    for (layer, weight) in target.layers_mut().iter_mut().zip(weights) {
        layer.set_weight(weight);
    }
}

/// Copy a linear layer's weight verbatim.
fn copy_linear(source: &Linear, target: &mut Linear) {
    target.set_weight(mapper::copy_verbatim(source.weight()));
}

/// Copy readout weights verbatim.
fn copy_readout(source: &Readout, target: &mut Readout) -> Result<()> {
    match (source, target) {
        (Readout::Linear(src), Readout::Linear(tgt)) => {
            copy_linear(src.linear(), tgt.linear_mut());
            Ok(())
        }
        (Readout::Gated(src), Readout::Gated(tgt)) => {
            copy_linear(src.hidden(), tgt.hidden_mut());
            copy_linear(src.output(), tgt.output_mut());
            Ok(())
        }
        _ => Err(EquipararError::BackendMismatch {
            expected: "matching readout variants".to_string(),
            actual: "mixed readout variants".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_config;

    fn generic_model() -> ScaleShiftModel {
        ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model")
    }

    #[test]
    fn test_direction_endpoints() {
        assert_eq!(Direction::GenericToFused.source(), Backend::Generic);
        assert_eq!(Direction::GenericToFused.target(), Backend::Fused);
        assert_eq!(
            Direction::GenericToFused.reverse(),
            Direction::FusedToGeneric
        );
    }

    #[test]
    fn test_capability_query_matches_feature() {
        assert_eq!(fused_backend_available(), cfg!(feature = "fused"));
    }

    #[cfg(feature = "fused")]
    mod with_fused {
        use super::*;

        #[test]
        fn test_convert_changes_tag_and_preserves_count() {
            let source = generic_model();
            let fused = convert(&source, Direction::GenericToFused).expect("conversion");

            assert_eq!(fused.backend(), Backend::Fused);
            assert_eq!(source.backend(), Backend::Generic, "source untouched");
            assert_eq!(source.num_parameters(), fused.num_parameters());
        }

        #[test]
        fn test_convert_rejects_wrong_source_backend() {
            let source = generic_model();
            let err = convert(&source, Direction::FusedToGeneric).expect_err("tag mismatch");
            assert!(matches!(err, EquipararError::BackendMismatch { .. }));
        }

        #[test]
        fn test_round_trip_bit_identical() {
            let source = generic_model();
            let fused = convert(&source, Direction::GenericToFused).expect("forward");
            let back = convert(&fused, Direction::FusedToGeneric).expect("backward");

            let src_params = source.named_parameters();
            let back_params = back.named_parameters();
            assert_eq!(src_params.len(), back_params.len());
            for ((name_a, pa), (name_b, pb)) in src_params.iter().zip(back_params.iter()) {
                assert_eq!(name_a, name_b);
                assert_eq!(pa.shape(), pb.shape());
                assert_eq!(pa.data(), pb.data(), "parameter {name_a} drifted");
            }
        }

        #[test]
        fn test_conversion_deterministic() {
            let source = generic_model();
            let a = convert(&source, Direction::GenericToFused).expect("first");
            let b = convert(&source, Direction::GenericToFused).expect("second");

            for ((_, pa), (_, pb)) in a.named_parameters().iter().zip(b.named_parameters().iter())
            {
                assert_eq!(pa.data(), pb.data());
            }
        }

        #[test]
        fn test_config_copied_exactly() {
            let source = generic_model();
            let fused = convert(&source, Direction::GenericToFused).expect("conversion");

            assert_eq!(source.config(), fused.config());
            // Spot-check exact equality, not tolerance.
            assert_eq!(source.config().r_max, fused.config().r_max);
            assert_eq!(source.config().num_bessel, fused.config().num_bessel);
            assert_eq!(source.config().correlation, fused.config().correlation);
            assert_eq!(source.config().num_elements, fused.config().num_elements);
        }

        #[test]
        fn test_fused_layout_differs_from_generic() {
            // The conversion must actually change storage layout: the fused
            // model's interaction linears hold single flat tensors.
            let source = generic_model();
            let fused = convert(&source, Direction::GenericToFused).expect("conversion");

            let names_src: Vec<String> = source
                .named_parameters()
                .iter()
                .map(|(n, _)| n.clone())
                .collect();
            let names_fused: Vec<String> = fused
                .named_parameters()
                .iter()
                .map(|(n, _)| n.clone())
                .collect();

            assert!(names_src.contains(&"interactions.0.linear_up.weights.0".to_string()));
            assert!(names_fused.contains(&"interactions.0.linear_up.weight".to_string()));
        }
    }

    #[cfg(not(feature = "fused"))]
    #[test]
    fn test_unavailable_backend_reported() {
        let source = generic_model();
        let err = convert(&source, Direction::GenericToFused).expect_err("feature disabled");
        assert!(matches!(err, EquipararError::BackendUnavailable { .. }));
    }
}
