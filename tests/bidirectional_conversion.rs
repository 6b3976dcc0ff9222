//! Bidirectional conversion scenario tests.
//!
//! A generic-backend reference model is converted to the fused layout and
//! back; the original, the converted model, and the round-tripped model must
//! agree on energies, forces, and summed-energy parameter gradients for
//! every interaction-block variant.

use equiparar::convert::{convert, fused_backend_available, Direction};
use equiparar::data::{diamond_cubic, AtomicBatch, AtomicNumberTable};
use equiparar::model::{
    Backend, Gate, InteractionKind, ModelConfig, RadialBasisKind, ScaleShiftModel,
};
use equiparar::verify::{verify_equivalence, GradientResult, SkipReason, ToleranceConfig};

fn model_config(interaction_first: InteractionKind) -> ModelConfig {
    let table = AtomicNumberTable::new(vec![6]);
    ModelConfig {
        r_max: 5.0,
        num_bessel: 8,
        num_polynomial_cutoff: 6,
        max_ell: 3,
        interaction: InteractionKind::Residual,
        interaction_first,
        num_interactions: 2,
        num_elements: table.len(),
        hidden_irreps: "32x0e".parse().expect("valid layout"),
        mlp_irreps: "16x0e".parse().expect("valid layout"),
        gate: Gate::Silu,
        atomic_energies: vec![1.0],
        avg_num_neighbors: 8.0,
        atomic_numbers: table.zs().to_vec(),
        correlation: 3,
        radial_basis: RadialBasisKind::Bessel,
        radial_mlp_dim: 64,
        atomic_inter_scale: 1.0,
        atomic_inter_shift: 0.0,
    }
}

/// Diamond-cubic carbon cell (a = 3.567), 2×2×2 repeat, seeded random
/// displacement in [-0.1, 0.1], cutoff 5.0.
fn scenario_batch() -> AtomicBatch {
    let mut supercell = diamond_cubic(3.567, [2, 2, 2], 0);
    supercell.displace_uniform(0.1, 42);
    AtomicBatch::from_structures(&[supercell], 5.0).expect("valid batch")
}

const FIRST_BLOCK_VARIANTS: [InteractionKind; 3] = [
    InteractionKind::Residual,
    InteractionKind::Standard,
    InteractionKind::Density,
];

#[test]
fn bidirectional_conversion_all_first_block_variants() {
    assert!(fused_backend_available(), "fused feature must be on for this suite");
    let batch = scenario_batch();
    assert_eq!(batch.num_atoms(), 64);
    assert!(batch.num_edges() > 0);

    for interaction_first in FIRST_BLOCK_VARIANTS {
        let config = model_config(interaction_first);
        let model = ScaleShiftModel::new(config, Backend::Generic, Some(42))
            .expect("reference model builds");

        let fused = convert(&model, Direction::GenericToFused).expect("generic → fused");
        let back = convert(&fused, Direction::FusedToGeneric).expect("fused → generic");

        // All three pairwise comparisons must pass forward + backward.
        for (label, left, right) in [
            ("generic vs fused", &model, &fused),
            ("fused vs round-trip", &fused, &back),
            ("generic vs round-trip", &model, &back),
        ] {
            let report = verify_equivalence(left, right, &batch, ToleranceConfig::default())
                .expect("verification runs");
            assert!(
                report.is_equivalent(),
                "{interaction_first:?} first block, {label}:\n{report}"
            );
            assert!(
                report.compared_count() > 0,
                "{interaction_first:?} first block, {label}: no gradient pair compared"
            );
        }
    }
}

#[test]
fn round_trip_parameters_bit_identical() {
    for interaction_first in FIRST_BLOCK_VARIANTS {
        let config = model_config(interaction_first);
        let model =
            ScaleShiftModel::new(config, Backend::Generic, Some(42)).expect("reference model");
        let back = convert(
            &convert(&model, Direction::GenericToFused).expect("forward"),
            Direction::FusedToGeneric,
        )
        .expect("backward");

        let original = model.named_parameters();
        let restored = back.named_parameters();
        assert_eq!(original.len(), restored.len());
        for ((name_a, pa), (name_b, pb)) in original.iter().zip(restored.iter()) {
            assert_eq!(name_a, name_b);
            assert_eq!(pa.shape(), pb.shape(), "{name_a} shape drifted");
            assert_eq!(pa.data(), pb.data(), "{name_a} values drifted");
        }
    }
}

#[test]
fn configuration_copied_exactly() {
    let config = model_config(InteractionKind::Standard);
    let model = ScaleShiftModel::new(config, Backend::Generic, Some(42)).expect("model");
    let fused = convert(&model, Direction::GenericToFused).expect("conversion");

    // Exact equality, not tolerance.
    assert_eq!(model.config(), fused.config());
    assert_eq!(model.config().r_max, 5.0);
    assert_eq!(fused.config().num_bessel, 8);
    assert_eq!(fused.config().correlation, 3);
    assert_eq!(fused.config().num_elements, 1);
    assert_eq!(fused.config().hidden_irreps.to_string(), "32x0e");
}

#[test]
fn conversion_is_deterministic() {
    let config = model_config(InteractionKind::Residual);
    let model = ScaleShiftModel::new(config, Backend::Generic, Some(42)).expect("model");

    let first = convert(&model, Direction::GenericToFused).expect("first conversion");
    let second = convert(&model, Direction::GenericToFused).expect("second conversion");

    for ((name_a, pa), (name_b, pb)) in first
        .named_parameters()
        .iter()
        .zip(second.named_parameters().iter())
    {
        assert_eq!(name_a, name_b);
        assert_eq!(pa.data(), pb.data(), "{name_a} differs between conversions");
    }
}

#[test]
fn layout_changed_slots_reported_as_skipped() {
    // Across backends the interaction linears and product weights change
    // shape; the verifier must surface those pairs as skips, not drop them.
    let config = model_config(InteractionKind::Residual);
    let model = ScaleShiftModel::new(config, Backend::Generic, Some(42)).expect("model");
    let fused = convert(&model, Direction::GenericToFused).expect("conversion");
    let batch = scenario_batch();

    let report = verify_equivalence(&model, &fused, &batch, ToleranceConfig::default())
        .expect("verification runs");

    let shape_skips = report
        .gradients
        .iter()
        .filter(|g| {
            matches!(
                g.result,
                GradientResult::Skipped {
                    reason: SkipReason::ShapeMismatch
                }
            )
        })
        .count();
    assert!(shape_skips > 0, "expected layout-changed pairs:\n{report}");

    // Same-layout slots (embedding, radial MLPs, readouts) stay compared.
    assert!(report.compared_count() >= 1 + 2 * 2 + 3, "report:\n{report}");
    assert!(report.is_equivalent(), "report:\n{report}");
}

#[test]
fn source_model_unchanged_by_conversion() {
    let config = model_config(InteractionKind::Density);
    let model = ScaleShiftModel::new(config, Backend::Generic, Some(42)).expect("model");

    let before: Vec<Vec<f32>> = model
        .named_parameters()
        .iter()
        .map(|(_, p)| p.data().to_vec())
        .collect();
    let _ = convert(&model, Direction::GenericToFused).expect("conversion");
    let after: Vec<Vec<f32>> = model
        .named_parameters()
        .iter()
        .map(|(_, p)| p.data().to_vec())
        .collect();

    assert_eq!(before, after, "conversion must be read-only on the source");
    assert_eq!(model.backend(), Backend::Generic);
}
