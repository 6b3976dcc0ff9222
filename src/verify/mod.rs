//! Equivalence Verifier: forward and backward agreement between two models.
//!
//! A verification run evaluates both models on one batch, compares energies
//! and forces within forward tolerances, then compares gradients of the
//! summed energy for every structurally aligned parameter pair. Parameters
//! are aligned by the models' deterministic traversal order, grouped by
//! module (the first two path segments of each name); pairs whose shapes
//! differ, whose gradients are absent, or that cannot be paired at all are
//! recorded as skipped entries — visible in the report, never silently
//! dropped.
//!
//! Each run is single-shot and stateless: it owns its models' evaluation
//! graphs and clears the autograd tape before returning.

use std::fmt;

use crate::autograd::{self, Tensor};
use crate::data::AtomicBatch;
use crate::error::Result;
use crate::model::ScaleShiftModel;

/// Comparison tolerances.
///
/// A pair of values (a, b) is close when |a − b| ≤ atol + rtol·|b|.
#[derive(Debug, Clone, Copy)]
pub struct ToleranceConfig {
    /// Relative tolerance for energies and forces
    pub forward_rtol: f32,
    /// Absolute tolerance for energies and forces
    pub forward_atol: f32,
    /// Relative tolerance for parameter gradients
    pub grad_rtol: f32,
    /// Absolute tolerance for parameter gradients
    pub grad_atol: f32,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            forward_rtol: 1.3e-6,
            forward_atol: 1e-5,
            grad_rtol: 1e-10,
            grad_atol: 1e-5,
        }
    }
}

/// Result of comparing one forward output tensor pair.
#[derive(Debug, Clone)]
pub struct OutputComparison {
    /// Output name ("energy" or "forces")
    pub name: &'static str,
    /// Maximum absolute element difference
    pub max_abs_diff: f32,
    /// Whether every element is within tolerance
    pub within: bool,
}

/// Why a parameter pair was not compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Shapes differ (layout-changed slot); covered by the round-trip
    /// property instead.
    ShapeMismatch,
    /// The module keys (first two path segments) disagree.
    NameMismatch,
    /// No gradient was recorded for one side.
    MissingGradient,
    /// No counterpart at this position in the other model's traversal.
    Unpaired,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ShapeMismatch => write!(f, "shape mismatch"),
            SkipReason::NameMismatch => write!(f, "name mismatch"),
            SkipReason::MissingGradient => write!(f, "missing gradient"),
            SkipReason::Unpaired => write!(f, "unpaired"),
        }
    }
}

/// Outcome for one aligned parameter pair.
#[derive(Debug, Clone)]
pub enum GradientResult {
    /// Gradients compared element-wise.
    Compared {
        /// Maximum absolute element difference
        max_abs_diff: f32,
        /// Whether every element is within tolerance
        within: bool,
    },
    /// Pair skipped; the reason is part of the report.
    Skipped {
        /// Why the pair was not compared
        reason: SkipReason,
    },
}

/// One entry of the gradient section of a report.
#[derive(Debug, Clone)]
pub struct GradientComparison {
    /// Parameter name in the first model ("-" when unpaired)
    pub name_a: String,
    /// Parameter name in the second model ("-" when unpaired)
    pub name_b: String,
    /// Comparison outcome
    pub result: GradientResult,
}

/// Full verification report.
#[derive(Debug, Clone)]
pub struct EquivalenceReport {
    /// Energy comparison
    pub energy: OutputComparison,
    /// Force comparison
    pub forces: OutputComparison,
    /// Per-pair gradient outcomes in traversal order
    pub gradients: Vec<GradientComparison>,
    /// Tolerances the run used
    pub tolerances: ToleranceConfig,
}

impl EquivalenceReport {
    /// Whether forward outputs and all compared gradients agree.
    ///
    /// Skipped pairs do not fail the report; they are surfaced through
    /// [`EquivalenceReport::skipped_count`] and `Display`.
    #[must_use]
    pub fn is_equivalent(&self) -> bool {
        self.energy.within
            && self.forces.within
            && self.gradients.iter().all(|g| {
                !matches!(
                    g.result,
                    GradientResult::Compared { within: false, .. }
                )
            })
    }

    /// Number of parameter pairs actually compared.
    #[must_use]
    pub fn compared_count(&self) -> usize {
        self.gradients
            .iter()
            .filter(|g| matches!(g.result, GradientResult::Compared { .. }))
            .count()
    }

    /// Number of parameter pairs skipped.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.gradients.len() - self.compared_count()
    }

    /// Maximum gradient error over all compared pairs.
    #[must_use]
    pub fn max_gradient_error(&self) -> f32 {
        self.gradients
            .iter()
            .filter_map(|g| match g.result {
                GradientResult::Compared { max_abs_diff, .. } => Some(max_abs_diff),
                GradientResult::Skipped { .. } => None,
            })
            .fold(0.0, f32::max)
    }
}

impl fmt::Display for EquivalenceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Equivalence Report ===")?;
        writeln!(
            f,
            "energy: max error {:.3e} ({})",
            self.energy.max_abs_diff,
            if self.energy.within { "ok" } else { "FAIL" }
        )?;
        writeln!(
            f,
            "forces: max error {:.3e} ({})",
            self.forces.max_abs_diff,
            if self.forces.within { "ok" } else { "FAIL" }
        )?;
        writeln!(
            f,
            "gradients: {} compared, {} skipped, max error {:.3e}",
            self.compared_count(),
            self.skipped_count(),
            self.max_gradient_error()
        )?;
        for g in &self.gradients {
            match &g.result {
                GradientResult::Compared { max_abs_diff, within } => writeln!(
                    f,
                    "  {} / {}: {:.3e} ({})",
                    g.name_a,
                    g.name_b,
                    max_abs_diff,
                    if *within { "ok" } else { "FAIL" }
                )?,
                GradientResult::Skipped { reason } => {
                    writeln!(f, "  {} / {}: skipped ({reason})", g.name_a, g.name_b)?;
                }
            }
        }
        Ok(())
    }
}

/// Compare two slices with combined absolute/relative tolerance.
fn compare_values(a: &[f32], b: &[f32], atol: f32, rtol: f32) -> (f32, bool) {
    let mut max_abs = 0.0f32;
    let mut within = true;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let diff = (x - y).abs();
        max_abs = max_abs.max(diff);
        if diff > atol + rtol * y.abs() {
            within = false;
        }
    }
    (max_abs, within)
}

/// Module key of a parameter name: its first two path segments.
fn module_key(name: &str) -> String {
    name.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
}

/// Group (name, tensor) pairs by module key, preserving traversal order.
fn group_by_module<'a>(
    params: &[(String, &'a Tensor)],
) -> Vec<(String, Vec<(String, &'a Tensor)>)> {
    let mut groups: Vec<(String, Vec<(String, &'a Tensor)>)> = Vec::new();
    for (name, tensor) in params {
        let key = module_key(name);
        match groups.last_mut() {
            Some((last_key, entries)) if *last_key == key => {
                entries.push((name.clone(), *tensor));
            }
            _ => groups.push((key, vec![(name.clone(), *tensor)])),
        }
    }
    groups
}

/// Verify that two models are numerically equivalent on one batch.
///
/// Evaluates both models (energy + forces from one backward sweep each),
/// compares outputs, aligns parameters module-by-module, and compares the
/// gradients of the summed energy. Clears the autograd tape before
/// returning, whatever the outcome.
///
/// # Errors
///
/// Propagates evaluation failures (invalid batch, species out of range).
/// Numeric disagreement is not an error — it is reported.
pub fn verify_equivalence(
    a: &ScaleShiftModel,
    b: &ScaleShiftModel,
    batch: &AtomicBatch,
    tolerances: ToleranceConfig,
) -> Result<EquivalenceReport> {
    let result = verify_inner(a, b, batch, tolerances);
    autograd::clear_graph();
    result
}

fn verify_inner(
    a: &ScaleShiftModel,
    b: &ScaleShiftModel,
    batch: &AtomicBatch,
    tolerances: ToleranceConfig,
) -> Result<EquivalenceReport> {
    let eval_a = a.evaluate(batch)?;
    let eval_b = b.evaluate(batch)?;

    let (energy_diff, energy_ok) = compare_values(
        eval_a.energy.data(),
        eval_b.energy.data(),
        tolerances.forward_atol,
        tolerances.forward_rtol,
    );
    let (force_diff, force_ok) = compare_values(
        eval_a.forces.data(),
        eval_b.forces.data(),
        tolerances.forward_atol,
        tolerances.forward_rtol,
    );

    let params_a = a.named_parameters();
    let params_b = b.named_parameters();
    let groups_a = group_by_module(&params_a);
    let groups_b = group_by_module(&params_b);

    let mut gradients = Vec::new();
    let group_count = groups_a.len().max(groups_b.len());
    for gi in 0..group_count {
        match (groups_a.get(gi), groups_b.get(gi)) {
            (Some((key_a, entries_a)), Some((key_b, entries_b))) => {
                if key_a != key_b {
                    // Traversals diverged: report every entry rather than
                    // guessing an alignment.
                    for (name, _) in entries_a.iter().chain(entries_b.iter()) {
                        gradients.push(GradientComparison {
                            name_a: name.clone(),
                            name_b: "-".to_string(),
                            result: GradientResult::Skipped {
                                reason: SkipReason::NameMismatch,
                            },
                        });
                    }
                    continue;
                }
                let pair_count = entries_a.len().max(entries_b.len());
                for pi in 0..pair_count {
                    match (entries_a.get(pi), entries_b.get(pi)) {
                        (Some((name_a, pa)), Some((name_b, pb))) => {
                            gradients.push(compare_gradient_pair(
                                name_a, pa, name_b, pb, tolerances,
                            ));
                        }
                        (Some((name_a, _)), None) => gradients.push(GradientComparison {
                            name_a: name_a.clone(),
                            name_b: "-".to_string(),
                            result: GradientResult::Skipped {
                                reason: SkipReason::Unpaired,
                            },
                        }),
                        (None, Some((name_b, _))) => gradients.push(GradientComparison {
                            name_a: "-".to_string(),
                            name_b: name_b.clone(),
                            result: GradientResult::Skipped {
                                reason: SkipReason::Unpaired,
                            },
                        }),
                        (None, None) => {}
                    }
                }
            }
            (Some((_, entries)), None) => {
                for (name, _) in entries {
                    gradients.push(GradientComparison {
                        name_a: name.clone(),
                        name_b: "-".to_string(),
                        result: GradientResult::Skipped {
                            reason: SkipReason::Unpaired,
                        },
                    });
                }
            }
            (None, Some((_, entries))) => {
                for (name, _) in entries {
                    gradients.push(GradientComparison {
                        name_a: "-".to_string(),
                        name_b: name.clone(),
                        result: GradientResult::Skipped {
                            reason: SkipReason::Unpaired,
                        },
                    });
                }
            }
            (None, None) => {}
        }
    }

    Ok(EquivalenceReport {
        energy: OutputComparison {
            name: "energy",
            max_abs_diff: energy_diff,
            within: energy_ok,
        },
        forces: OutputComparison {
            name: "forces",
            max_abs_diff: force_diff,
            within: force_ok,
        },
        gradients,
        tolerances,
    })
}

fn compare_gradient_pair(
    name_a: &str,
    param_a: &Tensor,
    name_b: &str,
    param_b: &Tensor,
    tolerances: ToleranceConfig,
) -> GradientComparison {
    let entry = |result| GradientComparison {
        name_a: name_a.to_string(),
        name_b: name_b.to_string(),
        result,
    };

    if param_a.shape() != param_b.shape() {
        return entry(GradientResult::Skipped {
            reason: SkipReason::ShapeMismatch,
        });
    }

    let (grad_a, grad_b) = match (
        autograd::get_grad(param_a.id()),
        autograd::get_grad(param_b.id()),
    ) {
        (Some(ga), Some(gb)) => (ga, gb),
        _ => {
            return entry(GradientResult::Skipped {
                reason: SkipReason::MissingGradient,
            })
        }
    };

    let (max_abs_diff, within) = compare_values(
        grad_a.data(),
        grad_b.data(),
        tolerances.grad_atol,
        tolerances.grad_rtol,
    );
    entry(GradientResult::Compared {
        max_abs_diff,
        within,
    })
}
