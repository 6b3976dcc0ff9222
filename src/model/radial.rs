//! Radial embedding: Bessel basis modulated by a polynomial cutoff envelope.
//!
//! Both operations are differentiable with analytic adjoints so forces flow
//! through edge lengths back to positions.
//!
//! # References
//!
//! - Klicpera, J., et al. (2020). Directional Message Passing for Molecular
//!   Graphs. ICLR. (Bessel radial basis, polynomial envelope)

use std::sync::Arc;

use crate::autograd::grad_fn::GradFn;
use crate::autograd::{is_grad_enabled, with_graph, Tensor};
use crate::model::RadialBasisKind;

/// Parameter-free radial embedding of edge lengths.
///
/// Maps `[num_edges, 1]` lengths to `[num_edges, num_bessel]` features:
/// basis values multiplied column-wise by the smooth cutoff envelope.
#[derive(Debug, Clone)]
pub struct RadialEmbedding {
    kind: RadialBasisKind,
    num_bessel: usize,
    poly_degree: usize,
    r_max: f32,
}

impl RadialEmbedding {
    /// Create a radial embedding.
    #[must_use]
    pub fn new(kind: RadialBasisKind, num_bessel: usize, poly_degree: usize, r_max: f32) -> Self {
        Self {
            kind,
            num_bessel,
            poly_degree,
            r_max,
        }
    }

    /// Number of output features.
    #[must_use]
    pub fn out_dim(&self) -> usize {
        self.num_bessel
    }

    /// Embed edge lengths `[e, 1]` into `[e, num_bessel]`.
    #[must_use]
    pub fn forward(&self, lengths: &Tensor) -> Tensor {
        let basis = match self.kind {
            RadialBasisKind::Bessel => bessel_basis(lengths, self.num_bessel, self.r_max),
        };
        let envelope = polynomial_cutoff(lengths, self.poly_degree, self.r_max);
        basis.mul_col(&envelope)
    }
}

/// Bessel radial basis: e_n(r) = sqrt(2/r_max) · sin(nπr/r_max) / r.
///
/// Input `[e, 1]`, output `[e, num]`. Lengths must be positive.
#[must_use]
pub fn bessel_basis(lengths: &Tensor, num: usize, r_max: f32) -> Tensor {
    assert_eq!(lengths.ndim(), 2, "bessel_basis expects [e, 1] lengths");
    assert_eq!(lengths.shape()[1], 1, "bessel_basis expects [e, 1] lengths");

    let e = lengths.shape()[0];
    let prefactor = (2.0 / r_max).sqrt();
    let mut data = vec![0.0; e * num];
    for (i, &r) in lengths.data().iter().enumerate() {
        for n in 0..num {
            let k = (n + 1) as f32 * std::f32::consts::PI / r_max;
            data[i * num + n] = prefactor * (k * r).sin() / r;
        }
    }

    let mut result = Tensor::new(&data, &[e, num]);
    if is_grad_enabled() && lengths.requires_grad_enabled() {
        result.requires_grad_(true);
        let grad_fn = Arc::new(BesselBackward {
            lengths: lengths.clone(),
            num,
            r_max,
        });
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register_tensor(lengths.clone());
            graph.record(result.id(), grad_fn, vec![lengths.id()]);
        });
    }
    result
}

struct BesselBackward {
    lengths: Tensor,
    num: usize,
    r_max: f32,
}

impl GradFn for BesselBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let e = self.lengths.shape()[0];
        let prefactor = (2.0 / self.r_max).sqrt();
        let mut grad = vec![0.0; e];
        for (i, &r) in self.lengths.data().iter().enumerate() {
            let mut acc = 0.0;
            for n in 0..self.num {
                let k = (n + 1) as f32 * std::f32::consts::PI / self.r_max;
                // d/dr [sin(kr)/r] = (kr·cos(kr) − sin(kr)) / r²
                let d = (k * r * (k * r).cos() - (k * r).sin()) / (r * r);
                acc += grad_output.data()[i * self.num + n] * prefactor * d;
            }
            grad[i] = acc;
        }
        vec![Tensor::new(&grad, &[e, 1])]
    }

    fn name(&self) -> &'static str {
        "BesselBackward"
    }
}

/// Polynomial cutoff envelope of degree `p`.
///
/// With u = r/r_max and u < 1:
/// f(u) = 1 − (p+1)(p+2)/2 · u^p + p(p+2) · u^(p+1) − p(p+1)/2 · u^(p+2),
/// and f = 0 for u ≥ 1. Smoothly decays to zero with p vanishing
/// derivatives at the cutoff.
///
/// Input `[e, 1]`, output `[e, 1]`.
#[must_use]
pub fn polynomial_cutoff(lengths: &Tensor, p: usize, r_max: f32) -> Tensor {
    assert_eq!(lengths.ndim(), 2, "polynomial_cutoff expects [e, 1] lengths");
    assert_eq!(lengths.shape()[1], 1, "polynomial_cutoff expects [e, 1] lengths");

    let e = lengths.shape()[0];
    let pf = p as f32;
    let data: Vec<f32> = lengths
        .data()
        .iter()
        .map(|&r| {
            let u = r / r_max;
            if u >= 1.0 {
                0.0
            } else {
                1.0 - (pf + 1.0) * (pf + 2.0) / 2.0 * u.powf(pf)
                    + pf * (pf + 2.0) * u.powf(pf + 1.0)
                    - pf * (pf + 1.0) / 2.0 * u.powf(pf + 2.0)
            }
        })
        .collect();

    let mut result = Tensor::new(&data, &[e, 1]);
    if is_grad_enabled() && lengths.requires_grad_enabled() {
        result.requires_grad_(true);
        let grad_fn = Arc::new(PolynomialCutoffBackward {
            lengths: lengths.clone(),
            p,
            r_max,
        });
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register_tensor(lengths.clone());
            graph.record(result.id(), grad_fn, vec![lengths.id()]);
        });
    }
    result
}

struct PolynomialCutoffBackward {
    lengths: Tensor,
    p: usize,
    r_max: f32,
}

impl GradFn for PolynomialCutoffBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let e = self.lengths.shape()[0];
        let pf = self.p as f32;
        let mut grad = vec![0.0; e];
        for (i, &r) in self.lengths.data().iter().enumerate() {
            let u = r / self.r_max;
            let df = if u >= 1.0 {
                0.0
            } else {
                (-(pf + 1.0) * (pf + 2.0) / 2.0 * pf * u.powf(pf - 1.0)
                    + pf * (pf + 2.0) * (pf + 1.0) * u.powf(pf)
                    - pf * (pf + 1.0) / 2.0 * (pf + 2.0) * u.powf(pf + 1.0))
                    / self.r_max
            };
            grad[i] = grad_output.data()[i] * df;
        }
        vec![Tensor::new(&grad, &[e, 1])]
    }

    fn name(&self) -> &'static str {
        "PolynomialCutoffBackward"
    }
}
