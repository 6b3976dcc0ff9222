//! Structured layers whose weight storage depends on the backend.
//!
//! `BlockWeights` is the shared container: the generic backend keeps one
//! tensor per block, the fused backend keeps a single flat tensor in the
//! fused kernels' layout. `block()` reconstructs block `i` through recorded
//! tape operations, so both layouts feed bit-identical operands to the same
//! kernels and gradients reach whichever storage tensor the model owns.

use crate::autograd::Tensor;
use crate::convert::mapper;
use crate::error::{EquipararError, Result};
use crate::irreps::Irreps;
use crate::model::Backend;
use crate::nn::{init, Linear, Module};

/// Backend-dependent storage of a structured weight.
#[derive(Debug)]
pub enum BlockWeights {
    /// Generic layout: one `[rows, cols]` tensor per block.
    PerBlock(Vec<Tensor>),
    /// Fused layout: blocks transposed, flattened, concatenated.
    Fused(Tensor),
}

impl BlockWeights {
    /// Initialize storage for the given backend, calling `init_block` once
    /// per block in order.
    pub fn init(
        backend: Backend,
        dims: &[(usize, usize)],
        mut init_block: impl FnMut(usize, (usize, usize)) -> Tensor,
    ) -> Self {
        let blocks: Vec<Tensor> = dims
            .iter()
            .enumerate()
            .map(|(i, &d)| init_block(i, d).requires_grad())
            .collect();
        match backend {
            Backend::Generic => BlockWeights::PerBlock(blocks),
            Backend::Fused => BlockWeights::Fused(mapper::fuse(&blocks)),
        }
    }

    /// Backend this storage is laid out for.
    #[must_use]
    pub fn backend(&self) -> Backend {
        match self {
            BlockWeights::PerBlock(_) => Backend::Generic,
            BlockWeights::Fused(_) => Backend::Fused,
        }
    }

    /// Block `i` as a `[rows, cols]` tensor.
    ///
    /// Generic storage hands out the parameter itself (shared identity);
    /// fused storage reconstructs it via slice → view → transpose, recorded
    /// on the tape so gradients reach the flat tensor.
    #[must_use]
    pub fn block(&self, i: usize, dims: &[(usize, usize)]) -> Tensor {
        let (rows, cols) = dims[i];
        match self {
            BlockWeights::PerBlock(blocks) => blocks[i].clone(),
            BlockWeights::Fused(flat) => {
                let offset: usize = dims[..i].iter().map(|&(r, c)| r * c).sum();
                flat.slice_flat(offset, rows * cols)
                    .view(&[cols, rows])
                    .transpose()
            }
        }
    }

    /// The storage tensors, in deterministic order.
    #[must_use]
    pub fn tensors(&self) -> Vec<&Tensor> {
        match self {
            BlockWeights::PerBlock(blocks) => blocks.iter().collect(),
            BlockWeights::Fused(flat) => vec![flat],
        }
    }

    /// Append (name, tensor) pairs under `prefix`.
    ///
    /// Generic blocks are named `{prefix}.weights.{i}`, the fused tensor
    /// `{prefix}.weight`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        match self {
            BlockWeights::PerBlock(blocks) => {
                for (i, block) in blocks.iter().enumerate() {
                    out.push((format!("{prefix}.weights.{i}"), block));
                }
            }
            BlockWeights::Fused(flat) => {
                out.push((format!("{prefix}.weight"), flat));
            }
        }
    }

    /// Total element count across all storage tensors.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.tensors().iter().map(|t| t.numel()).sum()
    }
}

/// Irrep-wise linear layer: an independent channel-mixing matrix per block.
///
/// Input and output layouts must carry the same irrep sequence; block `b`
/// maps the input block's `mul_in` channels to the output block's `mul_out`
/// channels, normalized by 1/√mul_in.
#[derive(Debug)]
pub struct IrrepsLinear {
    irreps_in: Irreps,
    irreps_out: Irreps,
    dims: Vec<(usize, usize)>,
    norms: Vec<f32>,
    weights: BlockWeights,
}

impl IrrepsLinear {
    /// Create a new irrep-wise linear layer.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` if the two layouts don't carry the same irrep
    /// sequence.
    pub fn new(
        irreps_in: &Irreps,
        irreps_out: &Irreps,
        backend: Backend,
        seed: Option<u64>,
    ) -> Result<Self> {
        let in_blocks = irreps_in.blocks();
        let out_blocks = irreps_out.blocks();
        if in_blocks.len() != out_blocks.len()
            || in_blocks
                .iter()
                .zip(out_blocks.iter())
                .any(|(a, b)| a.irrep != b.irrep)
        {
            return Err(EquipararError::ShapeMismatch {
                expected: irreps_in.to_string(),
                actual: irreps_out.to_string(),
            });
        }

        let dims: Vec<(usize, usize)> = in_blocks
            .iter()
            .zip(out_blocks.iter())
            .map(|(a, b)| (a.mul, b.mul))
            .collect();
        let norms: Vec<f32> = dims.iter().map(|&(r, _)| 1.0 / (r as f32).sqrt()).collect();
        let weights = BlockWeights::init(backend, &dims, |i, (r, c)| {
            init::xavier_uniform(&[r, c], r, c, seed.map(|s| s.wrapping_add(i as u64)))
        });

        Ok(Self {
            irreps_in: irreps_in.clone(),
            irreps_out: irreps_out.clone(),
            dims,
            norms,
            weights,
        })
    }

    /// Input layout.
    #[must_use]
    pub fn irreps_in(&self) -> &Irreps {
        &self.irreps_in
    }

    /// Output layout.
    #[must_use]
    pub fn irreps_out(&self) -> &Irreps {
        &self.irreps_out
    }

    /// Per-block `(mul_in, mul_out)` dimensions.
    #[must_use]
    pub fn dims(&self) -> &[(usize, usize)] {
        &self.dims
    }

    /// Weight storage.
    #[must_use]
    pub fn weights(&self) -> &BlockWeights {
        &self.weights
    }

    /// Replace the weight storage (used by the converter).
    pub fn set_weights(&mut self, weights: BlockWeights) {
        self.weights = weights;
    }

    /// Forward pass over a scalar layout: `[n, dim_in]` → `[n, dim_out]`.
    #[must_use]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let slices = self.irreps_in.slices();
        let parts: Vec<Tensor> = (0..self.dims.len())
            .map(|b| {
                let range = &slices[b];
                let xb = x.slice_cols(range.start, range.end - range.start);
                let w = self.weights.block(b, &self.dims);
                xb.matmul(&w).mul_scalar(self.norms[b])
            })
            .collect();
        Tensor::concat_cols(&parts)
    }

    /// Append named parameters under `prefix`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.weights.collect_named(prefix, out);
    }
}

/// Species-dependent linear map (skip connection): one `[ch_in, ch_out]`
/// matrix per element, selected by the node's one-hot species row.
#[derive(Debug)]
pub struct ElementLinear {
    num_elements: usize,
    dims: Vec<(usize, usize)>,
    weights: BlockWeights,
}

impl ElementLinear {
    /// Create a new per-element linear map.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` if `num_elements` is zero.
    pub fn new(
        num_elements: usize,
        ch_in: usize,
        ch_out: usize,
        backend: Backend,
        seed: Option<u64>,
    ) -> Result<Self> {
        if num_elements == 0 {
            return Err(EquipararError::InvalidHyperparameter {
                param: "num_elements".to_string(),
                value: "0".to_string(),
                constraint: ">= 1".to_string(),
            });
        }

        let dims = vec![(ch_in, ch_out); num_elements];
        let weights = BlockWeights::init(backend, &dims, |i, (r, c)| {
            init::xavier_uniform(&[r, c], r, c, seed.map(|s| s.wrapping_add(i as u64)))
        });

        Ok(Self {
            num_elements,
            dims,
            weights,
        })
    }

    /// Per-element `(ch_in, ch_out)` dimensions.
    #[must_use]
    pub fn dims(&self) -> &[(usize, usize)] {
        &self.dims
    }

    /// Weight storage.
    #[must_use]
    pub fn weights(&self) -> &BlockWeights {
        &self.weights
    }

    /// Replace the weight storage (used by the converter).
    pub fn set_weights(&mut self, weights: BlockWeights) {
        self.weights = weights;
    }

    /// Forward pass: `x[i] @ W[species[i]]`, expressed through one-hot
    /// masking so it stays on the tape.
    ///
    /// `one_hot` is the constant `[n, num_elements]` species indicator.
    #[must_use]
    pub fn forward(&self, x: &Tensor, one_hot: &Tensor) -> Tensor {
        let w0 = self.weights.block(0, &self.dims);
        let mut out = x.mul_col(&one_hot.slice_cols(0, 1)).matmul(&w0);
        for e in 1..self.num_elements {
            let w = self.weights.block(e, &self.dims);
            let contrib = x.mul_col(&one_hot.slice_cols(e, 1)).matmul(&w);
            out = out.add(&contrib);
        }
        out
    }

    /// Append named parameters under `prefix`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.weights.collect_named(prefix, out);
    }
}

/// Bias-free multilayer perceptron over radial features, with the gate
/// nonlinearity between layers.
///
/// Weight layout is identical in both backends, so these parameters are
/// compared directly during gradient verification.
#[derive(Debug)]
pub struct RadialMlp {
    layers: Vec<Linear>,
}

impl RadialMlp {
    /// Create an MLP with the given layer widths, e.g. `[8, 64, 32]`.
    ///
    /// # Panics
    ///
    /// Panics if fewer than two widths are given.
    #[must_use]
    pub fn new(widths: &[usize], seed: Option<u64>) -> Self {
        assert!(widths.len() >= 2, "RadialMlp needs at least two widths");
        let layers: Vec<Linear> = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                Linear::without_bias(w[0], w[1], seed.map(|s| s.wrapping_add(i as u64)))
            })
            .collect();
        Self { layers }
    }

    /// Forward pass with SiLU between layers (none after the last).
    #[must_use]
    pub fn forward(&self, x: &Tensor) -> Tensor {
        let mut out = self.layers[0].forward(x);
        for layer in &self.layers[1..] {
            out = layer.forward(&out.silu());
        }
        out
    }

    /// The layers.
    #[must_use]
    pub fn layers(&self) -> &[Linear] {
        &self.layers
    }

    /// Mutable access to the layers (used by the converter).
    pub fn layers_mut(&mut self) -> &mut [Linear] {
        &mut self.layers
    }

    /// Append named parameters under `prefix`.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        for (i, layer) in self.layers.iter().enumerate() {
            out.push((format!("{prefix}.layers.{i}.weight"), layer.weight()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};

    #[test]
    fn test_block_weights_generic_vs_fused_same_values() {
        let dims = [(3, 2), (2, 2)];
        let generic = BlockWeights::init(Backend::Generic, &dims, |i, (r, c)| {
            init::uniform(&[r, c], -1.0, 1.0, Some(10 + i as u64))
        });
        let fused = BlockWeights::init(Backend::Fused, &dims, |i, (r, c)| {
            init::uniform(&[r, c], -1.0, 1.0, Some(10 + i as u64))
        });

        for b in 0..dims.len() {
            let g = generic.block(b, &dims);
            let f = fused.block(b, &dims);
            assert_eq!(g.shape(), f.shape());
            assert_eq!(g.data(), f.data());
        }
        assert_eq!(generic.numel(), fused.numel());
    }

    #[test]
    fn test_block_weights_named() {
        let dims = [(2, 2), (1, 1)];
        let generic = BlockWeights::init(Backend::Generic, &dims, |_, (r, c)| {
            Tensor::zeros(&[r, c])
        });
        let fused =
            BlockWeights::init(Backend::Fused, &dims, |_, (r, c)| Tensor::zeros(&[r, c]));

        let mut names = Vec::new();
        generic.collect_named("linear_up", &mut names);
        assert_eq!(names[0].0, "linear_up.weights.0");
        assert_eq!(names[1].0, "linear_up.weights.1");

        let mut names = Vec::new();
        fused.collect_named("linear_up", &mut names);
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].0, "linear_up.weight");
    }

    #[test]
    fn test_irreps_linear_forward_identical_across_backends() {
        let irreps: Irreps = "4x0e + 2x0e".parse().expect("valid layout");
        let generic = IrrepsLinear::new(&irreps, &irreps, Backend::Generic, Some(3))
            .expect("compatible layouts");
        let fused =
            IrrepsLinear::new(&irreps, &irreps, Backend::Fused, Some(3)).expect("compatible");

        let x = init::uniform(&[5, 6], -1.0, 1.0, Some(99));
        let yg = generic.forward(&x);
        let yf = fused.forward(&x);
        assert_eq!(yg.shape(), &[5, 6]);
        assert_eq!(yg.data(), yf.data(), "backends must agree bit-for-bit");
    }

    #[test]
    fn test_irreps_linear_rejects_incompatible_layouts() {
        let a: Irreps = "4x0e".parse().expect("valid");
        let b: Irreps = "4x1o".parse().expect("valid");
        assert!(IrrepsLinear::new(&a, &b, Backend::Generic, None).is_err());
    }

    #[test]
    fn test_fused_gradient_reaches_flat_tensor() {
        clear_graph();
        let irreps = Irreps::scalars(3);
        let layer =
            IrrepsLinear::new(&irreps, &irreps, Backend::Fused, Some(1)).expect("compatible");
        let x = Tensor::ones(&[2, 3]);
        layer.forward(&x).sum().backward();

        let flat = layer.weights().tensors()[0];
        let grad = get_grad(flat.id()).expect("flat weight gradient");
        assert_eq!(grad.shape(), &[9]);
        assert!(grad.data().iter().any(|&g| g != 0.0));
        clear_graph();
    }

    #[test]
    fn test_element_linear_selects_by_species() {
        let layer = ElementLinear::new(2, 2, 2, Backend::Generic, Some(5)).expect("valid");
        // Node 0 is element 0, node 1 is element 1.
        let one_hot = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]);
        let x = Tensor::new(&[1.0, 0.0, 1.0, 0.0], &[2, 2]);
        let out = layer.forward(&x, &one_hot);

        // Row 0 uses W[0], row 1 uses W[1]: first rows of each weight.
        let w0 = layer.weights().block(0, layer.dims());
        let w1 = layer.weights().block(1, layer.dims());
        assert_eq!(&out.data()[0..2], &w0.data()[0..2]);
        assert_eq!(&out.data()[2..4], &w1.data()[0..2]);
    }

    #[test]
    fn test_radial_mlp_shapes_and_names() {
        let mlp = RadialMlp::new(&[8, 16, 4], Some(2));
        let x = Tensor::ones(&[3, 8]);
        assert_eq!(mlp.forward(&x).shape(), &[3, 4]);

        let mut names = Vec::new();
        mlp.collect_named("radial_mlp", &mut names);
        assert_eq!(names.len(), 2);
        assert_eq!(names[0].0, "radial_mlp.layers.0.weight");
        assert_eq!(names[1].0, "radial_mlp.layers.1.weight");
    }
}
