//! Interaction blocks: radially weighted message passing between atoms.

use crate::autograd::Tensor;
use crate::error::Result;
use crate::irreps::Irreps;
use crate::model::layers::{ElementLinear, IrrepsLinear, RadialMlp};
use crate::model::{Backend, BlockRole, InteractionKind};

/// Output of an interaction block.
#[derive(Debug)]
pub struct InteractionOutput {
    /// Aggregated, transformed messages `[n, channels]`.
    pub message: Tensor,
    /// Species-dependent skip term handed to the product block, when the
    /// variant does not consume it internally.
    pub skip: Option<Tensor>,
}

/// One interaction block of the module graph.
///
/// All three variants share the message path
/// `linear_up → per-edge radial weighting → scatter aggregation →
/// linear_down` plus a per-species skip map; they differ in how the
/// aggregate is normalized and where the skip term is consumed.
#[derive(Debug)]
pub struct InteractionBlock {
    kind: InteractionKind,
    role: BlockRole,
    linear_up: IrrepsLinear,
    radial_mlp: RadialMlp,
    density_mlp: Option<RadialMlp>,
    skip: ElementLinear,
    linear_down: IrrepsLinear,
    avg_num_neighbors: f32,
}

impl InteractionBlock {
    /// Construct a block.
    ///
    /// `num_radial` is the radial feature count, `radial_mlp_dim` the radial
    /// MLP's hidden width. The density MLP exists only for
    /// [`InteractionKind::Density`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: InteractionKind,
        role: BlockRole,
        irreps: &Irreps,
        num_elements: usize,
        num_radial: usize,
        radial_mlp_dim: usize,
        avg_num_neighbors: f32,
        backend: Backend,
        seed: Option<u64>,
    ) -> Result<Self> {
        let channels = irreps.dim();
        let sub_seed = |k: u64| seed.map(|s| s.wrapping_mul(31).wrapping_add(k));

        let density_mlp = match kind {
            InteractionKind::Density => Some(RadialMlp::new(
                &[num_radial, radial_mlp_dim, 1],
                sub_seed(4),
            )),
            InteractionKind::Standard | InteractionKind::Residual => None,
        };

        Ok(Self {
            kind,
            role,
            linear_up: IrrepsLinear::new(irreps, irreps, backend, sub_seed(0))?,
            radial_mlp: RadialMlp::new(&[num_radial, radial_mlp_dim, channels], sub_seed(1)),
            density_mlp,
            skip: ElementLinear::new(num_elements, channels, channels, backend, sub_seed(2))?,
            linear_down: IrrepsLinear::new(irreps, irreps, backend, sub_seed(3))?,
            avg_num_neighbors,
        })
    }

    /// Block variant tag.
    #[must_use]
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    /// Block position role.
    #[must_use]
    pub fn role(&self) -> BlockRole {
        self.role
    }

    /// Forward pass.
    ///
    /// * `h` — node features `[n, channels]`
    /// * `one_hot` — constant species indicator `[n, num_elements]`
    /// * `radial` — radial edge features `[e, num_radial]`
    /// * `edge_src` / `edge_dst` — sender and receiver per directed edge
    #[must_use]
    pub fn forward(
        &self,
        h: &Tensor,
        one_hot: &Tensor,
        radial: &Tensor,
        edge_src: &[usize],
        edge_dst: &[usize],
    ) -> InteractionOutput {
        let num_nodes = h.shape()[0];

        let x = self.linear_up.forward(h);
        let edge_weights = self.radial_mlp.forward(radial);
        let messages = x.gather_rows(edge_src).mul(&edge_weights);
        let mut agg = messages
            .scatter_sum(edge_dst, num_nodes)
            .mul_scalar(1.0 / self.avg_num_neighbors);

        if let Some(density_mlp) = &self.density_mlp {
            // Learned edge-density estimate, squared to keep it non-negative;
            // the aggregate is normalized by 1 + d.
            let edge_density = density_mlp.forward(radial).pow(2.0);
            let density = edge_density.scatter_sum(edge_dst, num_nodes);
            agg = agg.mul_col(&density.add_scalar(1.0).pow(-1.0));
        }

        let out = self.linear_down.forward(&agg);
        let sc = self.skip.forward(h, one_hot);

        match self.kind {
            InteractionKind::Residual => InteractionOutput {
                message: out.add(&sc),
                skip: None,
            },
            InteractionKind::Standard | InteractionKind::Density => InteractionOutput {
                message: out,
                skip: Some(sc),
            },
        }
    }

    /// Up-projection layer.
    #[must_use]
    pub fn linear_up(&self) -> &IrrepsLinear {
        &self.linear_up
    }

    /// Mutable up-projection (used by the converter).
    pub fn linear_up_mut(&mut self) -> &mut IrrepsLinear {
        &mut self.linear_up
    }

    /// Radial MLP.
    #[must_use]
    pub fn radial_mlp(&self) -> &RadialMlp {
        &self.radial_mlp
    }

    /// Mutable radial MLP (used by the converter).
    pub fn radial_mlp_mut(&mut self) -> &mut RadialMlp {
        &mut self.radial_mlp
    }

    /// Density MLP, present only for the density variant.
    #[must_use]
    pub fn density_mlp(&self) -> Option<&RadialMlp> {
        self.density_mlp.as_ref()
    }

    /// Mutable density MLP (used by the converter).
    pub fn density_mlp_mut(&mut self) -> Option<&mut RadialMlp> {
        self.density_mlp.as_mut()
    }

    /// Per-species skip map.
    #[must_use]
    pub fn skip(&self) -> &ElementLinear {
        &self.skip
    }

    /// Mutable skip map (used by the converter).
    pub fn skip_mut(&mut self) -> &mut ElementLinear {
        &mut self.skip
    }

    /// Down-projection layer.
    #[must_use]
    pub fn linear_down(&self) -> &IrrepsLinear {
        &self.linear_down
    }

    /// Mutable down-projection (used by the converter).
    pub fn linear_down_mut(&mut self) -> &mut IrrepsLinear {
        &mut self.linear_down
    }

    /// Append named parameters under `prefix`, in deterministic traversal
    /// order: linear_up, radial_mlp, density_mlp, skip, linear_down.
    pub fn collect_named<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a Tensor)>) {
        self.linear_up
            .collect_named(&format!("{prefix}.linear_up"), out);
        self.radial_mlp
            .collect_named(&format!("{prefix}.radial_mlp"), out);
        if let Some(density_mlp) = &self.density_mlp {
            density_mlp.collect_named(&format!("{prefix}.density_mlp"), out);
        }
        self.skip.collect_named(&format!("{prefix}.skip"), out);
        self.linear_down
            .collect_named(&format!("{prefix}.linear_down"), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(kind: InteractionKind, backend: Backend) -> InteractionBlock {
        InteractionBlock::new(
            kind,
            BlockRole::First,
            &Irreps::scalars(4),
            1,
            8,
            16,
            8.0,
            backend,
            Some(42),
        )
        .expect("valid block")
    }

    fn toy_inputs() -> (Tensor, Tensor, Tensor, Vec<usize>, Vec<usize>) {
        let h = Tensor::new(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8], &[2, 4]);
        let one_hot = Tensor::new(&[1.0, 1.0], &[2, 1]);
        let radial = Tensor::new(&[0.5; 2 * 8], &[2, 8]);
        (h, one_hot, radial, vec![0, 1], vec![1, 0])
    }

    #[test]
    fn test_standard_returns_skip() {
        let block = build(InteractionKind::Standard, Backend::Generic);
        let (h, one_hot, radial, src, dst) = toy_inputs();
        let out = block.forward(&h, &one_hot, &radial, &src, &dst);
        assert_eq!(out.message.shape(), &[2, 4]);
        assert!(out.skip.is_some());
    }

    #[test]
    fn test_residual_consumes_skip() {
        let block = build(InteractionKind::Residual, Backend::Generic);
        let (h, one_hot, radial, src, dst) = toy_inputs();
        let out = block.forward(&h, &one_hot, &radial, &src, &dst);
        assert!(out.skip.is_none());
    }

    #[test]
    fn test_density_has_density_mlp() {
        let block = build(InteractionKind::Density, Backend::Generic);
        assert!(block.density_mlp().is_some());
        assert!(build(InteractionKind::Standard, Backend::Generic)
            .density_mlp()
            .is_none());

        let (h, one_hot, radial, src, dst) = toy_inputs();
        let out = block.forward(&h, &one_hot, &radial, &src, &dst);
        assert_eq!(out.message.shape(), &[2, 4]);
    }

    #[test]
    fn test_backends_agree_bitwise() {
        for kind in [
            InteractionKind::Standard,
            InteractionKind::Residual,
            InteractionKind::Density,
        ] {
            let generic = build(kind, Backend::Generic);
            let fused = build(kind, Backend::Fused);
            let (h, one_hot, radial, src, dst) = toy_inputs();

            let out_g = generic.forward(&h, &one_hot, &radial, &src, &dst);
            let out_f = fused.forward(&h, &one_hot, &radial, &src, &dst);
            assert_eq!(out_g.message.data(), out_f.message.data());
        }
    }

    #[test]
    fn test_named_parameter_order() {
        let block = build(InteractionKind::Density, Backend::Generic);
        let mut names = Vec::new();
        block.collect_named("interactions.0", &mut names);

        let names: Vec<&str> = names.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "interactions.0.linear_up.weights.0",
                "interactions.0.radial_mlp.layers.0.weight",
                "interactions.0.radial_mlp.layers.1.weight",
                "interactions.0.density_mlp.layers.0.weight",
                "interactions.0.density_mlp.layers.1.weight",
                "interactions.0.skip.weights.0",
                "interactions.0.linear_down.weights.0",
            ]
        );
    }
}
