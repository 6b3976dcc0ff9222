//! The assembled scale/shift energy model.

use crate::autograd::{self, Tensor};
use crate::data::AtomicBatch;
use crate::error::{EquipararError, Result};
use crate::model::{
    Backend, ElementEmbedding, InteractionBlock, ModelConfig, ProductBlock, RadialEmbedding,
    Readout,
};
use crate::model::readout::{GatedReadout, LinearReadout};

/// Forward-evaluation result: per-graph energies and per-atom forces.
#[derive(Debug)]
pub struct Evaluation {
    /// Total energy per graph, shape `[num_graphs]`.
    pub energy: Tensor,
    /// Forces (negative position gradient), shape `[num_atoms, 3]`.
    pub forces: Tensor,
}

/// Atomistic energy model with scale/shift output wrapping.
///
/// The module graph is fixed at construction from a [`ModelConfig`] and a
/// [`Backend`] tag; the tag selects the storage layout of every structured
/// weight but not the arithmetic. `evaluate` runs one forward pass and one
/// backward sweep, so forces and parameter gradients (readable through
/// [`crate::autograd::get_grad`] until the graph is cleared) come from the
/// same tape.
#[derive(Debug)]
pub struct ScaleShiftModel {
    backend: Backend,
    config: ModelConfig,
    node_embedding: ElementEmbedding,
    radial_embedding: RadialEmbedding,
    interactions: Vec<InteractionBlock>,
    products: Vec<ProductBlock>,
    readouts: Vec<Readout>,
    /// Per-element reference energies `[num_elements, 1]`; non-learnable.
    atomic_energies: Tensor,
}

impl ScaleShiftModel {
    /// Build a model in the given backend's layout.
    ///
    /// A seeded call is bit-reproducible; the converter rebuilds skeletons
    /// with a fixed seed and overwrites every parameter afterwards.
    ///
    /// # Errors
    ///
    /// Returns `InvalidHyperparameter` if the configuration is inconsistent.
    pub fn new(config: ModelConfig, backend: Backend, seed: Option<u64>) -> Result<Self> {
        config.validate()?;

        let channels = config.hidden_irreps.dim();
        let sub_seed = |k: u64| seed.map(|s| s.wrapping_add(k.wrapping_mul(0x9E37_79B9)));

        let node_embedding = ElementEmbedding::new(config.num_elements, channels, sub_seed(1));
        let radial_embedding = RadialEmbedding::new(
            config.radial_basis,
            config.num_bessel,
            config.num_polynomial_cutoff,
            config.r_max,
        );

        let mut interactions = Vec::with_capacity(config.num_interactions);
        let mut products = Vec::with_capacity(config.num_interactions);
        let mut readouts = Vec::with_capacity(config.num_interactions);
        for t in 0..config.num_interactions {
            interactions.push(InteractionBlock::new(
                config.interaction_kind(t),
                config.block_role(t),
                &config.hidden_irreps,
                config.num_elements,
                config.num_bessel,
                config.radial_mlp_dim,
                config.avg_num_neighbors,
                backend,
                sub_seed(10 + t as u64),
            )?);
            products.push(ProductBlock::new(
                config.correlation,
                config.num_elements,
                channels,
                backend,
                sub_seed(100 + t as u64),
            )?);
            readouts.push(if t + 1 == config.num_interactions {
                Readout::Gated(GatedReadout::new(
                    channels,
                    config.mlp_irreps.dim(),
                    config.gate,
                    sub_seed(200 + t as u64),
                ))
            } else {
                Readout::Linear(LinearReadout::new(channels, sub_seed(200 + t as u64)))
            });
        }

        let mut energies = Vec::with_capacity(config.num_elements);
        energies.extend_from_slice(&config.atomic_energies);
        let atomic_energies = Tensor::new(&energies, &[config.num_elements, 1]);

        Ok(Self {
            backend,
            config,
            node_embedding,
            radial_embedding,
            interactions,
            products,
            readouts,
            atomic_energies,
        })
    }

    /// Backend tag.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Model configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Interaction blocks in sequence order.
    #[must_use]
    pub fn interactions(&self) -> &[InteractionBlock] {
        &self.interactions
    }

    pub(crate) fn interactions_mut(&mut self) -> &mut [InteractionBlock] {
        &mut self.interactions
    }

    /// Product blocks in sequence order.
    #[must_use]
    pub fn products(&self) -> &[ProductBlock] {
        &self.products
    }

    pub(crate) fn products_mut(&mut self) -> &mut [ProductBlock] {
        &mut self.products
    }

    /// Readout heads in sequence order.
    #[must_use]
    pub fn readouts(&self) -> &[Readout] {
        &self.readouts
    }

    pub(crate) fn readouts_mut(&mut self) -> &mut [Readout] {
        &mut self.readouts
    }

    /// Element embedding.
    #[must_use]
    pub fn node_embedding(&self) -> &ElementEmbedding {
        &self.node_embedding
    }

    pub(crate) fn node_embedding_mut(&mut self) -> &mut ElementEmbedding {
        &mut self.node_embedding
    }

    /// Named parameters in deterministic traversal order: embedding →
    /// interactions in sequence → products → readouts.
    ///
    /// The traversal order, not the names, is what aligns parameters across
    /// backends; names identify module subtrees for reporting and guards.
    #[must_use]
    pub fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = Vec::new();
        self.node_embedding.collect_named("node_embedding", &mut out);
        for (t, block) in self.interactions.iter().enumerate() {
            block.collect_named(&format!("interactions.{t}"), &mut out);
        }
        for (t, block) in self.products.iter().enumerate() {
            block.collect_named(&format!("products.{t}"), &mut out);
        }
        for (t, readout) in self.readouts.iter().enumerate() {
            readout.collect_named(&format!("readouts.{t}"), &mut out);
        }
        out
    }

    /// Total learnable scalar count.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.numel()).sum()
    }

    /// One-hot species indicator `[n, num_elements]` for a batch.
    fn one_hot(&self, batch: &AtomicBatch) -> Result<Tensor> {
        let n = batch.num_atoms();
        let ne = self.config.num_elements;
        let mut data = vec![0.0; n * ne];
        for (i, &s) in batch.species.iter().enumerate() {
            if s >= ne {
                return Err(EquipararError::InvalidHyperparameter {
                    param: "species".to_string(),
                    value: s.to_string(),
                    constraint: format!("< {ne}"),
                });
            }
            data[i * ne + s] = 1.0;
        }
        Ok(Tensor::new(&data, &[n, ne]))
    }

    /// Evaluate energy and forces on a batch.
    ///
    /// Runs the forward graph, then one backward sweep from the summed
    /// energy. Parameter gradients stay retrievable through
    /// [`crate::autograd::get_grad`] until [`crate::autograd::clear_graph`]
    /// is called; the caller owns that cleanup.
    ///
    /// # Errors
    ///
    /// Fails on an empty batch, a batch with no edges inside the cutoff, or
    /// species outside the model's element table.
    pub fn evaluate(&self, batch: &AtomicBatch) -> Result<Evaluation> {
        let n = batch.num_atoms();
        if n == 0 {
            return Err(EquipararError::Other("cannot evaluate an empty batch".to_string()));
        }
        if batch.num_edges() == 0 {
            return Err(EquipararError::Other(
                "batch has no edges within the cutoff radius".to_string(),
            ));
        }

        let one_hot = self.one_hot(batch)?;
        let positions = Tensor::new(&batch.positions, &[n, 3]).requires_grad();

        // Edge geometry; lengths stay on the tape so forces flow back.
        let src_pos = positions.gather_rows(&batch.edge_src);
        let dst_pos = positions.gather_rows(&batch.edge_dst);
        let lengths = dst_pos.sub(&src_pos).row_norm();
        let radial = self.radial_embedding.forward(&lengths);

        let mut h = self.node_embedding.forward(&one_hot);
        let mut node_energy: Option<Tensor> = None;
        for t in 0..self.interactions.len() {
            let interacted = self.interactions[t].forward(
                &h,
                &one_hot,
                &radial,
                &batch.edge_src,
                &batch.edge_dst,
            );
            let features =
                self.products[t].forward(&interacted.message, interacted.skip.as_ref(), &one_hot);
            let e_t = self.readouts[t].forward(&features);
            node_energy = Some(match node_energy {
                None => e_t,
                Some(acc) => acc.add(&e_t),
            });
            h = features;
        }
        let node_energy = match node_energy {
            Some(e) => e,
            None => return Err(EquipararError::Other("model has no interactions".to_string())),
        };

        let interaction_energy = node_energy
            .mul_scalar(self.config.atomic_inter_scale)
            .add_scalar(self.config.atomic_inter_shift);
        let reference_energy = one_hot.matmul(&self.atomic_energies);
        let per_node = interaction_energy.add(&reference_energy);
        let per_graph = per_node.scatter_sum(&batch.graph_index, batch.num_graphs);

        let total = per_graph.sum();
        total.backward();

        let forces = match autograd::get_grad(positions.id()) {
            Some(grad) => {
                let negated: Vec<f32> = grad.data().iter().map(|&g| -g).collect();
                Tensor::new(&negated, &[n, 3])
            }
            None => {
                return Err(EquipararError::Other(
                    "position gradient unavailable; was gradient tracking disabled?".to_string(),
                ))
            }
        };

        Ok(Evaluation {
            energy: Tensor::new(per_graph.data(), &[batch.num_graphs]),
            forces,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::clear_graph;
    use crate::data::{diamond_cubic, AtomicBatch};
    use crate::model::test_config;

    fn small_batch() -> AtomicBatch {
        let mut cell = diamond_cubic(3.567, [1, 1, 1], 0);
        cell.displace_uniform(0.1, 42);
        AtomicBatch::from_structures(&[cell], 5.0).expect("valid batch")
    }

    #[test]
    fn test_evaluate_shapes() {
        clear_graph();
        let model =
            ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model");
        let batch = small_batch();
        let eval = model.evaluate(&batch).expect("evaluation succeeds");

        assert_eq!(eval.energy.shape(), &[1]);
        assert_eq!(eval.forces.shape(), &[8, 3]);
        assert!(eval.energy.data()[0].is_finite());
        assert!(eval.forces.data().iter().all(|f| f.is_finite()));
        clear_graph();
    }

    #[test]
    fn test_evaluate_deterministic() {
        clear_graph();
        let model =
            ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model");
        let batch = small_batch();

        let a = model.evaluate(&batch).expect("first evaluation");
        clear_graph();
        let b = model.evaluate(&batch).expect("second evaluation");
        clear_graph();

        assert_eq!(a.energy.data(), b.energy.data());
        assert_eq!(a.forces.data(), b.forces.data());
    }

    #[test]
    fn test_seeded_models_identical() {
        let a = ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("model a");
        let b = ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("model b");

        for ((name_a, pa), (name_b, pb)) in
            a.named_parameters().iter().zip(b.named_parameters().iter())
        {
            assert_eq!(name_a, name_b);
            assert_eq!(pa.data(), pb.data());
        }
    }

    #[test]
    fn test_named_parameters_deterministic_order() {
        let model =
            ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model");
        let names: Vec<String> = model
            .named_parameters()
            .iter()
            .map(|(n, _)| n.clone())
            .collect();

        assert_eq!(names[0], "node_embedding.weight");
        assert!(names.iter().any(|n| n.starts_with("interactions.0.")));
        assert!(names.iter().any(|n| n.starts_with("interactions.1.")));
        assert!(names.iter().any(|n| n.starts_with("products.")));
        assert!(names.last().expect("nonempty").starts_with("readouts.1.mlp"));

        // Interactions come before products, products before readouts.
        let first_product = names.iter().position(|n| n.starts_with("products.")).expect("products");
        let last_interaction = names
            .iter()
            .rposition(|n| n.starts_with("interactions."))
            .expect("interactions");
        assert!(last_interaction < first_product);
    }

    #[test]
    fn test_forces_sum_near_zero() {
        // Translation invariance: the model sees only relative positions, so
        // internal forces must sum to (numerically) zero.
        clear_graph();
        let model =
            ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model");
        let batch = small_batch();
        let eval = model.evaluate(&batch).expect("evaluation succeeds");
        clear_graph();

        for k in 0..3 {
            let total: f32 = eval
                .forces
                .data()
                .iter()
                .skip(k)
                .step_by(3)
                .sum();
            assert!(total.abs() < 1e-3, "net force component {k} = {total}");
        }
    }

    #[test]
    fn test_empty_batch_rejected() {
        let model =
            ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model");
        let empty = AtomicBatch {
            positions: vec![],
            species: vec![],
            edge_src: vec![],
            edge_dst: vec![],
            graph_index: vec![],
            num_graphs: 0,
        };
        assert!(model.evaluate(&empty).is_err());
    }

    #[test]
    fn test_species_out_of_range_rejected() {
        let model =
            ScaleShiftModel::new(test_config(), Backend::Generic, Some(42)).expect("valid model");
        let mut cell = diamond_cubic(3.567, [1, 1, 1], 0);
        cell.species[3] = 5;
        let batch = AtomicBatch::from_structures(&[cell], 5.0).expect("valid batch");
        assert!(model.evaluate(&batch).is_err());
    }
}
