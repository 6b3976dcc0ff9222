//! Atomic graph batches for model evaluation.
//!
//! Nodes are atoms, edges are directed neighbor pairs within a cutoff
//! radius. Batches carry flat positions, per-node species indices, COO edge
//! connectivity, and per-node graph membership, mirroring the layout the
//! model's gather/scatter message passing consumes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{EquipararError, Result};

/// Ordered table of atomic numbers handled by a model.
///
/// Species indices used throughout the crate are positions in this table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicNumberTable {
    zs: Vec<u32>,
}

impl AtomicNumberTable {
    /// Build from atomic numbers; sorted and deduplicated.
    #[must_use]
    pub fn new(mut zs: Vec<u32>) -> Self {
        zs.sort_unstable();
        zs.dedup();
        Self { zs }
    }

    /// The atomic numbers in table order.
    #[must_use]
    pub fn zs(&self) -> &[u32] {
        &self.zs
    }

    /// Number of distinct elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.zs.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zs.is_empty()
    }

    /// Species index of an atomic number.
    pub fn index_of(&self, z: u32) -> Result<usize> {
        self.zs
            .binary_search(&z)
            .map_err(|_| EquipararError::InvalidHyperparameter {
                param: "atomic_number".to_string(),
                value: z.to_string(),
                constraint: format!("one of {:?}", self.zs),
            })
    }
}

/// A single molecular/crystalline structure: positions plus species indices.
#[derive(Debug, Clone)]
pub struct Structure {
    /// Cartesian positions, one `[x, y, z]` per atom
    pub positions: Vec<[f32; 3]>,
    /// Species index per atom (into an `AtomicNumberTable`)
    pub species: Vec<usize>,
}

impl Structure {
    /// Number of atoms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the structure holds no atoms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Add a seeded uniform random displacement in [-amplitude, amplitude]
    /// to every coordinate.
    pub fn displace_uniform(&mut self, amplitude: f32, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for pos in &mut self.positions {
            for coord in pos.iter_mut() {
                *coord += rng.gen_range(-amplitude..amplitude);
            }
        }
    }
}

/// Diamond-cubic conventional cell of a single element, repeated along the
/// three axes.
///
/// The 8-atom conventional cell uses the standard fractional basis; the
/// repeated supercell is returned as an open cluster (no periodic images).
#[must_use]
pub fn diamond_cubic(lattice_constant: f32, repeats: [usize; 3], species: usize) -> Structure {
    const BASIS: [[f32; 3]; 8] = [
        [0.0, 0.0, 0.0],
        [0.0, 0.5, 0.5],
        [0.5, 0.0, 0.5],
        [0.5, 0.5, 0.0],
        [0.25, 0.25, 0.25],
        [0.25, 0.75, 0.75],
        [0.75, 0.25, 0.75],
        [0.75, 0.75, 0.25],
    ];

    let mut positions = Vec::with_capacity(8 * repeats[0] * repeats[1] * repeats[2]);
    for rx in 0..repeats[0] {
        for ry in 0..repeats[1] {
            for rz in 0..repeats[2] {
                for frac in &BASIS {
                    positions.push([
                        (rx as f32 + frac[0]) * lattice_constant,
                        (ry as f32 + frac[1]) * lattice_constant,
                        (rz as f32 + frac[2]) * lattice_constant,
                    ]);
                }
            }
        }
    }

    let species = vec![species; positions.len()];
    Structure { positions, species }
}

/// A batch of structures flattened into one graph collection.
#[derive(Debug, Clone)]
pub struct AtomicBatch {
    /// Flat positions, length 3n
    pub positions: Vec<f32>,
    /// Species index per atom
    pub species: Vec<usize>,
    /// Edge sender (source atom) per directed edge
    pub edge_src: Vec<usize>,
    /// Edge receiver (target atom) per directed edge
    pub edge_dst: Vec<usize>,
    /// Graph membership per atom
    pub graph_index: Vec<usize>,
    /// Number of graphs in the batch
    pub num_graphs: usize,
}

impl AtomicBatch {
    /// Build a batch from structures, connecting every ordered pair of
    /// distinct atoms within `cutoff` of each other (brute force O(n²) per
    /// structure).
    pub fn from_structures(structures: &[Structure], cutoff: f32) -> Result<Self> {
        if cutoff <= 0.0 {
            return Err(EquipararError::InvalidHyperparameter {
                param: "cutoff".to_string(),
                value: cutoff.to_string(),
                constraint: "> 0".to_string(),
            });
        }

        let mut positions = Vec::new();
        let mut species = Vec::new();
        let mut edge_src = Vec::new();
        let mut edge_dst = Vec::new();
        let mut graph_index = Vec::new();

        let cutoff_sq = cutoff * cutoff;
        let mut offset = 0;
        for (g, structure) in structures.iter().enumerate() {
            let n = structure.len();
            for i in 0..n {
                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    let a = structure.positions[i];
                    let b = structure.positions[j];
                    let d2 = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2);
                    if d2 < cutoff_sq {
                        edge_src.push(offset + i);
                        edge_dst.push(offset + j);
                    }
                }
            }
            for i in 0..n {
                positions.extend_from_slice(&structure.positions[i]);
                species.push(structure.species[i]);
                graph_index.push(g);
            }
            offset += n;
        }

        Ok(Self {
            positions,
            species,
            edge_src,
            edge_dst,
            graph_index,
            num_graphs: structures.len(),
        })
    }

    /// Number of atoms in the batch.
    #[must_use]
    pub fn num_atoms(&self) -> usize {
        self.species.len()
    }

    /// Number of directed edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edge_src.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_number_table() {
        let table = AtomicNumberTable::new(vec![8, 6, 6, 1]);
        assert_eq!(table.zs(), &[1, 6, 8]);
        assert_eq!(table.index_of(6).expect("carbon present"), 1);
        assert!(table.index_of(79).is_err());
    }

    #[test]
    fn test_diamond_cell_atom_count() {
        let cell = diamond_cubic(3.567, [1, 1, 1], 0);
        assert_eq!(cell.len(), 8);

        let supercell = diamond_cubic(3.567, [2, 2, 2], 0);
        assert_eq!(supercell.len(), 64);
        assert!(supercell.species.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_displacement_reproducible_and_bounded() {
        let mut a = diamond_cubic(3.567, [1, 1, 1], 0);
        let mut b = a.clone();
        let reference = a.clone();

        a.displace_uniform(0.1, 42);
        b.displace_uniform(0.1, 42);

        for (pa, pb) in a.positions.iter().zip(b.positions.iter()) {
            assert_eq!(pa, pb);
        }
        for (pa, pr) in a.positions.iter().zip(reference.positions.iter()) {
            for k in 0..3 {
                assert!((pa[k] - pr[k]).abs() <= 0.1);
            }
        }
    }

    #[test]
    fn test_batch_edges_are_symmetric() {
        let structure = diamond_cubic(3.567, [1, 1, 1], 0);
        let batch = AtomicBatch::from_structures(&[structure], 2.0).expect("valid batch");

        assert!(batch.num_edges() > 0);
        // Every directed edge has its reverse.
        for (s, d) in batch.edge_src.iter().zip(batch.edge_dst.iter()) {
            let reverse = batch
                .edge_src
                .iter()
                .zip(batch.edge_dst.iter())
                .any(|(s2, d2)| s2 == d && d2 == s);
            assert!(reverse, "edge ({s}, {d}) has no reverse");
        }
    }

    #[test]
    fn test_batch_offsets_across_structures() {
        let a = diamond_cubic(3.567, [1, 1, 1], 0);
        let b = diamond_cubic(3.567, [1, 1, 1], 0);
        let batch = AtomicBatch::from_structures(&[a, b], 2.0).expect("valid batch");

        assert_eq!(batch.num_atoms(), 16);
        assert_eq!(batch.num_graphs, 2);
        assert_eq!(&batch.graph_index[..8], &[0; 8]);
        assert_eq!(&batch.graph_index[8..], &[1; 8]);
        // No cross-structure edges: edges of graph 1 stay in [8, 16).
        for (s, d) in batch.edge_src.iter().zip(batch.edge_dst.iter()) {
            assert_eq!(*s < 8, *d < 8, "edge crosses structures");
        }
    }

    #[test]
    fn test_rejects_nonpositive_cutoff() {
        let structure = diamond_cubic(3.567, [1, 1, 1], 0);
        assert!(AtomicBatch::from_structures(&[structure], 0.0).is_err());
    }
}
