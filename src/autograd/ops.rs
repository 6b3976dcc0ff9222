//! Differentiable tensor operations.
//!
//! Each operation computes its forward result and, when gradient tracking is
//! enabled and an input requires gradients, records a [`GradFn`] to the
//! thread-local computation graph.
//!
//! Elementwise binary operations require equal shapes; broadcasting is
//! provided only by the dedicated `broadcast_add` / `mul_col` forms so that
//! every recorded operation has an unambiguous adjoint.

use std::sync::Arc;

use super::grad_fn::{
    matmul_raw, AddBackward, AddScalarBackward, BroadcastAddBackward, ConcatColsBackward,
    DivBackward, GatherRowsBackward, GradFn, MatmulBackward, MulBackward, MulColBackward,
    MulScalarBackward, NegBackward, PowBackward, RowNormBackward, ScatterSumBackward,
    SiluBackward, SliceColsBackward, SliceFlatBackward, SubBackward, SumBackward,
    TransposeBackward, ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

fn record_unary(input: &Tensor, result: &mut Tensor, grad_fn: Arc<dyn GradFn>) {
    if is_grad_enabled() && input.requires_grad_enabled() {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register_tensor(input.clone());
            graph.record(result.id(), grad_fn, vec![input.id()]);
        });
    }
}

fn record_binary(x: &Tensor, y: &Tensor, result: &mut Tensor, grad_fn: Arc<dyn GradFn>) {
    if is_grad_enabled() && (x.requires_grad_enabled() || y.requires_grad_enabled()) {
        result.requires_grad_(true);
        result.set_grad_fn(grad_fn.clone());
        with_graph(|graph| {
            graph.register_tensor(x.clone());
            graph.register_tensor(y.clone());
            graph.record(result.id(), grad_fn, vec![x.id(), y.id()]);
        });
    }
}

fn assert_same_shape(op: &str, x: &Tensor, y: &Tensor) {
    assert_eq!(
        x.shape(),
        y.shape(),
        "{op} requires equal shapes, got {:?} vs {:?}",
        x.shape(),
        y.shape()
    );
}

// ============================================================================
// Element-wise operations
// ============================================================================

impl Tensor {
    /// Element-wise addition: z = self + other
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        assert_same_shape("add", self, other);
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a + b)
            .collect();
        let mut result = Tensor::new(&data, self.shape());
        record_binary(self, other, &mut result, Arc::new(AddBackward));
        result
    }

    /// Element-wise subtraction: z = self - other
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        assert_same_shape("sub", self, other);
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a - b)
            .collect();
        let mut result = Tensor::new(&data, self.shape());
        record_binary(self, other, &mut result, Arc::new(SubBackward));
        result
    }

    /// Element-wise multiplication: z = self * other
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        assert_same_shape("mul", self, other);
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a * b)
            .collect();
        let mut result = Tensor::new(&data, self.shape());
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(MulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Element-wise division: z = self / other
    #[must_use]
    pub fn div(&self, other: &Tensor) -> Tensor {
        assert_same_shape("div", self, other);
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| a / b)
            .collect();
        let mut result = Tensor::new(&data, self.shape());
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(DivBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Element-wise negation: z = -self
    #[must_use]
    pub fn neg(&self) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| -a).collect();
        let mut result = Tensor::new(&data, self.shape());
        record_unary(self, &mut result, Arc::new(NegBackward));
        result
    }

    /// Scalar multiplication: z = self * scalar
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a * scalar).collect();
        let mut result = Tensor::new(&data, self.shape());
        record_unary(self, &mut result, Arc::new(MulScalarBackward { scalar }));
        result
    }

    /// Scalar addition: z = self + scalar
    #[must_use]
    pub fn add_scalar(&self, scalar: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a + scalar).collect();
        let mut result = Tensor::new(&data, self.shape());
        record_unary(self, &mut result, Arc::new(AddScalarBackward));
        result
    }

    /// Element-wise power: z = self^n
    #[must_use]
    pub fn pow(&self, n: f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| a.powf(n)).collect();
        let mut result = Tensor::new(&data, self.shape());
        record_unary(
            self,
            &mut result,
            Arc::new(PowBackward {
                x: self.clone(),
                n,
            }),
        );
        result
    }

    /// SiLU activation: z = self * sigmoid(self)
    #[must_use]
    pub fn silu(&self) -> Tensor {
        let data: Vec<f32> = self
            .data()
            .iter()
            .map(|&a| a / (1.0 + (-a).exp()))
            .collect();
        let mut result = Tensor::new(&data, self.shape());
        record_unary(self, &mut result, Arc::new(SiluBackward { x: self.clone() }));
        result
    }
}

// ============================================================================
// Reductions
// ============================================================================

impl Tensor {
    /// Sum all elements: z = sum(self), shape [1]
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let sum: f32 = self.data().iter().sum();
        let mut result = Tensor::new(&[sum], &[1]);
        record_unary(
            self,
            &mut result,
            Arc::new(SumBackward {
                input_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Per-row Euclidean norm: [n, d] -> [n, 1]
    ///
    /// The backward kernel divides by the norm, so rows must be nonzero.
    #[must_use]
    pub fn row_norm(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "row_norm requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let data: Vec<f32> = (0..rows)
            .map(|i| {
                self.data()[i * cols..(i + 1) * cols]
                    .iter()
                    .map(|&v| v * v)
                    .sum::<f32>()
                    .sqrt()
            })
            .collect();
        let mut result = Tensor::new(&data, &[rows, 1]);
        let grad_fn = Arc::new(RowNormBackward {
            x: self.clone(),
            output: result.clone(),
        });
        record_unary(self, &mut result, grad_fn);
        result
    }
}

// ============================================================================
// Linear algebra and layout
// ============================================================================

impl Tensor {
    /// Matrix multiplication: z = self @ other (2-D only).
    ///
    /// Uses trueno's SIMD-accelerated matmul.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");

        let (m, k1) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let data = matmul_raw(self.data(), m, k1, other.data(), n);
        let mut result = Tensor::new(&data, &[m, n]);
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(MatmulBackward {
                x: self.clone(),
                y: other.clone(),
            }),
        );
        result
    }

    /// Transpose a 2-D tensor.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let data = super::grad_fn::transpose_raw(self.data(), rows, cols);
        let mut result = Tensor::new(&data, &[cols, rows]);
        record_unary(self, &mut result, Arc::new(TransposeBackward));
        result
    }

    /// Reshape to a new shape with the same element count.
    #[must_use]
    pub fn view(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "view: element count must match ({} vs {new_numel})",
            self.numel()
        );
        let mut result = Tensor::new(self.data(), new_shape);
        record_unary(
            self,
            &mut result,
            Arc::new(ViewBackward {
                input_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Broadcast addition of a row vector: [n, m] + [m] -> [n, m]
    #[must_use]
    pub fn broadcast_add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "broadcast_add requires a 2D matrix");
        assert_eq!(other.ndim(), 1, "broadcast_add requires a 1D vector");
        assert_eq!(
            self.shape()[1],
            other.shape()[0],
            "matrix columns {} must match vector length {}",
            self.shape()[1],
            other.shape()[0]
        );

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let mut data = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                data[i * cols + j] = self.data()[i * cols + j] + other.data()[j];
            }
        }
        let mut result = Tensor::new(&data, self.shape());
        record_binary(
            self,
            other,
            &mut result,
            Arc::new(BroadcastAddBackward {
                x_shape: self.shape().to_vec(),
            }),
        );
        result
    }

    /// Column-broadcast multiplication: [n, m] * [n, 1] -> [n, m]
    #[must_use]
    pub fn mul_col(&self, col: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "mul_col requires a 2D matrix");
        assert_eq!(
            col.shape(),
            &[self.shape()[0], 1],
            "mul_col requires a [n, 1] column, got {:?}",
            col.shape()
        );

        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        let mut data = vec![0.0; rows * cols];
        for i in 0..rows {
            let c = col.data()[i];
            for j in 0..cols {
                data[i * cols + j] = self.data()[i * cols + j] * c;
            }
        }
        let mut result = Tensor::new(&data, self.shape());
        record_binary(
            self,
            col,
            &mut result,
            Arc::new(MulColBackward {
                x: self.clone(),
                col: col.clone(),
            }),
        );
        result
    }

    /// Column slice of a 2-D tensor: columns [start, start + len).
    #[must_use]
    pub fn slice_cols(&self, start: usize, len: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "slice_cols requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        assert!(
            start + len <= cols,
            "slice_cols out of range: {start}+{len} > {cols}"
        );

        let mut data = vec![0.0; rows * len];
        for i in 0..rows {
            data[i * len..(i + 1) * len]
                .copy_from_slice(&self.data()[i * cols + start..i * cols + start + len]);
        }
        let mut result = Tensor::new(&data, &[rows, len]);
        record_unary(
            self,
            &mut result,
            Arc::new(SliceColsBackward {
                input_shape: self.shape().to_vec(),
                start,
            }),
        );
        result
    }

    /// Concatenate 2-D tensors along columns.
    ///
    /// # Panics
    ///
    /// Panics if `parts` is empty or row counts disagree.
    #[must_use]
    pub fn concat_cols(parts: &[Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_cols requires at least one part");
        let rows = parts[0].shape()[0];
        for p in parts {
            assert_eq!(p.ndim(), 2, "concat_cols requires 2D tensors");
            assert_eq!(p.shape()[0], rows, "concat_cols requires equal row counts");
        }

        let widths: Vec<usize> = parts.iter().map(|p| p.shape()[1]).collect();
        let total: usize = widths.iter().sum();
        let mut data = vec![0.0; rows * total];
        let mut offset = 0;
        for (p, &w) in parts.iter().zip(widths.iter()) {
            for i in 0..rows {
                data[i * total + offset..i * total + offset + w]
                    .copy_from_slice(&p.data()[i * w..(i + 1) * w]);
            }
            offset += w;
        }

        let mut result = Tensor::new(&data, &[rows, total]);
        if is_grad_enabled() && parts.iter().any(Tensor::requires_grad_enabled) {
            result.requires_grad_(true);
            let grad_fn = Arc::new(ConcatColsBackward { widths });
            result.set_grad_fn(grad_fn.clone());
            with_graph(|graph| {
                for p in parts {
                    graph.register_tensor(p.clone());
                }
                graph.record(
                    result.id(),
                    grad_fn,
                    parts.iter().map(Tensor::id).collect(),
                );
            });
        }
        result
    }

    /// Flat slice of a 1-D tensor: elements [start, start + len).
    #[must_use]
    pub fn slice_flat(&self, start: usize, len: usize) -> Tensor {
        assert_eq!(self.ndim(), 1, "slice_flat requires a 1D tensor");
        assert!(
            start + len <= self.numel(),
            "slice_flat out of range: {start}+{len} > {}",
            self.numel()
        );
        let mut result = Tensor::new(&self.data()[start..start + len], &[len]);
        record_unary(
            self,
            &mut result,
            Arc::new(SliceFlatBackward {
                input_len: self.numel(),
                start,
            }),
        );
        result
    }
}

// ============================================================================
// Graph message passing
// ============================================================================

impl Tensor {
    /// Row gather: z[e] = self[indices[e]], [n, d] -> [len(indices), d].
    ///
    /// The adjoint scatter-adds, so gradients from repeated indices
    /// accumulate on their source row.
    #[must_use]
    pub fn gather_rows(&self, indices: &[usize]) -> Tensor {
        assert_eq!(self.ndim(), 2, "gather_rows requires a 2D tensor");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);

        let mut data = vec![0.0; indices.len() * cols];
        for (e, &row) in indices.iter().enumerate() {
            assert!(row < rows, "gather_rows index {row} out of range ({rows})");
            data[e * cols..(e + 1) * cols].copy_from_slice(&self.data()[row * cols..(row + 1) * cols]);
        }
        let mut result = Tensor::new(&data, &[indices.len(), cols]);
        record_unary(
            self,
            &mut result,
            Arc::new(GatherRowsBackward {
                indices: indices.to_vec(),
                input_rows: rows,
            }),
        );
        result
    }

    /// Row scatter-add: z[indices[e]] += self[e], [e, d] -> [num_rows, d].
    #[must_use]
    pub fn scatter_sum(&self, indices: &[usize], num_rows: usize) -> Tensor {
        assert_eq!(self.ndim(), 2, "scatter_sum requires a 2D tensor");
        assert_eq!(
            self.shape()[0],
            indices.len(),
            "scatter_sum requires one index per row"
        );
        let cols = self.shape()[1];

        let mut data = vec![0.0; num_rows * cols];
        for (e, &row) in indices.iter().enumerate() {
            assert!(
                row < num_rows,
                "scatter_sum index {row} out of range ({num_rows})"
            );
            for j in 0..cols {
                data[row * cols + j] += self.data()[e * cols + j];
            }
        }
        let mut result = Tensor::new(&data, &[num_rows, cols]);
        record_unary(
            self,
            &mut result,
            Arc::new(ScatterSumBackward {
                indices: indices.to_vec(),
            }),
        );
        result
    }
}
