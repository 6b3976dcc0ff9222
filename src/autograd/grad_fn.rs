//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements [`GradFn`] to define how
//! gradients flow backward through it. Backward kernels construct raw
//! tensors directly, so nothing here is re-recorded onto the tape.

use super::tensor::Tensor;

/// Trait for functions that compute gradients during the backward pass.
///
/// Implementations capture whatever forward context they need (inputs,
/// outputs, shapes, index lists) by value.
pub trait GradFn: Send + Sync {
    /// Compute gradients with respect to inputs.
    ///
    /// Returns one gradient per input tensor, in the order the inputs were
    /// passed during the forward call.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

/// Raw row-major matrix multiply used by forward ops and backward kernels.
///
/// Delegates to trueno's SIMD matmul.
pub(crate) fn matmul_raw(a: &[f32], m: usize, k: usize, b: &[f32], n: usize) -> Vec<f32> {
    let a_matrix = trueno::Matrix::from_vec(m, k, a.to_vec()).expect("valid matrix dimensions");
    let b_matrix = trueno::Matrix::from_vec(k, n, b.to_vec()).expect("valid matrix dimensions");
    let result = a_matrix.matmul(&b_matrix).expect("matmul should succeed");
    result.as_slice().to_vec()
}

/// Raw 2-D transpose of row-major data.
pub(crate) fn transpose_raw(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0; rows * cols];
    for i in 0..rows {
        for j in 0..cols {
            out[j * rows + i] = data[i * cols + j];
        }
    }
    out
}

// ============================================================================
// Element-wise operations
// ============================================================================

/// z = x + y (equal shapes)
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.detach(), grad_output.detach()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// z = x - y (equal shapes)
pub(crate) struct SubBackward;

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let neg: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![
            grad_output.detach(),
            Tensor::new(&neg, grad_output.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// z = x * y (equal shapes)
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_x: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.y.data().iter())
            .map(|(&g, &y)| g * y)
            .collect();
        let grad_y: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * x)
            .collect();
        vec![
            Tensor::new(&grad_x, self.x.shape()),
            Tensor::new(&grad_y, self.y.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// z = x / y (equal shapes)
pub(crate) struct DivBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for DivBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_x: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.y.data().iter())
            .map(|(&g, &y)| g / y)
            .collect();
        let grad_y: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter().zip(self.y.data().iter()))
            .map(|(&g, (&x, &y))| -g * x / (y * y))
            .collect();
        vec![
            Tensor::new(&grad_x, self.x.shape()),
            Tensor::new(&grad_y, self.y.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "DivBackward"
    }
}

/// z = -x
pub(crate) struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "NegBackward"
    }
}

/// z = x * s for scalar s
pub(crate) struct MulScalarBackward {
    pub(crate) scalar: f32,
}

impl GradFn for MulScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output.data().iter().map(|&g| g * self.scalar).collect();
        vec![Tensor::new(&grad, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "MulScalarBackward"
    }
}

/// z = x + s for scalar s
pub(crate) struct AddScalarBackward;

impl GradFn for AddScalarBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.detach()]
    }

    fn name(&self) -> &'static str {
        "AddScalarBackward"
    }
}

/// z = x^n
pub(crate) struct PowBackward {
    pub(crate) x: Tensor,
    pub(crate) n: f32,
}

impl GradFn for PowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * self.n * x.powf(self.n - 1.0))
            .collect();
        vec![Tensor::new(&grad, self.x.shape())]
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}

/// z = x * sigmoid(x)
pub(crate) struct SiluBackward {
    pub(crate) x: Tensor,
}

impl GradFn for SiluBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| {
                let s = 1.0 / (1.0 + (-x).exp());
                g * s * (1.0 + x * (1.0 - s))
            })
            .collect();
        vec![Tensor::new(&grad, self.x.shape())]
    }

    fn name(&self) -> &'static str {
        "SiluBackward"
    }
}

// ============================================================================
// Reductions
// ============================================================================

/// z = sum(x), scalar output
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.data()[0];
        let numel: usize = self.input_shape.iter().product();
        vec![Tensor::new(&vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// z_i = ||x_i|| per row: [n, d] -> [n, 1]
pub(crate) struct RowNormBackward {
    pub(crate) x: Tensor,
    pub(crate) output: Tensor,
}

impl GradFn for RowNormBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (self.x.shape()[0], self.x.shape()[1]);
        let mut grad = vec![0.0; rows * cols];
        for i in 0..rows {
            let norm = self.output.data()[i];
            let g = grad_output.data()[i];
            for k in 0..cols {
                grad[i * cols + k] = g * self.x.data()[i * cols + k] / norm;
            }
        }
        vec![Tensor::new(&grad, self.x.shape())]
    }

    fn name(&self) -> &'static str {
        "RowNormBackward"
    }
}

// ============================================================================
// Linear algebra and layout
// ============================================================================

/// z = x @ y for 2-D tensors
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (m, k) = (self.x.shape()[0], self.x.shape()[1]);
        let n = self.y.shape()[1];

        // dx = g @ y^T, dy = x^T @ g
        let y_t = transpose_raw(self.y.data(), k, n);
        let grad_x = matmul_raw(grad_output.data(), m, n, &y_t, k);

        let x_t = transpose_raw(self.x.data(), m, k);
        let grad_y = matmul_raw(&x_t, k, m, grad_output.data(), n);

        vec![
            Tensor::new(&grad_x, &[m, k]),
            Tensor::new(&grad_y, &[k, n]),
        ]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// z = x^T for a 2-D tensor
pub(crate) struct TransposeBackward;

impl GradFn for TransposeBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (grad_output.shape()[0], grad_output.shape()[1]);
        let grad = transpose_raw(grad_output.data(), rows, cols);
        vec![Tensor::new(&grad, &[cols, rows])]
    }

    fn name(&self) -> &'static str {
        "TransposeBackward"
    }
}

/// z = x.view(new_shape)
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

/// z = matrix + row-broadcast vector: [n, m] + [m]
pub(crate) struct BroadcastAddBackward {
    pub(crate) x_shape: Vec<usize>,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (self.x_shape[0], self.x_shape[1]);
        let mut grad_y = vec![0.0; cols];
        for i in 0..rows {
            for j in 0..cols {
                grad_y[j] += grad_output.data()[i * cols + j];
            }
        }
        vec![grad_output.detach(), Tensor::new(&grad_y, &[cols])]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}

/// z = x[:, start..start+len] for a 2-D tensor
pub(crate) struct SliceColsBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) start: usize,
}

impl GradFn for SliceColsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (self.input_shape[0], self.input_shape[1]);
        let width = grad_output.shape()[1];
        let mut grad = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..width {
                grad[i * cols + self.start + j] = grad_output.data()[i * width + j];
            }
        }
        vec![Tensor::new(&grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SliceColsBackward"
    }
}

/// z = concat(parts, axis=1) for 2-D tensors of equal row count
pub(crate) struct ConcatColsBackward {
    pub(crate) widths: Vec<usize>,
}

impl GradFn for ConcatColsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let rows = grad_output.shape()[0];
        let total: usize = self.widths.iter().sum();
        let mut grads = Vec::with_capacity(self.widths.len());
        let mut offset = 0;
        for &w in &self.widths {
            let mut part = vec![0.0; rows * w];
            for i in 0..rows {
                for j in 0..w {
                    part[i * w + j] = grad_output.data()[i * total + offset + j];
                }
            }
            grads.push(Tensor::new(&part, &[rows, w]));
            offset += w;
        }
        grads
    }

    fn name(&self) -> &'static str {
        "ConcatColsBackward"
    }
}

/// z = x[start..start+len] for a 1-D tensor
pub(crate) struct SliceFlatBackward {
    pub(crate) input_len: usize,
    pub(crate) start: usize,
}

impl GradFn for SliceFlatBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let mut grad = vec![0.0; self.input_len];
        grad[self.start..self.start + grad_output.numel()].copy_from_slice(grad_output.data());
        vec![Tensor::new(&grad, &[self.input_len])]
    }

    fn name(&self) -> &'static str {
        "SliceFlatBackward"
    }
}

// ============================================================================
// Graph message passing
// ============================================================================

/// z[e] = x[indices[e]] row gather: [n, d] -> [e, d]
pub(crate) struct GatherRowsBackward {
    pub(crate) indices: Vec<usize>,
    pub(crate) input_rows: usize,
}

impl GradFn for GatherRowsBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let cols = grad_output.shape()[1];
        let mut grad = vec![0.0; self.input_rows * cols];
        for (e, &row) in self.indices.iter().enumerate() {
            for j in 0..cols {
                grad[row * cols + j] += grad_output.data()[e * cols + j];
            }
        }
        vec![Tensor::new(&grad, &[self.input_rows, cols])]
    }

    fn name(&self) -> &'static str {
        "GatherRowsBackward"
    }
}

/// z[indices[e]] += x[e] row scatter-add: [e, d] -> [n, d]
pub(crate) struct ScatterSumBackward {
    pub(crate) indices: Vec<usize>,
}

impl GradFn for ScatterSumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let cols = grad_output.shape()[1];
        let rows = self.indices.len();
        let mut grad = vec![0.0; rows * cols];
        for (e, &row) in self.indices.iter().enumerate() {
            for j in 0..cols {
                grad[e * cols + j] = grad_output.data()[row * cols + j];
            }
        }
        vec![Tensor::new(&grad, &[rows, cols])]
    }

    fn name(&self) -> &'static str {
        "ScatterSumBackward"
    }
}

/// z = x * col broadcast over columns: [n, m] * [n, 1]
pub(crate) struct MulColBackward {
    pub(crate) x: Tensor,
    pub(crate) col: Tensor,
}

impl GradFn for MulColBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let (rows, cols) = (self.x.shape()[0], self.x.shape()[1]);
        let mut grad_x = vec![0.0; rows * cols];
        let mut grad_col = vec![0.0; rows];
        for i in 0..rows {
            let c = self.col.data()[i];
            for j in 0..cols {
                let g = grad_output.data()[i * cols + j];
                grad_x[i * cols + j] = g * c;
                grad_col[i] += g * self.x.data()[i * cols + j];
            }
        }
        vec![
            Tensor::new(&grad_x, self.x.shape()),
            Tensor::new(&grad_col, &[rows, 1]),
        ]
    }

    fn name(&self) -> &'static str {
        "MulColBackward"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_raw_identity() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let eye = [1.0, 0.0, 0.0, 1.0];
        assert_eq!(matmul_raw(&a, 2, 2, &eye, 2), a.to_vec());
    }

    #[test]
    fn test_transpose_raw_involution() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = transpose_raw(&a, 2, 3);
        let tt = transpose_raw(&t, 3, 2);
        assert_eq!(tt, a.to_vec());
    }

    #[test]
    fn test_gather_scatter_adjoint() {
        // gather backward scatters; scatter backward gathers: they must be
        // exact adjoints of each other on the same index list.
        let indices = vec![0, 2, 2, 1];
        let gather = GatherRowsBackward {
            indices: indices.clone(),
            input_rows: 3,
        };
        let grad_out = Tensor::new(&[1.0, 10.0, 100.0, 1000.0], &[4, 1]);
        let grads = gather.backward(&grad_out);
        assert_eq!(grads[0].data(), &[1.0, 1000.0, 110.0]);

        let scatter = ScatterSumBackward { indices };
        let grad_out = Tensor::new(&[5.0, 6.0, 7.0], &[3, 1]);
        let grads = scatter.backward(&grad_out);
        assert_eq!(grads[0].data(), &[5.0, 7.0, 7.0, 6.0]);
    }

    #[test]
    fn test_slice_flat_backward_zero_pads() {
        let f = SliceFlatBackward {
            input_len: 5,
            start: 1,
        };
        let grads = f.backward(&Tensor::from_slice(&[2.0, 3.0]));
        assert_eq!(grads[0].data(), &[0.0, 2.0, 3.0, 0.0, 0.0]);
    }

    #[test]
    fn test_concat_cols_backward_splits() {
        let f = ConcatColsBackward {
            widths: vec![1, 2],
        };
        let grad = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let grads = f.backward(&grad);
        assert_eq!(grads[0].data(), &[1.0, 4.0]);
        assert_eq!(grads[1].data(), &[2.0, 3.0, 5.0, 6.0]);
    }
}
