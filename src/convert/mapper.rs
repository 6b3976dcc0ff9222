//! Parameter Mapper: layout transforms between per-block and fused tensors.
//!
//! The fused layout stores a structured weight as one flat tensor: each 2-D
//! block transposed (fused kernels consume weights output-major), flattened
//! row-major, and concatenated in block order. Both transforms are pure
//! element permutations, so `split(fuse(blocks)) == blocks` holds at the bit
//! level — the invariant the round-trip tests pin down.

use crate::autograd::grad_fn::transpose_raw;
use crate::autograd::Tensor;
use crate::error::{EquipararError, Result};

/// Fuse per-block 2-D tensors into one flat fused-layout tensor.
///
/// Each `[rows, cols]` block is transposed to `[cols, rows]`, flattened, and
/// concatenated. The result is a fresh gradient-tracked leaf.
#[must_use]
pub fn fuse(blocks: &[Tensor]) -> Tensor {
    let total: usize = blocks.iter().map(Tensor::numel).sum();
    let mut data = Vec::with_capacity(total);
    for block in blocks {
        let (rows, cols) = (block.shape()[0], block.shape()[1]);
        data.extend_from_slice(&transpose_raw(block.data(), rows, cols));
    }
    Tensor::new(&data, &[total]).requires_grad()
}

/// Fuse with shape checking against the expected per-block dimensions.
///
/// # Errors
///
/// Returns `LayoutMismatch` if the block count or any block's element count
/// disagrees with `dims` — an irrep-layout incompatibility, which aborts
/// conversion.
pub fn fuse_checked(blocks: &[Tensor], dims: &[(usize, usize)], slot: &str) -> Result<Tensor> {
    if blocks.len() != dims.len() {
        return Err(EquipararError::LayoutMismatch {
            slot: slot.to_string(),
            expected: dims.len(),
            actual: blocks.len(),
        });
    }
    for (block, &(rows, cols)) in blocks.iter().zip(dims.iter()) {
        if block.shape() != [rows, cols] {
            return Err(EquipararError::LayoutMismatch {
                slot: slot.to_string(),
                expected: rows * cols,
                actual: block.numel(),
            });
        }
    }
    Ok(fuse(blocks))
}

/// Split a flat fused-layout tensor back into per-block 2-D tensors.
///
/// Exact inverse of [`fuse`]: for each `(rows, cols)` in `dims`, a
/// `[cols, rows]` segment is read and transposed back to `[rows, cols]`.
///
/// # Errors
///
/// Returns `LayoutMismatch` if the flat tensor's element count doesn't equal
/// the total of `dims`.
pub fn split(flat: &Tensor, dims: &[(usize, usize)], slot: &str) -> Result<Vec<Tensor>> {
    let expected: usize = dims.iter().map(|&(r, c)| r * c).sum();
    if flat.numel() != expected {
        return Err(EquipararError::LayoutMismatch {
            slot: slot.to_string(),
            expected,
            actual: flat.numel(),
        });
    }

    let mut blocks = Vec::with_capacity(dims.len());
    let mut offset = 0;
    for &(rows, cols) in dims {
        let len = rows * cols;
        let segment = &flat.data()[offset..offset + len];
        // Segment holds the [cols, rows] transposed block.
        let restored = transpose_raw(segment, cols, rows);
        blocks.push(Tensor::new(&restored, &[rows, cols]).requires_grad());
        offset += len;
    }
    Ok(blocks)
}

/// Verbatim copy of a tensor into a fresh gradient-tracked leaf.
///
/// Used for parameter slots whose layout is identical in both backends and
/// for non-learnable buffers.
#[must_use]
pub fn copy_verbatim(tensor: &Tensor) -> Tensor {
    Tensor::new(tensor.data(), tensor.shape()).requires_grad()
}
