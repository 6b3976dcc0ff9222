//! Property tests for the parameter mapper.
//!
//! The fuse/split transforms are pure element permutations, so the
//! round-trip must be bit-exact for any block structure — not just the
//! layouts the scenario models happen to use.

use proptest::prelude::*;

use equiparar::autograd::Tensor;
use equiparar::convert::mapper::{fuse, split};

/// Arbitrary block list: 1–5 blocks, each up to 8×8, with finite values.
fn arbitrary_blocks() -> impl Strategy<Value = Vec<(usize, usize, Vec<f32>)>> {
    prop::collection::vec(
        (1usize..=8, 1usize..=8).prop_flat_map(|(rows, cols)| {
            prop::collection::vec(-1e3f32..1e3, rows * cols)
                .prop_map(move |data| (rows, cols, data))
        }),
        1..=5,
    )
}

proptest! {
    #[test]
    fn round_trip_is_identity(blocks in arbitrary_blocks()) {
        let tensors: Vec<Tensor> = blocks
            .iter()
            .map(|(rows, cols, data)| Tensor::new(data, &[*rows, *cols]))
            .collect();
        let dims: Vec<(usize, usize)> = blocks.iter().map(|(r, c, _)| (*r, *c)).collect();

        let restored = split(&fuse(&tensors), &dims, "prop").expect("round trip succeeds");

        prop_assert_eq!(restored.len(), tensors.len());
        for (orig, back) in tensors.iter().zip(restored.iter()) {
            prop_assert_eq!(orig.shape(), back.shape());
            prop_assert_eq!(orig.data(), back.data());
        }
    }

    #[test]
    fn fused_length_is_total_element_count(blocks in arbitrary_blocks()) {
        let tensors: Vec<Tensor> = blocks
            .iter()
            .map(|(rows, cols, data)| Tensor::new(data, &[*rows, *cols]))
            .collect();
        let total: usize = blocks.iter().map(|(r, c, _)| r * c).sum();

        prop_assert_eq!(fuse(&tensors).numel(), total);
    }

    #[test]
    fn split_rejects_wrong_total(blocks in arbitrary_blocks(), extra in 1usize..16) {
        let dims: Vec<(usize, usize)> = blocks.iter().map(|(r, c, _)| (*r, *c)).collect();
        let total: usize = dims.iter().map(|(r, c)| r * c).sum();

        let flat = Tensor::from_slice(&vec![0.0; total + extra]);
        prop_assert!(split(&flat, &dims, "prop").is_err());
    }
}
