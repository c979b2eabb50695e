//! Round-trip tests: proofs generated by the committer must satisfy the
//! on-chain verifier mirror, for every cut point and for padded trees.

use alloy_primitives::{B256, keccak256};
use proptest::prelude::*;
use rebut_history::{HistoryCommitment, compute_root, generate_prefix_proof};
use rebut_prefix::{PrefixProofInputs, verify_prefix_proof};

fn test_leaves(n: u64) -> Vec<B256> {
    (0..n).map(|i| keccak256(i.to_be_bytes())).collect()
}

fn verify(
    leaves: &[B256],
    prefix_index: u64,
    virtual_size: u64,
) -> Result<(), rebut_prefix::ProofError> {
    let (pre_expansion, proof) = generate_prefix_proof(prefix_index, leaves, virtual_size).unwrap();
    let pre_size = prefix_index + 1;
    let prefix_len = (pre_size as usize).min(leaves.len());
    let pre_root = compute_root(&leaves[..prefix_len], pre_size).unwrap();
    let post_root = compute_root(leaves, virtual_size).unwrap();
    verify_prefix_proof(&PrefixProofInputs {
        pre_root,
        pre_size,
        post_root,
        post_size: virtual_size,
        pre_expansion: &pre_expansion,
        prefix_proof: &proof,
    })
}

#[test]
fn every_cut_point_of_a_pure_tree_verifies() {
    let leaves = test_leaves(10);
    for prefix_index in 0..10 {
        assert_eq!(verify(&leaves, prefix_index, 10), Ok(()), "cut at {prefix_index}");
    }
}

#[test]
fn every_cut_point_of_a_padded_tree_verifies() {
    // 3 real leaves padded to 8: cuts land before, at, and inside the padding.
    let leaves = test_leaves(3);
    for prefix_index in 0..8 {
        assert_eq!(verify(&leaves, prefix_index, 8), Ok(()), "cut at {prefix_index}");
    }
}

#[test]
fn commitment_roots_agree_with_expansion_roots() {
    let leaves = test_leaves(10);
    for prefix_index in 0..10u64 {
        let (pre_expansion, _) = generate_prefix_proof(prefix_index, &leaves, 10).unwrap();
        let commitment =
            HistoryCommitment::new(&leaves[..=prefix_index as usize], prefix_index + 1).unwrap();
        assert_eq!(rebut_prefix::root(&pre_expansion).unwrap(), commitment.merkle);
    }
}

#[test]
fn degenerate_proof_at_the_upper_bound_verifies() {
    let leaves = test_leaves(5);
    assert_eq!(verify(&leaves, 7, 8), Ok(()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prefix_proofs_are_sound(
        real in 1u64..24,
        extra in 0u64..24,
        cut_seed in any::<u64>(),
        leaf_seed in any::<u64>(),
    ) {
        let virtual_size = real + extra;
        let leaves: Vec<B256> =
            (0..real).map(|i| keccak256((leaf_seed ^ i).to_be_bytes())).collect();
        let prefix_index = cut_seed % virtual_size;
        prop_assert_eq!(verify(&leaves, prefix_index, virtual_size), Ok(()));
    }

    #[test]
    fn mutated_proofs_are_rejected(
        real in 2u64..16,
        extra in 0u64..8,
        cut_seed in any::<u64>(),
        bit in 0usize..256,
    ) {
        let virtual_size = real + extra;
        let leaves = test_leaves(real);
        // Exclude the degenerate full-range cut, whose proof is empty.
        let prefix_index = cut_seed % (virtual_size - 1);
        let (pre_expansion, mut proof) =
            generate_prefix_proof(prefix_index, &leaves, virtual_size).unwrap();
        prop_assume!(!proof.is_empty());

        let slot = bit % proof.len();
        proof[slot].0[bit / 8 % 32] ^= 1 << (bit % 8);

        let pre_size = prefix_index + 1;
        let prefix_len = (pre_size as usize).min(leaves.len());
        let result = verify_prefix_proof(&PrefixProofInputs {
            pre_root: compute_root(&leaves[..prefix_len], pre_size).unwrap(),
            pre_size,
            post_root: compute_root(&leaves, virtual_size).unwrap(),
            post_size: virtual_size,
            pre_expansion: &pre_expansion,
            prefix_proof: &proof,
        });
        prop_assert!(result.is_err());
    }
}
