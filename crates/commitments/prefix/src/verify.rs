//! Prefix proof verification.

use alloc::vec::Vec;
use alloy_primitives::B256;

use crate::{
    bits::{least_significant_bit, most_significant_bit},
    errors::{ProofError, ProofResult},
    expansion::{append_complete_subtree, root, tree_size},
};

/// Inputs to [`verify_prefix_proof`].
#[derive(Debug, Clone, Copy)]
pub struct PrefixProofInputs<'a> {
    /// Root of the commitment over the first `pre_size` leaves.
    pub pre_root: B256,
    /// Leaf count of the pre commitment. 1-indexed size, not a height.
    pub pre_size: u64,
    /// Root of the commitment over the first `post_size` leaves.
    pub post_root: B256,
    /// Leaf count of the post commitment.
    pub post_size: u64,
    /// Merkle expansion of the pre tree, trailing zero levels trimmed.
    pub pre_expansion: &'a [B256],
    /// Complete-subtree roots bridging the pre tree to the post tree, in
    /// append order, zero entries filtered out.
    pub prefix_proof: &'a [B256],
}

/// The level of the largest complete subtree that can be appended to a tree of
/// `pre` leaves without exceeding `post` leaves.
///
/// A tree of size `pre` can only take a complete subtree at its least
/// significant level or below; within that bound the level is capped by the
/// remaining distance to `post`. The shared high bits of `pre` and `post` are
/// masked off first so only the differing region constrains the answer.
pub fn maximum_append_between(pre: u64, post: u64) -> ProofResult<u64> {
    if pre >= post {
        return Err(ProofError::StartNotLessThanEnd);
    }
    let msb = most_significant_bit(pre ^ post)?;
    let mask = ((1u128 << (msb + 1)) - 1) as u64;
    let y = pre & mask;
    let z = post & mask;
    if y != 0 {
        return least_significant_bit(y);
    }
    if z != 0 {
        return most_significant_bit(z);
    }
    // post has the msb of pre ^ post set whenever y is zero, so z cannot be.
    Err(ProofError::StartNotLessThanEnd)
}

/// Verifies that the tree committed to by `pre_root` over `pre_size` leaves is
/// exactly the first `pre_size` leaves of the tree committed to by `post_root`
/// over `post_size` leaves.
///
/// The verifier replays the append walk from `pre_size` to `post_size`, taking
/// one complete subtree root from the proof at each maximal append level, and
/// requires the resulting expansion to hash to `post_root` with the whole
/// proof consumed. `pre_size == post_size` is the degenerate case: both roots
/// must simply be equal and the proof empty.
pub fn verify_prefix_proof(inputs: &PrefixProofInputs<'_>) -> ProofResult<()> {
    if inputs.pre_size == 0 {
        return Err(ProofError::PreSizeCannotBeZero);
    }
    if inputs.pre_size > inputs.post_size {
        return Err(ProofError::StartNotLessThanEnd);
    }
    if root(inputs.pre_expansion)? != inputs.pre_root {
        return Err(ProofError::PreRootMismatch);
    }
    if tree_size(inputs.pre_expansion) != inputs.pre_size {
        return Err(ProofError::PreSizeMismatch);
    }

    let mut size = inputs.pre_size;
    let mut expansion: Vec<B256> = inputs.pre_expansion.to_vec();
    let mut proof_index = 0usize;
    while size < inputs.post_size {
        let level = maximum_append_between(size, inputs.post_size)?;
        let subtree_root =
            inputs.prefix_proof.get(proof_index).copied().ok_or(ProofError::ProofTooShort)?;
        expansion = append_complete_subtree(&expansion, level, subtree_root)?;
        size += 1 << level;
        proof_index += 1;
    }

    if root(&expansion)? != inputs.post_root {
        return Err(ProofError::PostRootMismatch);
    }
    if proof_index != inputs.prefix_proof.len() {
        return Err(ProofError::IncompleteProofUsage);
    }
    Ok(())
}
