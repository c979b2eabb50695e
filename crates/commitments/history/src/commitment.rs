//! The [`HistoryCommitment`] type.

use alloc::vec::Vec;
use alloy_primitives::B256;

use crate::{
    committer::{HistoryCommitter, LastLeafProver},
    errors::{CommitmentError, CommitmentResult},
};

/// A history commitment: a merkle root over a contiguous run of state hashes
/// at one challenge granularity, together with the metadata needed to prove
/// membership of its boundary leaves on chain.
///
/// For a fixed leaf sequence and virtual size the commitment is a pure
/// function of its inputs: any honest party re-deriving the same states
/// produces an identical commitment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryCommitment {
    /// The index of the last (possibly virtual) leaf, i.e. `virtual size - 1`.
    pub height: u64,
    /// The merkle root of the virtual tree.
    pub merkle: B256,
    /// The first real leaf, unhashed.
    pub first_leaf: B256,
    /// The last real leaf, unhashed.
    pub last_leaf: B256,
    /// Inclusion proof of the leaf at `height` in the virtual tree.
    pub last_leaf_proof: Vec<B256>,
}

/// Verifies a merkle inclusion proof produced alongside a commitment: that
/// `leaf` (unhashed) sits at `index` in the tree committed to by `root`.
///
/// The bits of `index` select which side each proof sibling hashes in on.
pub fn verify_leaf_inclusion(root: B256, index: u64, leaf: B256, proof: &[B256]) -> bool {
    let mut node = alloy_primitives::keccak256(leaf);
    for (layer, sibling) in proof.iter().enumerate() {
        let mut buf = [0u8; 64];
        if index >> layer & 1 == 0 {
            buf[..32].copy_from_slice(node.as_slice());
            buf[32..].copy_from_slice(sibling.as_slice());
        } else {
            buf[..32].copy_from_slice(sibling.as_slice());
            buf[32..].copy_from_slice(node.as_slice());
        }
        node = alloy_primitives::keccak256(buf);
    }
    node == root
}

impl HistoryCommitment {
    /// Commits to `leaves` padded to `virtual_size` by repeating the final
    /// leaf.
    ///
    /// Errors with [`CommitmentError::EmptyLeaves`] when there is nothing to
    /// commit to and [`CommitmentError::InvalidLeafCount`] when more leaves
    /// are supplied than the virtual size admits.
    pub fn new(leaves: &[B256], virtual_size: u64) -> CommitmentResult<Self> {
        if leaves.is_empty() {
            return Err(CommitmentError::EmptyLeaves);
        }
        if virtual_size < leaves.len() as u64 {
            return Err(CommitmentError::InvalidLeafCount {
                leaves: leaves.len() as u64,
                virtual_size,
            });
        }
        let mut committer = HistoryCommitter::with_prover(LastLeafProver::new(virtual_size)?);
        let merkle = committer.compute_root(leaves, virtual_size)?;
        let last_leaf_proof = committer.last_leaf_proof();
        Ok(Self {
            height: virtual_size - 1,
            merkle,
            first_leaf: leaves[0],
            last_leaf: leaves[leaves.len() - 1],
            last_leaf_proof,
        })
    }
}
