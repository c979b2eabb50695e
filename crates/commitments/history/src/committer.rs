//! The virtual tree committer.
//!
//! Terms used throughout this module:
//!
//! - *leaf*: an entry of the committed sequence. Leaves are keccak-hashed
//!   once on entry; every node above is the hash of its two children.
//! - *virtual size*: the padded length of the sequence. The last real leaf
//!   stands in for every position from the end of the real leaves up to the
//!   virtual size.
//! - *limit*: the capacity of the complete subtree under consideration, a
//!   power of two at least the virtual size.
//! - *filler ladder*: `filler[0]` is the hashed last leaf and
//!   `filler[i + 1] = hash(filler[i], filler[i])`, so `filler[i]` is the root
//!   of a complete depth-`i` subtree made entirely of padding. Fully-virtual
//!   subtrees are ladder lookups instead of recursions, which is what keeps
//!   committing to a mostly-virtual range cheap.
//! - The right sibling of the last node in a partial layer is the zero hash.
//!   That is not the same tree as padding the leaves with zero hashes; it
//!   keeps partial layers one hash wide instead of hashing zeros upward.

use alloc::{collections::BTreeMap, vec, vec::Vec};
use alloy_primitives::{B256, keccak256};

use crate::{
    errors::{CommitmentError, CommitmentResult},
    math::{log2_ceil, log2_floor, next_power_of_two},
};

/// Hashes two sibling nodes into their parent.
fn hash_node(left: B256, right: B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Hashes each leaf once before it enters the tree.
fn hash_leaves(leaves: &[B256]) -> Vec<B256> {
    leaves.iter().map(keccak256).collect()
}

/// A node position in the tree: `layer` 0 is the leaf layer, `index` counts
/// nodes within the layer from the left.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TreePosition {
    layer: u64,
    index: u64,
}

/// Collects the sibling hashes needed for the merkle inclusion proof of the
/// last leaf in a virtual tree.
///
/// The prover knows ahead of time which positions the proof needs; the
/// committer reports every node it computes, and the prover keeps the ones at
/// those positions. Positions the root computation never visits lie inside
/// fully-virtual complete subtrees, so they are filled from the ladder
/// afterwards.
#[derive(Debug)]
pub(crate) struct LastLeafProver {
    slots: BTreeMap<TreePosition, usize>,
    proof: Vec<B256>,
    found: Vec<bool>,
}

impl LastLeafProver {
    pub(crate) fn new(virtual_size: u64) -> CommitmentResult<Self> {
        let positions = last_leaf_proof_positions(virtual_size)?;
        let mut slots = BTreeMap::new();
        for (slot, position) in positions.iter().enumerate() {
            slots.insert(*position, slot);
        }
        let len = positions.len();
        Ok(Self { slots, proof: vec![B256::ZERO; len], found: vec![false; len] })
    }

    fn handle(&mut self, hash: B256, position: TreePosition) {
        if let Some(&slot) = self.slots.get(&position) {
            self.found[slot] = true;
            self.proof[slot] = hash;
        }
    }
}

/// The positions of the sibling nodes that hash together with the last leaf
/// at each layer on the way to the root.
fn last_leaf_proof_positions(virtual_size: u64) -> CommitmentResult<Vec<TreePosition>> {
    if virtual_size == 0 {
        return Err(CommitmentError::ZeroVirtualSize);
    }
    if virtual_size == 1 {
        return Ok(Vec::new());
    }
    let depth = log2_floor(next_power_of_two(virtual_size));
    let mut positions = Vec::with_capacity(depth as usize);
    let mut index = virtual_size - 1;
    for layer in 0..depth {
        positions.push(TreePosition { layer, index: index ^ 1 });
        index >>= 1;
    }
    Ok(positions)
}

#[derive(Debug, Default)]
pub(crate) struct HistoryCommitter {
    fillers: Vec<B256>,
    cursor: TreePosition,
    prover: Option<LastLeafProver>,
}

impl HistoryCommitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_prover(prover: LastLeafProver) -> Self {
        Self { prover: Some(prover), ..Self::default() }
    }

    /// Reports a computed node to the prover. The cursor is kept in sync with
    /// the traversal, so it points at the node holding `hash`.
    fn handle(&mut self, hash: B256) {
        if let Some(prover) = self.prover.as_mut() {
            prover.handle(hash, self.cursor);
        }
    }

    /// Computes the root of the virtual tree over `leaves`.
    pub(crate) fn compute_root(
        &mut self,
        leaves: &[B256],
        virtual_size: u64,
    ) -> CommitmentResult<B256> {
        if leaves.is_empty() {
            return Ok(B256::ZERO);
        }
        let hashed = hash_leaves(leaves);
        let limit = next_power_of_two(virtual_size);
        let depth = log2_floor(limit);
        let ladder = log2_ceil(virtual_size).max(1);
        self.populate_fillers(hashed[hashed.len() - 1], ladder);
        self.cursor = TreePosition { layer: depth, index: 0 };
        self.partial_root(&hashed, virtual_size, limit)
    }

    /// The inclusion proof of the last leaf, with positions the traversal
    /// never visited filled from the ladder.
    pub(crate) fn last_leaf_proof(&mut self) -> Vec<B256> {
        let Some(prover) = self.prover.take() else {
            return Vec::new();
        };
        let mut proof = prover.proof;
        for (position, slot) in &prover.slots {
            if !prover.found[*slot] {
                proof[*slot] = self.fillers[position.layer as usize];
            }
        }
        proof
    }

    /// Root of a possibly-partial virtual tree of capacity `limit`.
    ///
    /// Three shapes arise on each descent into a half of capacity `mid`:
    ///
    /// 1. `virtual_size <= mid`: everything lives in the left half; the right
    ///    child is the zero hash.
    /// 2. the real leaves fit in the left half but the virtual size spills
    ///    over: the right half starts from a single filler leaf, or, when the
    ///    right half is completely virtual, is a ladder lookup.
    /// 3. the real leaves spill over: both halves recurse on real data.
    fn partial_root(
        &mut self,
        leaves: &[B256],
        virtual_size: u64,
        limit: u64,
    ) -> CommitmentResult<B256> {
        if leaves.is_empty() {
            return Err(CommitmentError::EmptyLeaves);
        }
        let lv_len = leaves.len() as u64;
        if virtual_size < lv_len {
            return Err(CommitmentError::InvalidLeafCount { leaves: lv_len, virtual_size });
        }
        if limit < virtual_size {
            return Err(CommitmentError::LimitTooSmall { limit, virtual_size });
        }
        let min_fillers = log2_ceil(virtual_size);
        if (self.fillers.len() as u64) < min_fillers {
            return Err(CommitmentError::InsufficientFillers {
                want: min_fillers,
                got: self.fillers.len() as u64,
            });
        }
        if limit == 1 {
            self.handle(leaves[0]);
            return Ok(leaves[0]);
        }

        self.cursor.layer = self.cursor.layer.wrapping_sub(1);
        let mid = limit / 2;

        self.cursor.index = self.cursor.index.wrapping_mul(2);
        let (l_leaves, l_virtual) = if virtual_size > mid {
            if lv_len > mid {
                // Case 3: a complete pure subtree on the left.
                (&leaves[..mid as usize], mid)
            } else {
                // Case 2: a complete virtual subtree on the left.
                (leaves, mid)
            }
        } else {
            // Case 1: a partial virtual subtree on the left.
            (leaves, virtual_size)
        };
        let left = self.partial_root(l_leaves, l_virtual, mid)?;

        self.cursor.index = self.cursor.index.wrapping_add(1);
        let right = if virtual_size > mid {
            if lv_len <= mid && virtual_size == limit {
                // The right half is completely virtual: a ladder lookup.
                let filler = self.fillers[log2_floor(mid) as usize];
                self.handle(filler);
                filler
            } else if lv_len > mid {
                self.partial_root(&leaves[mid as usize..], virtual_size - mid, mid)?
            } else {
                let seed = [self.fillers[0]];
                self.partial_root(&seed, virtual_size - mid, mid)?
            }
        } else {
            self.handle(B256::ZERO);
            B256::ZERO
        };

        let node = hash_node(left, right);
        self.cursor.index = self.cursor.index.wrapping_div(2);
        self.cursor.layer = self.cursor.layer.wrapping_add(1);
        self.handle(node);
        Ok(node)
    }

    /// The merkle expansion of the subtree holding `leaves` padded to
    /// `virtual_size`, lowest level first. When `stripped`, zero levels are
    /// omitted so the result reads as a list of complete subtree roots.
    fn subtree_expansion(
        &mut self,
        leaves: &[B256],
        virtual_size: u64,
        limit: u64,
        stripped: bool,
    ) -> CommitmentResult<Vec<B256>> {
        if leaves.is_empty() {
            return Ok(Vec::new());
        }
        let lv_len = leaves.len() as u64;
        if virtual_size == 0 {
            let mut expansion = Vec::new();
            let mut width = limit;
            while width > 1 {
                expansion.push(B256::ZERO);
                width /= 2;
            }
            return Ok(expansion);
        }
        let limit = if limit == 0 { next_power_of_two(virtual_size) } else { limit };
        if limit == virtual_size {
            let subtree = self.partial_root(leaves, limit, limit)?;
            let mut expansion = Vec::new();
            if !stripped {
                let mut width = limit;
                while width > 1 {
                    expansion.push(B256::ZERO);
                    width /= 2;
                }
            }
            expansion.push(subtree);
            return Ok(expansion);
        }
        let mid = limit / 2;
        if lv_len > mid {
            let left = self.partial_root(&leaves[..mid as usize], mid, mid)?;
            let mut expansion =
                self.subtree_expansion(&leaves[mid as usize..], virtual_size - mid, mid, stripped)?;
            expansion.push(left);
            return Ok(expansion);
        }
        if virtual_size >= mid {
            let left = self.partial_root(leaves, mid, mid)?;
            if self.fillers.is_empty() {
                return Err(CommitmentError::InsufficientFillers { want: 1, got: 0 });
            }
            let seed = [self.fillers[0]];
            let mut expansion =
                self.subtree_expansion(&seed, virtual_size - mid, mid, stripped)?;
            expansion.push(left);
            return Ok(expansion);
        }
        if stripped {
            return self.subtree_expansion(leaves, virtual_size, mid, stripped);
        }
        let mut expansion = self.subtree_expansion(leaves, virtual_size, mid, stripped)?;
        expansion.push(B256::ZERO);
        Ok(expansion)
    }

    /// The complete subtree roots to the right of the path down to `index`,
    /// collected root-most first within each sibling, matching the order the
    /// verifier consumes them in.
    fn proof_tail(
        &mut self,
        index: u64,
        leaves: &[B256],
        virtual_size: u64,
        limit: u64,
    ) -> CommitmentResult<Vec<B256>> {
        if leaves.is_empty() {
            return Err(CommitmentError::EmptyLeaves);
        }
        let lv_len = leaves.len() as u64;
        let limit = if limit == 0 { next_power_of_two(virtual_size) } else { limit };
        if limit == 1 {
            // Only reachable with index 0; nothing lies to the right.
            return Ok(Vec::new());
        }
        let mid = limit / 2;
        if index >= mid {
            if lv_len > mid {
                return self.proof_tail(
                    index - mid,
                    &leaves[mid as usize..],
                    virtual_size - mid,
                    mid,
                );
            }
            if self.fillers.is_empty() {
                return Err(CommitmentError::InsufficientFillers { want: 1, got: 0 });
            }
            let seed = [self.fillers[0]];
            return self.proof_tail(index - mid, &seed, virtual_size - mid, mid);
        }
        if lv_len > mid {
            let mut tail = self.proof_tail(index, &leaves[..mid as usize], mid, mid)?;
            let right =
                self.subtree_expansion(&leaves[mid as usize..], virtual_size - mid, mid, true)?;
            tail.extend(right.into_iter().rev());
            return Ok(tail);
        }
        if virtual_size > mid {
            let mut tail = self.proof_tail(index, leaves, mid, mid)?;
            if self.fillers.is_empty() {
                return Err(CommitmentError::InsufficientFillers { want: 1, got: 0 });
            }
            let seed = [self.fillers[0]];
            let right = self.subtree_expansion(&seed, virtual_size - mid, mid, true)?;
            tail.extend(right.into_iter().rev());
            return Ok(tail);
        }
        self.proof_tail(index, leaves, virtual_size, mid)
    }

    /// The expansion of the prefix ending at `index` together with the proof
    /// tail bridging it to the full virtual tree.
    fn prefix_and_proof(
        &mut self,
        index: u64,
        hashed: &[B256],
        virtual_size: u64,
    ) -> CommitmentResult<(Vec<B256>, Vec<B256>)> {
        let lv_len = hashed.len() as u64;
        if lv_len == 0 {
            return Err(CommitmentError::EmptyLeaves);
        }
        if virtual_size == 0 {
            return Err(CommitmentError::ZeroVirtualSize);
        }
        if lv_len > virtual_size {
            return Err(CommitmentError::InvalidLeafCount { leaves: lv_len, virtual_size });
        }
        if index + 1 > virtual_size {
            return Err(CommitmentError::IndexOutOfRange { index, virtual_size });
        }
        self.populate_fillers(hashed[hashed.len() - 1], log2_floor(virtual_size) + 1);

        let prefix = if index + 1 > lv_len {
            self.subtree_expansion(hashed, index + 1, 0, false)?
        } else {
            self.subtree_expansion(&hashed[..(index + 1) as usize], index + 1, 0, false)?
        };
        let tail = self.proof_tail(index, hashed, virtual_size, 0)?;
        Ok((prefix, tail))
    }

    /// Builds the filler ladder from the hashed last leaf.
    fn populate_fillers(&mut self, last_leaf: B256, depth: u64) {
        self.fillers = Vec::with_capacity(depth as usize);
        self.fillers.push(last_leaf);
        for i in 1..depth as usize {
            self.fillers.push(hash_node(self.fillers[i - 1], self.fillers[i - 1]));
        }
    }
}

/// Computes the merkle root of the virtual tree over `leaves`.
pub fn compute_root(leaves: &[B256], virtual_size: u64) -> CommitmentResult<B256> {
    HistoryCommitter::new().compute_root(leaves, virtual_size)
}

/// Generates the `(pre_expansion, proof)` pair proving that the commitment
/// over leaves `[0, prefix_index]` is a prefix of the commitment over the
/// whole virtual tree. The expansion has trailing zero levels trimmed and the
/// proof has zero entries filtered, matching the wire shape the on-chain
/// verifier expects.
pub fn generate_prefix_proof(
    prefix_index: u64,
    leaves: &[B256],
    virtual_size: u64,
) -> CommitmentResult<(Vec<B256>, Vec<B256>)> {
    let mut committer = HistoryCommitter::new();
    let hashed = hash_leaves(leaves);
    let (mut expansion, proof) = committer.prefix_and_proof(prefix_index, &hashed, virtual_size)?;
    while expansion.last().is_some_and(B256::is_zero) {
        expansion.pop();
    }
    let proof = proof.into_iter().filter(|hash| !hash.is_zero()).collect();
    Ok((expansion, proof))
}
