//! Merkle expansion operations.
//!
//! An expansion holds, at index `i`, the root of a complete subtree of
//! `2^i` leaves, or the zero hash if the tree's size has no `2^i` component.
//! The committed size of an expansion is therefore the sum of `2^i` over its
//! non-zero entries, and appending a complete subtree is binary addition with
//! keccak carries.

use alloc::{vec, vec::Vec};
use alloy_primitives::{B256, keccak256};

use crate::errors::{ProofError, ProofResult};

/// The maximum number of levels an expansion may hold. A tree of this depth
/// commits to `2^64 - 1` leaves, the largest size representable in a `u64`.
pub const MAX_LEVEL: u64 = 64;

/// Hashes two sibling nodes into their parent.
pub fn hash_node(left: B256, right: B256) -> B256 {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(left.as_slice());
    buf[32..].copy_from_slice(right.as_slice());
    keccak256(buf)
}

/// Computes the root committed to by a merkle expansion.
///
/// The accumulator climbs from the lowest complete subtree upward, hashing in
/// larger subtrees on the left and zero siblings where a level is absent. A
/// lone entry at the highest level is the root itself; any lower lowest entry
/// first takes a zero sibling to fix its position in the tree.
pub fn root(expansion: &[B256]) -> ProofResult<B256> {
    if expansion.is_empty() {
        return Err(ProofError::EmptyExpansion);
    }
    if expansion.len() as u64 > MAX_LEVEL {
        return Err(ProofError::ExpansionTooLarge);
    }
    let mut accum = B256::ZERO;
    for (i, val) in expansion.iter().enumerate() {
        if accum.is_zero() {
            if !val.is_zero() {
                accum = *val;
                if i != expansion.len() - 1 {
                    accum = hash_node(accum, B256::ZERO);
                }
            }
        } else if !val.is_zero() {
            accum = hash_node(*val, accum);
        } else {
            accum = hash_node(accum, B256::ZERO);
        }
    }
    Ok(accum)
}

/// The number of leaves an expansion commits to.
pub fn tree_size(expansion: &[B256]) -> u64 {
    let mut size = 0u64;
    for (i, val) in expansion.iter().enumerate() {
        if !val.is_zero() {
            size += 1 << i;
        }
    }
    size
}

/// Appends a complete subtree of `2^level` leaves to the expansion, returning
/// the new expansion.
///
/// The append is only sound at or below the expansion's least significant
/// level; a complete subtree found below `level` would leave a hole in the
/// tree and is rejected.
pub fn append_complete_subtree(
    expansion: &[B256],
    level: u64,
    subtree_root: B256,
) -> ProofResult<Vec<B256>> {
    if level >= MAX_LEVEL {
        return Err(ProofError::LevelTooHigh);
    }
    if subtree_root.is_zero() {
        return Err(ProofError::EmptySubtreeRoot);
    }
    if expansion.len() as u64 > MAX_LEVEL {
        return Err(ProofError::ExpansionTooLarge);
    }
    if expansion.is_empty() {
        let mut next = vec![B256::ZERO; level as usize + 1];
        next[level as usize] = subtree_root;
        return Ok(next);
    }
    if level >= expansion.len() as u64 {
        return Err(ProofError::LevelTooHigh);
    }

    let mut accum = subtree_root;
    let mut next = vec![B256::ZERO; expansion.len() + 1];
    for (i, val) in expansion.iter().enumerate() {
        if (i as u64) < level {
            if !val.is_zero() {
                return Err(ProofError::AppendAboveLeastSignificantBit);
            }
        } else if accum.is_zero() {
            // Nothing left to carry, the upper levels are unchanged.
            next[i] = *val;
        } else if val.is_zero() {
            next[i] = accum;
            accum = B256::ZERO;
        } else {
            next[i] = B256::ZERO;
            accum = hash_node(*val, accum);
        }
    }
    if !accum.is_zero() {
        let last = next.len() - 1;
        next[last] = accum;
    }
    // The top level of a well-formed expansion is never empty.
    if next.last().is_some_and(B256::is_zero) {
        next.pop();
    }
    Ok(next)
}

/// Appends a single leaf to the expansion. The leaf is hashed before it is
/// placed in the tree, matching how committed leaf sequences are built.
pub fn append_leaf(expansion: &[B256], leaf: B256) -> ProofResult<Vec<B256>> {
    append_complete_subtree(expansion, 0, keccak256(leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::b256;

    #[test]
    fn root_of_empty_expansion_errors() {
        assert_eq!(root(&[]), Err(ProofError::EmptyExpansion));
    }

    #[test]
    fn root_of_max_level_expansion_is_accepted() {
        let expansion = vec![B256::ZERO; MAX_LEVEL as usize];
        assert_ne!(root(&expansion), Err(ProofError::ExpansionTooLarge));
    }

    #[test]
    fn root_of_oversized_expansion_errors() {
        let expansion = vec![B256::ZERO; MAX_LEVEL as usize + 1];
        assert_eq!(root(&expansion), Err(ProofError::ExpansionTooLarge));
    }

    #[test]
    fn root_of_single_entry_is_the_entry() {
        let entry = b256!("0x0000000000000000000000000000000000000000000000000000000000001234");
        assert_eq!(root(&[entry]), Ok(entry));
    }

    #[test]
    fn tree_size_sums_powers_of_two() {
        let one = B256::with_last_byte(1);
        assert_eq!(tree_size(&[]), 0);
        assert_eq!(tree_size(&[one]), 1);
        assert_eq!(tree_size(&[B256::ZERO, one]), 2);
        assert_eq!(tree_size(&[one, B256::ZERO, one]), 5);
    }

    #[test]
    fn append_leaf_counts_up_in_binary() {
        let mut expansion = Vec::new();
        for i in 0..20u64 {
            expansion = append_leaf(&expansion, B256::with_last_byte(i as u8)).unwrap();
            assert_eq!(tree_size(&expansion), i + 1);
        }
    }

    #[test]
    fn append_rejects_empty_subtree_root() {
        assert_eq!(
            append_complete_subtree(&[], 0, B256::ZERO),
            Err(ProofError::EmptySubtreeRoot)
        );
    }

    #[test]
    fn append_rejects_level_at_max() {
        let one = B256::with_last_byte(1);
        assert_eq!(append_complete_subtree(&[], MAX_LEVEL, one), Err(ProofError::LevelTooHigh));
    }

    #[test]
    fn append_rejects_level_above_expansion() {
        let one = B256::with_last_byte(1);
        let expansion = append_leaf(&[], one).unwrap();
        assert_eq!(
            append_complete_subtree(&expansion, 1, one),
            Err(ProofError::LevelTooHigh)
        );
    }

    #[test]
    fn append_rejects_holes_below_least_significant_bit() {
        let one = B256::with_last_byte(1);
        // Size 3 expansion: complete subtrees at levels 0 and 1.
        let mut expansion = Vec::new();
        for i in 0..3u8 {
            expansion = append_leaf(&expansion, B256::with_last_byte(i)).unwrap();
        }
        // Appending a size-2 subtree would strand the level-0 leaf below it.
        assert_eq!(
            append_complete_subtree(&expansion, 1, one),
            Err(ProofError::AppendAboveLeastSignificantBit)
        );
    }

    #[test]
    fn append_complete_subtree_matches_leaf_by_leaf() {
        // Appending a complete level-2 subtree must land on the same expansion
        // as appending its four leaves one at a time.
        let leaves: Vec<B256> = (0..8u8).map(B256::with_last_byte).collect();

        let mut lhs = Vec::new();
        for leaf in &leaves[..4] {
            lhs = append_leaf(&lhs, *leaf).unwrap();
        }

        let mut all = Vec::new();
        for leaf in &leaves {
            all = append_leaf(&all, *leaf).unwrap();
        }

        // The level-2 subtree over leaves[4..8] is the lhs-shaped tree of the
        // last four leaves, read from its own expansion.
        let mut rhs_subtree = Vec::new();
        for leaf in &leaves[4..] {
            rhs_subtree = append_leaf(&rhs_subtree, *leaf).unwrap();
        }
        let subtree_root = rhs_subtree[2];
        let appended = append_complete_subtree(&lhs, 2, subtree_root).unwrap();

        assert_eq!(appended, all);
        assert_eq!(root(&appended).unwrap(), root(&all).unwrap());
    }
}
