//! Request types carried between the challenge engine and the state
//! collectors.

use alloy_primitives::B256;
use rebut_protocol::{Batch, GlobalState, Height, OpcodeIndex, StepSize};

/// Metadata of the assertion a commitment is being made for: where its range
/// starts and how many batches it may consume.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssociatedAssertionMetadata {
    /// The wasm module root the dispute runs under.
    pub wasm_module_root: B256,
    /// The global state the assertion's range starts from.
    pub from_state: GlobalState,
    /// The exclusive upper bound on batches the assertion reads.
    pub batch_limit: Batch,
}

/// A request for a history commitment or prefix proof.
///
/// The challenge level is implied by `upper_challenge_origin_heights`: one
/// entry per enclosing level, recording the height within that level the
/// dispute descended from. Empty means the block level itself.
///
/// `up_to_height` of `None` means "the level's full leaf range". It is a
/// distinct state from `Some(0)`, which is a commitment over a single leaf.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HistoryCommitmentRequest {
    /// Assertion the commitment is for.
    pub assertion_metadata: AssociatedAssertionMetadata,
    /// Heights in the enclosing challenge levels, outermost first.
    pub upper_challenge_origin_heights: Vec<Height>,
    /// The height the commitment's leaf range starts from. Commitments in
    /// the current protocol always start at height zero.
    pub from_height: Height,
    /// Inclusive end height, or `None` for the level's full range.
    pub up_to_height: Option<Height>,
}

/// Configures one machine hash collection run.
///
/// The collector steps a machine for the block at `block_challenge_height`
/// (relative to the assertion's start), beginning at opcode
/// `machine_start_index`, taking hashes every `step_size` opcodes until
/// `num_desired_hashes` have been gathered or the machine halts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HashCollectorConfig {
    /// Assertion the hashes are collected under.
    pub assertion_metadata: AssociatedAssertionMetadata,
    /// The disputed block, as a height within the assertion's block range.
    pub block_challenge_height: Height,
    /// Heights in each machine-level challenge below the block level.
    pub step_heights: Vec<Height>,
    /// Number of hashes to collect.
    pub num_desired_hashes: u64,
    /// Opcode index of the first collected hash.
    pub machine_start_index: OpcodeIndex,
    /// Opcodes between consecutive hashes.
    pub step_size: StepSize,
}
