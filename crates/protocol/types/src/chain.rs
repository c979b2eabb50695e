//! The dispute chain abstraction.
//!
//! Everything the challenge engine needs from the on-chain rollup and
//! challenge contracts, as one capability trait. Production wiring implements
//! this over contract bindings; tests implement it with an in-memory chain
//! that enforces the same rules.

use alloy_primitives::{B256, keccak256};
use async_trait::async_trait;
use rebut_history::HistoryCommitment;

use crate::{ChainError, ChallengeLevel, ExecutionState};

/// Identifies an assertion on chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub struct AssertionHash(pub B256);

/// Identifies a challenge edge on chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub struct EdgeId(pub B256);

/// The data recorded when an assertion is created.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssertionCreatedInfo {
    /// The assertion's identifier.
    pub assertion_hash: AssertionHash,
    /// The assertion this one extends.
    pub parent_assertion_hash: AssertionHash,
    /// The claimed state the parent ended at.
    pub before_state: ExecutionState,
    /// The claimed state this assertion ends at.
    pub after_state: ExecutionState,
    /// Upper bound on the inbox batches this assertion may consume.
    pub inbox_max_count: u64,
    /// The wasm module root the dispute machine runs under.
    pub wasm_module_root: B256,
    /// Chain block at which the assertion was created.
    pub creation_block: u64,
}

impl AssertionCreatedInfo {
    /// The canonical assertion hash for this creation data.
    pub fn compute_hash(&self) -> AssertionHash {
        let mut data = Vec::with_capacity(32 + 32 + 8);
        data.extend_from_slice(self.parent_assertion_hash.0.as_slice());
        data.extend_from_slice(self.after_state.execution_hash().as_slice());
        data.extend_from_slice(&self.inbox_max_count.to_be_bytes());
        AssertionHash(keccak256(data))
    }
}

/// Lifecycle status of a challenge edge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EdgeStatus {
    /// Created, not yet confirmed.
    #[default]
    Pending,
    /// Won its challenge.
    Confirmed,
}

/// A read-only view of a challenge edge.
///
/// Rival edges share every identifying field except `end_commitment`; the
/// dispute is precisely about which end root is the truthful one.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EdgeSnapshot {
    /// The edge's identifier.
    pub id: EdgeId,
    /// The challenge level the edge disputes.
    pub level: ChallengeLevel,
    /// Identifies the challenge this edge belongs to: the parent assertion
    /// hash at the block level, the claim edge's mutual id below it.
    pub origin_id: B256,
    /// Start height of the disputed range.
    pub start_height: u64,
    /// Agreed commitment root at `start_height`.
    pub start_commitment: B256,
    /// End height of the disputed range.
    pub end_height: u64,
    /// Claimed commitment root at `end_height`.
    pub end_commitment: B256,
    /// Current status.
    pub status: EdgeStatus,
    /// The bisection children, once bisected.
    pub children: Option<(EdgeId, EdgeId)>,
    /// For each enclosing challenge level, the height within that level this
    /// edge's challenge descended from. Empty at the block level.
    pub origin_heights: Vec<u64>,
}

impl EdgeSnapshot {
    /// The length of the disputed range.
    pub const fn length(&self) -> u64 {
        self.end_height - self.start_height
    }

    /// The identifier shared with this edge's rivals: everything but the end
    /// commitment.
    pub fn mutual_id(&self) -> B256 {
        let mut data = Vec::with_capacity(1 + 32 + 8 + 32 + 8);
        data.push(self.level.0);
        data.extend_from_slice(self.origin_id.as_slice());
        data.extend_from_slice(&self.start_height.to_be_bytes());
        data.extend_from_slice(self.start_commitment.as_slice());
        data.extend_from_slice(&self.end_height.to_be_bytes());
        keccak256(data)
    }

    /// The edge identifier: the mutual id plus the disputed end commitment.
    pub fn compute_id(&self) -> EdgeId {
        let mut data = Vec::with_capacity(32 + 32);
        data.extend_from_slice(self.mutual_id().as_slice());
        data.extend_from_slice(self.end_commitment.as_slice());
        EdgeId(keccak256(data))
    }
}

/// Data confirming an edge by one-step proof.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OneStepData {
    /// The machine hash before the disputed step.
    pub before_hash: B256,
    /// The machine hash claimed after the disputed step.
    pub after_hash: B256,
    /// The serialized machine state the one-step prover executes.
    pub proof: Vec<u8>,
}

/// Per-deployment challenge constants. These must match the on-chain
/// configuration exactly or every generated proof is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeConfig {
    /// The leaf height of each challenge level, block level first. All
    /// entries are powers of two, fixed at deployment.
    pub leaf_heights: Vec<u64>,
    /// The wasm module root the deployment's one-step prover runs.
    pub wasm_module_root: B256,
}

impl ChallengeConfig {
    /// The number of challenge levels.
    pub const fn num_levels(&self) -> u64 {
        self.leaf_heights.len() as u64
    }
}

/// The on-chain rollup and challenge contract surface consumed by the
/// dispute engine.
///
/// Submission methods are transactions: they may fail transiently (nonce and
/// gas races, rpc failures) or fatally (the contract proving this party's
/// move wrong); see [`ChainError::is_fatal`]. Read methods never mutate.
#[async_trait]
pub trait DisputeChain: Send + Sync {
    /// The deployment's challenge constants.
    fn challenge_config(&self) -> &ChallengeConfig;

    /// The latest confirmed assertion.
    async fn latest_confirmed(&self) -> Result<AssertionCreatedInfo, ChainError>;

    /// All assertions created after the given one, in creation order.
    async fn assertions_after(
        &self,
        assertion: AssertionHash,
    ) -> Result<Vec<AssertionCreatedInfo>, ChainError>;

    /// Reads one assertion's creation info.
    async fn read_assertion(
        &self,
        assertion: AssertionHash,
    ) -> Result<AssertionCreatedInfo, ChainError>;

    /// The number of inbox batches currently known to the sequencer inbox.
    async fn current_inbox_count(&self) -> Result<u64, ChainError>;

    /// The parent chain's current block number.
    async fn latest_block_number(&self) -> Result<u64, ChainError>;

    /// Posts a new assertion extending `parent`.
    async fn post_assertion(
        &self,
        parent: AssertionHash,
        after_state: ExecutionState,
        inbox_max_count: u64,
    ) -> Result<AssertionCreatedInfo, ChainError>;

    /// Opens the block-level challenge edge claiming `assertion`, committing
    /// to the full block range of the assertion with `end_commitment`. The
    /// prefix proof connects the length-one start commitment to the end
    /// commitment and is verified on chain.
    async fn create_block_challenge_edge(
        &self,
        assertion: AssertionHash,
        start_commitment: HistoryCommitment,
        end_commitment: HistoryCommitment,
        prefix_proof: Vec<u8>,
    ) -> Result<EdgeId, ChainError>;

    /// Opens the level-zero edge of the next challenge level below the
    /// length-one `claim` edge.
    async fn create_subchallenge_edge(
        &self,
        claim: EdgeId,
        start_commitment: HistoryCommitment,
        end_commitment: HistoryCommitment,
        prefix_proof: Vec<u8>,
    ) -> Result<EdgeId, ChainError>;

    /// Bisects `edge` at the canonical bisection point with the given
    /// midpoint commitment root, returning `(lower, upper)` children. The
    /// prefix proof shows the midpoint commitment is a prefix of the edge's
    /// end commitment.
    async fn bisect_edge(
        &self,
        edge: EdgeId,
        bisection_root: B256,
        prefix_proof: Vec<u8>,
    ) -> Result<(EdgeId, EdgeId), ChainError>;

    /// Confirms a length-one deepest-level edge by one-step proof.
    async fn confirm_edge_by_one_step_proof(
        &self,
        edge: EdgeId,
        data: OneStepData,
        before_proof: Vec<B256>,
        after_proof: Vec<B256>,
    ) -> Result<(), ChainError>;

    /// Reads an edge.
    async fn edge(&self, edge: EdgeId) -> Result<EdgeSnapshot, ChainError>;

    /// Whether a rival edge (same mutual id, different end commitment)
    /// exists.
    async fn has_rival(&self, edge: EdgeId) -> Result<bool, ChainError>;

    /// Whether the edge is rivaled and its range has collapsed to one step.
    async fn has_length_one_rival(&self, edge: EdgeId) -> Result<bool, ChainError>;
}
