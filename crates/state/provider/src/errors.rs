//! Error types for the `rebut-provider` crate.

use rebut_history::CommitmentError;
use rebut_prefix::ProofError;
use thiserror::Error;

/// Error type for state collection and history commitment computation.
///
/// [`ProviderError::ChainCatchingUp`] is the one recoverable variant: the
/// local node has simply not validated far enough yet, and the caller should
/// retry on its next tick rather than treat the gap as disagreement. The
/// commitment and proof variants pass through unwrapped so callers can match
/// the underlying failure directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Local validation has not reached the requested inbox position.
    #[error("chain catching up: local validation behind batch count {batch_count}")]
    ChainCatchingUp {
        /// The inbox count the request needed.
        batch_count: u64,
    },
    /// Batch 0 holds the init message and is never a valid claim bound.
    #[error("max inbox count cannot be zero")]
    ZeroMaxInboxCount,
    /// A request addressed a deeper challenge level than the deployment has.
    #[error("challenge level {level} is out of range for {num_levels} levels")]
    LevelOutOfRange {
        /// Requested level.
        level: u64,
        /// Configured number of levels.
        num_levels: u64,
    },
    /// A requested commitment height above the level's leaf height. Instead
    /// of silently truncating, the request is rejected: committing to a
    /// malformed range on chain cannot be undone.
    #[error("end {end} was greater than max height {max} for level")]
    HeightAboveLevelMax {
        /// Requested end height.
        end: u64,
        /// The level's maximum height.
        max: u64,
    },
    /// The machine start index computation exceeded `u64`.
    #[error("computed machine start index overflows u64")]
    MachineStartOverflow,
    /// One-step proofs need at least one upper challenge origin height.
    #[error("upper challenge origin heights must have at least length 1")]
    MissingOriginHeights,
    /// A batch range whose limit precedes its starting state.
    #[error("batch limit {limit} cannot be less than from batch {from}")]
    BatchLimitBeforeFrom {
        /// The limiting batch.
        limit: u64,
        /// The starting batch.
        from: u64,
    },
    /// A starting position at or past the end of its own batch.
    #[error("initial position {position} is past end of batch {batch} message count {count}")]
    PositionPastBatchEnd {
        /// Absolute message position.
        position: u64,
        /// The batch it should fall in.
        batch: u64,
        /// That batch's message count.
        count: u64,
    },
    /// A message count outside the batch claimed to contain it.
    #[error("message count {count} is not contained in batch {batch}")]
    BadBatchForMessage {
        /// Absolute message count.
        count: u64,
        /// The claimed containing batch.
        batch: u64,
    },
    /// Commitment construction failed.
    #[error(transparent)]
    Commitment(#[from] CommitmentError),
    /// A locally generated proof failed local verification. Surfaced loudly:
    /// submitting it would revert on chain, and accepting it would break the
    /// security model.
    #[error("could not verify prefix proof locally: {0}")]
    Proof(#[from] ProofError),
    /// The execution machine failed while stepping or hashing.
    #[error("machine error: {0}")]
    Machine(String),
    /// The operation observed cancellation mid-flight and aborted. Long
    /// machine traces poll for this between stepping chunks.
    #[error("operation cancelled")]
    Cancelled,
    /// The chain-view backend failed.
    #[error("backend error: {0}")]
    Backend(String),
}
