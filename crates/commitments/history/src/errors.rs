//! Error types for the `rebut-history` crate.

use thiserror::Error;

/// Error type for history commitment construction.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitmentError {
    /// A commitment must cover at least one real leaf.
    #[error("must commit to at least one leaf")]
    EmptyLeaves,
    /// More real leaves were supplied than the virtual size admits.
    #[error("invalid leaf count: {leaves} leaves exceed virtual size {virtual_size}")]
    InvalidLeafCount {
        /// Number of real leaves supplied.
        leaves: u64,
        /// Virtual size of the commitment.
        virtual_size: u64,
    },
    /// Virtual sizes are 1-indexed; zero commits to nothing.
    #[error("virtual size cannot be zero")]
    ZeroVirtualSize,
    /// A subtree limit smaller than the virtual size it must hold.
    #[error("limit {limit} should be >= virtual size {virtual_size}")]
    LimitTooSmall {
        /// The complete-subtree capacity.
        limit: u64,
        /// The virtual size that must fit inside it.
        virtual_size: u64,
    },
    /// The filler ladder was not populated deep enough for the tree.
    #[error("insufficient fillers: want {want}, got {got}")]
    InsufficientFillers {
        /// Ladder depth required.
        want: u64,
        /// Ladder depth available.
        got: u64,
    },
    /// A prefix index at or past the virtual size.
    #[error("prefix index {index} out of range for virtual size {virtual_size}")]
    IndexOutOfRange {
        /// The requested prefix index.
        index: u64,
        /// The virtual size of the commitment.
        virtual_size: u64,
    },
}

/// Result type alias for operations that may fail with [`CommitmentError`].
pub type CommitmentResult<T> = Result<T, CommitmentError>;
