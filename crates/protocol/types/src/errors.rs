//! Chain error taxonomy.

use rebut_prefix::ProofError;
use thiserror::Error;

/// Error type for dispute chain interactions.
///
/// The variants split into three classes with very different handling:
/// transient errors are retried on the next poll tick, benign outcomes are
/// treated as success, and fatal outcomes mean this party's position lost —
/// retrying a fatal move would only burn gas re-proving the loss.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A transport or node failure. Transient: retry on the next tick.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The referenced assertion or edge is not (yet) known on chain.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The submitted assertion or edge already exists. Benign: another party
    /// (or a previous attempt) already made this exact move.
    #[error("already exists")]
    AlreadyExists,
    /// The one-step proof's computed post-state is not committed to by this
    /// edge. The claimed execution diverges from canonical execution: this
    /// party has lost the challenge.
    #[error("one step proof ends in rival state")]
    SameOspEnd,
    /// The asserted state misreads the sequencer inbox. Fatal for the
    /// asserting party.
    #[error("bad sequencer inbox message")]
    BadSequencerInboxMessage,
    /// The contract reports this party's claim as already defeated.
    #[error("challenge lost")]
    LostChallenge,
    /// A bisection or subchallenge move carried a prefix proof that failed
    /// on-chain verification.
    #[error("prefix proof rejected: {0}")]
    PrefixProof(#[from] ProofError),
    /// A boundary leaf inclusion proof failed verification.
    #[error("invalid inclusion proof")]
    InvalidInclusionProof,
    /// A move that violates the challenge rules (wrong level, unrivaled
    /// bisection, malformed commitment range).
    #[error("invalid move: {0}")]
    InvalidMove(&'static str),
}

impl ChainError {
    /// Whether this error is terminal for the submitting party's claim.
    /// Fatal errors are expected and desired on the dishonest side of a
    /// dispute; they must never be retried as if transient.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SameOspEnd |
                Self::BadSequencerInboxMessage |
                Self::LostChallenge |
                Self::InvalidInclusionProof |
                Self::PrefixProof(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(ChainError::SameOspEnd.is_fatal());
        assert!(ChainError::LostChallenge.is_fatal());
        assert!(ChainError::BadSequencerInboxMessage.is_fatal());
        assert!(!ChainError::Rpc("timeout".into()).is_fatal());
        assert!(!ChainError::AlreadyExists.is_fatal());
        assert!(!ChainError::NotFound("edge").is_fatal());
    }
}
