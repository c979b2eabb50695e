//! Error types for the `rebut-challenge` crate.

use rebut_protocol::ChainError;
use rebut_provider::ProviderError;
use thiserror::Error;

/// Error type for challenge moves and assertion posting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChallengeError {
    /// A chain interaction failed; see [`ChainError::is_fatal`] for whether
    /// the move can be retried.
    #[error(transparent)]
    Chain(#[from] ChainError),
    /// Commitment or proof computation failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// An edge range that cannot be bisected was asked to bisect.
    #[error("edge range [{start}, {end}] is not bisectable")]
    Unbisectable {
        /// Range start height.
        start: u64,
        /// Range end height.
        end: u64,
    },
}

impl ChallengeError {
    /// Whether this error ends the losing party's challenge. Provider-side
    /// failures are never fatal: they are local bugs or transient state, not
    /// protocol outcomes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Chain(err) if err.is_fatal())
    }

    /// Whether the underlying cause is the recoverable catching-up signal,
    /// which defers the whole move to the next tick.
    pub fn is_catching_up(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::ChainCatchingUp { .. }))
    }
}
