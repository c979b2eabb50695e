//! Error types for the `rebut-prefix` crate.

use thiserror::Error;

/// Error type for merkle expansion and prefix proof operations.
///
/// The verification variants (`PreRootMismatch`, `PreSizeMismatch`,
/// `PostRootMismatch`, `ProofTooShort`, `IncompleteProofUsage`) form the
/// invalid-prefix-proof class: any of them means the proof does not establish
/// the claimed prefix relation and must never be accepted. Use
/// [`ProofError::is_invalid_proof`] to match the class as a whole.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofError {
    /// The expansion to compute a root for has no entries.
    #[error("merkle expansion is empty")]
    EmptyExpansion,
    /// The expansion has more than [`MAX_LEVEL`](crate::MAX_LEVEL) entries.
    #[error("merkle expansion too large")]
    ExpansionTooLarge,
    /// A subtree level at or above [`MAX_LEVEL`](crate::MAX_LEVEL), or above
    /// the highest level of the expansion being appended to.
    #[error("level too high")]
    LevelTooHigh,
    /// The bit utilities are undefined for zero.
    #[error("input cannot be zero")]
    CannotBeZero,
    /// An appended subtree root cannot be the zero hash.
    #[error("cannot append an empty subtree")]
    EmptySubtreeRoot,
    /// A complete subtree already exists below the level being appended at.
    /// Appending here would leave a hole in the tree.
    #[error("append above least significant bit")]
    AppendAboveLeastSignificantBit,
    /// Ranges must satisfy `start < end`.
    #[error("start not less than end")]
    StartNotLessThanEnd,
    /// Prefix proofs over an empty pre-range are undefined.
    #[error("pre-size cannot be zero")]
    PreSizeCannotBeZero,
    /// The supplied pre-expansion does not hash to the claimed pre-root.
    #[error("pre-expansion root mismatch")]
    PreRootMismatch,
    /// The supplied pre-expansion does not commit to `pre_size` leaves.
    #[error("pre-size does not match expansion")]
    PreSizeMismatch,
    /// Replaying the proof did not reproduce the claimed post-root.
    #[error("post-expansion root mismatch")]
    PostRootMismatch,
    /// The proof ran out of subtree roots before reaching the post-size.
    #[error("proof too short")]
    ProofTooShort,
    /// The proof contained subtree roots beyond those needed.
    #[error("incomplete proof usage")]
    IncompleteProofUsage,
    /// The range is too small to have an interior bisection point.
    #[error("cannot bisect range [{0}, {1}]")]
    Unbisectable(u64, u64),
}

impl ProofError {
    /// Whether this error means a presented prefix proof failed verification,
    /// as opposed to malformed inputs.
    pub const fn is_invalid_proof(&self) -> bool {
        matches!(
            self,
            Self::PreRootMismatch |
                Self::PreSizeMismatch |
                Self::PostRootMismatch |
                Self::ProofTooShort |
                Self::IncompleteProofUsage
        )
    }
}

/// Result type alias for operations that may fail with [`ProofError`].
pub type ProofResult<T> = Result<T, ProofError>;
