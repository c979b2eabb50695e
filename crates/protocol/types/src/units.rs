//! Index newtypes used across challenge levels.
//!
//! Heights are 0-based indices into a level's leaf sequence; the matching
//! tree size is always `height + 1`. Keeping the index and size conventions
//! in distinct vocabulary is what keeps the off-by-one surface of the
//! commitment math manageable.

use derive_more::{Display, From, Into};

/// A position within a challenge level's leaf sequence: a block offset at the
/// block level, a big-step count below it, an opcode count at the deepest
/// level.
#[derive(
    Debug, Display, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Height(pub u64);

/// An inbox batch index.
#[derive(
    Debug, Display, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Batch(pub u64);

/// An absolute opcode index within one block's execution trace.
#[derive(
    Debug, Display, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into,
)]
pub struct OpcodeIndex(pub u64);

/// The number of opcodes between two consecutive leaves at some challenge
/// level.
#[derive(
    Debug, Display, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into,
)]
pub struct StepSize(pub u64);

/// A challenge level: 0 is the block level, each subsequent level refines one
/// step of the level above.
#[derive(
    Debug, Display, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into,
)]
pub struct ChallengeLevel(pub u8);

impl ChallengeLevel {
    /// The block challenge level.
    pub const BLOCK: Self = Self(0);

    /// Whether this is the block challenge level.
    pub const fn is_block_level(&self) -> bool {
        self.0 == 0
    }

    /// The next finer challenge level.
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}
