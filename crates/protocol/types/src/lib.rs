#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod units;
pub use units::{Batch, ChallengeLevel, Height, OpcodeIndex, StepSize};

mod state;
pub use state::{ExecutionState, GlobalState, MachineStatus};

mod chain;
pub use chain::{
    AssertionCreatedInfo, AssertionHash, ChallengeConfig, DisputeChain, EdgeId, EdgeSnapshot,
    EdgeStatus, OneStepData,
};

mod errors;
pub use errors::ChainError;

#[cfg(any(test, feature = "test-utils"))]
mod test_utils;
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::{MockDisputeChain, OneStepOracle};
