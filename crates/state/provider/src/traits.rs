//! The state collector capability traits.
//!
//! One trait per concern so adversarial test doubles can decorate a single
//! capability while delegating the rest; [`StateProvider`] is the composite a
//! full state manager satisfies.

use alloy_primitives::B256;
use async_trait::async_trait;
use rebut_protocol::{Batch, ExecutionState, GlobalState, Height, OpcodeIndex};

use crate::{AssociatedAssertionMetadata, HashCollectorConfig, ProviderError};

/// Produces the per-message machine hashes of the block challenge level.
#[async_trait]
pub trait L2MessageStateCollector: Send + Sync {
    /// The ordered machine hashes from `from_state` up to `to_height`
    /// (inclusive), or to the end of `batch_limit` when unbounded. When the
    /// real messages run out before `to_height`, the final state's hash
    /// repeats as virtual blocks so the sequence always has `to_height + 1`
    /// entries.
    async fn l2_message_states_up_to(
        &self,
        from_state: GlobalState,
        batch_limit: Batch,
        to_height: Option<Height>,
    ) -> Result<Vec<B256>, ProviderError>;
}

/// Collects intra-block machine hashes for the machine challenge levels.
#[async_trait]
pub trait MachineHashCollector: Send + Sync {
    /// Steps the execution machine per `cfg` and returns up to
    /// `cfg.num_desired_hashes` state hashes.
    async fn collect_machine_hashes(
        &self,
        cfg: &HashCollectorConfig,
    ) -> Result<Vec<B256>, ProviderError>;
}

/// Produces one-step proof payloads for the deepest challenge level.
#[async_trait]
pub trait ProofCollector: Send + Sync {
    /// Serializes the machine state needed to prove the single opcode at
    /// `machine_index` within the block at `block_challenge_height`.
    async fn collect_proof(
        &self,
        assertion_metadata: &AssociatedAssertionMetadata,
        block_challenge_height: Height,
        machine_index: OpcodeIndex,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Derives assertable execution states from the validated chain.
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// The execution state immediately following `previous_global_state`,
    /// bounded by `max_inbox_count` batches and the block challenge leaf
    /// height. Returns [`ProviderError::ChainCatchingUp`] while local
    /// validation has not reached the requested position — the distinction
    /// between "don't know yet" and "disagree" carries the whole retry
    /// policy.
    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: GlobalState,
    ) -> Result<ExecutionState, ProviderError>;
}

/// The full capability set of a layer-2 state provider.
pub trait StateProvider:
    L2MessageStateCollector + MachineHashCollector + ProofCollector + ExecutionProvider
{
}

impl<T> StateProvider for T where
    T: L2MessageStateCollector + MachineHashCollector + ProofCollector + ExecutionProvider
{
}
