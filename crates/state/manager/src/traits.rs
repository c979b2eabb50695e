//! Collaborator traits: the chain views and machines the state manager
//! consumes. All of these are external systems from this crate's
//! perspective; tests and simulations supply in-memory implementations.

use alloy_primitives::B256;
use async_trait::async_trait;
use rebut_protocol::{GlobalState, MachineStatus};
use rebut_provider::ProviderError;

/// The per-block execution result recorded by the execution engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Hash of the block produced by the message.
    pub block_hash: B256,
    /// Outgoing-message accumulator root after the message.
    pub send_root: B256,
}

/// Batch bookkeeping from the inbox tracking pipeline.
#[async_trait]
pub trait InboxTracker: Send + Sync {
    /// The total message count once `batch` has been fully processed, or
    /// `None` when the local node has not yet seen that batch. `None` is the
    /// "don't know yet" signal that becomes
    /// [`ProviderError::ChainCatchingUp`] upstream.
    async fn batch_message_count(&self, batch: u64) -> Result<Option<u64>, ProviderError>;

    /// The batch containing the message with the given absolute count.
    async fn batch_containing_message(&self, message_count: u64)
    -> Result<u64, ProviderError>;
}

/// Read access to validated execution results.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// The execution result after processing exactly `count` messages.
    /// `count` is at least 1; the zero-message state is the genesis state and
    /// never looked up.
    async fn result_at_count(&self, count: u64) -> Result<ExecutionResult, ProviderError>;

    /// The most recent validated global state, or `None` before validation
    /// has produced anything.
    async fn last_validated(&self) -> Result<Option<GlobalState>, ProviderError>;
}

/// A deterministic execution-trace machine positioned within one block's
/// execution. The machine is a black box: the state manager only steps it,
/// hashes it, and serializes proofs from it.
pub trait Machine: Send {
    /// Advances up to `n` opcodes. Stepping a halted machine is a no-op.
    fn step(&mut self, n: u64) -> Result<(), ProviderError>;

    /// The canonical hash of the current machine state.
    fn hash(&self) -> B256;

    /// The machine's status at the current position.
    fn status(&self) -> MachineStatus;

    /// Whether the machine can still step.
    fn is_running(&self) -> bool {
        matches!(self.status(), MachineStatus::Running)
    }

    /// Serializes the state needed by the one-step prover to verify the next
    /// opcode from the current position.
    fn serialize_proof(&self) -> Vec<u8>;
}

/// Provides machines positioned at the start of a message's execution.
#[async_trait]
pub trait MachineFactory: Send + Sync {
    /// A machine at opcode 0 of the block produced by `message_count`.
    async fn machine_at(&self, message_count: u64)
    -> Result<Box<dyn Machine>, ProviderError>;

    /// The one-step proof payload of a machine that already finished at
    /// `state`. Needed when the disputed position falls in the virtual
    /// padding past the end of real execution.
    async fn finished_machine_proof(
        &self,
        state: &GlobalState,
    ) -> Result<Vec<u8>, ProviderError>;
}
