//! Global and execution state types with their canonical hash preimages.

use alloy_primitives::{B256, keccak256};

/// A compact fingerprint of L2 execution progress: the block hash and send
/// root after processing messages up to `batch`/`pos_in_batch`. Immutable
/// once computed; any honest party re-executing the same messages derives an
/// identical value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GlobalState {
    /// Hash of the last L2 block covered by this state.
    pub block_hash: B256,
    /// Root of the outgoing-message accumulator at this state.
    pub send_root: B256,
    /// The inbox batch being processed.
    pub batch: u64,
    /// Messages consumed within `batch`.
    pub pos_in_batch: u64,
}

impl GlobalState {
    /// The block-level leaf hash of a machine that finished at this state.
    pub fn machine_finished_hash(&self) -> B256 {
        machine_finished_hash(self)
    }

    /// The canonical hash of this state. The preimage layout is part of the
    /// protocol: the on-chain contracts hash the same bytes.
    pub fn hash(&self) -> B256 {
        let mut data = Vec::with_capacity(13 + 32 + 32 + 8 + 8);
        data.extend_from_slice(b"Global state:");
        data.extend_from_slice(self.block_hash.as_slice());
        data.extend_from_slice(self.send_root.as_slice());
        data.extend_from_slice(&self.batch.to_be_bytes());
        data.extend_from_slice(&self.pos_in_batch.to_be_bytes());
        keccak256(data)
    }
}

/// Status of the execution machine at an asserted state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum MachineStatus {
    /// The machine has more messages to process.
    Running = 0,
    /// The machine consumed its inbox and halted cleanly.
    #[default]
    Finished = 1,
    /// The machine halted with an error.
    Errored = 2,
    /// The claimed position lies beyond the inbox.
    TooFar = 3,
}

/// A claimed machine state after processing up to some inbox position,
/// as posted in assertions and challenged in disputes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionState {
    /// The global state reached.
    pub global_state: GlobalState,
    /// The machine status at that state.
    pub machine_status: MachineStatus,
    /// Root of the block-level history commitment over the range this state
    /// concludes.
    pub end_history_root: B256,
}

impl ExecutionState {
    /// The machine hash this state contributes to a block-level leaf
    /// sequence. The status prefixes keep hashes of differently-terminated
    /// machines from ever colliding. Running states never terminate an
    /// assertion and hash as finished.
    pub fn machine_hash(&self) -> B256 {
        match self.machine_status {
            MachineStatus::Finished | MachineStatus::Running => {
                machine_finished_hash(&self.global_state)
            }
            MachineStatus::Errored => {
                prefixed_state_hash(b"Machine errored:", &self.global_state)
            }
            MachineStatus::TooFar => keccak256(b"Machine too far:"),
        }
    }

    /// The hash identifying this execution claim on chain: the status byte,
    /// the global state hash, and the claimed end history root. Rival
    /// assertions may share a global state and disagree only about the
    /// history root, so it must be part of the identity.
    pub fn execution_hash(&self) -> B256 {
        let mut data = Vec::with_capacity(1 + 32 + 32);
        data.push(self.machine_status as u8);
        data.extend_from_slice(self.global_state.hash().as_slice());
        data.extend_from_slice(self.end_history_root.as_slice());
        keccak256(data)
    }
}

/// The leaf hash of a machine that finished at `state`. Block-level leaf
/// sequences are made of these.
pub(crate) fn machine_finished_hash(state: &GlobalState) -> B256 {
    prefixed_state_hash(b"Machine finished:", state)
}

fn prefixed_state_hash(prefix: &[u8], state: &GlobalState) -> B256 {
    let mut data = Vec::with_capacity(prefix.len() + 32);
    data.extend_from_slice(prefix);
    data.extend_from_slice(state.hash().as_slice());
    keccak256(data)
}
