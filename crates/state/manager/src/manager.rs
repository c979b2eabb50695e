//! The [`StateManager`].

use alloy_primitives::B256;
use async_trait::async_trait;
use rebut_history::HistoryCommitment;
use rebut_protocol::{Batch, ExecutionState, GlobalState, Height, MachineStatus, OpcodeIndex};
use rebut_provider::{
    AssociatedAssertionMetadata, ExecutionProvider, HashCollectorConfig, L2MessageStateCollector,
    MachineHashCollector, ProofCollector, ProviderError,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    ExecutionBackend, InboxTracker, Machine, MachineFactory,
    cache::{MachineHashCache, TraceKey},
};

/// Opcodes stepped between cancellation checks. One chunk is large enough to
/// amortize the check, small enough that cancelling a multi-million-step
/// trace aborts promptly.
const STEP_CHUNK: u64 = 1 << 20;

/// Configuration for a [`StateManager`].
#[derive(Debug, Clone)]
pub struct StateManagerConfig {
    /// The block challenge level's leaf height.
    pub block_challenge_leaf_height: Height,
    /// The wasm module root machine traces run under.
    pub wasm_module_root: B256,
    /// Maximum number of memoized machine hash traces.
    pub cache_capacity: usize,
}

/// Derives execution states, block-level leaf sequences, machine hash traces
/// and one-step proofs from the local node's validated view of the chain.
///
/// The manager never judges claims: it reports its own view and lets
/// divergence surface as the counterparty's differing answer.
pub struct StateManager {
    inbox: Arc<dyn InboxTracker>,
    backend: Arc<dyn ExecutionBackend>,
    machines: Arc<dyn MachineFactory>,
    config: StateManagerConfig,
    cache: MachineHashCache,
    cancellation: CancellationToken,
}

impl core::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateManager").field("config", &self.config).finish_non_exhaustive()
    }
}

impl StateManager {
    /// Creates a state manager over the chain-view collaborators.
    pub fn new(
        inbox: Arc<dyn InboxTracker>,
        backend: Arc<dyn ExecutionBackend>,
        machines: Arc<dyn MachineFactory>,
        config: StateManagerConfig,
        cancellation: CancellationToken,
    ) -> Self {
        let cache = MachineHashCache::new(config.cache_capacity);
        Self { inbox, backend, machines, config, cache, cancellation }
    }

    /// The machine hashes and global states from `from_state` through
    /// `to_height` states, ending early at `batch_limit`'s last message.
    pub async fn states_in_batch_range(
        &self,
        from_state: GlobalState,
        batch_limit: u64,
        to_height: Height,
    ) -> Result<(Vec<B256>, Vec<GlobalState>), ProviderError> {
        if batch_limit < from_state.batch ||
            (batch_limit == from_state.batch && from_state.pos_in_batch > 0)
        {
            return Err(ProviderError::BatchLimitBeforeFrom {
                limit: batch_limit,
                from: from_state.batch,
            });
        }
        let total_desired_hashes = to_height.0 + 1;
        let mut machine_hashes = Vec::new();
        let mut states = Vec::new();

        let mut prev_batch_msg_count = 0;
        if from_state.batch > 0 {
            prev_batch_msg_count = self.known_batch_message_count(from_state.batch - 1).await?;
        }
        let mut batch_num = from_state.batch;
        let mut curr_batch_msg_count = self.known_batch_message_count(batch_num).await?;
        let mut pos_in_batch = from_state.pos_in_batch;
        let initial_pos = prev_batch_msg_count + pos_in_batch;
        if initial_pos >= curr_batch_msg_count {
            return Err(ProviderError::PositionPastBatchEnd {
                position: initial_pos,
                batch: batch_num,
                count: curr_batch_msg_count,
            });
        }
        let mut pos = initial_pos;
        while (states.len() as u64) < total_desired_hashes {
            if self.cancellation.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let result = if pos > 0 {
                self.backend.result_at_count(pos).await?
            } else {
                Default::default()
            };
            let state = GlobalState {
                block_hash: result.block_hash,
                send_root: result.send_root,
                batch: batch_num,
                pos_in_batch,
            };
            machine_hashes.push(state.machine_finished_hash());
            states.push(state);
            if batch_num >= batch_limit {
                break;
            }
            // Roll into the next batch when this one is exhausted. Its
            // message count is read lazily so a request ending exactly at a
            // batch boundary never touches batches past the limit.
            if pos + 1 == curr_batch_msg_count {
                pos_in_batch = 0;
                batch_num += 1;
                if (states.len() as u64) < total_desired_hashes && batch_num < batch_limit {
                    curr_batch_msg_count = self.known_batch_message_count(batch_num).await?;
                }
            } else {
                pos_in_batch += 1;
            }
            pos += 1;
        }
        Ok((machine_hashes, states))
    }

    /// A batch message count that must already be known locally.
    async fn known_batch_message_count(&self, batch: u64) -> Result<u64, ProviderError> {
        self.inbox
            .batch_message_count(batch)
            .await?
            .ok_or(ProviderError::ChainCatchingUp { batch_count: batch + 1 })
    }

    /// The global state after `count` messages, positioned in `batch_index`.
    async fn find_global_state(
        &self,
        count: u64,
        batch_index: u64,
    ) -> Result<GlobalState, ProviderError> {
        let mut prev_batch_msg_count = 0;
        if batch_index > 0 {
            prev_batch_msg_count = self.known_batch_message_count(batch_index - 1).await?;
            if prev_batch_msg_count > count {
                return Err(ProviderError::BadBatchForMessage { count, batch: batch_index });
            }
        }
        if count != prev_batch_msg_count {
            let batch_msg_count = self.known_batch_message_count(batch_index).await?;
            if count > batch_msg_count {
                return Err(ProviderError::BadBatchForMessage { count, batch: batch_index });
            }
        }
        let result = if count > 0 {
            self.backend.result_at_count(count).await?
        } else {
            Default::default()
        };
        Ok(GlobalState {
            block_hash: result.block_hash,
            send_root: result.send_root,
            batch: batch_index,
            pos_in_batch: count - prev_batch_msg_count,
        })
    }

    /// Whether local validation has reached `state`.
    async fn state_validated(&self, state: GlobalState) -> Result<bool, ProviderError> {
        let Some(last_validated) = self.backend.last_validated().await? else {
            return Ok(false);
        };
        Ok(state.batch < last_validated.batch ||
            (state.batch == last_validated.batch &&
                state.pos_in_batch <= last_validated.pos_in_batch))
    }

    /// The absolute message the challenge at `chal_height` within the
    /// assertion's block range refers to.
    async fn message_num(
        &self,
        metadata: &AssociatedAssertionMetadata,
        chal_height: Height,
    ) -> Result<u64, ProviderError> {
        let mut prev_batch_msg_count = 0;
        if metadata.from_state.batch > 0 {
            prev_batch_msg_count =
                self.known_batch_message_count(metadata.from_state.batch - 1).await?;
        }
        Ok(prev_batch_msg_count + metadata.from_state.pos_in_batch + chal_height.0)
    }

    /// When `message_num` lies at or past the batch limit's end, the
    /// challenged position is inside this party's virtual padding and every
    /// hash is a copy of one finished machine. Returns that machine's global
    /// state, or `None` when the position is a real block.
    async fn virtual_state(
        &self,
        message_num: u64,
        batch_limit: Batch,
    ) -> Result<Option<GlobalState>, ProviderError> {
        let limit_msg_count = if batch_limit.0 == 0 {
            0
        } else {
            self.known_batch_message_count(batch_limit.0 - 1).await?
        };
        if message_num < limit_msg_count {
            return Ok(None);
        }
        let result = if limit_msg_count > 0 {
            self.backend.result_at_count(limit_msg_count).await?
        } else {
            Default::default()
        };
        Ok(Some(GlobalState {
            block_hash: result.block_hash,
            send_root: result.send_root,
            batch: batch_limit.0,
            pos_in_batch: 0,
        }))
    }

    /// Steps `machine` by `n` opcodes in cancellable chunks.
    async fn step_machine(
        &self,
        machine: &mut Box<dyn Machine>,
        mut n: u64,
    ) -> Result<(), ProviderError> {
        while n > 0 {
            if self.cancellation.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let chunk = n.min(STEP_CHUNK);
            machine.step(chunk)?;
            n -= chunk;
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// Gathers machine hashes `step_size` apart starting at `start_index`,
    /// stopping early once the machine halts. Virtual padding past the halt
    /// is the commitment layer's job, not this one's.
    async fn machine_hashes_with_step_size(
        &self,
        message_num: u64,
        start_index: OpcodeIndex,
        step_size: u64,
        num_desired_hashes: u64,
    ) -> Result<Vec<B256>, ProviderError> {
        let mut machine = self.machines.machine_at(message_num).await?;
        if start_index.0 > 0 {
            self.step_machine(&mut machine, start_index.0).await?;
        }
        let mut hashes = vec![machine.hash()];
        while (hashes.len() as u64) < num_desired_hashes {
            if !machine.is_running() {
                break;
            }
            self.step_machine(&mut machine, step_size).await?;
            hashes.push(machine.hash());
        }
        debug!(
            target: "state_manager",
            message = message_num,
            gathered = hashes.len(),
            requested = num_desired_hashes,
            "finished gathering machine hashes"
        );
        Ok(hashes)
    }
}

#[async_trait]
impl ExecutionProvider for StateManager {
    async fn execution_state_after_previous_state(
        &self,
        max_inbox_count: u64,
        previous_global_state: GlobalState,
    ) -> Result<ExecutionState, ProviderError> {
        if max_inbox_count == 0 {
            return Err(ProviderError::ZeroMaxInboxCount);
        }
        let mut batch_index = max_inbox_count;
        let max_number_of_blocks = self.config.block_challenge_leaf_height.0;
        let mut message_count = self
            .inbox
            .batch_message_count(batch_index - 1)
            .await?
            .ok_or(ProviderError::ChainCatchingUp { batch_count: max_inbox_count })?;
        let mut previous_message_count = 0;
        if previous_global_state.batch > 0 {
            previous_message_count = self
                .inbox
                .batch_message_count(previous_global_state.batch - 1)
                .await?
                .ok_or(ProviderError::ChainCatchingUp { batch_count: max_inbox_count })?;
        }
        previous_message_count += previous_global_state.pos_in_batch;

        // An assertion claims at most one block challenge's worth of
        // messages. Anything longer is capped here and the remainder left
        // for a subsequent overflow assertion.
        let max_message_count = previous_message_count + max_number_of_blocks;
        if message_count > max_message_count {
            message_count = max_message_count;
            batch_index = self.inbox.batch_containing_message(message_count).await?;
        }
        let global_state = self.find_global_state(message_count, batch_index).await?;
        if !self.state_validated(global_state).await? {
            return Err(ProviderError::ChainCatchingUp { batch_count: max_inbox_count });
        }

        let (history_states, _) = self
            .states_in_batch_range(
                previous_global_state,
                global_state.batch,
                Height(max_number_of_blocks),
            )
            .await?;
        let commitment = HistoryCommitment::new(&history_states, max_number_of_blocks + 1)?;
        Ok(ExecutionState {
            global_state,
            machine_status: MachineStatus::Finished,
            end_history_root: commitment.merkle,
        })
    }
}

#[async_trait]
impl L2MessageStateCollector for StateManager {
    async fn l2_message_states_up_to(
        &self,
        from_state: GlobalState,
        batch_limit: Batch,
        to_height: Option<Height>,
    ) -> Result<Vec<B256>, ProviderError> {
        let to = to_height.unwrap_or(self.config.block_challenge_leaf_height);
        let (mut hashes, _) =
            self.states_in_batch_range(from_state, batch_limit.0, to).await?;
        // Virtual blocks: when the real messages end before the requested
        // height, the final state's hash repeats so every party commits to
        // sequences of identical length.
        if let Some(last) = hashes.last().copied() {
            hashes.resize(to.0 as usize + 1, last);
        }
        Ok(hashes)
    }
}

#[async_trait]
impl MachineHashCollector for StateManager {
    async fn collect_machine_hashes(
        &self,
        cfg: &HashCollectorConfig,
    ) -> Result<Vec<B256>, ProviderError> {
        let message_num =
            self.message_num(&cfg.assertion_metadata, cfg.block_challenge_height).await?;
        if let Some(state) =
            self.virtual_state(message_num, cfg.assertion_metadata.batch_limit).await?
        {
            return Ok(vec![state.machine_finished_hash()]);
        }

        let block = self.backend.result_at_count(message_num + 1).await?;
        let key = TraceKey {
            block_hash: block.block_hash,
            wasm_module_root: cfg.assertion_metadata.wasm_module_root,
            message: message_num,
            step_heights: cfg.step_heights.iter().map(|h| h.0).collect(),
        };
        if let Some(cached) = self.cache.get(&key, cfg.num_desired_hashes) {
            return Ok(cached);
        }

        let hashes = self
            .machine_hashes_with_step_size(
                message_num,
                cfg.machine_start_index,
                cfg.step_size.0,
                cfg.num_desired_hashes,
            )
            .await?;
        // A length-one trace is cheaper to recompute than to cache.
        if hashes.len() > 1 {
            self.cache.put(key, hashes.clone());
        }
        Ok(hashes)
    }
}

#[async_trait]
impl ProofCollector for StateManager {
    async fn collect_proof(
        &self,
        assertion_metadata: &AssociatedAssertionMetadata,
        block_challenge_height: Height,
        machine_index: OpcodeIndex,
    ) -> Result<Vec<u8>, ProviderError> {
        let message_num = self.message_num(assertion_metadata, block_challenge_height).await?;
        if let Some(state) =
            self.virtual_state(message_num, assertion_metadata.batch_limit).await?
        {
            info!(
                target: "state_manager",
                message = message_num,
                machine_index = machine_index.0,
                "collecting one-step proof from virtual state"
            );
            return self.machines.finished_machine_proof(&state).await;
        }
        info!(
            target: "state_manager",
            message = message_num,
            machine_index = machine_index.0,
            "collecting one-step proof"
        );
        let mut machine = self.machines.machine_at(message_num).await?;
        if machine_index.0 > 0 {
            self.step_machine(&mut machine, machine_index.0).await?;
        }
        Ok(machine.serialize_proof())
    }
}
